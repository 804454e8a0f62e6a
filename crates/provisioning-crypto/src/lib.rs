//! Provisioning Cryptographic Primitives
//!
//! Pure functions implementing the DATA payload protection scheme:
//! CMAC-AES-128 over the header and plaintext yields a 5-byte MIC;
//! AES-128-CTR then encrypts `plaintext || mic` using an initial
//! counter block derived from the node-supplied IV and the session's
//! locally incremented 16-bit counter.
//!
//! ```text
//! factory_key(32B) = auth_key(16B) || enc_key(16B)
//!
//! to_auth = header(9B, counter included, no MIC) || plaintext
//! mic     = CMAC-AES-128(auth_key, to_auth)[0..5]
//!
//! icb     = (counter + u128::from_le_bytes(iv)) mod 2^128
//! cipher  = AES-128-CTR(enc_key, icb) applied to (plaintext || mic)
//! ```
//!
//! Everything here is little-endian, matching the on-wire convention;
//! the counter wraps past `2^16` and the ICB wraps past `2^128` by
//! design (see the design notes on counter wraparound semantics).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod key;
mod mic;
mod payload;

pub use error::CryptoError;
pub use key::FactoryKey;
pub use mic::compute_mic;
pub use payload::{apply_keystream, compute_icb};
