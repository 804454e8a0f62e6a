//! CMAC-AES-128 message integrity code.

use aes::Aes128;
use cmac::{Cmac, Mac};

/// Compute the 5-byte MIC over `to_auth` using `auth_key`.
///
/// `to_auth` is the DATA frame layout with the current (post-increment)
/// counter and the plaintext payload, with no MIC appended: the
/// 9-byte header plus plaintext.
#[must_use]
#[allow(clippy::expect_used, reason = "new_from_slice only fails on wrong key length, and auth_key is a fixed [u8; 16]")]
pub fn compute_mic(auth_key: &[u8; 16], to_auth: &[u8]) -> [u8; 5] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(auth_key)
        .expect("CMAC-AES-128 accepts any 16-byte key");
    mac.update(to_auth);
    let full = mac.finalize().into_bytes();
    let mut mic = [0u8; 5];
    mic.copy_from_slice(&full[0..5]);
    mic
}
