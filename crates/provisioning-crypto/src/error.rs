//! Crypto unit error types.

use thiserror::Error;

/// Errors raised constructing key material for the crypto unit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// `factory_key` was not exactly 32 bytes.
    #[error("invalid factory key length: expected 32, got {0}")]
    InvalidFactoryKeyLength(usize),
}
