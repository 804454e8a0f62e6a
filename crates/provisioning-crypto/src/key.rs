//! Factory key material: a 32-byte pre-shared secret split into a
//! 16-byte CMAC key and a 16-byte AES-CTR key.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// The node's factory key, split into its CMAC and AES-CTR halves.
///
/// Zeroized on drop; never logged or `Debug`-formatted in full.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FactoryKey {
    auth_key: [u8; 16],
    enc_key: [u8; 16],
}

impl FactoryKey {
    /// Split a 32-byte factory key into `auth_key = key[0..16]` and
    /// `enc_key = key[16..32]`.
    pub fn from_bytes(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != 32 {
            return Err(CryptoError::InvalidFactoryKeyLength(key.len()));
        }
        let mut auth_key = [0u8; 16];
        let mut enc_key = [0u8; 16];
        auth_key.copy_from_slice(&key[0..16]);
        enc_key.copy_from_slice(&key[16..32]);
        Ok(Self { auth_key, enc_key })
    }

    /// The CMAC-AES-128 authentication key.
    #[must_use]
    pub fn auth_key(&self) -> &[u8; 16] {
        &self.auth_key
    }

    /// The AES-128-CTR encryption key.
    #[must_use]
    pub fn enc_key(&self) -> &[u8; 16] {
        &self.enc_key
    }
}

impl std::fmt::Debug for FactoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_32_bytes_into_two_16_byte_halves() {
        let mut raw = [0u8; 32];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = i as u8;
        }
        let key = FactoryKey::from_bytes(&raw).unwrap();
        assert_eq!(key.auth_key(), &raw[0..16]);
        assert_eq!(key.enc_key(), &raw[16..32]);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            FactoryKey::from_bytes(&[0u8; 16]),
            Err(CryptoError::InvalidFactoryKeyLength(16))
        );
    }
}
