//! Initial counter block construction and AES-128-CTR keystream
//! application for the DATA payload.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128LE;

/// Form the 128-bit initial counter block:
/// `(counter + little_endian_u128(iv)) mod 2^128`, serialized
/// little-endian to 16 bytes. Wraparound is intentional.
#[must_use]
pub fn compute_icb(counter: u16, iv: &[u8; 16]) -> [u8; 16] {
    let iv_int = u128::from_le_bytes(*iv);
    let icb_int = iv_int.wrapping_add(u128::from(counter));
    icb_int.to_le_bytes()
}

/// Apply the AES-128-CTR keystream in place. Symmetric: the same call
/// encrypts plaintext or decrypts ciphertext given the same key/ICB.
pub fn apply_keystream(enc_key: &[u8; 16], icb: &[u8; 16], buf: &mut [u8]) {
    let mut cipher = Ctr128LE::<Aes128>::new(enc_key.into(), icb.into());
    cipher.apply_keystream(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icb_is_counter_plus_le_iv_mod_2_128() {
        let iv = [0u8; 16];
        assert_eq!(compute_icb(0, &iv), [0u8; 16]);
        let mut expected = [0u8; 16];
        expected[0] = 5;
        assert_eq!(compute_icb(5, &iv), expected);
    }

    #[test]
    fn icb_wraps_around() {
        let mut iv = [0xFFu8; 16];
        // iv as LE u128 is u128::MAX; adding 1 must wrap to zero.
        iv = iv.map(|_| 0xFF);
        let icb = compute_icb(1, &iv);
        assert_eq!(icb, [0u8; 16]);
    }

    /// NIST SP 800-38A §F.5.1 CTR-AES128.Encrypt, block 1: encrypting
    /// the published plaintext block under the published key with the
    /// published initial counter block as `icb` must reproduce the
    /// published ciphertext block exactly. The first keystream block
    /// depends only on `AES_encrypt(key, icb)`, so this holds
    /// regardless of the little-endian-vs-big-endian counter
    /// increment convention used for subsequent blocks.
    #[test]
    fn first_block_matches_nist_sp800_38a_ctr_vector() {
        let key: [u8; 16] = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap().try_into().unwrap();
        let icb: [u8; 16] = hex::decode("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff").unwrap().try_into().unwrap();
        let mut buf: Vec<u8> = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let expected = hex::decode("874d6191b620e3261bef6864990db6ce").unwrap();
        apply_keystream(&key, &icb, &mut buf);
        assert_eq!(buf, expected);
    }

    #[test]
    fn encrypt_then_decrypt_is_identity() {
        let key = [0x7Au8; 16];
        let icb = compute_icb(3, &[0u8; 16]);
        let mut buf = b"hello provisioning world!!".to_vec();
        let original = buf.clone();
        apply_keystream(&key, &icb, &mut buf);
        assert_ne!(buf, original);
        apply_keystream(&key, &icb, &mut buf);
        assert_eq!(buf, original);
    }
}
