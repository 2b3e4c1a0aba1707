//! AES-128-CTR stream encryption and the Keccak-256 MAC used by envelopes.

use ctr::cipher::{KeyIvInit, StreamCipher};
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;

use crate::core::errors::{KeystoreError, Result};

/// Cipher tag written into every envelope
pub const CIPHER_AES_128_CTR: &str = "aes-128-ctr";

pub const AES_KEY_LENGTH: usize = 16;
pub const IV_LENGTH: usize = 16;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

/// Applies the AES-128-CTR keystream; encryption and decryption are the same call.
pub fn aes_128_ctr(key: &[u8], iv: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if key.len() != AES_KEY_LENGTH || iv.len() != IV_LENGTH {
        return Err(KeystoreError::Crypto(format!(
            "aes-128-ctr needs a {}-byte key and {}-byte iv, got {} and {}",
            AES_KEY_LENGTH,
            IV_LENGTH,
            key.len(),
            iv.len()
        )));
    }
    let mut cipher = Aes128Ctr::new_from_slices(key, iv)
        .map_err(|e| KeystoreError::Crypto(format!("cipher init failed: {}", e)))?;
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    Ok(out)
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// `keccak256(mac_key || ciphertext)`
pub fn keystore_mac(mac_key: &[u8], ciphertext: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(mac_key);
    hasher.update(ciphertext);
    hasher.finalize().into()
}

pub fn mac_matches(expected: &[u8], actual: &[u8]) -> bool {
    expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
}
