//! Public-key encryption of a single private key for device-to-device transfer.
//!
//! ECIES over secp256k1: ephemeral ECDH, HKDF-SHA256 to a 32-byte key, then
//! AES-256-GCM with the ephemeral public key as associated data.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use hkdf::Hkdf;
use k256::ecdh::{EphemeralSecret, SharedSecret};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::core::errors::{KeystoreError, Result};
use crate::security::SecretVec;

const WRAP_INFO: &[u8] = b"wallet-keystore-sync-v1";
const NONCE_LENGTH: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKeyBlob {
    /// Compressed SEC1 hex of the sender's ephemeral key
    pub ephem_public_key: String,
    pub nonce: String,
    pub ciphertext: String,
}

pub fn public_key_hex(pk: &PublicKey) -> String {
    hex::encode(pk.to_encoded_point(true).as_bytes())
}

pub fn parse_public_key(hex_str: &str) -> Result<PublicKey> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x"))?;
    PublicKey::from_sec1_bytes(&bytes)
        .map_err(|_| KeystoreError::InvalidInput("invalid secp256k1 public key".to_string()))
}

fn wrapping_key(shared: &SharedSecret, ephem_public: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(Some(ephem_public), shared.raw_secret_bytes());
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(WRAP_INFO, &mut okm[..])
        .map_err(|e| KeystoreError::Crypto(format!("HKDF expansion failed: {}", e)))?;
    Ok(okm)
}

pub fn encrypt_for_public_key(recipient: &PublicKey, plaintext: &[u8]) -> Result<EncryptedKeyBlob> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephem_public = ephemeral.public_key().to_encoded_point(true);
    let shared = ephemeral.diffie_hellman(recipient);
    let key = wrapping_key(&shared, ephem_public.as_bytes())?;

    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|_| KeystoreError::Crypto("Invalid key length".to_string()))?;
    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = aes_gcm::Nonce::from(nonce_bytes);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad: ephem_public.as_bytes() })
        .map_err(|_| KeystoreError::Crypto("Encryption failed".to_string()))?;

    Ok(EncryptedKeyBlob {
        ephem_public_key: hex::encode(ephem_public.as_bytes()),
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    })
}

pub fn decrypt_with_secret_key(
    secret: &SecretKey,
    blob: &EncryptedKeyBlob,
) -> Result<SecretVec> {
    let ephem_bytes = hex::decode(&blob.ephem_public_key)?;
    let ephem_public = PublicKey::from_sec1_bytes(&ephem_bytes)
        .map_err(|_| KeystoreError::InvalidInput("invalid ephemeral public key".to_string()))?;
    let nonce_bytes: [u8; NONCE_LENGTH] = hex::decode(&blob.nonce)?
        .try_into()
        .map_err(|_| KeystoreError::InvalidInput("invalid nonce length".to_string()))?;
    let ciphertext = hex::decode(&blob.ciphertext)?;

    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), ephem_public.as_affine());
    let key = wrapping_key(&shared, &ephem_bytes)?;

    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|_| KeystoreError::Crypto("Invalid key length".to_string()))?;
    let nonce = aes_gcm::Nonce::from(nonce_bytes);
    let plaintext = cipher
        .decrypt(&nonce, Payload { msg: &ciphertext, aad: &ephem_bytes })
        .map_err(|_| KeystoreError::Crypto("Decryption failed".to_string()))?;
    Ok(Zeroizing::new(plaintext))
}
