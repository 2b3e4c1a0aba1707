//! Ethereum address derivation and EIP-55 formatting.

use k256::ecdsa::SigningKey;
use zeroize::Zeroizing;

use crate::core::errors::{KeystoreError, Result};
use crate::crypto::cipher::keccak256;

pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Parses a 32-byte hex private key, `0x` prefix optional.
pub fn parse_private_key(input: &str) -> Result<Zeroizing<[u8; PRIVATE_KEY_LENGTH]>> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.len() != 2 * PRIVATE_KEY_LENGTH {
        return Err(KeystoreError::InvalidPrivateKey);
    }
    let mut out = Zeroizing::new([0u8; PRIVATE_KEY_LENGTH]);
    hex::decode_to_slice(digits, &mut out[..]).map_err(|_| KeystoreError::InvalidPrivateKey)?;
    // rejects zero and values >= the curve order
    SigningKey::from_slice(&out[..]).map_err(|_| KeystoreError::InvalidPrivateKey)?;
    Ok(out)
}

pub fn signing_key(private_key: &[u8]) -> Result<SigningKey> {
    SigningKey::from_slice(private_key).map_err(|_| KeystoreError::InvalidPrivateKey)
}

pub fn address_of(key: &SigningKey) -> String {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    to_checksum_address(&hex::encode(&hash[12..]))
}

pub fn address_from_private_key(private_key: &[u8]) -> Result<String> {
    Ok(address_of(&signing_key(private_key)?))
}

/// EIP-55 mixed-case form of a 20-byte hex address.
pub fn to_checksum_address(address: &str) -> String {
    let addr = address.trim_start_matches("0x").to_lowercase();
    let hash = hex::encode(keccak256(addr.as_bytes()));

    let checksummed: String = addr
        .chars()
        .zip(hash.chars())
        .map(|(c, h)| if c.is_ascii_alphabetic() && h >= '8' { c.to_ascii_uppercase() } else { c })
        .collect();
    format!("0x{}", checksummed)
}

/// Validates a caller-supplied address and returns its checksummed form.
pub fn normalize_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(KeystoreError::InvalidInput(format!("invalid address {}", address)));
    }
    Ok(to_checksum_address(digits))
}
