//! Signer backed by a decrypted in-memory private key.

use std::fmt;

use async_trait::async_trait;
use k256::ecdsa::SigningKey;

use super::address::{address_of, signing_key};
use super::{eip191_hash, KeySigner};
use crate::core::errors::{KeystoreError, Result};
use crate::keystore::types::KeyType;

/// The key is scrubbed when the signer is dropped.
pub struct InternalSigner {
    key: SigningKey,
    address: String,
}

impl InternalSigner {
    pub fn new(private_key: &[u8]) -> Result<Self> {
        let key = signing_key(private_key)?;
        let address = address_of(&key);
        Ok(Self { key, address })
    }
}

impl fmt::Debug for InternalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalSigner").field("address", &self.address).finish()
    }
}

#[async_trait]
impl KeySigner for InternalSigner {
    fn address(&self) -> &str {
        &self.address
    }

    fn key_type(&self) -> KeyType {
        KeyType::Internal
    }

    async fn sign_digest(&self, digest: [u8; 32]) -> Result<Vec<u8>> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| KeystoreError::Crypto(format!("signing failed: {}", e)))?;
        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&signature.to_bytes());
        out.push(recovery_id.to_byte() + 27);
        Ok(out)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.sign_digest(eip191_hash(message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[tokio::test]
    async fn test_sign_message_recovers_to_signer() {
        let key = hex::decode(DEV_KEY).unwrap();
        let signer = InternalSigner::new(&key).unwrap();
        assert_eq!(signer.address(), "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

        let sig = signer.sign_message(b"hello").await.unwrap();
        assert_eq!(sig.len(), 65);
        assert!(sig[64] == 27 || sig[64] == 28);

        let signature = Signature::from_slice(&sig[..64]).unwrap();
        let recid = RecoveryId::from_byte(sig[64] - 27).unwrap();
        let recovered =
            VerifyingKey::recover_from_prehash(&eip191_hash(b"hello"), &signature, recid).unwrap();
        assert_eq!(&recovered, signer.key.verifying_key());
    }

    #[test]
    fn test_debug_does_not_print_key() {
        let key = hex::decode(DEV_KEY).unwrap();
        let signer = InternalSigner::new(&key).unwrap();
        assert!(!format!("{:?}", signer).contains(DEV_KEY));
    }
}
