//! Signing capabilities handed out by the keystore.
//!
//! Internal keys sign in-process. External key types (hardware devices) are
//! served by factories the host registers on a [`SignerRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::errors::{KeystoreError, Result};
use crate::crypto::cipher::keccak256;
use crate::keystore::types::{Key, KeyType};

pub mod address;
mod internal;

pub use internal::InternalSigner;

#[async_trait]
pub trait KeySigner: Send + Sync {
    fn address(&self) -> &str;

    fn key_type(&self) -> KeyType;

    /// 65-byte `r || s || v` signature over a 32-byte digest, `v` in {27, 28}.
    async fn sign_digest(&self, digest: [u8; 32]) -> Result<Vec<u8>>;

    /// EIP-191 personal message signature.
    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Builds signers for keys whose secret lives on an external device.
pub trait ExternalSignerFactory: Send + Sync {
    fn create(&self, key: &Key) -> Result<Arc<dyn KeySigner>>;
}

/// `keccak256("\x19Ethereum Signed Message:\n" || len || message)`
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut data = Vec::with_capacity(prefix.len() + message.len());
    data.extend_from_slice(prefix.as_bytes());
    data.extend_from_slice(message);
    keccak256(&data)
}

#[derive(Clone, Default)]
pub struct SignerRegistry {
    factories: HashMap<KeyType, Arc<dyn ExternalSignerFactory>>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key_type: KeyType, factory: Arc<dyn ExternalSignerFactory>) {
        self.factories.insert(key_type, factory);
    }

    pub fn with(mut self, key_type: KeyType, factory: Arc<dyn ExternalSignerFactory>) -> Self {
        self.register(key_type, factory);
        self
    }

    pub fn create(&self, key: &Key) -> Result<Arc<dyn KeySigner>> {
        let factory = self
            .factories
            .get(&key.key_type)
            .ok_or_else(|| KeystoreError::UnsupportedSignerType(key.key_type.to_string()))?;
        factory.create(key)
    }
}

impl fmt::Debug for SignerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
