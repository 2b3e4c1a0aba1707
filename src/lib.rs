// src/lib.rs
//! Encrypted keystore for a hot wallet.
//!
//! Several user secrets each wrap one master key; private keys and seed
//! phrases are stored encrypted under that master key. See [`keystore::Keystore`].

pub mod cli;
pub mod core;
pub mod crypto;
pub mod keystore;
pub mod security;
pub mod signer;
pub mod storage;

pub use crate::core::config::KeystoreConfig;
pub use crate::core::errors::{ErrorLevel, KeystoreError, Result};
pub use crate::keystore::{Keystore, KeystoreBuilder};
pub use crate::signer::{KeySigner, SignerRegistry};
pub use crate::storage::{MemoryStorage, SqliteStorage, Storage};
