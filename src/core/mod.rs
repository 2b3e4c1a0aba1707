pub mod config;
pub mod errors;
pub mod memory_protection;

pub use config::{KeystoreConfig, ScryptConfig, StorageConfig};
pub use errors::{ErrorLevel, KeystoreError, Result};
