use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::errors::{KeystoreError, Result};

/// Scrypt cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScryptConfig {
    /// CPU/memory cost, must be a power of two
    #[serde(default = "ScryptConfig::default_n")]
    pub n: u32,

    /// Block size
    #[serde(default = "ScryptConfig::default_r")]
    pub r: u32,

    /// Parallelism
    #[serde(default = "ScryptConfig::default_p")]
    pub p: u32,

    /// Output length in bytes
    #[serde(default = "ScryptConfig::default_dk_len")]
    pub dk_len: usize,
}

impl ScryptConfig {
    fn default_n() -> u32 { 131_072 }
    fn default_r() -> u32 { 8 }
    fn default_p() -> u32 { 1 }
    fn default_dk_len() -> usize { 64 }

    /// Parameters for Web3 Secret Storage exports (32-byte derived key).
    pub fn export_default() -> Self {
        Self { dk_len: 32, ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.n < 2 || !self.n.is_power_of_two() {
            return Err(KeystoreError::Kdf(format!("n must be a power of two, got {}", self.n)));
        }
        if self.r == 0 || self.p == 0 {
            return Err(KeystoreError::Kdf("r and p must be positive".to_string()));
        }
        if self.dk_len < 32 {
            return Err(KeystoreError::Kdf(format!(
                "derived key length must be at least 32, got {}",
                self.dk_len
            )));
        }
        Ok(())
    }
}

impl Default for ScryptConfig {
    fn default() -> Self {
        Self {
            n: Self::default_n(),
            r: Self::default_r(),
            p: Self::default_p(),
            dk_len: Self::default_dk_len(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_database_url")]
    pub database_url: String,
}

impl StorageConfig {
    fn default_database_url() -> String {
        "sqlite://./data/keystore.db?mode=rwc".to_string()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_url: Self::default_database_url() }
    }
}

/// Keystore configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeystoreConfig {
    /// KDF parameters for new secret envelopes
    #[serde(default)]
    pub kdf: ScryptConfig,

    /// KDF parameters for password-based key export
    #[serde(default = "ScryptConfig::export_default")]
    pub export_kdf: ScryptConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl KeystoreConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| KeystoreError::InvalidInput(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| KeystoreError::InvalidInput(format!("config: {}", e)))?;
        Self::from_toml_str(&raw)
    }

    /// `KEYSTORE_DATABASE_URL` and `KEYSTORE_SCRYPT_N` override file values.
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var("KEYSTORE_DATABASE_URL") {
            if !url.trim().is_empty() {
                self.storage.database_url = url;
            }
        }
        if let Ok(n) = std::env::var("KEYSTORE_SCRYPT_N") {
            self.kdf.n = n
                .trim()
                .parse()
                .map_err(|_| KeystoreError::Kdf(format!("KEYSTORE_SCRYPT_N is not a number: {}", n)))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.kdf.validate()?;
        self.export_kdf.validate()
    }

    /// Cheap parameters for tests and demos. Never use for real secrets.
    pub fn insecure_fast() -> Self {
        let fast = ScryptConfig { n: 1024, r: 8, p: 1, dk_len: 64 };
        Self {
            kdf: fast,
            export_kdf: ScryptConfig { dk_len: 32, ..fast },
            storage: StorageConfig::default(),
        }
    }
}
