//! Memory-hard key derivation for secret envelopes and key exports.

use std::sync::Arc;

use scrypt::Params;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::core::config::ScryptConfig;
use crate::core::errors::{KeystoreError, Result};

pub const SALT_LENGTH: usize = 32;

/// Persisted scrypt parameters of one envelope. Field names follow the stored format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Hex encoded salt
    pub salt: String,
    /// Cost (N)
    #[serde(rename = "N")]
    pub n: u32,
    /// Block size
    pub r: u32,
    /// Parallelism
    pub p: u32,
    /// Output length
    #[serde(rename = "dkLen")]
    pub dk_len: usize,
}

impl KdfParams {
    pub fn new(salt: &[u8], config: &ScryptConfig) -> Self {
        Self {
            salt: hex::encode(salt),
            n: config.n,
            r: config.r,
            p: config.p,
            dk_len: config.dk_len,
        }
    }

    pub fn salt_bytes(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.salt)?)
    }

    pub fn to_config(&self) -> ScryptConfig {
        ScryptConfig { n: self.n, r: self.r, p: self.p, dk_len: self.dk_len }
    }
}

/// Pure, deterministic `derive(secret, salt, params)`.
pub trait KeyDerivationAdapter: Send + Sync {
    fn derive(&self, secret: &[u8], salt: &[u8], params: &ScryptConfig)
        -> Result<Zeroizing<Vec<u8>>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ScryptKdf;

impl KeyDerivationAdapter for ScryptKdf {
    fn derive(
        &self,
        secret: &[u8],
        salt: &[u8],
        params: &ScryptConfig,
    ) -> Result<Zeroizing<Vec<u8>>> {
        params.validate()?;
        debug!("Using Scrypt with parameters N={}, r={}, p={}", params.n, params.r, params.p);

        let log_n = params.n.trailing_zeros() as u8;
        let scrypt_params = Params::new(log_n, params.r, params.p, params.dk_len)
            .map_err(|e| KeystoreError::Kdf(format!("Invalid Scrypt parameters: {}", e)))?;

        let mut key = Zeroizing::new(vec![0u8; params.dk_len]);
        scrypt::scrypt(secret, salt, &scrypt_params, &mut key)
            .map_err(|e| KeystoreError::Kdf(format!("Scrypt derivation failed: {}", e)))?;
        Ok(key)
    }
}

/// Runs the KDF on the blocking pool so concurrent I/O keeps making progress.
pub async fn derive_off_thread(
    kdf: Arc<dyn KeyDerivationAdapter>,
    secret: Zeroizing<Vec<u8>>,
    salt: Vec<u8>,
    params: ScryptConfig,
) -> Result<DerivedKey> {
    let out = tokio::task::spawn_blocking(move || kdf.derive(&secret, &salt, &params))
        .await
        .map_err(|e| KeystoreError::Crypto(format!("kdf task failed: {}", e)))??;
    DerivedKey::new(out)
}

/// KDF output split into the AES key half and the MAC key half.
pub struct DerivedKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl DerivedKey {
    pub fn new(bytes: Zeroizing<Vec<u8>>) -> Result<Self> {
        if bytes.len() < 32 {
            return Err(KeystoreError::Kdf(format!(
                "derived key too short: {} bytes",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    pub fn aes_key(&self) -> &[u8] {
        &self.bytes[..16]
    }

    pub fn mac_key(&self) -> &[u8] {
        &self.bytes[16..32]
    }
}
