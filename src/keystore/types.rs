//! Records owned by the keystore, persisted and in-memory.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use k256::SecretKey;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::core::errors::{KeystoreError, Result};
use crate::core::memory_protection::{try_lock, try_unlock};
use crate::crypto::cipher::{aes_128_ctr, keccak256};
use crate::crypto::kdf::KdfParams;
use crate::crypto::EntropySource;
use crate::security::{redact_body, redact_hex_bytes, SecretString};

pub const MASTER_KEY_LENGTH: usize = 16;
const SYNC_KEY_DOMAIN: &[u8] = b"wallet-keystore-sync-keypair";

/// The symmetric key protecting every stored private key and seed.
/// Lives only in memory, scrubbed when dropped.
#[derive(Zeroize)]
pub struct MasterKey {
    key: [u8; MASTER_KEY_LENGTH],
    iv: [u8; MASTER_KEY_LENGTH],
    #[zeroize(skip)]
    locked: bool,
}

impl MasterKey {
    pub fn generate(entropy: &dyn EntropySource, extra_entropy: &[u8]) -> Result<Self> {
        let key = entropy.random_bytes(MASTER_KEY_LENGTH, extra_entropy);
        let iv = entropy.random_bytes(MASTER_KEY_LENGTH, extra_entropy);
        let mut bytes = Zeroizing::new(Vec::with_capacity(2 * MASTER_KEY_LENGTH));
        bytes.extend_from_slice(&key);
        bytes.extend_from_slice(&iv);
        Self::from_bytes(&bytes)
    }

    /// Parses `key || iv`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 2 * MASTER_KEY_LENGTH {
            return Err(KeystoreError::Crypto(format!(
                "master key must be {} bytes, got {}",
                2 * MASTER_KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut key = [0u8; MASTER_KEY_LENGTH];
        let mut iv = [0u8; MASTER_KEY_LENGTH];
        key.copy_from_slice(&bytes[..MASTER_KEY_LENGTH]);
        iv.copy_from_slice(&bytes[MASTER_KEY_LENGTH..]);
        Ok(Self { key, iv, locked: false })
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(2 * MASTER_KEY_LENGTH));
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.iv);
        out
    }

    pub fn duplicate(&self) -> Self {
        Self { key: self.key, iv: self.iv, locked: false }
    }

    /// Moves the key to a stable heap address and page-locks it.
    pub(crate) fn into_resident(self) -> Box<Self> {
        let mut boxed = Box::new(self);
        boxed.locked = try_lock(&boxed.key) && try_lock(&boxed.iv);
        boxed
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        aes_128_ctr(&self.key, &self.iv, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(aes_128_ctr(&self.key, &self.iv, ciphertext)?))
    }

    /// Identifier derived once from the key, stable for the life of the store.
    pub fn uid(&self) -> String {
        hex::encode(&keccak256(&self.key)[..16])
    }

    /// secp256k1 secret used to receive keys from other devices.
    pub fn sync_secret_key(&self) -> Result<SecretKey> {
        let mut material = Zeroizing::new(Vec::with_capacity(SYNC_KEY_DOMAIN.len() + 32));
        material.extend_from_slice(SYNC_KEY_DOMAIN);
        material.extend_from_slice(&self.key);
        material.extend_from_slice(&self.iv);
        let mut digest = keccak256(&material);
        let secret = SecretKey::from_slice(&digest)
            .map_err(|_| KeystoreError::Crypto("derived sync key is out of range".to_string()));
        digest.zeroize();
        secret
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.zeroize();
        if self.locked {
            try_unlock(&self.key);
            try_unlock(&self.iv);
        }
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// `aesEncrypted` part of an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherEnvelope {
    pub cipher_type: String,
    pub iv: String,
    pub ciphertext: String,
    pub mac: String,
}

/// One user secret's encryption of the master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEnvelope {
    pub id: String,
    #[serde(rename = "scryptParams")]
    pub kdf_params: KdfParams,
    #[serde(rename = "aesEncrypted")]
    pub cipher: CipherEnvelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Internal,
    Trezor,
    Ledger,
    Lattice,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Internal => "internal",
            KeyType::Trezor => "trezor",
            KeyType::Ledger => "ledger",
            KeyType::Lattice => "lattice",
        }
    }

    pub fn is_external(&self) -> bool {
        !matches!(self, KeyType::Internal)
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = KeystoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "internal" => Ok(KeyType::Internal),
            "trezor" => Ok(KeyType::Trezor),
            "ledger" => Ok(KeyType::Ledger),
            "lattice" => Ok(KeyType::Lattice),
            other => Err(KeystoreError::UnsupportedSignerType(other.to_string())),
        }
    }
}

/// Derivation path templates; `<account>` is replaced by the account index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HdPathTemplate {
    #[default]
    #[serde(rename = "m/44'/60'/0'/0/<account>")]
    Bip44Standard,
    #[serde(rename = "m/44'/60'/<account>'/0/0")]
    LedgerLive,
    #[serde(rename = "m/44'/60'/0'/<account>")]
    LegacyLedger,
}

impl HdPathTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            HdPathTemplate::Bip44Standard => "m/44'/60'/0'/0/<account>",
            HdPathTemplate::LedgerLive => "m/44'/60'/<account>'/0/0",
            HdPathTemplate::LegacyLedger => "m/44'/60'/0'/<account>",
        }
    }

    pub fn path_for(&self, account: u32) -> String {
        self.as_str().replace("<account>", &account.to_string())
    }
}

impl fmt::Display for HdPathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HdPathTemplate {
    type Err = KeystoreError;

    fn from_str(s: &str) -> Result<Self> {
        [
            HdPathTemplate::Bip44Standard,
            HdPathTemplate::LedgerLive,
            HdPathTemplate::LegacyLedger,
        ]
        .into_iter()
        .find(|t| t.as_str() == s.trim())
        .ok_or_else(|| KeystoreError::InvalidDerivationPath(s.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_seed_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hd_path_template: Option<HdPathTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
}

/// Persisted key entry. `priv_key` is the hex ciphertext for internal keys.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredKey {
    pub addr: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub label: String,
    pub dedicated_to_one_account: bool,
    #[serde(default)]
    pub meta: KeyMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priv_key: Option<String>,
}

impl StoredKey {
    pub fn matches(&self, addr: &str, key_type: KeyType) -> bool {
        self.key_type == key_type && self.addr.eq_ignore_ascii_case(addr)
    }

    pub fn to_key(&self) -> Key {
        Key {
            addr: self.addr.clone(),
            key_type: self.key_type,
            label: self.label.clone(),
            dedicated_to_one_account: self.dedicated_to_one_account,
            meta: self.meta.clone(),
            is_externally_stored: self.key_type.is_external(),
        }
    }
}

impl fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKey")
            .field("addr", &self.addr)
            .field("key_type", &self.key_type)
            .field("label", &self.label)
            .field("dedicated_to_one_account", &self.dedicated_to_one_account)
            .field("priv_key", &self.priv_key.as_ref().map(|c| redact_hex_bytes(c.as_bytes())))
            .finish()
    }
}

/// Public view of a stored key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub addr: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub label: String,
    pub dedicated_to_one_account: bool,
    pub meta: KeyMeta,
    pub is_externally_stored: bool,
}

/// Persisted seed entry; both phrase fields are hex ciphertext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSeed {
    pub id: String,
    pub label: String,
    pub seed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_passphrase: Option<String>,
    pub hd_path_template: HdPathTemplate,
}

impl fmt::Debug for StoredSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredSeed")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("seed", &redact_body(&self.seed))
            .field("seed_passphrase", &self.seed_passphrase.as_deref().map(redact_body))
            .field("hd_path_template", &self.hd_path_template)
            .finish()
    }
}

impl StoredSeed {
    pub fn to_info(&self) -> SeedInfo {
        SeedInfo {
            id: self.id.clone(),
            label: self.label.clone(),
            hd_path_template: self.hd_path_template,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedInfo {
    pub id: String,
    pub label: String,
    pub hd_path_template: HdPathTemplate,
}

/// Decrypted seed, also the shape of the in-memory temp seed.
#[derive(Debug)]
pub struct RevealedSeed {
    pub seed: SecretString,
    pub passphrase: Option<SecretString>,
    pub hd_path_template: HdPathTemplate,
}

pub type TempSeed = RevealedSeed;

#[derive(Debug)]
pub struct SeedInput {
    pub seed: SecretString,
    pub passphrase: Option<SecretString>,
    pub hd_path_template: HdPathTemplate,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SeedUpdate {
    pub label: Option<String>,
    pub hd_path_template: Option<HdPathTemplate>,
}

/// A private key to encrypt and store.
#[derive(Debug)]
pub struct InternalKeyInput {
    /// 32-byte hex, `0x` optional
    pub private_key: SecretString,
    pub label: Option<String>,
    pub dedicated_to_one_account: bool,
    pub meta: KeyMeta,
}

impl InternalKeyInput {
    pub fn new(private_key: impl Into<String>) -> Self {
        Self {
            private_key: SecretString::new(private_key.into()),
            label: None,
            dedicated_to_one_account: false,
            meta: KeyMeta::default(),
        }
    }
}

/// A key held by an external device; only public metadata is stored.
#[derive(Debug, Clone)]
pub struct ExternalKeyInput {
    pub addr: String,
    pub key_type: KeyType,
    pub label: Option<String>,
    pub dedicated_to_one_account: bool,
    pub meta: KeyMeta,
}

#[derive(Debug, Clone)]
pub struct KeyPreferences {
    pub addr: String,
    pub key_type: KeyType,
    pub label: String,
}

#[derive(Debug, Clone, Default)]
pub struct AddSecretOptions {
    pub extra_entropy: Vec<u8>,
    pub leave_unlocked: bool,
}

impl AddSecretOptions {
    pub fn unlocked() -> Self {
        Self { extra_entropy: Vec::new(), leave_unlocked: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EntropyGenerator;

    #[test]
    fn test_master_key_layout() {
        let bytes: Vec<u8> = (0u8..32).collect();
        let mk = MasterKey::from_bytes(&bytes).unwrap();
        assert_eq!(mk.to_bytes().as_slice(), bytes.as_slice());
        assert!(MasterKey::from_bytes(&bytes[..31]).is_err());
    }

    #[test]
    fn test_master_key_encrypt_is_deterministic() {
        let mk = MasterKey::generate(EntropyGenerator::global(), b"").unwrap();
        let a = mk.encrypt(b"same plaintext").unwrap();
        let b = mk.encrypt(b"same plaintext").unwrap();
        assert_eq!(a, b);
        assert_eq!(mk.decrypt(&a).unwrap().as_slice(), b"same plaintext");
    }

    #[test]
    fn test_uid_and_sync_key_are_stable() {
        let mk = MasterKey::generate(EntropyGenerator::global(), b"extra").unwrap();
        let copy = mk.duplicate();
        assert_eq!(mk.uid(), copy.uid());
        assert_eq!(mk.uid().len(), 32);
        assert_eq!(
            mk.sync_secret_key().unwrap().to_bytes(),
            copy.sync_secret_key().unwrap().to_bytes()
        );
    }

    #[test]
    fn test_master_key_debug_redacted() {
        let mk = MasterKey::from_bytes(&[7u8; 32]).unwrap().into_resident();
        assert_eq!(format!("{:?}", mk), "MasterKey(<redacted>)");
    }

    #[test]
    fn test_hd_path_template_parse() {
        let t: HdPathTemplate = "m/44'/60'/<account>'/0/0".parse().unwrap();
        assert_eq!(t, HdPathTemplate::LedgerLive);
        assert_eq!(t.path_for(3), "m/44'/60'/3'/0/0");
        let err = "m/44'/0'/0'".parse::<HdPathTemplate>().unwrap_err();
        assert!(matches!(err, KeystoreError::InvalidDerivationPath(_)));
    }

    #[test]
    fn test_stored_key_serialized_names() {
        let key = StoredKey {
            addr: "0xabc".into(),
            key_type: KeyType::Ledger,
            label: "Key 1".into(),
            dedicated_to_one_account: true,
            meta: KeyMeta { index: Some(2), ..Default::default() },
            priv_key: None,
        };
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json["type"], "ledger");
        assert_eq!(json["dedicatedToOneAccount"], true);
        assert_eq!(json["meta"]["index"], 2);
        assert!(json.get("privKey").is_none());
    }

    #[test]
    fn test_key_type_parse() {
        assert_eq!("Trezor".parse::<KeyType>().unwrap(), KeyType::Trezor);
        assert!("keycard".parse::<KeyType>().is_err());
    }
}
