//! Moving keys out of and into the store: password-protected JSON export and
//! public-key encrypted device-to-device transfer.

use tracing::info;

use super::types::{InternalKeyInput, Key, KeyMeta, KeyType};
use super::{Action, Keystore};
use crate::core::errors::{KeystoreError, Result};
use crate::crypto::cipher::IV_LENGTH;
use crate::crypto::ecies::{decrypt_with_secret_key, encrypt_for_public_key, parse_public_key, public_key_hex, EncryptedKeyBlob};
use crate::crypto::json_wallet::{encrypt_json_wallet, JsonWallet};
use crate::crypto::kdf::SALT_LENGTH;
use crate::security::SecretString;

impl Keystore {
    /// Exports an internal key as a Web3 Secret Storage v3 document.
    pub async fn export_key_with_passcode(&self, addr: &str, key_type: KeyType, passcode: &str) -> Result<JsonWallet> {
        self.reported(self.export_with_passcode(addr, key_type, passcode)).await
    }

    async fn export_with_passcode(&self, addr: &str, key_type: KeyType, passcode: &str) -> Result<JsonWallet> {
        if key_type.is_external() {
            return Err(KeystoreError::InvalidInput(format!("{} keys cannot be exported", key_type)));
        }
        let private_key = self.decrypt_private_key(addr)?;
        let address = crate::signer::address::address_from_private_key(&private_key)?;
        let salt = self.entropy.random_bytes(SALT_LENGTH, &[]);
        let iv = self.entropy.random_bytes(IV_LENGTH, &[]);
        let params = self.config.export_kdf;
        let kdf = self.kdf.clone();
        let passcode = SecretString::new(passcode.to_string());

        let wallet = tokio::task::spawn_blocking(move || {
            use crate::security::ExposeSecret;
            encrypt_json_wallet(&private_key, &address, passcode.expose_secret(), &params, &salt, &iv, kdf.as_ref())
        })
        .await
        .map_err(|e| KeystoreError::Crypto(format!("export task failed: {}", e)))??;
        info!(addr = %addr, "key exported with passcode");
        Ok(wallet)
    }

    /// Encrypts an internal key to another device's sync public key.
    pub async fn export_key_with_public_key_encryption(
        &self,
        addr: &str,
        recipient_public_key: &str,
    ) -> Result<EncryptedKeyBlob> {
        self.reported(async move {
            let recipient = parse_public_key(recipient_public_key)?;
            let private_key = self.decrypt_private_key(addr)?;
            let blob = encrypt_for_public_key(&recipient, &private_key)?;
            info!(addr = %addr, "key exported for sync");
            Ok(blob)
        })
        .await
    }

    /// Decrypts a blob addressed to this store's sync key and stores the key.
    pub async fn import_key_with_public_key_encryption(
        &self,
        blob: &EncryptedKeyBlob,
        dedicated_to_one_account: bool,
    ) -> Result<Vec<Key>> {
        self.guarded(Action::ImportKey, async move {
            let master = self.master_key_copy()?;
            let secret = master.sync_secret_key()?;
            let private_key = decrypt_with_secret_key(&secret, blob)?;
            let input = InternalKeyInput {
                private_key: SecretString::new(hex::encode(&private_key[..])),
                label: None,
                dedicated_to_one_account,
                meta: KeyMeta::default(),
            };
            let added = self.store_internal_keys(&master, &[input]).await?;
            info!(count = added.len(), "key imported from sync blob");
            Ok(added)
        })
        .await
    }

    /// Compressed SEC1 hex of the public key other devices encrypt to.
    pub fn sync_public_key(&self) -> Result<String> {
        self.report(
            self.master_key_copy()
                .and_then(|master| master.sync_secret_key())
                .map(|secret| public_key_hex(&secret.public_key())),
        )
    }
}
