//! Stored keys: encrypt-on-write under the master key, dedup by
//! (address, type), and signers handed out on demand.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::events::UiMessage;
use super::readiness::PendingKeys;
use super::types::{ExternalKeyInput, InternalKeyInput, Key, KeyPreferences, KeyType, MasterKey, StoredKey};
use super::{Action, Keystore};
use crate::core::errors::{KeystoreError, Result};
use crate::security::{ExposeSecret, SecretString, SecretVec};
use crate::signer::address::{address_from_private_key, normalize_address, parse_private_key};
use crate::signer::{InternalSigner, KeySigner};
use crate::storage::STORED_KEYS_KEY;

fn default_label(position: usize) -> String {
    format!("Key {}", position)
}

fn internal_without_private_key() -> KeystoreError {
    KeystoreError::InvalidInput("internal keys must be added with their private key".to_string())
}

impl Keystore {
    /// Encrypts and stores private keys. Before the first secret exists the
    /// items are queued and an empty list is returned. Malformed keys are
    /// rejected before anything is queued.
    pub async fn add_keys(&self, items: Vec<InternalKeyInput>) -> Result<Vec<Key>> {
        self.guarded(Action::AddKeys, async move {
            for item in &items {
                parse_private_key(item.private_key.expose_secret())?;
            }
            let Some(items) = self.gate.lock().hold_internal(items) else {
                debug!("keystore not ready, internal keys queued");
                return Ok(Vec::new());
            };
            let master = self.master_key_copy()?;

            let mut batch = self.gate.lock().take_internal();
            let leftover = batch.len();
            batch.extend(items);
            let result = self.store_internal_keys(&master, &batch).await;
            if result.is_err() && leftover > 0 {
                batch.truncate(leftover);
                self.gate.lock().requeue_internal(batch);
            }
            result
        })
        .await
    }

    pub async fn add_keys_externally_stored(&self, mut items: Vec<ExternalKeyInput>) -> Result<Vec<Key>> {
        self.guarded(Action::AddKeysExternallyStored, async move {
            for item in items.iter_mut() {
                if item.key_type == KeyType::Internal {
                    return Err(internal_without_private_key());
                }
                item.addr = normalize_address(&item.addr)?;
            }
            let Some(items) = self.gate.lock().hold_external(items) else {
                debug!("keystore not ready, external keys queued");
                return Ok(Vec::new());
            };

            let mut batch = self.gate.lock().take_external();
            let leftover = batch.len();
            batch.extend(items);
            let result = self.store_external_keys(&batch).await;
            if result.is_err() && leftover > 0 {
                batch.truncate(leftover);
                self.gate.lock().requeue_external(batch);
            }
            result
        })
        .await
    }

    /// Stores requests queued before the first secret. A failure leaves the
    /// secret in place: the affected requests go back in the queue for the
    /// next add of the same kind and the error is reported.
    pub(super) async fn flush_pending(&self, master: &MasterKey, pending: PendingKeys) {
        info!(
            internal = pending.internal.len(),
            external = pending.external.len(),
            "flushing keys queued before the first secret"
        );
        if !pending.internal.is_empty() {
            let stored = self.store_internal_keys(master, &pending.internal).await;
            if let Err(e) = stored {
                warn!(count = pending.internal.len(), error = %e, "queued internal keys kept for retry");
                self.gate.lock().requeue_internal(pending.internal);
                self.notify_error(&e);
            }
        }
        if !pending.external.is_empty() {
            let stored = self.store_external_keys(&pending.external).await;
            if let Err(e) = stored {
                warn!(count = pending.external.len(), error = %e, "queued external keys kept for retry");
                self.gate.lock().requeue_external(pending.external);
                self.notify_error(&e);
            }
        }
    }

    /// Returns the keys that were actually added.
    pub(super) async fn store_internal_keys(
        &self,
        master: &MasterKey,
        items: &[InternalKeyInput],
    ) -> Result<Vec<Key>> {
        let mut seen: Vec<Zeroizing<[u8; 32]>> = Vec::with_capacity(items.len());
        let mut fresh = Vec::new();
        let existing = self.state.read().keys.clone();

        for item in items {
            let private_key = parse_private_key(item.private_key.expose_secret())?;
            if seen.iter().any(|k| k[..] == private_key[..]) {
                continue;
            }
            let addr = address_from_private_key(&private_key[..])?;
            seen.push(private_key.clone());
            if existing.iter().any(|k| k.matches(&addr, KeyType::Internal)) {
                debug!(addr = %addr, "internal key already stored");
                continue;
            }

            let label = item.label.clone().unwrap_or_else(|| default_label(existing.len() + fresh.len() + 1));
            let mut meta = item.meta.clone();
            meta.created_at.get_or_insert_with(Utc::now);
            fresh.push(StoredKey {
                label,
                addr,
                key_type: KeyType::Internal,
                dedicated_to_one_account: item.dedicated_to_one_account,
                meta,
                priv_key: Some(hex::encode(master.encrypt(&private_key[..])?)),
            });
        }
        self.commit_new_keys(existing, fresh).await
    }

    pub(super) async fn store_external_keys(&self, items: &[ExternalKeyInput]) -> Result<Vec<Key>> {
        let existing = self.state.read().keys.clone();
        let mut fresh: Vec<StoredKey> = Vec::new();

        for item in items {
            if item.key_type == KeyType::Internal {
                return Err(internal_without_private_key());
            }
            let addr = normalize_address(&item.addr)?;
            if existing.iter().chain(fresh.iter()).any(|k| k.matches(&addr, item.key_type)) {
                continue;
            }
            let label = item.label.clone().unwrap_or_else(|| default_label(existing.len() + fresh.len() + 1));
            let mut meta = item.meta.clone();
            meta.created_at.get_or_insert_with(Utc::now);
            fresh.push(StoredKey {
                label,
                addr,
                key_type: item.key_type,
                dedicated_to_one_account: item.dedicated_to_one_account,
                meta,
                priv_key: None,
            });
        }
        self.commit_new_keys(existing, fresh).await
    }

    async fn commit_new_keys(&self, existing: Vec<StoredKey>, fresh: Vec<StoredKey>) -> Result<Vec<Key>> {
        if fresh.is_empty() {
            return Ok(Vec::new());
        }
        let added: Vec<Key> = fresh.iter().map(StoredKey::to_key).collect();
        let mut keys = existing;
        keys.extend(fresh);
        self.persist(STORED_KEYS_KEY, &keys).await?;
        self.state.write().keys = keys;
        info!(count = added.len(), "keys added");
        Ok(added)
    }

    /// Internal keys can only be removed while unlocked.
    pub async fn remove_key(&self, addr: &str, key_type: KeyType) -> Result<()> {
        self.guarded(Action::RemoveKey, async move {
            if key_type == KeyType::Internal && !self.is_unlocked() {
                return Err(KeystoreError::MasterKeyRequired);
            }
            let keys: Vec<StoredKey> = {
                let state = self.state.read();
                if !state.keys.iter().any(|k| k.matches(addr, key_type)) {
                    return Err(KeystoreError::NotFound(format!("{} key {}", key_type, addr)));
                }
                state.keys.iter().filter(|k| !k.matches(addr, key_type)).cloned().collect()
            };
            self.persist(STORED_KEYS_KEY, &keys).await?;
            self.state.write().keys = keys;
            info!(addr = %addr, key_type = %key_type, "key removed");
            Ok(())
        })
        .await
    }

    pub async fn update_key_preferences(&self, preferences: Vec<KeyPreferences>) -> Result<()> {
        self.guarded(Action::UpdateKeyPreferences, async move {
            let mut keys = self.state.read().keys.clone();
            for pref in &preferences {
                let key = keys
                    .iter_mut()
                    .find(|k| k.matches(&pref.addr, pref.key_type))
                    .ok_or_else(|| KeystoreError::NotFound(format!("{} key {}", pref.key_type, pref.addr)))?;
                key.label = pref.label.clone();
            }
            self.persist(STORED_KEYS_KEY, &keys).await?;
            self.state.write().keys = keys;
            Ok(())
        })
        .await
    }

    fn stored_key(&self, addr: &str, key_type: KeyType) -> Result<StoredKey> {
        self.state
            .read()
            .keys
            .iter()
            .find(|k| k.matches(addr, key_type))
            .cloned()
            .ok_or_else(|| KeystoreError::NotFound(format!("{} key {}", key_type, addr)))
    }

    /// Decrypts an internal key's private key bytes.
    pub(super) fn decrypt_private_key(&self, addr: &str) -> Result<SecretVec> {
        let stored = self.stored_key(addr, KeyType::Internal)?;
        let master = self.master_key_copy()?;
        let ciphertext = stored
            .priv_key
            .as_deref()
            .ok_or_else(|| KeystoreError::Crypto(format!("key {} has no ciphertext", addr)))?;
        master.decrypt(&hex::decode(ciphertext)?)
    }

    pub async fn get_signer(&self, addr: &str, key_type: KeyType) -> Result<Arc<dyn KeySigner>> {
        self.reported(async move {
            let stored = self.stored_key(addr, key_type)?;
            if key_type.is_external() {
                return self.signers.create(&stored.to_key());
            }
            let private_key = self.decrypt_private_key(addr)?;
            Ok(Arc::new(InternalSigner::new(&private_key)?) as Arc<dyn KeySigner>)
        })
        .await
    }

    /// Pushes the decrypted private key of an internal key to the UI.
    pub async fn send_private_key_to_ui(&self, addr: &str) -> Result<()> {
        self.reported(async move {
            let ui = self
                .ui
                .as_ref()
                .ok_or_else(|| KeystoreError::InvalidInput("no ui notifier attached".to_string()))?;
            let private_key = self.decrypt_private_key(addr)?;
            let message = UiMessage::PrivateKey {
                addr: self.stored_key(addr, KeyType::Internal)?.addr,
                key_type: KeyType::Internal,
                private_key: SecretString::new(format!("0x{}", hex::encode(&private_key[..]))),
            };
            ui.send(message)
                .map_err(|_| KeystoreError::InvalidInput("ui notifier closed".to_string()))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::types::{AddSecretOptions, KeyMeta};
    use super::*;
    use crate::signer::{ExternalSignerFactory, SignerRegistry};
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    const LEDGER_ADDR: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    fn ledger(addr: &str) -> ExternalKeyInput {
        ExternalKeyInput {
            addr: addr.to_string(),
            key_type: KeyType::Ledger,
            label: Some("My Ledger".into()),
            dedicated_to_one_account: false,
            meta: KeyMeta { device_id: Some("dev-1".into()), index: Some(0), ..Default::default() },
        }
    }

    #[tokio::test]
    async fn test_add_keys_encrypts_and_labels() {
        let (ks, storage) = unlocked_store().await;
        let added = ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].addr, DEV_ADDR);
        assert_eq!(added[0].label, "Key 1");
        assert!(!added[0].is_externally_stored);

        let raw = serde_json::to_string(&storage.dump().await[STORED_KEYS_KEY]).unwrap();
        assert!(!raw.contains(DEV_KEY.trim_start_matches("0x")));
    }

    #[tokio::test]
    async fn test_add_keys_requires_unlock() {
        let (ks, _) = unlocked_store().await;
        ks.lock();
        let err = ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap_err();
        assert_eq!(err, KeystoreError::MasterKeyRequired);
        assert!(ks.keys().is_empty());
    }

    #[tokio::test]
    async fn test_add_keys_dedups_batch_and_store() {
        let (ks, _) = unlocked_store().await;
        let batch = vec![
            InternalKeyInput::new(DEV_KEY),
            InternalKeyInput::new(DEV_KEY.trim_start_matches("0x")),
        ];
        assert_eq!(ks.add_keys(batch).await.unwrap().len(), 1);
        assert!(ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap().is_empty());
        assert_eq!(ks.keys().len(), 1);
    }

    #[test_case("0x1234" ; "too short")]
    #[test_case("not hex at all, not hex at all, not hex at all, not hex at all!!" ; "not hex")]
    #[tokio::test]
    async fn test_add_keys_rejects_invalid_private_key(input: &str) {
        let (ks, _) = unlocked_store().await;
        let err = ks.add_keys(vec![InternalKeyInput::new(input)]).await.unwrap_err();
        assert_eq!(err, KeystoreError::InvalidPrivateKey);
    }

    #[tokio::test]
    async fn test_external_keys_dedup_and_normalize() {
        let (ks, _) = unlocked_store().await;
        ks.lock();
        let added = ks
            .add_keys_externally_stored(vec![ledger(&LEDGER_ADDR.to_lowercase()), ledger(LEDGER_ADDR)])
            .await
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].addr, LEDGER_ADDR);
        assert!(added[0].is_externally_stored);
        assert!(ks.add_keys_externally_stored(vec![ledger(LEDGER_ADDR)]).await.unwrap().is_empty());

        let mut trezor = ledger(LEDGER_ADDR);
        trezor.key_type = KeyType::Trezor;
        assert_eq!(ks.add_keys_externally_stored(vec![trezor]).await.unwrap().len(), 1);
        assert_eq!(ks.keys_for_address(LEDGER_ADDR).len(), 2);
    }

    #[tokio::test]
    async fn test_remove_key() {
        let (ks, _) = unlocked_store().await;
        ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();
        ks.add_keys_externally_stored(vec![ledger(LEDGER_ADDR)]).await.unwrap();
        ks.lock();

        assert_eq!(ks.remove_key(DEV_ADDR, KeyType::Internal).await, Err(KeystoreError::MasterKeyRequired));
        ks.remove_key(LEDGER_ADDR, KeyType::Ledger).await.unwrap();
        assert!(matches!(
            ks.remove_key(LEDGER_ADDR, KeyType::Ledger).await,
            Err(KeystoreError::NotFound(_))
        ));

        ks.unlock_with_secret("password", "hunter2").await.unwrap();
        ks.remove_key(&DEV_ADDR.to_lowercase(), KeyType::Internal).await.unwrap();
        assert!(ks.keys().is_empty());
    }

    #[tokio::test]
    async fn test_update_key_preferences() {
        let (ks, _) = unlocked_store().await;
        ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();
        ks.update_key_preferences(vec![KeyPreferences {
            addr: DEV_ADDR.into(),
            key_type: KeyType::Internal,
            label: "Hot wallet".into(),
        }])
        .await
        .unwrap();
        assert_eq!(ks.key(DEV_ADDR, KeyType::Internal).unwrap().label, "Hot wallet");

        let err = ks
            .update_key_preferences(vec![KeyPreferences {
                addr: LEDGER_ADDR.into(),
                key_type: KeyType::Ledger,
                label: "x".into(),
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, KeystoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_get_signer_internal_needs_unlock() {
        let (ks, _) = unlocked_store().await;
        ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();
        let signer = ks.get_signer(DEV_ADDR, KeyType::Internal).await.unwrap();
        assert_eq!(signer.sign_message(b"gm").await.unwrap().len(), 65);

        ks.lock();
        assert!(matches!(
            ks.get_signer(DEV_ADDR, KeyType::Internal).await,
            Err(KeystoreError::MasterKeyRequired)
        ));
        assert!(matches!(
            ks.get_signer(LEDGER_ADDR, KeyType::Internal).await,
            Err(KeystoreError::NotFound(_))
        ));
    }

    struct Device;

    struct DeviceSigner(String);

    #[async_trait::async_trait]
    impl KeySigner for DeviceSigner {
        fn address(&self) -> &str {
            &self.0
        }
        fn key_type(&self) -> KeyType {
            KeyType::Ledger
        }
        async fn sign_digest(&self, _digest: [u8; 32]) -> Result<Vec<u8>> {
            Err(KeystoreError::InvalidInput("device not connected".into()))
        }
        async fn sign_message(&self, _message: &[u8]) -> Result<Vec<u8>> {
            Err(KeystoreError::InvalidInput("device not connected".into()))
        }
    }

    impl ExternalSignerFactory for Device {
        fn create(&self, key: &Key) -> Result<Arc<dyn KeySigner>> {
            Ok(Arc::new(DeviceSigner(key.addr.clone())))
        }
    }

    #[tokio::test]
    async fn test_get_signer_external_uses_registry() {
        let storage = MemoryStorage::new();
        let ks = Keystore::builder(Arc::new(storage))
            .config(crate::core::config::KeystoreConfig::insecure_fast())
            .signers(SignerRegistry::new().with(KeyType::Ledger, Arc::new(Device)))
            .build();
        ks.add_secret("password", "pw", AddSecretOptions::default()).await.unwrap();
        let mut trezor = ledger(LEDGER_ADDR);
        trezor.key_type = KeyType::Trezor;
        ks.add_keys_externally_stored(vec![ledger(LEDGER_ADDR), trezor]).await.unwrap();

        let signer = ks.get_signer(LEDGER_ADDR, KeyType::Ledger).await.unwrap();
        assert_eq!(signer.address(), LEDGER_ADDR);
        assert!(matches!(
            ks.get_signer(LEDGER_ADDR, KeyType::Trezor).await,
            Err(KeystoreError::UnsupportedSignerType(_))
        ));
    }

    #[tokio::test]
    async fn test_send_private_key_to_ui() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ks = Keystore::builder(Arc::new(MemoryStorage::new()))
            .config(crate::core::config::KeystoreConfig::insecure_fast())
            .ui_notifier(tx)
            .build();
        ks.add_secret("password", "pw", AddSecretOptions::unlocked()).await.unwrap();
        ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();

        ks.send_private_key_to_ui(DEV_ADDR).await.unwrap();
        match rx.recv().await.unwrap() {
            UiMessage::PrivateKey { addr, private_key, .. } => {
                assert_eq!(addr, DEV_ADDR);
                assert_eq!(private_key.expose_secret(), DEV_KEY);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_private_key_without_notifier() {
        let (ks, _) = unlocked_store().await;
        ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();
        assert!(matches!(ks.send_private_key_to_ui(DEV_ADDR).await, Err(KeystoreError::InvalidInput(_))));
    }
}
