//! The keystore: secret envelopes around one master key, the vault of keys and
//! seeds encrypted under it, and the gates that serialize access.
//!
//! Mutating operations are asynchronous, pass through the [`ActionGuard`] and
//! commit to storage before the in-memory state changes. Getters are
//! synchronous and reflect the last committed state.

use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, error, info, warn};

use crate::core::config::KeystoreConfig;
use crate::core::errors::{ErrorLevel, KeystoreError, Result};
use crate::crypto::{EntropyGenerator, EntropySource, KeyDerivationAdapter, ScryptKdf};
use crate::signer::SignerRegistry;
use crate::storage::{
    get_or, to_record, Storage, SECRETS_KEY, STORED_KEYS_KEY, STORED_SEEDS_KEY, STORE_UID_KEY,
};

pub mod action_guard;
pub mod events;
pub mod readiness;
pub mod types;

mod secrets;
mod seeds;
mod sync;
mod vault;

pub use action_guard::{Action, ActionGuard, ActionStatus};
pub use events::{ErrorNotification, KeystoreEvent, UiMessage, UiNotifier};
pub use readiness::ReadinessGate;
pub use types::*;

const LOAD_FAILED_MESSAGE: &str = "Something went wrong when loading the Keystore.";

/// Committed state mirrored from storage.
#[derive(Debug, Default)]
struct VaultState {
    secrets: Vec<SecretEnvelope>,
    store_uid: Option<String>,
    keys: Vec<StoredKey>,
    seeds: Vec<StoredSeed>,
}

pub struct Keystore {
    config: KeystoreConfig,
    storage: Arc<dyn Storage>,
    kdf: Arc<dyn KeyDerivationAdapter>,
    entropy: Arc<dyn EntropySource>,
    signers: SignerRegistry,
    ui: Option<UiNotifier>,

    state: RwLock<VaultState>,
    master_key: Mutex<Option<Box<MasterKey>>>,
    temp_seed: Mutex<Option<TempSeed>>,
    gate: Mutex<ReadinessGate>,
    error_message: Mutex<Option<String>>,

    guard: ActionGuard,
    events: broadcast::Sender<KeystoreEvent>,
    loaded: OnceCell<()>,
}

pub struct KeystoreBuilder {
    storage: Arc<dyn Storage>,
    config: KeystoreConfig,
    kdf: Arc<dyn KeyDerivationAdapter>,
    entropy: Arc<dyn EntropySource>,
    signers: SignerRegistry,
    ui: Option<UiNotifier>,
}

impl KeystoreBuilder {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            config: KeystoreConfig::default(),
            kdf: Arc::new(ScryptKdf),
            entropy: EntropyGenerator::shared(),
            signers: SignerRegistry::new(),
            ui: None,
        }
    }

    pub fn config(mut self, config: KeystoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn kdf(mut self, kdf: Arc<dyn KeyDerivationAdapter>) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    pub fn signers(mut self, signers: SignerRegistry) -> Self {
        self.signers = signers;
        self
    }

    pub fn ui_notifier(mut self, ui: UiNotifier) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Builds the store. Nothing is read until the first operation or [`Keystore::load`].
    pub fn build(self) -> Keystore {
        let events = events::channel();
        Keystore {
            config: self.config,
            storage: self.storage,
            kdf: self.kdf,
            entropy: self.entropy,
            signers: self.signers,
            ui: self.ui,
            state: RwLock::new(VaultState::default()),
            master_key: Mutex::new(None),
            temp_seed: Mutex::new(None),
            gate: Mutex::new(ReadinessGate::new(false)),
            error_message: Mutex::new(None),
            guard: ActionGuard::new(events.clone()),
            events,
            loaded: OnceCell::new(),
        }
    }
}

impl Keystore {
    pub fn builder(storage: Arc<dyn Storage>) -> KeystoreBuilder {
        KeystoreBuilder::new(storage)
    }

    pub fn new(storage: Arc<dyn Storage>, config: KeystoreConfig) -> Self {
        KeystoreBuilder::new(storage).config(config).build()
    }

    /// Reads the persisted records once. Later calls wait for the first load.
    ///
    /// A storage failure is reported on the event stream and leaves the store
    /// empty but usable.
    pub async fn load(&self) {
        self.loaded.get_or_init(|| self.boot_load()).await;
    }

    async fn boot_load(&self) {
        match self.read_records().await {
            Ok(state) => {
                let has_secrets = !state.secrets.is_empty();
                info!(
                    secrets = state.secrets.len(),
                    keys = state.keys.len(),
                    seeds = state.seeds.len(),
                    "keystore loaded"
                );
                *self.state.write() = state;
                *self.gate.lock() = ReadinessGate::new(has_secrets);
            }
            Err(e) => {
                error!(error = %e, "failed to load keystore, starting empty");
                *self.error_message.lock() = Some(LOAD_FAILED_MESSAGE.to_string());
                self.emit(KeystoreEvent::Error(ErrorNotification::with_message(
                    &e,
                    ErrorLevel::Major,
                    LOAD_FAILED_MESSAGE,
                )));
            }
        }
        self.emit(KeystoreEvent::Updated);
    }

    async fn read_records(&self) -> Result<VaultState> {
        let storage = self.storage.as_ref();
        Ok(VaultState {
            secrets: get_or(storage, SECRETS_KEY, Vec::new()).await?,
            store_uid: get_or(storage, STORE_UID_KEY, None).await?,
            keys: get_or(storage, STORED_KEYS_KEY, Vec::new()).await?,
            seeds: get_or(storage, STORED_SEEDS_KEY, Vec::new()).await?,
        })
    }

    pub fn config(&self) -> &KeystoreConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<KeystoreEvent> {
        self.events.subscribe()
    }

    pub fn is_unlocked(&self) -> bool {
        self.master_key.lock().is_some()
    }

    pub fn has_password_secret(&self) -> bool {
        self.state.read().secrets.iter().any(|s| s.id == secrets::PASSWORD_SECRET_ID)
    }

    pub fn secret_ids(&self) -> Vec<String> {
        self.state.read().secrets.iter().map(|s| s.id.clone()).collect()
    }

    pub fn store_uid(&self) -> Option<String> {
        self.state.read().store_uid.clone()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.state.read().keys.iter().map(StoredKey::to_key).collect()
    }

    pub fn key(&self, addr: &str, key_type: KeyType) -> Option<Key> {
        self.state.read().keys.iter().find(|k| k.matches(addr, key_type)).map(StoredKey::to_key)
    }

    pub fn keys_for_address(&self, addr: &str) -> Vec<Key> {
        self.state
            .read()
            .keys
            .iter()
            .filter(|k| k.addr.eq_ignore_ascii_case(addr))
            .map(StoredKey::to_key)
            .collect()
    }

    pub fn seeds(&self) -> Vec<SeedInfo> {
        self.state.read().seeds.iter().map(StoredSeed::to_info).collect()
    }

    pub fn has_keystore_seed(&self) -> bool {
        !self.state.read().seeds.is_empty()
    }

    pub fn has_temp_seed(&self) -> bool {
        self.temp_seed.lock().is_some()
    }

    pub fn is_ready_to_store_keys(&self) -> bool {
        self.gate.lock().is_ready()
    }

    /// Key requests waiting in the queue, including any a flush failed to store.
    pub fn pending_key_count(&self) -> usize {
        self.gate.lock().pending_len()
    }

    /// Feeds caller-collected randomness into the store's entropy pool.
    pub fn add_entropy(&self, bytes: &[u8]) {
        self.entropy.add_entropy(bytes);
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_message.lock().clone()
    }

    pub fn reset_error_state(&self) {
        *self.error_message.lock() = None;
        self.emit(KeystoreEvent::Updated);
    }

    pub fn action_status(&self, action: Action) -> ActionStatus {
        self.guard.status(action)
    }

    /// Discards the master key and any temp seed. Idempotent.
    pub fn lock(&self) {
        let dropped = self.master_key.lock().take();
        let had_temp = self.temp_seed.lock().take().is_some();
        if dropped.is_some() || had_temp {
            info!("keystore locked");
        }
        drop(dropped);
        self.emit(KeystoreEvent::Updated);
    }

    fn emit(&self, event: KeystoreEvent) {
        events::emit(&self.events, event);
    }

    fn notify_error(&self, error: &KeystoreError) {
        match error.level() {
            ErrorLevel::Major => warn!(code = error.code(), error = %error, "keystore action failed"),
            _ => debug!(code = error.code(), error = %error, "keystore action failed"),
        }
        self.emit(KeystoreEvent::Error(ErrorNotification::from_error(error)));
    }

    /// Runs a mutating action: waits for the boot load, enforces single-flight,
    /// and reports the outcome on the event stream.
    async fn guarded<T, F>(&self, action: Action, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.run_action(action, false, body).await
    }

    async fn run_action<T, F>(&self, action: Action, allow_concurrent: bool, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.load().await;
        let result = self.guard.run(action, allow_concurrent, body).await;
        match &result {
            Ok(_) => self.emit(KeystoreEvent::Updated),
            Err(KeystoreError::ActionInProgress(running)) => {
                debug!(requested = %action, running = %running, "ignored while busy")
            }
            Err(e) => self.notify_error(e),
        }
        result
    }

    /// Runs a read path after the boot load and reports a failure on the event
    /// stream. Action status is left alone.
    async fn reported<T, F>(&self, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.load().await;
        self.report(body.await)
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.notify_error(e);
        }
        result
    }

    /// Copy of the resident master key for use across await points.
    fn master_key_copy(&self) -> Result<MasterKey> {
        self.master_key
            .lock()
            .as_ref()
            .map(|k| k.duplicate())
            .ok_or(KeystoreError::MasterKeyRequired)
    }

    fn install_master_key(&self, key: MasterKey) {
        *self.master_key.lock() = Some(key.into_resident());
    }

    async fn persist<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.storage.set_many(vec![to_record(key, value)?]).await
    }
}

impl std::fmt::Debug for Keystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore")
            .field("unlocked", &self.is_unlocked())
            .field("secrets", &self.secret_ids())
            .field("keys", &self.state.read().keys.len())
            .field("seeds", &self.state.read().seeds.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_fresh_store_is_empty_and_locked() {
        let (ks, _) = store();
        ks.load().await;
        assert!(!ks.is_unlocked());
        assert!(ks.keys().is_empty());
        assert!(ks.seeds().is_empty());
        assert!(!ks.has_password_secret());
        assert!(!ks.is_ready_to_store_keys());
        assert_eq!(ks.store_uid(), None);
    }

    #[tokio::test]
    async fn test_load_failure_leaves_empty_usable_store() {
        let storage = MemoryStorage::new();
        storage.fail_reads(true);
        let ks = Keystore::new(Arc::new(storage.clone()), KeystoreConfig::insecure_fast());
        let mut rx = ks.subscribe();

        ks.load().await;
        assert_eq!(ks.error_message().as_deref(), Some(LOAD_FAILED_MESSAGE));
        match rx.recv().await.unwrap() {
            KeystoreEvent::Error(n) => {
                assert_eq!(n.level, ErrorLevel::Major);
                assert_eq!(n.code, "storage_failure");
            }
            other => panic!("unexpected event {:?}", other),
        }

        storage.fail_reads(false);
        ks.add_secret("password", "pw", AddSecretOptions::unlocked()).await.unwrap();
        assert!(ks.is_unlocked());
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let (ks, storage) = unlocked_store().await;
        ks.add_keys(vec![InternalKeyInput::new(DEV_KEY)]).await.unwrap();
        let uid = ks.store_uid();

        let reopened = Keystore::new(Arc::new(storage), KeystoreConfig::insecure_fast());
        reopened.load().await;
        assert_eq!(reopened.store_uid(), uid);
        assert_eq!(reopened.keys().len(), 1);
        assert!(reopened.is_ready_to_store_keys());
        assert!(!reopened.is_unlocked());
        reopened.unlock_with_secret("password", "hunter2").await.unwrap();
        assert!(reopened.is_unlocked());
    }

    #[tokio::test]
    async fn test_lock_is_idempotent_and_clears_temp_seed() {
        let (ks, _) = unlocked_store().await;
        ks.add_temp_seed(SeedInput {
            seed: crate::security::secret_string(MNEMONIC),
            passphrase: None,
            hd_path_template: HdPathTemplate::default(),
            label: None,
        })
        .await
        .unwrap();
        assert!(ks.has_temp_seed());
        ks.lock();
        ks.lock();
        assert!(!ks.is_unlocked());
        assert!(!ks.has_temp_seed());
    }

    #[tokio::test]
    async fn test_reset_error_state() {
        let (ks, _) = unlocked_store().await;
        ks.lock();
        assert!(ks.unlock_with_secret("password", "nope").await.is_err());
        assert_eq!(ks.error_message().as_deref(), Some("Invalid password"));
        ks.reset_error_state();
        assert_eq!(ks.error_message(), None);
    }

    #[tokio::test]
    async fn test_read_path_failures_are_reported() {
        let (ks, _) = unlocked_store().await;
        let mut rx = ks.subscribe();

        assert!(matches!(ks.get_signer(DEV_ADDR, KeyType::Internal).await, Err(KeystoreError::NotFound(_))));
        assert!(matches!(ks.get_saved_seed("nope").await, Err(KeystoreError::NotFound(_))));
        ks.lock();
        assert_eq!(ks.sync_public_key(), Err(KeystoreError::MasterKeyRequired));

        let mut codes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let KeystoreEvent::Error(n) = event {
                codes.push(n.code);
            }
        }
        assert_eq!(codes, vec!["not_found", "not_found", "master_key_required"]);
        assert_eq!(ks.action_status(Action::AddKeys), ActionStatus::Initial);
    }

    #[tokio::test]
    async fn test_stores_share_the_process_entropy_pool() {
        let (a, _) = store();
        let (b, _) = store();
        let global = EntropyGenerator::global() as *const EntropyGenerator as *const u8;
        assert_eq!(Arc::as_ptr(&a.entropy) as *const u8, global);
        assert_eq!(Arc::as_ptr(&b.entropy) as *const u8, global);

        a.add_entropy(b"pointer trail");
        a.add_secret("password", "pw", AddSecretOptions::unlocked()).await.unwrap();
        assert!(a.is_unlocked());
    }

    #[tokio::test]
    async fn test_debug_lists_ids_only() {
        let (ks, _) = unlocked_store().await;
        let out = format!("{:?}", ks);
        assert!(out.contains("password"));
        assert!(!out.contains("hunter2"));
    }
}
