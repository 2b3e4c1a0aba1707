#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Notify, RwLock};
use wallet_keystore::keystore::Keystore;
use wallet_keystore::{KeystoreConfig, MemoryStorage, Result, Storage};

pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const DEV_ADDR: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const DEV_KEY_2: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const DEV_ADDR_2: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
pub const MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub fn keystore(storage: &MemoryStorage) -> Keystore {
    Keystore::new(Arc::new(storage.clone()), KeystoreConfig::insecure_fast())
}

/// Holds the next batch write until `release` is notified. Reads wait while
/// a write guard on `reads` is held.
#[derive(Clone)]
pub struct GatedStorage {
    pub inner: MemoryStorage,
    pub release: Arc<Notify>,
    pub reads: Arc<RwLock<()>>,
    armed: Arc<AtomicBool>,
}

impl GatedStorage {
    pub fn new() -> Self {
        Self::wrapping(MemoryStorage::new())
    }

    pub fn wrapping(inner: MemoryStorage) -> Self {
        Self {
            inner,
            release: Arc::new(Notify::new()),
            reads: Arc::new(RwLock::new(())),
            armed: Arc::new(AtomicBool::new(true)),
        }
    }
}

#[async_trait]
impl Storage for GatedStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let _open = self.reads.read().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.inner.set(key, value).await
    }

    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.release.notified().await;
        }
        self.inner.set_many(entries).await
    }
}
