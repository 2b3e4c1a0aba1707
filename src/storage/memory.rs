//! In-memory storage for tests and ephemeral stores.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::Storage;
use crate::core::errors::{KeystoreError, Result};

#[derive(Clone, Default)]
pub struct MemoryStorage {
    records: Arc<RwLock<HashMap<String, Value>>>,
    fail_writes: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    write_budget: Arc<Mutex<Option<usize>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `set` fail with `StorageFailure`. Also clears
    /// any budget set by [`MemoryStorage::fail_writes_after`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
        *self.write_budget.lock() = None;
    }

    /// Lets the next `writes` writes through, then fails every later one.
    pub fn fail_writes_after(&self, writes: usize) {
        *self.write_budget.lock() = Some(writes);
    }

    fn write_allowed(&self) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return false;
        }
        match self.write_budget.lock().as_mut() {
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
            None => true,
        }
    }

    /// Makes every subsequent `get` fail with `StorageFailure`.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Raw snapshot of all records.
    pub async fn dump(&self) -> HashMap<String, Value> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(KeystoreError::StorageFailure(format!("read of {} failed", key)));
        }
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        if !self.write_allowed() {
            return Err(KeystoreError::StorageFailure(format!("write of {} failed", key)));
        }
        self.records.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()> {
        if !self.write_allowed() {
            return Err(KeystoreError::StorageFailure("batch write failed".to_string()));
        }
        let mut records = self.records.write().await;
        for (key, value) in entries {
            records.insert(key, value);
        }
        Ok(())
    }
}
