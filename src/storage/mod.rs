//! Persistence collaborator for the keystore.
//!
//! The keystore writes opaque JSON records under a handful of keys. Adapters
//! only move values in and out; they never interpret them.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::core::errors::{KeystoreError, Result};

mod memory;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Record key of the secret envelope list
pub const SECRETS_KEY: &str = "secrets";
/// Record key of the store uid
pub const STORE_UID_KEY: &str = "storeUid";
/// Record key of the stored key list
pub const STORED_KEYS_KEY: &str = "storedKeys";
/// Record key of the stored seed list
pub const STORED_SEEDS_KEY: &str = "storedSeeds";

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Writes several records as one unit. Adapters with transactions override this.
    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()> {
        for (key, value) in entries {
            self.set(&key, value).await?;
        }
        Ok(())
    }
}

/// Typed read returning `default` when the record is absent.
pub async fn get_or<T: DeserializeOwned>(storage: &dyn Storage, key: &str, default: T) -> Result<T> {
    match storage.get(key).await? {
        Some(Value::Null) | None => Ok(default),
        Some(value) => serde_json::from_value(value).map_err(|e| {
            KeystoreError::StorageFailure(format!("record {} is malformed: {}", key, e))
        }),
    }
}

pub fn to_record<T: Serialize>(key: &str, value: &T) -> Result<(String, Value)> {
    Ok((key.to_string(), serde_json::to_value(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_default_when_missing() {
        let storage = MemoryStorage::new();
        let v: Vec<String> = get_or(&storage, "nothing", vec!["d".to_string()]).await.unwrap();
        assert_eq!(v, vec!["d".to_string()]);
    }

    #[tokio::test]
    async fn test_get_or_malformed_is_storage_failure() {
        let storage = MemoryStorage::new();
        storage.set("n", serde_json::json!("not a number")).await.unwrap();
        let err = get_or::<u32>(&storage, "n", 0).await.unwrap_err();
        assert!(matches!(err, KeystoreError::StorageFailure(_)));
    }

    #[tokio::test]
    async fn test_set_many_default_impl() {
        let storage = MemoryStorage::new();
        storage
            .set_many(vec![
                to_record("a", &1u32).unwrap(),
                to_record("b", &"two").unwrap(),
            ])
            .await
            .unwrap();
        assert_eq!(get_or::<u32>(&storage, "a", 0).await.unwrap(), 1);
        assert_eq!(get_or::<String>(&storage, "b", String::new()).await.unwrap(), "two");
    }
}
