//! SQLite-backed key/value records.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::Storage;
use crate::core::errors::{KeystoreError, Result};

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    is_memory: bool,
}

impl SqliteStorage {
    pub async fn new_with_url(database_url: &str) -> Result<Self> {
        // accept "sqlite:" as well as "sqlite://"
        let mut db_url = database_url.to_string();
        if db_url.starts_with("sqlite:") && !db_url.starts_with("sqlite://") && !db_url.contains(":memory:") {
            db_url = db_url.replacen("sqlite:", "sqlite://", 1);
        }
        let is_memory = db_url.contains(":memory:");

        if !is_memory {
            if let Some(path) = db_url.strip_prefix("sqlite://") {
                let path_only = path.split_once('?').map(|(p, _)| p).unwrap_or(path);
                if let Some(parent) = std::path::Path::new(path_only).parent() {
                    if !parent.as_os_str().is_empty() {
                        if let Err(e) = std::fs::create_dir_all(parent) {
                            warn!("Failed to create database dir {:?}: {}", parent, e);
                        }
                    }
                }
            }
        }

        // Avoid logging the full URL, it may point at a user profile path.
        let safe_db_url_info = match db_url.split_once(':') {
            Some((scheme, rest)) => format!("{}:(redacted, len={})", scheme, rest.len()),
            None => "(invalid db_url format)".to_string(),
        };
        info!(db = %safe_db_url_info, memory = is_memory, "[storage] connecting to keystore database");

        let mut connect_options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| KeystoreError::StorageFailure(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);
        if !is_memory {
            connect_options = connect_options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // an in-memory database lives and dies with its single connection
        let pool_options = if is_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(30))
                .idle_timeout(Duration::from_secs(600))
        };

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| KeystoreError::StorageFailure(format!("Failed to connect to database: {}", e)))?;

        let storage = Self { pool, is_memory };
        storage.initialize_schema().await?;
        info!("Keystore storage initialized");
        Ok(storage)
    }

    pub fn is_in_memory(&self) -> bool {
        self.is_memory
    }

    async fn initialize_schema(&self) -> Result<()> {
        debug!("Initializing keystore schema");
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS keystore_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| KeystoreError::StorageFailure(format!("Failed to create keystore_kv table: {}", e)))?;
        Ok(())
    }
}

const UPSERT: &str = r#"
    INSERT INTO keystore_kv (key, value, updated_at) VALUES (?, ?, ?)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
"#;

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM keystore_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("value")?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value.to_string())
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_many(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let ts = now_millis();
        for (key, value) in entries {
            sqlx::query(UPSERT)
                .bind(key)
                .bind(value.to_string())
                .bind(ts)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_memory_roundtrip() {
        let storage = SqliteStorage::new_with_url("sqlite::memory:").await.unwrap();
        assert!(storage.is_in_memory());
        assert!(storage.get("secrets").await.unwrap().is_none());

        storage.set("secrets", json!([{"id": "password"}])).await.unwrap();
        storage.set("secrets", json!([{"id": "recovery"}])).await.unwrap();
        assert_eq!(storage.get("secrets").await.unwrap(), Some(json!([{"id": "recovery"}])));
    }

    #[tokio::test]
    async fn test_sqlite_set_many() {
        let storage = SqliteStorage::new_with_url("sqlite::memory:").await.unwrap();
        storage
            .set_many(vec![("a".into(), json!(1)), ("b".into(), json!("x"))])
            .await
            .unwrap();
        assert_eq!(storage.get("a").await.unwrap(), Some(json!(1)));
        assert_eq!(storage.get("b").await.unwrap(), Some(json!("x")));
    }
}
