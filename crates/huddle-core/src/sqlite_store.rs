//! SQLite-backed key-value store.
//!
//! Durable storage for identity keys and sender key records. All logical
//! stores share one table keyed by `(store, key)`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::store::{KeyValueStore, StoreError, StoreName};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// SQLite-based persistent store.
///
/// The connection is guarded by a mutex; statements are short enough that
/// holding it across the blocking call is acceptable for a client store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::OperationFailed(format!("failed to open database: {}", e))
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StoreError::OperationFailed(format!("failed to set pragmas: {}", e)))?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory SQLite store for testing.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StoreError::OperationFailed(format!("failed to open in-memory database: {}", e))
        })?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )
        .map_err(|e| StoreError::OperationFailed(format!("failed to create schema_version: {}", e)))?;

        let current_version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .map_err(|e| StoreError::OperationFailed(format!("failed to read schema_version: {}", e)))?;

        if current_version < 1 {
            Self::migrate_v1(conn)?;
        }

        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                store TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (store, key)
            );
            "#,
        )
        .map_err(|e| StoreError::OperationFailed(format!("migration v1 failed: {}", e)))?;

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::OperationFailed(format!("failed to record schema version: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, store: StoreName, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT value FROM kv WHERE store = ?1 AND key = ?2",
            params![store.as_str(), key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| StoreError::OperationFailed(format!("get failed: {}", e)))
    }

    async fn set(&self, store: StoreName, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO kv (store, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(store, key) DO UPDATE SET value = excluded.value",
            params![store.as_str(), key, value],
        )
        .map_err(|e| StoreError::OperationFailed(format!("set failed: {}", e)))?;
        Ok(())
    }

    async fn delete(&self, store: StoreName, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM kv WHERE store = ?1 AND key = ?2",
            params![store.as_str(), key],
        )
        .map_err(|e| StoreError::OperationFailed(format!("delete failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_set_and_get() {
        let store = SqliteStore::new_in_memory().unwrap();
        store
            .set(StoreName::SenderKeys, "c1:alice", b"record".to_vec())
            .await
            .unwrap();

        let value = store.get(StoreName::SenderKeys, "c1:alice").await.unwrap();
        assert_eq!(value, Some(b"record".to_vec()));
    }

    #[tokio::test]
    async fn test_sqlite_get_nonexistent() {
        let store = SqliteStore::new_in_memory().unwrap();
        assert!(store.get(StoreName::Identity, "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_overwrite_and_delete() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.set(StoreName::Identity, "k", vec![1]).await.unwrap();
        store.set(StoreName::Identity, "k", vec![2]).await.unwrap();
        assert_eq!(store.get(StoreName::Identity, "k").await.unwrap(), Some(vec![2]));

        store.delete(StoreName::Identity, "k").await.unwrap();
        assert!(store.get(StoreName::Identity, "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_stores_are_isolated() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.set(StoreName::Identity, "k", vec![1]).await.unwrap();
        assert!(store.get(StoreName::SenderKeys, "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.set(StoreName::Identity, "alice:private", vec![7; 32]).await.unwrap();
        }

        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(
            reopened.get(StoreName::Identity, "alice:private").await.unwrap(),
            Some(vec![7; 32])
        );
    }
}
