//! Local key-value storage for key material.
//!
//! This module defines the `KeyValueStore` trait the engine persists through
//! and an in-memory implementation for tests and ephemeral clients. Every
//! call is an await point; callers must not assume two calls observe the
//! same snapshot.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// ============================================================================
// Store Names
// ============================================================================

/// Logical stores inside the local key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreName {
    /// Identity key pairs, keyed by user id.
    Identity,
    /// Sender key records, keyed by `channel:sender`.
    SenderKeys,
}

impl StoreName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreName::Identity => "identity",
            StoreName::SenderKeys => "sender_keys",
        }
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Persistent key-value store scoped to the running client.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Returns
    /// * `Ok(Some(value))` if present
    /// * `Ok(None)` if absent
    /// * `Err(StoreError)` if the operation fails
    async fn get(&self, store: StoreName, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or overwrite a value.
    async fn set(&self, store: StoreName, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Remove a value. Succeeds even if the key did not exist.
    async fn delete(&self, store: StoreName, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, store: StoreName, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(store, key).await
    }

    async fn set(&self, store: StoreName, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        (**self).set(store, key, value).await
    }

    async fn delete(&self, store: StoreName, key: &str) -> Result<(), StoreError> {
        (**self).delete(store, key).await
    }
}

// ============================================================================
// In-Memory Store Implementation
// ============================================================================

/// Thread-safe in-memory store.
///
/// Clones share the same underlying map, which lets tests simulate a client
/// restart by building a fresh engine over a clone of the old store.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<(StoreName, String), Vec<u8>>>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in one logical store.
    pub async fn len(&self, store: StoreName) -> usize {
        let entries = self.entries.read().await;
        entries.keys().filter(|(s, _)| *s == store).count()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, store: StoreName, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(&(store, key.to_string())).cloned())
    }

    async fn set(&self, store: StoreName, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert((store, key.to_string()), value);
        Ok(())
    }

    async fn delete(&self, store: StoreName, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(&(store, key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryStore::new();
        store
            .set(StoreName::Identity, "alice:public", b"pk".to_vec())
            .await
            .unwrap();

        let value = store.get(StoreName::Identity, "alice:public").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"pk"[..]));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = InMemoryStore::new();
        assert!(store.get(StoreName::Identity, "nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stores_are_isolated() {
        let store = InMemoryStore::new();
        store.set(StoreName::Identity, "k", vec![1]).await.unwrap();

        assert!(store.get(StoreName::SenderKeys, "k").await.unwrap().is_none());
        assert_eq!(store.len(StoreName::Identity).await, 1);
        assert_eq!(store.len(StoreName::SenderKeys).await, 0);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = InMemoryStore::new();
        store.set(StoreName::SenderKeys, "c1:alice", vec![1]).await.unwrap();
        store.set(StoreName::SenderKeys, "c1:alice", vec![2]).await.unwrap();

        let value = store.get(StoreName::SenderKeys, "c1:alice").await.unwrap();
        assert_eq!(value, Some(vec![2]));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryStore::new();
        store.set(StoreName::SenderKeys, "c1:alice", vec![1]).await.unwrap();
        store.delete(StoreName::SenderKeys, "c1:alice").await.unwrap();
        // Deleting again is not an error.
        store.delete(StoreName::SenderKeys, "c1:alice").await.unwrap();

        assert!(store.get(StoreName::SenderKeys, "c1:alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = InMemoryStore::new();
        let other = store.clone();
        store.set(StoreName::Identity, "k", vec![9]).await.unwrap();

        assert_eq!(other.get(StoreName::Identity, "k").await.unwrap(), Some(vec![9]));
    }
}
