//! Sender key manager.
//!
//! Owns one active sender key per `(channel, sender)`: the local user's own
//! keys, which it creates and rotates, and remote senders' keys, which the
//! distribution protocol hands to it. Records live in an in-memory cache in
//! front of the local store.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use huddle_crypto::aead::SymmetricKey;
use huddle_crypto::random::epoch_id;

use crate::errors::CoreResult;
use crate::store::{KeyValueStore, StoreError, StoreName};

/// One generation of a sender's symmetric key in one channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SenderKeyRecord {
    pub key: SymmetricKey,
    /// Counter value the next local message will carry.
    pub counter: u64,
    /// Epoch id distinguishing this generation from later rotations.
    pub key_id: String,
}

impl SenderKeyRecord {
    fn generate() -> CoreResult<Self> {
        Ok(Self {
            key: SymmetricKey::generate()?,
            counter: 0,
            key_id: epoch_id()?,
        })
    }
}

/// On-disk form of a [`SenderKeyRecord`].
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    counter: u64,
    key_id: String,
}

impl StoredRecord {
    fn encode(record: &SenderKeyRecord) -> Result<Vec<u8>, StoreError> {
        let stored = StoredRecord {
            key: B64.encode(record.key.as_bytes()),
            counter: record.counter,
            key_id: record.key_id.clone(),
        };
        Ok(serde_json::to_vec(&stored)?)
    }

    fn decode(bytes: &[u8]) -> Result<SenderKeyRecord, StoreError> {
        let stored: StoredRecord = serde_json::from_slice(bytes)?;
        let raw = B64
            .decode(stored.key.as_bytes())
            .map_err(|e| StoreError::DataCorruption(format!("sender key encoding: {}", e)))?;
        let key = SymmetricKey::from_slice(&raw)
            .map_err(|e| StoreError::DataCorruption(format!("sender key: {}", e)))?;
        Ok(SenderKeyRecord {
            key,
            counter: stored.counter,
            key_id: stored.key_id,
        })
    }
}

type RecordKey = (String, String);

/// Store key for a record. Length-prefixed so ids containing ':' cannot collide.
fn record_name(channel_id: &str, sender_id: &str) -> String {
    format!("{}:{}:{}", channel_id.len(), channel_id, sender_id)
}

/// Sender keys by `(channel, sender)`, cached in memory and persisted.
pub struct SenderKeyManager<S> {
    store: S,
    cache: RwLock<HashMap<RecordKey, SenderKeyRecord>>,
}

impl<S: KeyValueStore> SenderKeyManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn load_from_store(
        &self,
        channel_id: &str,
        sender_id: &str,
    ) -> CoreResult<Option<SenderKeyRecord>> {
        let Some(bytes) = self
            .store
            .get(StoreName::SenderKeys, &record_name(channel_id, sender_id))
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(StoredRecord::decode(&bytes)?))
    }

    async fn persist(
        &self,
        channel_id: &str,
        sender_id: &str,
        record: &SenderKeyRecord,
    ) -> CoreResult<()> {
        self.store
            .set(
                StoreName::SenderKeys,
                &record_name(channel_id, sender_id),
                StoredRecord::encode(record)?,
            )
            .await?;
        Ok(())
    }

    /// Cached or persisted record for `(channel, sender)`.
    pub async fn load_key(
        &self,
        channel_id: &str,
        sender_id: &str,
    ) -> CoreResult<Option<SenderKeyRecord>> {
        let key = (channel_id.to_string(), sender_id.to_string());
        if let Some(record) = self.cache.read().await.get(&key) {
            return Ok(Some(record.clone()));
        }

        let Some(record) = self.load_from_store(channel_id, sender_id).await? else {
            return Ok(None);
        };
        self.cache.write().await.insert(key, record.clone());
        Ok(Some(record))
    }

    /// Whether a record exists for `(channel, sender)`: cache first, then store.
    pub async fn has_key(&self, channel_id: &str, sender_id: &str) -> CoreResult<bool> {
        let key = (channel_id.to_string(), sender_id.to_string());
        if self.cache.read().await.contains_key(&key) {
            return Ok(true);
        }
        Ok(self
            .store
            .get(StoreName::SenderKeys, &record_name(channel_id, sender_id))
            .await?
            .is_some())
    }

    /// Resolve the local user's record while the caller holds the cache
    /// write lock, creating and persisting a new epoch if none exists.
    async fn own_record_locked(
        &self,
        cache: &mut HashMap<RecordKey, SenderKeyRecord>,
        user_id: &str,
        channel_id: &str,
    ) -> CoreResult<SenderKeyRecord> {
        let key = (channel_id.to_string(), user_id.to_string());
        if let Some(record) = cache.get(&key) {
            return Ok(record.clone());
        }

        let record = match self.load_from_store(channel_id, user_id).await? {
            Some(record) => record,
            None => {
                let record = SenderKeyRecord::generate()?;
                self.persist(channel_id, user_id, &record).await?;
                info!(
                    channel = %channel_id,
                    sender = %user_id,
                    key_id = %record.key_id,
                    "created sender key"
                );
                record
            }
        };
        cache.insert(key, record.clone());
        Ok(record)
    }

    /// The local user's sender key for `channel_id`, created on first use.
    pub async fn get_or_create_own_key(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> CoreResult<SenderKeyRecord> {
        if let Some(record) = self.load_key(channel_id, user_id).await? {
            return Ok(record);
        }
        let mut cache = self.cache.write().await;
        self.own_record_locked(&mut cache, user_id, channel_id).await
    }

    /// Take the next message slot on the local sender key.
    ///
    /// Returns the record as it applies to this message (its `counter` is the
    /// value to put on the wire) and persists the incremented counter. The
    /// cache write lock is held across the increment and the store write, so
    /// concurrent sends through one manager never reuse a counter.
    pub async fn next_message(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> CoreResult<SenderKeyRecord> {
        let mut cache = self.cache.write().await;
        let this_message = self.own_record_locked(&mut cache, user_id, channel_id).await?;

        let mut advanced = this_message.clone();
        advanced.counter = advanced.counter.saturating_add(1);
        self.persist(channel_id, user_id, &advanced).await?;
        cache.insert((channel_id.to_string(), user_id.to_string()), advanced);

        Ok(this_message)
    }

    /// Install a remote sender's key delivered through a distribution.
    /// Overwrites any earlier record for `(channel, sender)`.
    pub async fn cache_remote_key(
        &self,
        channel_id: &str,
        sender_id: &str,
        raw_key: &[u8],
        key_id: &str,
    ) -> CoreResult<()> {
        let record = SenderKeyRecord {
            key: SymmetricKey::from_slice(raw_key)?,
            counter: 0,
            key_id: key_id.to_string(),
        };

        let mut cache = self.cache.write().await;
        self.persist(channel_id, sender_id, &record).await?;
        debug!(channel = %channel_id, sender = %sender_id, key_id = %key_id, "cached remote sender key");
        cache.insert((channel_id.to_string(), sender_id.to_string()), record);
        Ok(())
    }

    /// Forget the local user's sender key for `channel_id`. The next
    /// [`get_or_create_own_key`](Self::get_or_create_own_key) creates a new
    /// epoch. Redistribution is the caller's job.
    pub async fn rotate(&self, user_id: &str, channel_id: &str) -> CoreResult<()> {
        let mut cache = self.cache.write().await;
        let old = cache.remove(&(channel_id.to_string(), user_id.to_string()));
        self.store
            .delete(StoreName::SenderKeys, &record_name(channel_id, user_id))
            .await?;
        info!(
            channel = %channel_id,
            sender = %user_id,
            old_key_id = old.as_ref().map(|r| r.key_id.as_str()).unwrap_or("-"),
            "rotated sender key"
        );
        Ok(())
    }
}
