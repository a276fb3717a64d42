//! Identity key store.
//!
//! Generates and persists one P-256 key pair per local user. The private
//! scalar only ever lives in the local store and in process memory; the
//! public half is handed out for upload to the key directory.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, info};

use huddle_crypto::identity::{IdentityKeyPair, PublicKeyMaterial};

use crate::errors::{CoreError, CoreResult};
use crate::store::{KeyValueStore, StoreError, StoreName};

fn private_key_name(user_id: &str) -> String {
    format!("{}:private", user_id)
}

fn public_key_name(user_id: &str) -> String {
    format!("{}:public", user_id)
}

/// Identity key pairs for local users, persisted through a [`KeyValueStore`].
pub struct IdentityKeyStore<S> {
    store: S,
    loaded: RwLock<HashMap<String, IdentityKeyPair>>,
}

impl<S: KeyValueStore> IdentityKeyStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    /// Create a fresh key pair for `user_id`, persist both halves, and return
    /// the public half.
    ///
    /// Not idempotent: a second call replaces the private key and every
    /// pairwise key derived from the old one becomes useless. Guard with
    /// [`has_identity`](Self::has_identity) or use
    /// [`ensure_identity`](Self::ensure_identity).
    pub async fn generate_identity(&self, user_id: &str) -> CoreResult<PublicKeyMaterial> {
        let pair = IdentityKeyPair::generate();
        let public = pair.public_key();

        self.store
            .set(
                StoreName::Identity,
                &private_key_name(user_id),
                pair.secret_bytes().to_vec(),
            )
            .await?;
        self.store
            .set(
                StoreName::Identity,
                &public_key_name(user_id),
                public.as_str().as_bytes().to_vec(),
            )
            .await?;

        self.loaded.write().await.insert(user_id.to_string(), pair);
        info!(user = %user_id, key = %public.fingerprint(), "generated identity key pair");
        Ok(public)
    }

    /// Return the existing public key, generating a key pair only if none exists.
    pub async fn ensure_identity(&self, user_id: &str) -> CoreResult<PublicKeyMaterial> {
        match self.export_public_key(user_id).await? {
            Some(public) => Ok(public),
            None => self.generate_identity(user_id).await,
        }
    }

    /// True iff a private key is present locally.
    pub async fn has_identity(&self, user_id: &str) -> CoreResult<bool> {
        if self.loaded.read().await.contains_key(user_id) {
            return Ok(true);
        }
        Ok(self
            .store
            .get(StoreName::Identity, &private_key_name(user_id))
            .await?
            .is_some())
    }

    /// The public half of `user_id`'s key pair, if one exists.
    pub async fn export_public_key(&self, user_id: &str) -> CoreResult<Option<PublicKeyMaterial>> {
        if let Some(pair) = self.loaded.read().await.get(user_id) {
            return Ok(Some(pair.public_key()));
        }
        match self.load(user_id).await? {
            Some(pair) => Ok(Some(pair.public_key())),
            None => Ok(None),
        }
    }

    /// The full key pair, failing with `NoIdentityKey` when absent.
    pub async fn key_pair(&self, user_id: &str) -> CoreResult<IdentityKeyPair> {
        if let Some(pair) = self.loaded.read().await.get(user_id) {
            return Ok(pair.clone());
        }
        self.load(user_id)
            .await?
            .ok_or_else(|| CoreError::NoIdentityKey(user_id.to_string()))
    }

    async fn load(&self, user_id: &str) -> CoreResult<Option<IdentityKeyPair>> {
        let Some(secret) = self
            .store
            .get(StoreName::Identity, &private_key_name(user_id))
            .await?
        else {
            return Ok(None);
        };

        let pair = IdentityKeyPair::from_secret_bytes(&secret).map_err(|e| {
            StoreError::DataCorruption(format!("identity key for {}: {}", user_id, e))
        })?;
        debug!(user = %user_id, "loaded identity key pair from store");

        self.loaded
            .write()
            .await
            .insert(user_id.to_string(), pair.clone());
        Ok(Some(pair))
    }
}
