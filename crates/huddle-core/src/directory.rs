//! Public key directory.
//!
//! Distributions need the identity public key of every participant in a
//! channel. Where those keys come from is the embedding application's
//! business; the engine only sees the [`KeyDirectory`] trait.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use huddle_crypto::identity::PublicKeyMaterial;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("http error: {0}")]
    Http(String),
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

/// A channel member and their identity public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub public_key: PublicKeyMaterial,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, public_key: PublicKeyMaterial) -> Self {
        Self {
            user_id: user_id.into(),
            public_key,
        }
    }
}

/// Source of channel rosters and their public keys.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Current participants of `channel_id` that have published a key.
    async fn fetch_participant_keys(&self, channel_id: &str)
        -> Result<Vec<Participant>, DirectoryError>;

    /// Publish `user_id`'s identity public key.
    async fn upload_public_key(
        &self,
        user_id: &str,
        public_key: &PublicKeyMaterial,
    ) -> Result<(), DirectoryError>;
}

#[async_trait]
impl<T: KeyDirectory + ?Sized> KeyDirectory for Arc<T> {
    async fn fetch_participant_keys(
        &self,
        channel_id: &str,
    ) -> Result<Vec<Participant>, DirectoryError> {
        (**self).fetch_participant_keys(channel_id).await
    }

    async fn upload_public_key(
        &self,
        user_id: &str,
        public_key: &PublicKeyMaterial,
    ) -> Result<(), DirectoryError> {
        (**self).upload_public_key(user_id, public_key).await
    }
}

#[derive(Default)]
struct DirectoryState {
    keys: HashMap<String, PublicKeyMaterial>,
    // Ordered so rosters come back in a stable order.
    members: HashMap<String, BTreeSet<String>>,
}

/// Directory held in process memory. Clones share state.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, channel_id: &str, user_id: &str) {
        self.state
            .write()
            .await
            .members
            .entry(channel_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    /// Returns whether the user was a member.
    pub async fn remove_member(&self, channel_id: &str, user_id: &str) -> bool {
        self.state
            .write()
            .await
            .members
            .get_mut(channel_id)
            .is_some_and(|m| m.remove(user_id))
    }

    pub async fn members(&self, channel_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .members
            .get(channel_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyDirectory for InMemoryDirectory {
    async fn fetch_participant_keys(
        &self,
        channel_id: &str,
    ) -> Result<Vec<Participant>, DirectoryError> {
        let state = self.state.read().await;
        let members = state
            .members
            .get(channel_id)
            .ok_or_else(|| DirectoryError::UnknownChannel(channel_id.to_string()))?;
        Ok(members
            .iter()
            .filter_map(|user| {
                state
                    .keys
                    .get(user)
                    .map(|key| Participant::new(user.clone(), key.clone()))
            })
            .collect())
    }

    async fn upload_public_key(
        &self,
        user_id: &str,
        public_key: &PublicKeyMaterial,
    ) -> Result<(), DirectoryError> {
        self.state
            .write()
            .await
            .keys
            .insert(user_id.to_string(), public_key.clone());
        Ok(())
    }
}

#[cfg(feature = "http-directory")]
pub use http::HttpKeyDirectory;

#[cfg(feature = "http-directory")]
mod http {
    use reqwest::{StatusCode, Url};

    use super::*;

    #[derive(Serialize)]
    struct UploadBody<'a> {
        public_key: &'a PublicKeyMaterial,
    }

    #[derive(Deserialize)]
    struct ChannelKeys {
        participants: Vec<Participant>,
    }

    /// Key directory behind an HTTP service.
    ///
    /// `GET {base}/v1/channels/{channel}/keys` returns
    /// `{"participants": [{"user_id", "public_key"}]}`;
    /// `PUT {base}/v1/users/{user}/key` takes `{"public_key"}`.
    #[derive(Clone)]
    pub struct HttpKeyDirectory {
        base_url: Url,
        client: reqwest::Client,
    }

    impl HttpKeyDirectory {
        pub fn new(base_url: &str) -> Result<Self, DirectoryError> {
            let base_url = Url::parse(base_url.trim_end_matches('/'))
                .map_err(|e| DirectoryError::Http(format!("invalid base url: {}", e)))?;
            if base_url.cannot_be_a_base() {
                return Err(DirectoryError::Http(format!(
                    "invalid base url: {}",
                    base_url
                )));
            }
            let client = reqwest::Client::builder()
                .use_rustls_tls()
                .build()
                .map_err(|e| DirectoryError::Http(e.to_string()))?;
            Ok(Self { base_url, client })
        }

        /// Append path segments, percent-encoding each one.
        pub(crate) fn url(&self, segments: &[&str]) -> Url {
            let mut url = self.base_url.clone();
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().extend(segments);
            }
            url
        }
    }

    async fn bad_response(resp: reqwest::Response) -> DirectoryError {
        DirectoryError::BadResponse(format!(
            "status={} body={:?}",
            resp.status(),
            resp.text().await.ok()
        ))
    }

    #[async_trait]
    impl KeyDirectory for HttpKeyDirectory {
        async fn fetch_participant_keys(
            &self,
            channel_id: &str,
        ) -> Result<Vec<Participant>, DirectoryError> {
            let url = self.url(&["v1", "channels", channel_id, "keys"]);
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| DirectoryError::Http(e.to_string()))?;

            match resp.status() {
                StatusCode::OK => {
                    let body: ChannelKeys = resp
                        .json()
                        .await
                        .map_err(|e| DirectoryError::BadResponse(e.to_string()))?;
                    Ok(body.participants)
                }
                StatusCode::NOT_FOUND => Err(DirectoryError::UnknownChannel(channel_id.to_string())),
                _ => Err(bad_response(resp).await),
            }
        }

        async fn upload_public_key(
            &self,
            user_id: &str,
            public_key: &PublicKeyMaterial,
        ) -> Result<(), DirectoryError> {
            let url = self.url(&["v1", "users", user_id, "key"]);
            let resp = self
                .client
                .put(url)
                .json(&UploadBody { public_key })
                .send()
                .await
                .map_err(|e| DirectoryError::Http(e.to_string()))?;

            if resp.status().is_success() {
                Ok(())
            } else {
                Err(bad_response(resp).await)
            }
        }
    }
}
