//! Pairwise key cache.
//!
//! Derivation is deterministic for a given pair of long-term keys, so the
//! result can be cached for the lifetime of the process. The cache is an
//! explicit object owned by the engine; tests get isolated state by building
//! their own.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use huddle_crypto::aead::SymmetricKey;
use huddle_crypto::identity::{IdentityKeyPair, PublicKeyMaterial};
use huddle_crypto::pairwise::{derive_shared, PairwiseError};

/// Default number of leading characters of the encoded public key used in
/// the cache key. The first two characters are the constant SEC1 tag, the
/// remainder covers 22 bytes of the x-coordinate.
pub const DEFAULT_PREFIX_LEN: usize = 32;

/// Below this the cache key stops covering enough of the x-coordinate.
pub const MIN_PREFIX_LEN: usize = 16;
/// Encoded uncompressed P-256 points are 88 characters.
pub const MAX_PREFIX_LEN: usize = 88;

/// In-memory cache of derived pairwise keys, keyed by
/// `(local user id, counterpart key prefix)`.
pub struct PairwiseKeys {
    prefix_len: usize,
    cache: RwLock<HashMap<(String, String), SymmetricKey>>,
}

impl Default for PairwiseKeys {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX_LEN)
    }
}

impl PairwiseKeys {
    /// `prefix_len` is clamped to `MIN_PREFIX_LEN..=MAX_PREFIX_LEN`; a
    /// shorter prefix would let different peers share one cache entry.
    pub fn new(prefix_len: usize) -> Self {
        let clamped = prefix_len.clamp(MIN_PREFIX_LEN, MAX_PREFIX_LEN);
        if clamped != prefix_len {
            warn!(requested = prefix_len, using = clamped, "pairwise prefix length out of range");
        }
        Self {
            prefix_len: clamped,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn cache_key(&self, my_user_id: &str, theirs: &PublicKeyMaterial) -> (String, String) {
        (my_user_id.to_string(), theirs.prefix(self.prefix_len).to_string())
    }

    /// Derive without touching the cache.
    pub fn derive_shared(
        mine: &IdentityKeyPair,
        theirs: &PublicKeyMaterial,
    ) -> Result<SymmetricKey, PairwiseError> {
        derive_shared(mine, theirs)
    }

    /// Return the cached key for this pair, deriving it on first use.
    pub async fn get_or_derive_shared(
        &self,
        my_user_id: &str,
        mine: &IdentityKeyPair,
        theirs: &PublicKeyMaterial,
    ) -> Result<SymmetricKey, PairwiseError> {
        let key = self.cache_key(my_user_id, theirs);
        if let Some(shared) = self.cache.read().await.get(&key) {
            return Ok(shared.clone());
        }

        let shared = derive_shared(mine, theirs)?;
        debug!(user = %my_user_id, peer_key = %theirs.fingerprint(), "derived pairwise key");
        self.cache.write().await.insert(key, shared.clone());
        Ok(shared)
    }

    /// Drop every cached key derived for `my_user_id`. Required after that
    /// identity's key pair is regenerated.
    pub async fn evict_user(&self, my_user_id: &str) {
        self.cache
            .write()
            .await
            .retain(|(user, _), _| user != my_user_id);
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}
