//! Error types for huddle core.
//!
//! Only hard failures live here: a missing identity, a broken store, a
//! failing collaborator. Soft failures on the receive path (missing sender
//! key, bad tag, malformed envelope) are values of
//! [`Decrypted`](crate::engine::Decrypted) and never become errors.

use thiserror::Error;

use huddle_crypto::aead::AeadError;
use huddle_crypto::identity::IdentityError;
use huddle_crypto::pairwise::PairwiseError;
use huddle_crypto::random::RngError;

use crate::directory::DirectoryError;
use crate::envelope::EnvelopeError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Top-level error type for huddle core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No local key pair for this identity. Blocks every operation that needs it.
    #[error("no identity key for user {0}")]
    NoIdentityKey(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("pairwise key agreement failed: {0}")]
    Pairwise(#[from] PairwiseError),

    #[error("encryption error: {0}")]
    Aead(#[from] AeadError),

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("random number generator failed")]
    Rng(#[from] RngError),

    #[error("key directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl CoreError {
    /// Whether this error is the missing-identity case.
    pub fn is_missing_identity(&self) -> bool {
        matches!(self, CoreError::NoIdentityKey(_))
    }
}

/// Result alias for huddle core.
pub type CoreResult<T> = Result<T, CoreError>;
