//! Identity key pairs used for key agreement.
//!
//! Each local user owns one P-256 key pair. The pair is never used for
//! signing; it only feeds ECDH so two members can reach a shared key
//! without a handshake round trip.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use p256::ecdh::{diffie_hellman, SharedSecret};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::hash::fingerprint;

/// Length of a P-256 secret scalar.
pub const SECRET_KEY_LEN: usize = 32;

/// Error type for identity operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Exportable public half of an identity, as uploaded to the key directory.
///
/// The inner string is the standard base64 encoding of the uncompressed
/// SEC1 point (65 bytes).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKeyMaterial(String);

impl PublicKeyMaterial {
    /// Wrap an encoded public key without validating it.
    ///
    /// Keys coming from the directory are untrusted; validation happens when
    /// they are used for agreement, so one malformed entry can be skipped.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    fn from_public_key(public: &PublicKey) -> Self {
        Self(B64.encode(public.to_encoded_point(false).as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode and validate the point.
    pub fn parse(&self) -> Result<PublicKey, IdentityError> {
        let bytes = B64
            .decode(self.0.as_bytes())
            .map_err(|_| IdentityError::InvalidPublicKey)?;
        PublicKey::from_sec1_bytes(&bytes).map_err(|_| IdentityError::InvalidPublicKey)
    }

    /// Fixed-length prefix of the encoded key, used to bound cache keys.
    pub fn prefix(&self, len: usize) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(len)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// Short hash of the key for logs.
    pub fn fingerprint(&self) -> String {
        fingerprint(self.0.as_bytes())
    }
}

impl fmt::Debug for PublicKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKeyMaterial")
            .field(&self.fingerprint())
            .finish()
    }
}

impl fmt::Display for PublicKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A P-256 key-agreement key pair.
///
/// `SecretKey` zeroizes its scalar on drop.
#[derive(Clone)]
pub struct IdentityKeyPair {
    secret: SecretKey,
}

impl IdentityKeyPair {
    /// Generate a new random key pair using a secure random source.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Restore a key pair from a persisted 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(IdentityError::InvalidKeyLength {
                expected: SECRET_KEY_LEN,
                got: bytes.len(),
            });
        }
        let secret = SecretKey::from_slice(bytes).map_err(|_| IdentityError::InvalidSecretKey)?;
        Ok(Self { secret })
    }

    /// Raw secret scalar for local persistence only.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LEN]> {
        let mut out = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        out.copy_from_slice(self.secret.to_bytes().as_slice());
        out
    }

    /// Public half, serialized for upload.
    pub fn public_key(&self) -> PublicKeyMaterial {
        PublicKeyMaterial::from_public_key(&self.secret.public_key())
    }

    /// Perform P-256 Diffie-Hellman against a counterpart's public key.
    pub fn diffie_hellman(&self, their: &PublicKeyMaterial) -> Result<SharedSecret, IdentityError> {
        let their = their.parse()?;
        Ok(diffie_hellman(
            self.secret.to_nonzero_scalar(),
            their.as_affine(),
        ))
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}
