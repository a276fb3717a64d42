//! AES-256-GCM sealing with random 96-bit nonces.
//!
//! Every symmetric key in the system (pairwise, sender, legacy message keys)
//! goes through this module.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use constant_time_eq::constant_time_eq_32;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::fingerprint;
use crate::random::random_array;

/// AES-256 key length.
pub const KEY_LEN: usize = 32;
/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Error type for AEAD operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AeadError {
    #[error("invalid key length: expected {KEY_LEN}, got {0}")]
    InvalidKeyLength(usize),
    #[error("invalid nonce length: expected {NONCE_LEN}, got {0}")]
    InvalidNonceLength(usize),
    #[error("invalid blob: too short")]
    InvalidBlob,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed")]
    DecryptFailed,
    #[error("RNG failed")]
    RngError,
}

/// A 256-bit symmetric key capable of authenticated encryption.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Generate fresh key material from the OS RNG.
    pub fn generate() -> Result<Self, AeadError> {
        Ok(Self(random_array().map_err(|_| AeadError::RngError)?))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, AeadError> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| AeadError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short hash of the key for logs.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq_32(&self.0, &other.0)
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SymmetricKey").field(&self.fingerprint()).finish()
    }
}

/// Output of [`seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the 16-byte tag appended.
    pub ciphertext: Vec<u8>,
}

impl Sealed {
    /// Serialize as `nonce(12) || ciphertext+tag`.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }
}

/// Encrypt under a fresh random nonce.
pub fn seal(key: &SymmetricKey, plaintext: &[u8]) -> Result<Sealed, AeadError> {
    let nonce: [u8; NONCE_LEN] = random_array().map_err(|_| AeadError::RngError)?;
    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| AeadError::EncryptFailed)?;
    Ok(Sealed { nonce, ciphertext })
}

/// Decrypt and authenticate.
pub fn open(key: &SymmetricKey, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, AeadError> {
    if nonce.len() != NONCE_LEN {
        return Err(AeadError::InvalidNonceLength(nonce.len()));
    }
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AeadError::DecryptFailed)
}

/// Encrypt and return `nonce(12) || ciphertext+tag`.
pub fn seal_blob(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, AeadError> {
    Ok(seal(key, plaintext)?.to_blob())
}

/// Decrypt a `nonce(12) || ciphertext+tag` blob.
pub fn open_blob(key: &SymmetricKey, blob: &[u8]) -> Result<Vec<u8>, AeadError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(AeadError::InvalidBlob);
    }
    let (nonce, ct) = blob.split_at(NONCE_LEN);
    open(key, nonce, ct)
}
