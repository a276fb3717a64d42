//! Pairwise key agreement between exactly two identities.
//!
//! shared  = ECDH(my_secret, their_public)            (x-coordinate, 32 bytes)
//! key     = HKDF-SHA256(salt = "huddle/pairwise/v1", ikm = shared, info = "aes-256-gcm")
//!
//! Both sides reach the same key independently; nothing about the pair's
//! ordering enters the derivation.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::aead::{SymmetricKey, KEY_LEN};
use crate::identity::{IdentityError, IdentityKeyPair, PublicKeyMaterial};

const PAIRWISE_SALT: &[u8] = b"huddle/pairwise/v1";
const PAIRWISE_INFO: &[u8] = b"aes-256-gcm";

/// Error type for pairwise derivation.
#[derive(Debug, thiserror::Error)]
pub enum PairwiseError {
    #[error("counterpart public key rejected: {0}")]
    PublicKey(#[from] IdentityError),
    #[error("key derivation failed")]
    Kdf,
}

/// Derive the symmetric key shared between `mine` and the holder of `theirs`.
pub fn derive_shared(
    mine: &IdentityKeyPair,
    theirs: &PublicKeyMaterial,
) -> Result<SymmetricKey, PairwiseError> {
    let shared = mine.diffie_hellman(theirs)?;
    let hk = Hkdf::<Sha256>::new(Some(PAIRWISE_SALT), shared.raw_secret_bytes().as_slice());

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(PAIRWISE_INFO, okm.as_mut_slice())
        .map_err(|_| PairwiseError::Kdf)?;
    Ok(SymmetricKey::from_bytes(*okm))
}
