#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::aead::{open, open_blob, seal, seal_blob, SymmetricKey, NONCE_LEN};
    use crate::identity::IdentityKeyPair;
    use crate::pairwise::derive_shared;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_aead_round_trip(key in any::<[u8; 32]>(), msg in any::<Vec<u8>>()) {
            let key = SymmetricKey::from_bytes(key);
            let blob = seal_blob(&key, &msg).unwrap();
            prop_assert_eq!(open_blob(&key, &blob).unwrap(), msg);
        }

        #[test]
        fn test_aead_tamper_detection(
            key in any::<[u8; 32]>(),
            msg in proptest::collection::vec(any::<u8>(), 1..256),
            idx in any::<usize>(),
            flip in 1u8..=255,
        ) {
            let key = SymmetricKey::from_bytes(key);
            let sealed = seal(&key, &msg).unwrap();

            // Flip one byte anywhere in nonce || ciphertext.
            let mut blob = sealed.to_blob();
            let i = idx % blob.len();
            blob[i] ^= flip;

            let (nonce, ct) = blob.split_at(NONCE_LEN);
            prop_assert!(open(&key, nonce, ct).is_err());
        }

        #[test]
        fn test_pairwise_symmetry_any_keys(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            // Most 32-byte strings are valid scalars; skip the rest.
            let (Ok(alice), Ok(bob)) = (
                IdentityKeyPair::from_secret_bytes(&a),
                IdentityKeyPair::from_secret_bytes(&b),
            ) else {
                return Ok(());
            };
            let ab = derive_shared(&alice, &bob.public_key()).unwrap();
            let ba = derive_shared(&bob, &alice.public_key()).unwrap();
            prop_assert_eq!(ab, ba);
        }
    }
}
