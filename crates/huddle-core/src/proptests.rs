#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::engine::{CorruptReason, Decrypted, GroupEngine};
    use crate::envelope::{self, Envelope, EnvelopeKind};
    use crate::store::InMemoryStore;

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_plain_text_never_classified(text in "[^⟦].*|") {
            prop_assert_eq!(EnvelopeKind::classify(&text), EnvelopeKind::Plain);
            prop_assert!(!envelope::is_encrypted(&text));

            let engine = GroupEngine::new(InMemoryStore::new());
            let seen = block_on(engine.decrypt(&text, "c1"));
            prop_assert_eq!(seen, Decrypted::Plaintext(text));
        }

        #[test]
        fn test_sender_key_round_trip(text in ".*") {
            let engine = GroupEngine::new(InMemoryStore::new());
            let seen = block_on(async {
                let wire = engine.encrypt(&text, "alice", "c1").await.unwrap();
                engine.decrypt(&wire, "c1").await
            });
            prop_assert_eq!(seen, Decrypted::Message(text));
        }

        #[test]
        fn test_tampered_message_is_corrupt(
            text in ".{1,64}",
            idx in any::<usize>(),
            flip in 1u8..=255,
        ) {
            let engine = GroupEngine::new(InMemoryStore::new());
            let seen = block_on(async {
                let wire = engine.encrypt(&text, "alice", "c1").await.unwrap();
                let Ok(Envelope::SenderKeyMessage(mut msg)) = Envelope::decode(&wire) else {
                    panic!("expected sender-key message");
                };

                // Flip one byte anywhere in nonce || ciphertext.
                let n = msg.nonce.len();
                let i = idx % (n + msg.ciphertext.len());
                if i < n {
                    msg.nonce[i] ^= flip;
                } else {
                    msg.ciphertext[i - n] ^= flip;
                }
                engine
                    .decrypt(&Envelope::SenderKeyMessage(msg).encode(), "c1")
                    .await
            });
            prop_assert_eq!(seen, Decrypted::Corrupt(CorruptReason::Authentication));
        }
    }
}
