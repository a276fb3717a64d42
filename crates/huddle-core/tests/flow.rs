//! Integration tests for huddle group encryption flows.
//!
//! These tests drive complete exchanges between independent participants,
//! each with its own engine and store:
//! - Distribution followed by messaging
//! - Late joiners and departed members across rotations
//! - Content that arrives before its key
//! - Restart from a persisted store

use std::sync::Arc;

use huddle_core::envelope::{self, Envelope};
use huddle_core::{
    Decrypted, GroupEngine, GroupSession, InMemoryDirectory, InMemoryStore, LoopbackChannel,
    Participant, Placeholders,
};
use huddle_crypto::identity::PublicKeyMaterial;

struct Peer {
    id: &'static str,
    store: InMemoryStore,
    engine: GroupEngine<InMemoryStore>,
    public: PublicKeyMaterial,
}

async fn peer(id: &'static str) -> Peer {
    let store = InMemoryStore::new();
    let engine = GroupEngine::new(store.clone());
    let public = engine.generate_identity(id).await.unwrap();
    Peer {
        id,
        store,
        engine,
        public,
    }
}

fn roster(peers: &[&Peer]) -> Vec<Participant> {
    peers
        .iter()
        .map(|p| Participant::new(p.id, p.public.clone()))
        .collect()
}

async fn distribute(from: &Peer, channel: &str, to: &[&Peer]) {
    let env = from
        .engine
        .create_distribution(from.id, channel, &roster(to))
        .await
        .unwrap();
    for p in to {
        if p.id != from.id {
            assert!(p
                .engine
                .process_distribution(&env, p.id, &from.public)
                .await
                .unwrap());
        }
    }
}

/// Test: Alice distributes in c1, then bob reads "hi bob"
#[tokio::test]
async fn integration_alice_to_bob() {
    let alice = peer("alice").await;
    let bob = peer("bob").await;

    let env = alice
        .engine
        .create_distribution("alice", "c1", &roster(&[&alice, &bob]))
        .await
        .unwrap();
    assert!(bob
        .engine
        .process_distribution(&env, "bob", &alice.public)
        .await
        .unwrap());

    let wire = alice.engine.encrypt("hi bob", "alice", "c1").await.unwrap();
    assert!(envelope::is_sender_key_message(&wire));
    assert!(envelope::is_group_encrypted(&wire));
    assert_eq!(
        bob.engine.decrypt(&wire, "c1").await,
        Decrypted::Message("hi bob".into())
    );
}

/// Test: Distribution wire values never decrypt as visible messages
#[tokio::test]
async fn integration_distribution_wire_is_not_content() {
    let alice = peer("alice").await;
    let bob = peer("bob").await;

    let wire = alice
        .engine
        .create_distribution_wire("alice", "c1", &roster(&[&bob]))
        .await
        .unwrap();
    assert!(envelope::is_distribution(&wire));
    assert_eq!(bob.engine.decrypt(&wire, "c1").await, Decrypted::KeyDistribution);
    assert_eq!(
        bob.engine.decrypt(&wire, "c1").await.render(&Placeholders::default()),
        None
    );
}

/// Test: A message that arrives before its distribution heals once the
/// distribution is processed
#[tokio::test]
async fn integration_out_of_order_delivery() {
    let alice = peer("alice").await;
    let bob = peer("bob").await;

    let wire = alice.engine.encrypt("early", "alice", "c1").await.unwrap();
    assert_eq!(bob.engine.decrypt(&wire, "c1").await, Decrypted::MissingKey);

    distribute(&alice, "c1", &[&bob]).await;
    assert_eq!(
        bob.engine.decrypt(&wire, "c1").await,
        Decrypted::Message("early".into())
    );
}

/// Test: After rotation a peer holding only the old key cannot read new
/// messages, and old messages stop decrypting on the sender side too
#[tokio::test]
async fn integration_rotation_excludes_stale_holders() {
    let alice = peer("alice").await;
    let bob = peer("bob").await;
    let carol = peer("carol").await;

    distribute(&alice, "c1", &[&bob, &carol]).await;
    let before = alice.engine.encrypt("everyone", "alice", "c1").await.unwrap();
    assert_eq!(
        carol.engine.decrypt(&before, "c1").await,
        Decrypted::Message("everyone".into())
    );

    // Carol leaves; alice rotates and redistributes to bob only.
    alice.engine.rotate("alice", "c1").await.unwrap();
    distribute(&alice, "c1", &[&bob]).await;

    let after = alice.engine.encrypt("just bob", "alice", "c1").await.unwrap();
    let (Envelope::SenderKeyMessage(old), Envelope::SenderKeyMessage(new)) =
        (Envelope::decode(&before).unwrap(), Envelope::decode(&after).unwrap())
    else {
        panic!("expected sender-key messages");
    };
    assert_ne!(old.kid, new.kid);
    assert_eq!(new.ctr, 0);

    assert_eq!(
        bob.engine.decrypt(&after, "c1").await,
        Decrypted::Message("just bob".into())
    );
    assert_eq!(carol.engine.decrypt(&after, "c1").await, Decrypted::MissingKey);
}

/// Test: Every sender in a channel has an independent key
#[tokio::test]
async fn integration_multiple_senders() {
    let alice = peer("alice").await;
    let bob = peer("bob").await;
    let carol = peer("carol").await;
    let everyone = [&alice, &bob, &carol];

    for sender in everyone {
        distribute(sender, "c1", &everyone).await;
    }

    for sender in everyone {
        let text = format!("from {}", sender.id);
        let wire = sender.engine.encrypt(&text, sender.id, "c1").await.unwrap();
        for reader in everyone {
            assert_eq!(
                reader.engine.decrypt(&wire, "c1").await,
                Decrypted::Message(text.clone()),
                "{} reading {}",
                reader.id,
                sender.id
            );
        }
    }
}

/// Test: Keys and counters survive a restart on the same store
#[tokio::test]
async fn integration_restart_from_store() {
    let alice = peer("alice").await;
    let bob = peer("bob").await;
    distribute(&alice, "c1", &[&bob]).await;

    alice.engine.encrypt("one", "alice", "c1").await.unwrap();
    alice.engine.encrypt("two", "alice", "c1").await.unwrap();

    let alice_again = GroupEngine::new(alice.store.clone());
    let bob_again = GroupEngine::new(bob.store.clone());

    assert!(alice_again.has_identity("alice").await.unwrap());
    assert_eq!(
        alice_again.export_public_key("alice").await.unwrap(),
        Some(alice.public.clone())
    );

    let wire = alice_again.encrypt("three", "alice", "c1").await.unwrap();
    let Envelope::SenderKeyMessage(msg) = Envelope::decode(&wire).unwrap() else {
        panic!("expected sender-key message");
    };
    assert_eq!(msg.ctr, 2);

    assert!(bob_again.has_sender_key("c1", "alice").await.unwrap());
    assert_eq!(
        bob_again.decrypt(&wire, "c1").await,
        Decrypted::Message("three".into())
    );
}

/// Test: Concurrent sends through one engine never reuse a counter
#[tokio::test]
async fn integration_concurrent_sends_unique_counters() {
    let alice = Arc::new(peer("alice").await);

    let mut handles = Vec::new();
    for i in 0..16 {
        let alice = alice.clone();
        handles.push(tokio::spawn(async move {
            alice
                .engine
                .encrypt(&format!("msg {}", i), "alice", "c1")
                .await
                .unwrap()
        }));
    }

    let mut ctrs = Vec::new();
    for h in handles {
        let wire = h.await.unwrap();
        let Envelope::SenderKeyMessage(msg) = Envelope::decode(&wire).unwrap() else {
            panic!("expected sender-key message");
        };
        ctrs.push(msg.ctr);
    }
    ctrs.sort_unstable();
    assert_eq!(ctrs, (0..16).collect::<Vec<u64>>());
}

/// Test: Full session lifecycle over the loopback bus, including a late
/// joiner and a departure
#[tokio::test]
async fn integration_session_membership() {
    let dir = InMemoryDirectory::new();
    let bus = LoopbackChannel::default();
    let mut rx = bus.subscribe();

    let make = |user: &'static str| {
        GroupSession::new(
            user,
            Arc::new(GroupEngine::new(InMemoryStore::new())),
            dir.clone(),
            bus.clone(),
        )
    };
    let alice = make("alice");
    let bob = make("bob");
    let carol = make("carol");
    for s in [&alice, &bob, &carol] {
        s.start().await.unwrap();
    }

    dir.add_member("c1", "alice").await;
    dir.add_member("c1", "bob").await;

    // Deliver everything on the bus to every session.
    async fn pump(
        rx: &mut tokio::sync::broadcast::Receiver<huddle_core::ChannelMessage>,
        sessions: &[&GroupSession<InMemoryStore, InMemoryDirectory, LoopbackChannel>],
    ) -> Vec<Vec<Decrypted>> {
        let mut out = vec![Vec::new(); sessions.len()];
        while let Ok(msg) = rx.try_recv() {
            for (i, s) in sessions.iter().enumerate() {
                out[i].push(s.receive(&msg.channel_id, &msg.wire).await.unwrap());
            }
        }
        out
    }

    alice.send("c1", "before carol").await.unwrap();
    let seen = pump(&mut rx, &[&bob, &carol]).await;
    assert!(seen[0].contains(&Decrypted::Message("before carol".into())));
    assert!(seen[1].contains(&Decrypted::MissingKey));

    // Carol joins.
    dir.add_member("c1", "carol").await;
    alice.membership_changed("c1").await.unwrap();
    alice.send("c1", "welcome carol").await.unwrap();
    let seen = pump(&mut rx, &[&bob, &carol]).await;
    for reader in &seen {
        assert!(reader.contains(&Decrypted::Message("welcome carol".into())));
    }

    // Bob leaves.
    dir.remove_member("c1", "bob").await;
    alice.membership_changed("c1").await.unwrap();
    alice.send("c1", "bob is gone").await.unwrap();
    let seen = pump(&mut rx, &[&bob, &carol]).await;
    assert!(!seen[0].contains(&Decrypted::Message("bob is gone".into())));
    assert!(seen[0].contains(&Decrypted::MissingKey));
    assert!(seen[1].contains(&Decrypted::Message("bob is gone".into())));
}
