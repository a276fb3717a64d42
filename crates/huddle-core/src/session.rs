//! Group session orchestrator.
//!
//! Binds one local user to an engine, a key directory and a channel
//! publisher, and decides when distributions go out: once before the first
//! send in a channel, and again after every membership change.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use huddle_crypto::identity::PublicKeyMaterial;

use crate::directory::KeyDirectory;
use crate::engine::{Decrypted, GroupEngine};
use crate::envelope::{self, Envelope};
use crate::errors::CoreResult;
use crate::store::KeyValueStore;
use crate::transport::ChannelPublisher;

pub struct GroupSession<S, D, P> {
    user_id: String,
    engine: Arc<GroupEngine<S>>,
    directory: D,
    publisher: P,
    /// Channels whose current sender key has been distributed.
    distributed: Mutex<HashSet<String>>,
}

impl<S, D, P> GroupSession<S, D, P>
where
    S: KeyValueStore,
    D: KeyDirectory,
    P: ChannelPublisher,
{
    pub fn new(
        user_id: impl Into<String>,
        engine: Arc<GroupEngine<S>>,
        directory: D,
        publisher: P,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            engine,
            directory,
            publisher,
            distributed: Mutex::new(HashSet::new()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn engine(&self) -> &GroupEngine<S> {
        &self.engine
    }

    /// Make sure a local identity exists and publish its public key.
    pub async fn start(&self) -> CoreResult<PublicKeyMaterial> {
        let public = self.engine.ensure_identity(&self.user_id).await?;
        self.directory
            .upload_public_key(&self.user_id, &public)
            .await?;
        info!(user = %self.user_id, key = %public.fingerprint(), "session started");
        Ok(public)
    }

    /// Send the current sender key to everyone the directory lists for
    /// `channel_id`.
    pub async fn distribute(&self, channel_id: &str) -> CoreResult<()> {
        let participants = self.directory.fetch_participant_keys(channel_id).await?;
        let wire = self
            .engine
            .create_distribution_wire(&self.user_id, channel_id, &participants)
            .await?;
        self.publisher
            .publish(&self.user_id, channel_id, wire)
            .await?;
        self.distributed
            .lock()
            .await
            .insert(channel_id.to_string());
        Ok(())
    }

    /// Encrypt and publish `text`, distributing first if needed. Returns the
    /// published wire value.
    pub async fn send(&self, channel_id: &str, text: &str) -> CoreResult<String> {
        let needs_distribution = !self.distributed.lock().await.contains(channel_id);
        if needs_distribution {
            self.distribute(channel_id).await?;
        }

        let wire = self
            .engine
            .encrypt(text, &self.user_id, channel_id)
            .await?;
        self.publisher
            .publish(&self.user_id, channel_id, wire.clone())
            .await?;
        Ok(wire)
    }

    /// Start a new sender-key epoch and hand it to the current roster.
    /// Departed members never receive the new key.
    pub async fn membership_changed(&self, channel_id: &str) -> CoreResult<()> {
        self.engine.rotate(&self.user_id, channel_id).await?;
        self.distributed.lock().await.remove(channel_id);
        info!(user = %self.user_id, channel = %channel_id, "membership changed, redistributing");
        self.distribute(channel_id).await
    }

    /// Handle one wire value received in `channel_id`.
    ///
    /// Distributions are applied and reported as
    /// [`Decrypted::KeyDistribution`]; everything else goes through
    /// [`GroupEngine::decrypt`]. Fails only when the local identity is
    /// missing or the store is broken.
    pub async fn receive(&self, channel_id: &str, wire: &str) -> CoreResult<Decrypted> {
        if !envelope::is_distribution(wire) {
            return Ok(self.engine.decrypt(wire, channel_id).await);
        }

        let env = match Envelope::decode(wire) {
            Ok(Envelope::Distribution(env)) => env,
            Ok(_) => return Ok(self.engine.decrypt(wire, channel_id).await),
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "malformed distribution");
                return Ok(Decrypted::KeyDistribution);
            }
        };

        if env.sender == self.user_id {
            return Ok(Decrypted::KeyDistribution);
        }
        if env.channel != channel_id {
            warn!(
                channel = %channel_id,
                stated_channel = %env.channel,
                sender = %env.sender,
                "distribution posted to a different channel, ignoring"
            );
            return Ok(Decrypted::KeyDistribution);
        }

        let sender_key = match self.directory.fetch_participant_keys(channel_id).await {
            Ok(participants) => participants
                .into_iter()
                .find(|p| p.user_id == env.sender)
                .map(|p| p.public_key),
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "directory lookup failed");
                None
            }
        };
        let Some(sender_key) = sender_key else {
            warn!(channel = %channel_id, sender = %env.sender, "no public key for distribution sender");
            return Ok(Decrypted::KeyDistribution);
        };

        let outcome = self
            .engine
            .apply_distribution(&env, &self.user_id, &sender_key)
            .await?;
        debug!(channel = %channel_id, sender = %env.sender, ?outcome, "processed distribution");
        Ok(Decrypted::KeyDistribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::store::InMemoryStore;
    use crate::transport::{ChannelMessage, LoopbackChannel};

    type Session = GroupSession<InMemoryStore, InMemoryDirectory, LoopbackChannel>;

    fn session(user: &str, dir: &InMemoryDirectory, bus: &LoopbackChannel) -> Session {
        GroupSession::new(
            user,
            Arc::new(GroupEngine::new(InMemoryStore::new())),
            dir.clone(),
            bus.clone(),
        )
    }

    #[tokio::test]
    async fn test_first_send_distributes() {
        let dir = InMemoryDirectory::new();
        let bus = LoopbackChannel::default();
        let mut rx = bus.subscribe();
        dir.add_member("c1", "alice").await;
        dir.add_member("c1", "bob").await;

        let alice = session("alice", &dir, &bus);
        let bob = session("bob", &dir, &bus);
        alice.start().await.unwrap();
        bob.start().await.unwrap();

        alice.send("c1", "hi bob").await.unwrap();
        alice.send("c1", "again").await.unwrap();

        let mut seen: Vec<ChannelMessage> = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap());
        }
        assert!(envelope::is_distribution(&seen[0].wire));
        assert!(envelope::is_sender_key_message(&seen[1].wire));
        assert!(envelope::is_sender_key_message(&seen[2].wire));

        let mut texts = Vec::new();
        for msg in &seen {
            texts.push(bob.receive("c1", &msg.wire).await.unwrap());
        }
        assert_eq!(
            texts,
            vec![
                Decrypted::KeyDistribution,
                Decrypted::Message("hi bob".into()),
                Decrypted::Message("again".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_own_distribution_ignored() {
        let dir = InMemoryDirectory::new();
        let bus = LoopbackChannel::default();
        let mut rx = bus.subscribe();
        dir.add_member("c1", "alice").await;

        let alice = session("alice", &dir, &bus);
        alice.start().await.unwrap();
        alice.distribute("c1").await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(
            alice.receive("c1", &msg.wire).await.unwrap(),
            Decrypted::KeyDistribution
        );
    }

    #[tokio::test]
    async fn test_cross_channel_distribution_ignored() {
        let dir = InMemoryDirectory::new();
        let bus = LoopbackChannel::default();
        let mut rx = bus.subscribe();
        for channel in ["c1", "c2"] {
            dir.add_member(channel, "alice").await;
            dir.add_member(channel, "bob").await;
        }

        let alice = session("alice", &dir, &bus);
        let bob = session("bob", &dir, &bus);
        alice.start().await.unwrap();
        bob.start().await.unwrap();
        alice.distribute("c1").await.unwrap();

        let msg = rx.recv().await.unwrap();
        bob.receive("c2", &msg.wire).await.unwrap();
        assert!(!bob.engine().has_sender_key("c1", "alice").await.unwrap());
        assert!(!bob.engine().has_sender_key("c2", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_plain_text_passes_through() {
        let dir = InMemoryDirectory::new();
        let bus = LoopbackChannel::default();
        let bob = session("bob", &dir, &bus);
        bob.start().await.unwrap();

        assert_eq!(
            bob.receive("c1", "hello there").await.unwrap(),
            Decrypted::Plaintext("hello there".into())
        );
    }
}
