//! Group encryption engine.
//!
//! Sending costs one AEAD operation no matter how large the channel is: the
//! O(n) work lives in key distribution, which only runs on membership
//! change. Receiving never fails loudly. Every soft failure comes back as a
//! [`Decrypted`] variant so one bad message cannot break the conversation
//! around it.

use tracing::{debug, warn};

use huddle_crypto::aead::{self, AeadError, SymmetricKey};
use huddle_crypto::identity::PublicKeyMaterial;

use crate::config::{EngineConfig, Placeholders};
use crate::envelope::{
    DirectEnvelope, Envelope, EnvelopeError, EnvelopeKind, LegacyGroupEnvelope, SenderKeyMessage,
};
use crate::errors::{CoreError, CoreResult};
use crate::identity::IdentityKeyStore;
use crate::pairwise::PairwiseKeys;
use crate::sender_keys::SenderKeyManager;
use crate::store::KeyValueStore;

/// Why a message could not be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptReason {
    /// Prefix matched but the body did not parse.
    Envelope(EnvelopeError),
    /// Tag mismatch: wrong key or tampered nonce/ciphertext.
    Authentication,
    /// Authenticated, but not UTF-8 text.
    InvalidUtf8,
}

/// Outcome of decrypting one wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrypted {
    /// Not an envelope: ordinary text, returned unchanged.
    Plaintext(String),
    /// Successfully decrypted content.
    Message(String),
    /// No matching key yet. Usually heals once a distribution arrives.
    MissingKey,
    /// Permanently undecryptable.
    Corrupt(CorruptReason),
    /// A sender-key distribution. Never shown as a message.
    KeyDistribution,
}

impl Decrypted {
    /// Readable text, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Decrypted::Plaintext(t) | Decrypted::Message(t) => Some(t),
            _ => None,
        }
    }

    /// What the UI should display. `None` means hide it.
    pub fn render(&self, placeholders: &Placeholders) -> Option<String> {
        match self {
            Decrypted::Plaintext(t) | Decrypted::Message(t) => Some(t.clone()),
            Decrypted::MissingKey => Some(placeholders.missing_key.clone()),
            Decrypted::Corrupt(_) => Some(placeholders.cannot_decrypt.clone()),
            Decrypted::KeyDistribution => None,
        }
    }
}

impl From<AeadError> for Decrypted {
    fn from(_: AeadError) -> Self {
        Decrypted::Corrupt(CorruptReason::Authentication)
    }
}

fn utf8(bytes: Vec<u8>) -> Decrypted {
    match String::from_utf8(bytes) {
        Ok(text) => Decrypted::Message(text),
        Err(_) => Decrypted::Corrupt(CorruptReason::InvalidUtf8),
    }
}

/// Who is reading and, for 1:1 and legacy envelopes, whose key to agree with.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    pub channel_id: String,
    /// The local reader. Required for direct and legacy envelopes.
    pub my_user_id: Option<String>,
    /// The counterpart's (direct) or sender's (legacy) public key.
    pub peer_public_key: Option<PublicKeyMaterial>,
}

impl MessageContext {
    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            ..Default::default()
        }
    }

    pub fn with_reader(mut self, my_user_id: impl Into<String>) -> Self {
        self.my_user_id = Some(my_user_id.into());
        self
    }

    pub fn with_peer(mut self, public_key: PublicKeyMaterial) -> Self {
        self.peer_public_key = Some(public_key);
        self
    }
}

/// The group encryption engine: identity keys, pairwise keys and sender keys
/// behind one API. Each engine owns its caches; nothing is process-global.
pub struct GroupEngine<S> {
    pub(crate) identities: IdentityKeyStore<S>,
    pub(crate) pairwise: PairwiseKeys,
    pub(crate) sender_keys: SenderKeyManager<S>,
}

impl<S: KeyValueStore + Clone> GroupEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, &EngineConfig::default())
    }

    pub fn with_config(store: S, config: &EngineConfig) -> Self {
        Self {
            identities: IdentityKeyStore::new(store.clone()),
            pairwise: PairwiseKeys::new(config.pairwise_prefix_len),
            sender_keys: SenderKeyManager::new(store),
        }
    }
}

impl<S: KeyValueStore> GroupEngine<S> {
    pub fn identities(&self) -> &IdentityKeyStore<S> {
        &self.identities
    }

    pub fn sender_keys(&self) -> &SenderKeyManager<S> {
        &self.sender_keys
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    /// Generate (or regenerate) `user_id`'s identity. Pairwise keys derived
    /// from a previous key pair are dropped.
    pub async fn generate_identity(&self, user_id: &str) -> CoreResult<PublicKeyMaterial> {
        let public = self.identities.generate_identity(user_id).await?;
        self.pairwise.evict_user(user_id).await;
        Ok(public)
    }

    pub async fn ensure_identity(&self, user_id: &str) -> CoreResult<PublicKeyMaterial> {
        self.identities.ensure_identity(user_id).await
    }

    pub async fn has_identity(&self, user_id: &str) -> CoreResult<bool> {
        self.identities.has_identity(user_id).await
    }

    pub async fn export_public_key(&self, user_id: &str) -> CoreResult<Option<PublicKeyMaterial>> {
        self.identities.export_public_key(user_id).await
    }

    /// Pairwise key between a local identity and a counterpart.
    pub(crate) async fn pairwise_key(
        &self,
        my_user_id: &str,
        theirs: &PublicKeyMaterial,
    ) -> CoreResult<SymmetricKey> {
        let mine = self.identities.key_pair(my_user_id).await?;
        Ok(self
            .pairwise
            .get_or_derive_shared(my_user_id, &mine, theirs)
            .await?)
    }

    // ------------------------------------------------------------------------
    // Sender keys
    // ------------------------------------------------------------------------

    pub async fn has_sender_key(&self, channel_id: &str, sender_id: &str) -> CoreResult<bool> {
        self.sender_keys.has_key(channel_id, sender_id).await
    }

    /// Start a new sender-key epoch for `user_id` in `channel_id`. Peers
    /// cannot read anything sent afterwards until they get a new distribution.
    pub async fn rotate(&self, user_id: &str, channel_id: &str) -> CoreResult<()> {
        self.sender_keys.rotate(user_id, channel_id).await
    }

    // ------------------------------------------------------------------------
    // Encrypt
    // ------------------------------------------------------------------------

    /// Encrypt channel content under the local sender key.
    pub async fn encrypt(
        &self,
        plaintext: &str,
        my_user_id: &str,
        channel_id: &str,
    ) -> CoreResult<String> {
        let record = self.sender_keys.next_message(my_user_id, channel_id).await?;
        let sealed = aead::seal(&record.key, plaintext.as_bytes())?;

        debug!(
            channel = %channel_id,
            sender = %my_user_id,
            key_id = %record.key_id,
            ctr = record.counter,
            "encrypted sender-key message"
        );

        Ok(Envelope::SenderKeyMessage(SenderKeyMessage {
            sid: my_user_id.to_string(),
            kid: record.key_id,
            ctr: record.counter,
            nonce: sealed.nonce.to_vec(),
            ciphertext: sealed.ciphertext,
        })
        .encode())
    }

    /// Encrypt a 1:1 message under the pairwise key.
    pub async fn encrypt_direct(
        &self,
        plaintext: &str,
        my_user_id: &str,
        their_public_key: &PublicKeyMaterial,
    ) -> CoreResult<String> {
        let key = self.pairwise_key(my_user_id, their_public_key).await?;
        let sealed = aead::seal(&key, plaintext.as_bytes())?;
        Ok(Envelope::Direct(DirectEnvelope {
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
        })
        .encode())
    }

    // ------------------------------------------------------------------------
    // Decrypt
    // ------------------------------------------------------------------------

    /// Decrypt a channel wire value. Never fails: see [`Decrypted`].
    pub async fn decrypt(&self, wire: &str, channel_id: &str) -> Decrypted {
        self.decrypt_with(wire, &MessageContext::channel(channel_id))
            .await
    }

    /// Decrypt with the extra context direct and legacy envelopes need.
    pub async fn decrypt_with(&self, wire: &str, ctx: &MessageContext) -> Decrypted {
        if EnvelopeKind::classify(wire) == EnvelopeKind::Plain {
            return Decrypted::Plaintext(wire.to_string());
        }

        let envelope = match Envelope::decode(wire) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel = %ctx.channel_id, error = %e, "malformed envelope");
                return Decrypted::Corrupt(CorruptReason::Envelope(e));
            }
        };

        match envelope {
            Envelope::SenderKeyMessage(msg) => self.open_sender_key_message(&msg, ctx).await,
            Envelope::Direct(env) => self.open_direct(&env, ctx).await,
            Envelope::LegacyGroup(env) => self.open_legacy_group(&env, ctx).await,
            Envelope::Distribution(_) => Decrypted::KeyDistribution,
        }
    }

    async fn open_sender_key_message(
        &self,
        msg: &SenderKeyMessage,
        ctx: &MessageContext,
    ) -> Decrypted {
        let record = match self.sender_keys.load_key(&ctx.channel_id, &msg.sid).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(channel = %ctx.channel_id, sender = %msg.sid, key_id = %msg.kid, "no sender key yet");
                return Decrypted::MissingKey;
            }
            Err(e) => {
                warn!(channel = %ctx.channel_id, sender = %msg.sid, error = %e, "sender key lookup failed");
                return Decrypted::MissingKey;
            }
        };

        if record.key_id != msg.kid {
            debug!(
                channel = %ctx.channel_id,
                sender = %msg.sid,
                have = %record.key_id,
                want = %msg.kid,
                "sender key epoch mismatch"
            );
            return Decrypted::MissingKey;
        }

        match aead::open(&record.key, &msg.nonce, &msg.ciphertext) {
            Ok(pt) => utf8(pt),
            Err(e) => {
                warn!(channel = %ctx.channel_id, sender = %msg.sid, ctr = msg.ctr, "sender-key message failed authentication");
                e.into()
            }
        }
    }

    async fn open_direct(&self, env: &DirectEnvelope, ctx: &MessageContext) -> Decrypted {
        let (Some(me), Some(peer)) = (&ctx.my_user_id, &ctx.peer_public_key) else {
            return Decrypted::MissingKey;
        };
        let key = match self.pairwise_key(me, peer).await {
            Ok(key) => key,
            Err(e) => return soft_key_failure(e),
        };
        match aead::open(&key, &env.nonce, &env.ciphertext) {
            Ok(pt) => utf8(pt),
            Err(e) => e.into(),
        }
    }

    /// Legacy format: unwrap this reader's copy of the message key with the
    /// pairwise key, then open the content with the message key.
    async fn open_legacy_group(
        &self,
        env: &LegacyGroupEnvelope,
        ctx: &MessageContext,
    ) -> Decrypted {
        let (Some(me), Some(peer)) = (&ctx.my_user_id, &ctx.peer_public_key) else {
            return Decrypted::MissingKey;
        };
        let Some(wrapped) = env.wrapped_keys.get(me) else {
            return Decrypted::MissingKey;
        };
        let pairwise = match self.pairwise_key(me, peer).await {
            Ok(key) => key,
            Err(e) => return soft_key_failure(e),
        };

        let message_key = match aead::open_blob(&pairwise, wrapped)
            .and_then(|raw| SymmetricKey::from_slice(&raw))
        {
            Ok(key) => key,
            Err(e) => return e.into(),
        };
        match aead::open(&message_key, &env.nonce, &env.ciphertext) {
            Ok(pt) => utf8(pt),
            Err(e) => e.into(),
        }
    }
}

/// Key agreement failures on the receive path are soft as well.
fn soft_key_failure(e: CoreError) -> Decrypted {
    warn!(error = %e, "pairwise key unavailable");
    match e {
        CoreError::Pairwise(_) => Decrypted::Corrupt(CorruptReason::Authentication),
        _ => Decrypted::MissingKey,
    }
}
