//! Wire envelopes.
//!
//! Every encrypted value travelling through a channel is a text string made
//! of a literal prefix and a standard-base64 body:
//!
//! | Kind | Body |
//! |---|---|
//! | direct | `nonce(12) ‖ ciphertext` |
//! | legacy group | JSON `{ wrapped_keys, nonce, ciphertext }` |
//! | sender-key distribution | JSON `{ sender, channel, key_id, distributions }` |
//! | sender-key message | JSON `{ sid, kid, ctr, nonce, ciphertext }` |
//!
//! Byte fields inside JSON bodies are themselves standard base64. Prefixes are
//! delimited with U+27E6/U+27E7 so ordinary text never matches them, and
//! classification is an exact prefix match, nothing more.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};

use huddle_crypto::aead::{NONCE_LEN, TAG_LEN};

pub const DIRECT_PREFIX: &str = "⟦hd:dm⟧";
pub const LEGACY_GROUP_PREFIX: &str = "⟦hd:grp⟧";
pub const DISTRIBUTION_PREFIX: &str = "⟦hd:skd⟧";
pub const SENDER_KEY_PREFIX: &str = "⟦hd:skm⟧";

/// Error type for envelope decoding.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("not an encrypted envelope")]
    NotEncrypted,
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("invalid JSON body: {0}")]
    Json(String),
    #[error("malformed envelope: {0}")]
    Malformed(&'static str),
}

/// Envelope kind, determined purely from the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// No known prefix: ordinary text.
    Plain,
    Direct,
    LegacyGroup,
    Distribution,
    SenderKeyMessage,
}

impl EnvelopeKind {
    const PREFIXED: [EnvelopeKind; 4] = [
        EnvelopeKind::Direct,
        EnvelopeKind::LegacyGroup,
        EnvelopeKind::Distribution,
        EnvelopeKind::SenderKeyMessage,
    ];

    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            EnvelopeKind::Plain => None,
            EnvelopeKind::Direct => Some(DIRECT_PREFIX),
            EnvelopeKind::LegacyGroup => Some(LEGACY_GROUP_PREFIX),
            EnvelopeKind::Distribution => Some(DISTRIBUTION_PREFIX),
            EnvelopeKind::SenderKeyMessage => Some(SENDER_KEY_PREFIX),
        }
    }

    pub fn classify(wire: &str) -> Self {
        Self::PREFIXED
            .into_iter()
            .find(|kind| kind.prefix().is_some_and(|p| wire.starts_with(p)))
            .unwrap_or(EnvelopeKind::Plain)
    }
}

pub fn is_distribution(wire: &str) -> bool {
    wire.starts_with(DISTRIBUTION_PREFIX)
}

pub fn is_sender_key_message(wire: &str) -> bool {
    wire.starts_with(SENDER_KEY_PREFIX)
}

pub fn is_legacy_group(wire: &str) -> bool {
    wire.starts_with(LEGACY_GROUP_PREFIX)
}

/// Group content in either format (current sender-key or legacy wrapped-key).
pub fn is_group_encrypted(wire: &str) -> bool {
    is_sender_key_message(wire) || is_legacy_group(wire)
}

pub fn is_direct(wire: &str) -> bool {
    wire.starts_with(DIRECT_PREFIX)
}

/// Any of the four envelope kinds.
pub fn is_encrypted(wire: &str) -> bool {
    EnvelopeKind::classify(wire) != EnvelopeKind::Plain
}

/// Base64 (de)serialization for byte fields inside JSON bodies.
mod b64 {
    use super::B64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        B64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }

    pub mod map {
        use std::collections::BTreeMap;

        use super::B64;
        use base64::Engine as _;
        use serde::ser::SerializeMap;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            map: &BTreeMap<String, Vec<u8>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            let mut out = s.serialize_map(Some(map.len()))?;
            for (k, v) in map {
                out.serialize_entry(k, &B64.encode(v))?;
            }
            out.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
            let raw = BTreeMap::<String, String>::deserialize(d)?;
            raw.into_iter()
                .map(|(k, v)| {
                    B64.decode(v.as_bytes())
                        .map(|bytes| (k, bytes))
                        .map_err(serde::de::Error::custom)
                })
                .collect()
        }
    }
}

/// 1:1 message sealed under the pairwise key of the two participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectEnvelope {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Old per-message format: a fresh message key wrapped for every recipient.
/// Read-only; new messages never use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyGroupEnvelope {
    /// Recipient user id -> `wrapNonce(12) ‖ wrappedKey`.
    #[serde(with = "b64::map")]
    pub wrapped_keys: BTreeMap<String, Vec<u8>>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

/// A sender key, individually wrapped for each recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionEnvelope {
    pub sender: String,
    pub channel: String,
    pub key_id: String,
    /// Recipient user id -> `nonce(12) ‖ wrappedKeyBytes`.
    #[serde(with = "b64::map")]
    pub distributions: BTreeMap<String, Vec<u8>>,
}

/// Channel content encrypted under the sender's current sender key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderKeyMessage {
    /// Sending identity.
    pub sid: String,
    /// Epoch id of the sender key used.
    pub kid: String,
    /// Per-sender monotonic counter.
    pub ctr: u64,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

/// Any decoded wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Direct(DirectEnvelope),
    LegacyGroup(LegacyGroupEnvelope),
    Distribution(DistributionEnvelope),
    SenderKeyMessage(SenderKeyMessage),
}

fn decode_json<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, EnvelopeError> {
    let bytes = B64
        .decode(body.as_bytes())
        .map_err(|e| EnvelopeError::Base64(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| EnvelopeError::Json(e.to_string()))
}

fn encode_json<T: Serialize>(prefix: &str, value: &T) -> String {
    // Serializing these plain structs into a Vec cannot fail.
    let json = serde_json::to_vec(value).unwrap_or_default();
    format!("{}{}", prefix, B64.encode(json))
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Direct(_) => EnvelopeKind::Direct,
            Envelope::LegacyGroup(_) => EnvelopeKind::LegacyGroup,
            Envelope::Distribution(_) => EnvelopeKind::Distribution,
            Envelope::SenderKeyMessage(_) => EnvelopeKind::SenderKeyMessage,
        }
    }

    /// Parse a wire string. Plain text yields `EnvelopeError::NotEncrypted`.
    pub fn decode(wire: &str) -> Result<Self, EnvelopeError> {
        let kind = EnvelopeKind::classify(wire);
        let Some(prefix) = kind.prefix() else {
            return Err(EnvelopeError::NotEncrypted);
        };
        let body = &wire[prefix.len()..];

        match kind {
            EnvelopeKind::Plain => Err(EnvelopeError::NotEncrypted),
            EnvelopeKind::Direct => {
                let blob = B64
                    .decode(body.as_bytes())
                    .map_err(|e| EnvelopeError::Base64(e.to_string()))?;
                if blob.len() < NONCE_LEN + TAG_LEN {
                    return Err(EnvelopeError::Malformed("direct body too short"));
                }
                let (nonce, ct) = blob.split_at(NONCE_LEN);
                let mut n = [0u8; NONCE_LEN];
                n.copy_from_slice(nonce);
                Ok(Envelope::Direct(DirectEnvelope {
                    nonce: n,
                    ciphertext: ct.to_vec(),
                }))
            }
            EnvelopeKind::LegacyGroup => {
                let env: LegacyGroupEnvelope = decode_json(body)?;
                if env.nonce.len() != NONCE_LEN {
                    return Err(EnvelopeError::Malformed("legacy nonce length"));
                }
                Ok(Envelope::LegacyGroup(env))
            }
            EnvelopeKind::Distribution => {
                let env: DistributionEnvelope = decode_json(body)?;
                if env.sender.is_empty() || env.channel.is_empty() || env.key_id.is_empty() {
                    return Err(EnvelopeError::Malformed("distribution header"));
                }
                Ok(Envelope::Distribution(env))
            }
            EnvelopeKind::SenderKeyMessage => {
                let msg: SenderKeyMessage = decode_json(body)?;
                if msg.nonce.len() != NONCE_LEN {
                    return Err(EnvelopeError::Malformed("sender-key nonce length"));
                }
                if msg.sid.is_empty() || msg.kid.is_empty() {
                    return Err(EnvelopeError::Malformed("sender-key header"));
                }
                Ok(Envelope::SenderKeyMessage(msg))
            }
        }
    }

    /// Serialize to the wire string.
    pub fn encode(&self) -> String {
        match self {
            Envelope::Direct(env) => {
                let mut blob = Vec::with_capacity(NONCE_LEN + env.ciphertext.len());
                blob.extend_from_slice(&env.nonce);
                blob.extend_from_slice(&env.ciphertext);
                format!("{}{}", DIRECT_PREFIX, B64.encode(blob))
            }
            Envelope::LegacyGroup(env) => encode_json(LEGACY_GROUP_PREFIX, env),
            Envelope::Distribution(env) => encode_json(DISTRIBUTION_PREFIX, env),
            Envelope::SenderKeyMessage(msg) => encode_json(SENDER_KEY_PREFIX, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> SenderKeyMessage {
        SenderKeyMessage {
            sid: "alice".into(),
            kid: "0123456789abcdef0123456789abcdef".into(),
            ctr: 7,
            nonce: vec![1u8; NONCE_LEN],
            ciphertext: vec![2u8; 40],
        }
    }

    #[test]
    fn test_classify_prefixes() {
        assert_eq!(EnvelopeKind::classify("hello"), EnvelopeKind::Plain);
        assert_eq!(EnvelopeKind::classify(""), EnvelopeKind::Plain);
        assert_eq!(
            EnvelopeKind::classify(&format!("{}abc", DIRECT_PREFIX)),
            EnvelopeKind::Direct
        );
        assert_eq!(
            EnvelopeKind::classify(&format!("{}abc", LEGACY_GROUP_PREFIX)),
            EnvelopeKind::LegacyGroup
        );
        assert_eq!(
            EnvelopeKind::classify(&format!("{}abc", DISTRIBUTION_PREFIX)),
            EnvelopeKind::Distribution
        );
        assert_eq!(
            EnvelopeKind::classify(&format!("{}abc", SENDER_KEY_PREFIX)),
            EnvelopeKind::SenderKeyMessage
        );
    }

    #[test]
    fn test_lookalike_plaintext_is_plain() {
        for text in [
            "hd:skm hello",
            "[hd:skm]eyJ9",
            "⟦hd:sk⟧eyJ9",
            "⟦hd:skm",
            " ⟦hd:skm⟧eyJ9",
            "SKM:eyJ9",
            "ENC:abc",
        ] {
            assert_eq!(EnvelopeKind::classify(text), EnvelopeKind::Plain, "{text}");
            assert!(!is_encrypted(text));
            assert!(!is_sender_key_message(text));
            assert!(!is_distribution(text));
            assert!(!is_group_encrypted(text));
        }
    }

    #[test]
    fn test_predicates() {
        let skm = Envelope::SenderKeyMessage(sample_message()).encode();
        assert!(is_sender_key_message(&skm));
        assert!(is_group_encrypted(&skm));
        assert!(!is_distribution(&skm));
        assert!(!is_direct(&skm));

        let legacy = format!("{}e30=", LEGACY_GROUP_PREFIX);
        assert!(is_group_encrypted(&legacy));
        assert!(is_legacy_group(&legacy));
        assert!(!is_sender_key_message(&legacy));
    }

    #[test]
    fn test_sender_key_message_wire_shape() {
        let wire = Envelope::SenderKeyMessage(sample_message()).encode();
        let body = wire.strip_prefix(SENDER_KEY_PREFIX).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&B64.decode(body).unwrap()).unwrap();

        assert_eq!(json["sid"], "alice");
        assert_eq!(json["ctr"], 7);
        assert_eq!(json["nonce"], B64.encode([1u8; NONCE_LEN]));
        assert_eq!(json["ciphertext"], B64.encode([2u8; 40]));
    }

    #[test]
    fn test_distribution_wire_shape() {
        let env = DistributionEnvelope {
            sender: "alice".into(),
            channel: "c1".into(),
            key_id: "k".into(),
            distributions: BTreeMap::from([("bob".to_string(), vec![9u8; 60])]),
        };
        let wire = Envelope::Distribution(env.clone()).encode();
        let body = wire.strip_prefix(DISTRIBUTION_PREFIX).unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&B64.decode(body).unwrap()).unwrap();

        assert_eq!(json["sender"], "alice");
        assert_eq!(json["channel"], "c1");
        assert_eq!(json["key_id"], "k");
        assert_eq!(json["distributions"]["bob"], B64.encode([9u8; 60]));
        assert_eq!(Envelope::decode(&wire).unwrap(), Envelope::Distribution(env));
    }

    #[test]
    fn test_direct_decode() {
        let env = DirectEnvelope {
            nonce: [3u8; NONCE_LEN],
            ciphertext: vec![4u8; 20],
        };
        let wire = Envelope::Direct(env.clone()).encode();
        assert_eq!(Envelope::decode(&wire).unwrap(), Envelope::Direct(env));
    }

    #[test]
    fn test_direct_too_short() {
        let wire = format!("{}{}", DIRECT_PREFIX, B64.encode([0u8; 20]));
        assert_eq!(
            Envelope::decode(&wire),
            Err(EnvelopeError::Malformed("direct body too short"))
        );
    }

    #[test]
    fn test_plain_not_encrypted() {
        assert_eq!(Envelope::decode("hi there"), Err(EnvelopeError::NotEncrypted));
    }

    #[test]
    fn test_bad_base64_and_json() {
        let wire = format!("{}!!!", SENDER_KEY_PREFIX);
        assert!(matches!(Envelope::decode(&wire), Err(EnvelopeError::Base64(_))));

        let wire = format!("{}{}", SENDER_KEY_PREFIX, B64.encode(b"{\"sid\":1}"));
        assert!(matches!(Envelope::decode(&wire), Err(EnvelopeError::Json(_))));
    }

    #[test]
    fn test_bad_nonce_length() {
        let mut msg = sample_message();
        msg.nonce = vec![0u8; 8];
        let wire = Envelope::SenderKeyMessage(msg).encode();
        assert_eq!(
            Envelope::decode(&wire),
            Err(EnvelopeError::Malformed("sender-key nonce length"))
        );
    }

    #[test]
    fn test_legacy_decode_from_json() {
        let json = serde_json::json!({
            "wrapped_keys": { "bob": B64.encode([5u8; 60]) },
            "nonce": B64.encode([6u8; NONCE_LEN]),
            "ciphertext": B64.encode([7u8; 30]),
        });
        let wire = format!(
            "{}{}",
            LEGACY_GROUP_PREFIX,
            B64.encode(serde_json::to_vec(&json).unwrap())
        );

        let Envelope::LegacyGroup(env) = Envelope::decode(&wire).unwrap() else {
            panic!("expected legacy envelope");
        };
        assert_eq!(env.wrapped_keys["bob"], vec![5u8; 60]);
        assert_eq!(env.nonce, vec![6u8; NONCE_LEN]);
        assert_eq!(env.ciphertext, vec![7u8; 30]);
    }
}
