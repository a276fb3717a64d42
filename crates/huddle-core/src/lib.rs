//! Huddle Core - sender-key group encryption for chat channels.
//!
//! This crate implements:
//! - Identity key store (one P-256 key pair per local user)
//! - Pairwise key agreement cache
//! - Sender key manager with per-sender counters and epochs
//! - Sender-key distribution protocol
//! - Envelope codec and the encrypt/decrypt engine
//! - Group session orchestration over a key directory and channel publisher

#![forbid(unsafe_code)]

// Key management
pub mod identity;
pub mod pairwise;
pub mod sender_keys;

// Protocol
pub mod envelope;
pub mod distribution;
pub mod engine;
pub mod session;

// Collaborators
pub mod store;
pub mod directory;
pub mod transport;

// Supporting modules
pub mod config;
pub mod errors;

// Optional storage implementations
#[cfg(feature = "sqlite")]
pub mod sqlite_store;

#[cfg(test)]
mod proptests;

pub use config::{EngineConfig, Placeholders};
pub use directory::{InMemoryDirectory, KeyDirectory, Participant};
pub use distribution::DistributionOutcome;
pub use engine::{CorruptReason, Decrypted, GroupEngine, MessageContext};
pub use errors::{CoreError, CoreResult};
pub use session::GroupSession;
pub use store::{InMemoryStore, KeyValueStore, StoreName};
pub use transport::{ChannelMessage, ChannelPublisher, LoopbackChannel};
