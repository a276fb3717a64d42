//! Channel transport seam.
//!
//! The engine produces and consumes wire strings; moving them between
//! participants belongs to the application. [`LoopbackChannel`] is an
//! in-process bus for tests and the demo.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from publishing to a channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

/// One wire value posted to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel_id: String,
    /// Posting user, as the transport sees it.
    pub from: String,
    pub wire: String,
}

/// Posts wire values to a channel.
#[async_trait]
pub trait ChannelPublisher: Send + Sync {
    async fn publish(&self, from: &str, channel_id: &str, wire: String)
        -> Result<(), TransportError>;
}

/// In-process broadcast bus. Every subscriber sees every message, the
/// poster's own included. Clones share the bus.
#[derive(Clone)]
pub struct LoopbackChannel {
    tx: broadcast::Sender<ChannelMessage>,
}

impl LoopbackChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.tx.subscribe()
    }
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChannelPublisher for LoopbackChannel {
    async fn publish(
        &self,
        from: &str,
        channel_id: &str,
        wire: String,
    ) -> Result<(), TransportError> {
        self.tx
            .send(ChannelMessage {
                channel_id: channel_id.to_string(),
                from: from.to_string(),
                wire,
            })
            .map(|_| ())
            .map_err(|_| TransportError::Closed)
    }
}
