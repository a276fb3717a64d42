//! Sender-key distribution.
//!
//! A sender hands its current sender key to every other participant by
//! wrapping it under each recipient's pairwise key. One distribution costs
//! O(participants) AEAD operations; after it, every message costs one.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use huddle_crypto::aead;
use huddle_crypto::identity::PublicKeyMaterial;

use crate::directory::Participant;
use crate::engine::GroupEngine;
use crate::envelope::{DistributionEnvelope, Envelope};
use crate::errors::{CoreError, CoreResult};
use crate::store::KeyValueStore;

/// Result of applying a distribution, for callers that want more than a bool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributionOutcome {
    /// The sender key was installed for `(channel, sender)`.
    Accepted {
        sender: String,
        channel: String,
        key_id: String,
    },
    /// No entry for this reader.
    NotAddressed,
    /// The entry for this reader failed to unwrap.
    Rejected,
}

impl DistributionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DistributionOutcome::Accepted { .. })
    }
}

impl<S: KeyValueStore> GroupEngine<S> {
    /// Build a distribution of the local sender key for `channel_id`,
    /// creating that key if this is the first use.
    ///
    /// The sender is skipped. Participants whose key agreement or wrapping
    /// fails are left out and logged; a later distribution can cover them.
    pub async fn create_distribution(
        &self,
        my_user_id: &str,
        channel_id: &str,
        participants: &[Participant],
    ) -> CoreResult<DistributionEnvelope> {
        let mine = self.identities.key_pair(my_user_id).await?;
        let record = self
            .sender_keys
            .get_or_create_own_key(my_user_id, channel_id)
            .await?;

        let mut distributions = BTreeMap::new();
        for participant in participants {
            if participant.user_id == my_user_id {
                continue;
            }
            let wrapped = match self
                .pairwise
                .get_or_derive_shared(my_user_id, &mine, &participant.public_key)
                .await
                .map_err(CoreError::from)
                .and_then(|pairwise| Ok(aead::seal_blob(&pairwise, record.key.as_bytes())?))
            {
                Ok(wrapped) => wrapped,
                Err(e) => {
                    warn!(
                        channel = %channel_id,
                        recipient = %participant.user_id,
                        error = %e,
                        "skipping recipient in sender-key distribution"
                    );
                    continue;
                }
            };
            distributions.insert(participant.user_id.clone(), wrapped);
        }

        info!(
            channel = %channel_id,
            sender = %my_user_id,
            key_id = %record.key_id,
            recipients = distributions.len(),
            "created sender-key distribution"
        );

        Ok(DistributionEnvelope {
            sender: my_user_id.to_string(),
            channel: channel_id.to_string(),
            key_id: record.key_id,
            distributions,
        })
    }

    /// [`create_distribution`](Self::create_distribution), encoded for the wire.
    pub async fn create_distribution_wire(
        &self,
        my_user_id: &str,
        channel_id: &str,
        participants: &[Participant],
    ) -> CoreResult<String> {
        let envelope = self
            .create_distribution(my_user_id, channel_id, participants)
            .await?;
        Ok(Envelope::Distribution(envelope).encode())
    }

    /// Apply a distribution addressed to `my_user_id`.
    ///
    /// Returns `Ok(false)` when the envelope has no entry for this reader or
    /// its entry fails to unwrap. Only a missing local identity or a failing
    /// store is an error.
    pub async fn process_distribution(
        &self,
        envelope: &DistributionEnvelope,
        my_user_id: &str,
        sender_public_key: &PublicKeyMaterial,
    ) -> CoreResult<bool> {
        Ok(self
            .apply_distribution(envelope, my_user_id, sender_public_key)
            .await?
            .is_accepted())
    }

    /// Like [`process_distribution`](Self::process_distribution) but reports
    /// why a distribution was not applied.
    pub async fn apply_distribution(
        &self,
        envelope: &DistributionEnvelope,
        my_user_id: &str,
        sender_public_key: &PublicKeyMaterial,
    ) -> CoreResult<DistributionOutcome> {
        let Some(wrapped) = envelope.distributions.get(my_user_id) else {
            debug!(
                channel = %envelope.channel,
                sender = %envelope.sender,
                "distribution not addressed to us"
            );
            return Ok(DistributionOutcome::NotAddressed);
        };

        let pairwise = match self.pairwise_key(my_user_id, sender_public_key).await {
            Ok(key) => key,
            Err(e @ CoreError::NoIdentityKey(_)) | Err(e @ CoreError::Store(_)) => return Err(e),
            Err(e) => {
                warn!(sender = %envelope.sender, error = %e, "bad sender public key in distribution");
                return Ok(DistributionOutcome::Rejected);
            }
        };

        let raw = match aead::open_blob(&pairwise, wrapped) {
            Ok(raw) => zeroize::Zeroizing::new(raw),
            Err(e) => {
                warn!(
                    channel = %envelope.channel,
                    sender = %envelope.sender,
                    key_id = %envelope.key_id,
                    error = %e,
                    "sender-key distribution failed to unwrap"
                );
                return Ok(DistributionOutcome::Rejected);
            }
        };

        match self
            .sender_keys
            .cache_remote_key(&envelope.channel, &envelope.sender, &raw, &envelope.key_id)
            .await
        {
            Ok(()) => {}
            Err(CoreError::Aead(e)) => {
                warn!(sender = %envelope.sender, error = %e, "distributed key has wrong length");
                return Ok(DistributionOutcome::Rejected);
            }
            Err(e) => return Err(e),
        }

        info!(
            channel = %envelope.channel,
            sender = %envelope.sender,
            key_id = %envelope.key_id,
            "installed sender key from distribution"
        );
        Ok(DistributionOutcome::Accepted {
            sender: envelope.sender.clone(),
            channel: envelope.channel.clone(),
            key_id: envelope.key_id.clone(),
        })
    }
}
