//! Publisher bridge - feeds pub/sub notifications into the cluster.
//!
//! One bridge consumes one subscription. Every event is decoded as a
//! [`NotificationEnvelope`]; a malformed event is logged and skipped, a valid
//! one is broadcast to its tenant's hub.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use notify_protocol::NotificationEnvelope;

use crate::room::{ClusterHandle, RoomError};
use crate::store::{EventReceiver, PubSub, PubSubError};

/// Running totals for one bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Envelopes handed to the cluster
    pub forwarded: u64,

    /// Events that failed to decode
    pub discarded: u64,
}

/// Bridges one pub/sub channel into the cluster.
#[derive(Debug, Clone)]
pub struct Publisher {
    cluster: ClusterHandle,
    channel: String,
}

impl Publisher {
    pub fn new(cluster: ClusterHandle, channel: impl Into<String>) -> Self {
        Self {
            cluster,
            channel: channel.into(),
        }
    }

    /// Channel this bridge consumes.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscribe to the bridge's channel on `pubsub`.
    pub async fn subscribe(&self, pubsub: &dyn PubSub) -> Result<EventReceiver, PubSubError> {
        let events = pubsub.subscribe(&self.channel).await?;
        info!(channel = %self.channel, "Publisher subscribed");
        Ok(events)
    }

    /// Consume `events` until `stop` is cancelled, the subscription closes or
    /// the cluster shuts down.
    ///
    /// The subscription is handed back rather than dropped; closing it is up
    /// to the caller.
    pub async fn run(&self, mut events: EventReceiver, stop: CancellationToken) -> (EventReceiver, PublisherStats) {
        let mut stats = PublisherStats::default();

        loop {
            let raw = tokio::select! {
                biased;

                _ = stop.cancelled() => {
                    debug!(channel = %self.channel, "Publisher stop requested");
                    break;
                }

                raw = events.recv() => match raw {
                    Some(raw) => raw,
                    None => {
                        warn!(channel = %self.channel, "Subscription closed");
                        break;
                    }
                },
            };

            match self.handle_event(&raw, &mut stats).await {
                Ok(()) => {}
                Err(RoomError::ClusterShutDown) => {
                    warn!(channel = %self.channel, "Cluster shut down, publisher stopping");
                    break;
                }
                Err(e) => warn!(channel = %self.channel, error = %e, "Broadcast failed"),
            }
        }

        info!(
            channel = %self.channel,
            forwarded = stats.forwarded,
            discarded = stats.discarded,
            "Publisher stopped"
        );
        (events, stats)
    }

    async fn handle_event(&self, raw: &[u8], stats: &mut PublisherStats) -> Result<(), RoomError> {
        let envelope = match NotificationEnvelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                stats.discarded += 1;
                warn!(
                    channel = %self.channel,
                    error = %e,
                    bytes = raw.len(),
                    "Discarding malformed notification"
                );
                return Ok(());
            }
        };

        debug!(
            tenant_id = %envelope.tenant_id,
            bytes = envelope.payload.len(),
            "Notification received"
        );

        self.cluster.emit(envelope.tenant_id, envelope.payload).await?;
        stats.forwarded += 1;
        Ok(())
    }
}
