//! Room actor commands, errors and delivery results.
//!
//! This module defines the message types for communicating with the three
//! actors of the room hierarchy:
//! - `ClusterCommand`: commands sent to the cluster (tenant → hub registry)
//! - `HubCommand`: commands sent to one tenant's hub (client registry)
//! - `ClientCommand`: commands sent to one client
//!
//! Request/response commands carry a oneshot `respond_to` slot. Fire-and-forget
//! commands (emit without report, stop) carry none.

use notify_core::{ClientId, Payload, TenantId};
use thiserror::Error;
use tokio::sync::oneshot;

use super::client::{Client, ClientInstance};
use super::hub::{HubHandle, HubId, WeakHubHandle};

// ============================================================================
// Cluster Commands
// ============================================================================

/// Commands sent to the cluster actor.
#[derive(Debug)]
pub enum ClusterCommand {
    /// Register a hub under its tenant id, replacing any previous one.
    ///
    /// Responds with the displaced hub, if there was one.
    Add {
        hub: HubHandle,
        respond_to: oneshot::Sender<Option<HubHandle>>,
    },

    /// Look up the live hub for a tenant.
    Get {
        tenant_id: TenantId,
        respond_to: oneshot::Sender<Option<HubHandle>>,
    },

    /// Look up the live hub for a tenant, spawning one if there is none.
    GetOrCreate {
        tenant_id: TenantId,
        respond_to: oneshot::Sender<HubHandle>,
    },

    /// Drop the tenant's entry if present. Responds with the removed hub.
    Remove {
        tenant_id: TenantId,
        respond_to: oneshot::Sender<Option<HubHandle>>,
    },

    /// Remove and stop the tenant's hub if it is still `hub_id` and has no members.
    ///
    /// Responds with whether the hub was retired.
    RetireIfEmpty {
        tenant_id: TenantId,
        hub_id: HubId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Broadcast a payload to the tenant's hub, if any.
    Emit {
        tenant_id: TenantId,
        payload: Payload,
    },

    /// Number of registered hubs.
    Len { respond_to: oneshot::Sender<usize> },

    /// Stop every hub and exit the worker loop.
    Shutdown { respond_to: oneshot::Sender<()> },
}

// ============================================================================
// Hub Commands
// ============================================================================

/// Commands sent to a hub actor.
#[derive(Debug)]
pub enum HubCommand {
    /// Insert a client (attaching it to this hub).
    ///
    /// Responds with `true` if an entry with the same identity was replaced.
    Add {
        client: Client,
        respond_to: oneshot::Sender<Result<bool, RoomError>>,
    },

    /// Look up a client by identity.
    Get {
        client_id: ClientId,
        respond_to: oneshot::Sender<Option<Client>>,
    },

    /// Remove a client by identity. Responds with whether it was present.
    ///
    /// With an `instance`, the entry is only removed if it is that client and
    /// not a newer one registered under the same identity.
    Remove {
        client_id: ClientId,
        instance: Option<ClientInstance>,
        respond_to: oneshot::Sender<bool>,
    },

    /// Current member count.
    Size { respond_to: oneshot::Sender<usize> },

    /// Forward a payload to every member.
    Emit {
        payload: Payload,
        respond_to: Option<oneshot::Sender<EmitReport>>,
    },

    /// Exit the worker loop if there are no members. Responds with whether it stopped.
    ///
    /// The check and the stop happen in one step, so an `Add` queued ahead of
    /// it keeps the hub alive and one queued behind it fails.
    StopIfEmpty { respond_to: oneshot::Sender<bool> },

    /// Exit the worker loop.
    Stop,
}

// ============================================================================
// Client Commands
// ============================================================================

/// Commands sent to a client actor.
#[derive(Debug)]
pub enum ClientCommand {
    /// Point the client's back-reference at a hub, leaving any previous one.
    Attach { hub: WeakHubHandle },

    /// Leave the hub and stop.
    Die { respond_to: oneshot::Sender<()> },
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during room operations.
///
/// Registry misses are not errors: lookups return `None` and emits to a
/// tenant without a hub are no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// The cluster worker has exited.
    #[error("cluster has shut down")]
    ClusterShutDown,

    /// The hub worker has exited; its tenant slot must be looked up again.
    #[error("hub for tenant {0} has stopped")]
    HubStopped(TenantId),

    /// The client actor has exited.
    #[error("client {0} is no longer running")]
    ClientGone(ClientId),
}

/// Why a payload could not be queued for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The outbound queue is full; the new frame was dropped.
    #[error("outbound queue full, frame dropped")]
    Full,

    /// The connection's writer is gone.
    #[error("outbound queue closed")]
    Closed,
}

/// Outcome of one hub broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Clients the payload was queued for
    pub delivered: usize,

    /// Clients whose outbound queue was full
    pub dropped: usize,

    /// Clients whose outbound queue was closed
    pub closed: usize,
}

impl EmitReport {
    /// Total members the broadcast was attempted for.
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }

    pub(crate) fn record(&mut self, result: Result<(), DeliveryError>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(DeliveryError::Full) => self.dropped += 1,
            Err(DeliveryError::Closed) => self.closed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_error_display() {
        assert_eq!(RoomError::ClusterShutDown.to_string(), "cluster has shut down");
        assert_eq!(
            RoomError::HubStopped(TenantId::new(7)).to_string(),
            "hub for tenant 7 has stopped"
        );
        assert_eq!(
            RoomError::ClientGone(ClientId::new("k1")).to_string(),
            "client k1 is no longer running"
        );
    }

    #[test]
    fn test_delivery_error_display() {
        assert_eq!(DeliveryError::Full.to_string(), "outbound queue full, frame dropped");
        assert_eq!(DeliveryError::Closed.to_string(), "outbound queue closed");
    }

    #[test]
    fn test_emit_report_record() {
        let mut report = EmitReport::default();
        report.record(Ok(()));
        report.record(Ok(()));
        report.record(Err(DeliveryError::Full));
        report.record(Err(DeliveryError::Closed));

        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.closed, 1);
        assert_eq!(report.attempted(), 4);
    }

    #[tokio::test]
    async fn test_command_channel_closed_error() {
        // A dropped reply slot is how callers observe a stopped actor
        let (tx, rx) = oneshot::channel::<Option<HubHandle>>();
        drop(tx);
        assert!(rx.await.is_err());
    }
}
