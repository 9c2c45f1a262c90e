//! Tenant rooms using the Actor pattern.
//!
//! Three kinds of actor make up the room hierarchy. Each owns its state, runs
//! on its own task and is reached only through a cheap-to-clone handle.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  ClusterCommand  ┌─────────────────────────────┐
//! │ Gateway/Publisher│─────────────────▶│       ClusterActor          │
//! └──────────────────┘  (mpsc channel)  │ HashMap<TenantId, HubHandle>│
//!                                       └──────────────┬──────────────┘
//!                                                      │ HubCommand
//!                                                      ▼
//!                                       ┌─────────────────────────────┐
//!                                       │   HubActor (one per tenant) │
//!                                       │  HashMap<ClientId, Client>  │
//!                                       └──────────────┬──────────────┘
//!                                                      │ try_send(Payload)
//!                                                      ▼
//!                                       ┌─────────────────────────────┐
//!                                       │ ClientActor (one per socket)│
//!                                       │  weak back-ref to its hub   │
//!                                       └─────────────────────────────┘
//! ```
//!
//! Requests only ever flow downwards while a worker is waiting on a reply.
//! The one upward call (a client asking its hub to remove it) is made from
//! the client's own task, and the hub never waits on a client, so no cycle of
//! waits can form.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - A stopped actor shows up as a dropped channel and maps to `RoomError`
//! - Delivery to one client never blocks the others

use tokio::sync::mpsc;

mod client;
mod cluster;
mod commands;
mod hub;

pub use client::{Client, ClientActor, ClientInstance, InboundFrame};
pub use cluster::{ClusterActor, ClusterHandle};
pub use commands::{ClientCommand, ClusterCommand, DeliveryError, EmitReport, HubCommand, RoomError};
pub use hub::{spawn_hub, HubActor, HubHandle, HubId, WeakHubHandle};

/// Channel buffer sizes for the room actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Capacity of the cluster's command queue
    pub cluster_buffer: usize,

    /// Capacity of each hub's command queue
    pub hub_buffer: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_buffer: 256,
            hub_buffer: 64,
        }
    }
}

/// Spawn the cluster actor and return a handle for interaction.
///
/// Hubs are spawned lazily by [`ClusterHandle::get_or_create`].
///
/// # Example
///
/// ```no_run
/// use notifyd::room::{spawn_cluster, ClusterConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let cluster = spawn_cluster(ClusterConfig::default());
///     let hub = cluster.get_or_create(7.into()).await;
///     cluster.shutdown().await;
/// }
/// ```
pub fn spawn_cluster(config: ClusterConfig) -> ClusterHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(config.cluster_buffer.max(1));

    let actor = ClusterActor::new(cmd_rx, config.hub_buffer.max(1));
    tokio::spawn(actor.run());

    ClusterHandle::new(cmd_tx)
}
