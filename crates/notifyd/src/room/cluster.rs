//! Cluster actor - the process-wide tenant → hub registry.
//!
//! The ClusterActor is the single owner of the hub map. It receives commands
//! via an mpsc channel and processes them one at a time, so at most one live
//! hub exists per tenant at any observation point.

use std::collections::HashMap;
use std::ops::ControlFlow;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use notify_core::{Payload, TenantId};

use super::commands::{ClusterCommand, RoomError};
use super::hub::{spawn_hub, HubHandle, HubId};

// ============================================================================
// Cluster Handle
// ============================================================================

/// Handle for interacting with the cluster actor.
///
/// Cheap to clone and shared by the gateway, the publisher bridge and the
/// shutdown path. Every method maps an exited worker to
/// `RoomError::ClusterShutDown`.
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    sender: mpsc::Sender<ClusterCommand>,
}

impl ClusterHandle {
    /// Create a new cluster handle.
    pub fn new(sender: mpsc::Sender<ClusterCommand>) -> Self {
        Self { sender }
    }

    /// Returns true while the cluster worker is running.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ClusterCommand,
    ) -> Result<T, RoomError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(make(tx))
            .await
            .map_err(|_| RoomError::ClusterShutDown)?;

        rx.await.map_err(|_| RoomError::ClusterShutDown)
    }

    /// Register a hub under its tenant id, replacing any previous one.
    ///
    /// Returns the displaced hub so the caller can stop it.
    pub async fn add(&self, hub: HubHandle) -> Result<Option<HubHandle>, RoomError> {
        self.request(|respond_to| ClusterCommand::Add { hub, respond_to })
            .await
    }

    /// Look up the live hub for a tenant.
    ///
    /// Returns `None` if there is none or if the cluster has shut down.
    pub async fn get(&self, tenant_id: TenantId) -> Option<HubHandle> {
        self.request(|respond_to| ClusterCommand::Get {
            tenant_id,
            respond_to,
        })
        .await
        .ok()?
    }

    /// Look up the live hub for a tenant, spawning one if there is none.
    pub async fn get_or_create(&self, tenant_id: TenantId) -> Result<HubHandle, RoomError> {
        self.request(|respond_to| ClusterCommand::GetOrCreate {
            tenant_id,
            respond_to,
        })
        .await
    }

    /// Drop the tenant's entry. Removing an absent tenant is a no-op.
    ///
    /// The removed hub is returned but not stopped.
    pub async fn remove(&self, tenant_id: TenantId) -> Result<Option<HubHandle>, RoomError> {
        self.request(|respond_to| ClusterCommand::Remove {
            tenant_id,
            respond_to,
        })
        .await
    }

    /// Remove and stop the tenant's hub if it is still `hub_id` and empty.
    ///
    /// Returns whether the hub was retired. A newer hub registered for the
    /// same tenant is left alone.
    pub async fn retire_if_empty(
        &self,
        tenant_id: TenantId,
        hub_id: HubId,
    ) -> Result<bool, RoomError> {
        self.request(|respond_to| ClusterCommand::RetireIfEmpty {
            tenant_id,
            hub_id,
            respond_to,
        })
        .await
    }

    /// Broadcast a payload to every client of a tenant.
    ///
    /// A tenant without a hub has no subscribers; the payload is dropped.
    pub async fn emit(&self, tenant_id: TenantId, payload: Payload) -> Result<(), RoomError> {
        self.sender
            .send(ClusterCommand::Emit { tenant_id, payload })
            .await
            .map_err(|_| RoomError::ClusterShutDown)
    }

    /// Number of tenants with a live hub. Zero once shut down.
    pub async fn hub_count(&self) -> usize {
        self.request(|respond_to| ClusterCommand::Len { respond_to })
            .await
            .unwrap_or(0)
    }

    /// Stop every hub and the cluster worker.
    ///
    /// Commands queued before the shutdown are still processed. Shutting down
    /// an already stopped cluster is a no-op.
    pub async fn shutdown(&self) {
        let _ = self
            .request(|respond_to| ClusterCommand::Shutdown { respond_to })
            .await;
    }
}

// ============================================================================
// Cluster Actor
// ============================================================================

/// The cluster actor - owns the tenant → hub map.
pub struct ClusterActor {
    receiver: mpsc::Receiver<ClusterCommand>,

    hubs: HashMap<TenantId, HubHandle>,

    /// Command buffer for hubs spawned by `GetOrCreate`
    hub_buffer: usize,
}

impl ClusterActor {
    /// Creates a new cluster actor.
    pub fn new(receiver: mpsc::Receiver<ClusterCommand>, hub_buffer: usize) -> Self {
        Self {
            receiver,
            hubs: HashMap::new(),
            hub_buffer,
        }
    }

    /// Runs the actor event loop until shut down or every handle is dropped.
    pub async fn run(mut self) {
        info!("Cluster actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            if self.handle_command(cmd).await.is_break() {
                break;
            }
        }

        info!(hubs = self.hubs.len(), "Cluster actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: ClusterCommand) -> ControlFlow<()> {
        match cmd {
            ClusterCommand::Add { hub, respond_to } => {
                let result = self.handle_add(hub);
                let _ = respond_to.send(result);
            }
            ClusterCommand::Get {
                tenant_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.hubs.get(&tenant_id).cloned());
            }
            ClusterCommand::GetOrCreate {
                tenant_id,
                respond_to,
            } => {
                let hub = self.handle_get_or_create(tenant_id);
                let _ = respond_to.send(hub);
            }
            ClusterCommand::Remove {
                tenant_id,
                respond_to,
            } => {
                let removed = self.hubs.remove(&tenant_id);
                if let Some(ref hub) = removed {
                    debug!(tenant_id = %tenant_id, hub_id = %hub.id(), "Hub removed from cluster");
                }
                let _ = respond_to.send(removed);
            }
            ClusterCommand::RetireIfEmpty {
                tenant_id,
                hub_id,
                respond_to,
            } => {
                let retired = self.handle_retire_if_empty(tenant_id, hub_id).await;
                let _ = respond_to.send(retired);
            }
            ClusterCommand::Emit { tenant_id, payload } => {
                self.handle_emit(tenant_id, payload).await;
            }
            ClusterCommand::Len { respond_to } => {
                let _ = respond_to.send(self.hubs.len());
            }
            ClusterCommand::Shutdown { respond_to } => {
                self.handle_shutdown().await;
                let _ = respond_to.send(());
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_add(&mut self, hub: HubHandle) -> Option<HubHandle> {
        let tenant_id = hub.tenant_id();
        let hub_id = hub.id();
        let displaced = self.hubs.insert(tenant_id, hub);

        match displaced {
            Some(ref old) if old.id() != hub_id => warn!(
                tenant_id = %tenant_id,
                old_hub = %old.id(),
                new_hub = %hub_id,
                "Hub replaced for tenant"
            ),
            _ => debug!(tenant_id = %tenant_id, hub_id = %hub_id, "Hub added to cluster"),
        }

        displaced
    }

    fn handle_get_or_create(&mut self, tenant_id: TenantId) -> HubHandle {
        // A hub stopped behind the cluster's back is dead; replace it
        if let Some(hub) = self.hubs.get(&tenant_id) {
            if !hub.is_stopped() {
                return hub.clone();
            }
        }

        let hub = spawn_hub(tenant_id, self.hub_buffer);
        info!(tenant_id = %tenant_id, hub_id = %hub.id(), "Hub created");
        self.hubs.insert(tenant_id, hub.clone());
        hub
    }

    async fn handle_retire_if_empty(&mut self, tenant_id: TenantId, hub_id: HubId) -> bool {
        let hub = match self.hubs.get(&tenant_id) {
            Some(hub) if hub.id() == hub_id => hub.clone(),
            _ => return false,
        };

        // A hub that stopped on its own is as empty as it gets
        match hub.stop_if_empty().await {
            Ok(true) | Err(RoomError::HubStopped(_)) => {}
            _ => return false,
        }

        self.hubs.remove(&tenant_id);
        info!(tenant_id = %tenant_id, hub_id = %hub_id, "Hub retired");
        true
    }

    async fn handle_emit(&mut self, tenant_id: TenantId, payload: Payload) {
        let Some(hub) = self.hubs.get(&tenant_id) else {
            debug!(tenant_id = %tenant_id, "No subscribers for tenant, dropping payload");
            return;
        };

        if let Err(e) = hub.emit(payload).await {
            warn!(tenant_id = %tenant_id, error = %e, "Broadcast to stopped hub, removing it");
            self.hubs.remove(&tenant_id);
        }
    }

    async fn handle_shutdown(&mut self) {
        info!(hubs = self.hubs.len(), "Cluster shutting down");

        for (_, hub) in self.hubs.drain() {
            hub.stop().await;
        }
    }

    /// Returns the number of registered hubs.
    #[cfg(test)]
    pub fn hub_count(&self) -> usize {
        self.hubs.len()
    }
}
