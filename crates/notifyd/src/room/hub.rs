//! Hub actor - the broadcast group of one tenant.
//!
//! The hub owns the tenant's client map and processes commands strictly in
//! arrival order. It never decides on its own that it is dead: after a client
//! leaves, the gateway asks the cluster to retire the hub, and the cluster
//! stops it only if it is still empty when the request is processed.

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use notify_core::{ClientId, Payload, TenantId};

use super::client::{Client, ClientInstance};
use super::commands::{EmitReport, HubCommand, RoomError};

/// Source of process-unique hub identities.
static NEXT_HUB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one hub instance.
///
/// A tenant may be served by several hubs over time (retired, then created
/// again); the id tells those generations apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HubId(u64);

impl HubId {
    fn next() -> Self {
        Self(NEXT_HUB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hub-{}", self.0)
    }
}

/// Spawn a hub actor for `tenant_id` and return its handle.
pub fn spawn_hub(tenant_id: TenantId, buffer: usize) -> HubHandle {
    let (tx, rx) = mpsc::channel(buffer);
    let handle = HubHandle {
        id: HubId::next(),
        tenant_id,
        sender: tx,
    };

    let actor = HubActor::new(handle.downgrade(), rx);
    tokio::spawn(actor.run());

    handle
}

// ============================================================================
// Hub Handle
// ============================================================================

/// Handle for interacting with a hub actor.
///
/// Cheap to clone. Every method maps a stopped hub to
/// `RoomError::HubStopped`.
#[derive(Debug, Clone)]
pub struct HubHandle {
    id: HubId,
    tenant_id: TenantId,
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Identity of this hub instance.
    pub fn id(&self) -> HubId {
        self.id
    }

    /// Tenant this hub serves.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Returns true once the worker loop has exited.
    pub fn is_stopped(&self) -> bool {
        self.sender.is_closed()
    }

    /// Non-owning reference for a client's back-pointer.
    pub fn downgrade(&self) -> WeakHubHandle {
        WeakHubHandle {
            id: self.id,
            tenant_id: self.tenant_id,
            sender: self.sender.downgrade(),
        }
    }

    fn stopped(&self) -> RoomError {
        RoomError::HubStopped(self.tenant_id)
    }

    /// Add a client, attaching it to this hub.
    ///
    /// # Errors
    ///
    /// - `RoomError::HubStopped` if the hub has been stopped
    /// - `RoomError::ClientGone` if the client died before it could attach
    pub async fn add(&self, client: Client) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Add {
                client,
                respond_to: tx,
            })
            .await
            .map_err(|_| self.stopped())?;

        rx.await.map_err(|_| self.stopped())?.map(|_replaced| ())
    }

    /// Look up a client by identity.
    ///
    /// Returns `None` if absent or if the hub has stopped.
    pub async fn get(&self, client_id: &ClientId) -> Option<Client> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Get {
                client_id: client_id.clone(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Remove a client by identity. Removing an absent client is a no-op.
    ///
    /// Returns whether the client was present.
    pub async fn remove(&self, client_id: ClientId) -> Result<bool, RoomError> {
        self.request_remove(client_id, None).await
    }

    /// Remove `client_id` only while the entry is still `instance`.
    pub(crate) async fn remove_instance(
        &self,
        client_id: ClientId,
        instance: ClientInstance,
    ) -> Result<bool, RoomError> {
        self.request_remove(client_id, Some(instance)).await
    }

    async fn request_remove(
        &self,
        client_id: ClientId,
        instance: Option<ClientInstance>,
    ) -> Result<bool, RoomError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Remove {
                client_id,
                instance,
                respond_to: tx,
            })
            .await
            .map_err(|_| self.stopped())?;

        rx.await.map_err(|_| self.stopped())
    }

    /// Current member count.
    pub async fn size(&self) -> Result<usize, RoomError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Size { respond_to: tx })
            .await
            .map_err(|_| self.stopped())?;

        rx.await.map_err(|_| self.stopped())
    }

    /// Broadcast a payload to every member without waiting for the fan-out.
    pub async fn emit(&self, payload: Payload) -> Result<(), RoomError> {
        self.sender
            .send(HubCommand::Emit {
                payload,
                respond_to: None,
            })
            .await
            .map_err(|_| self.stopped())
    }

    /// Broadcast a payload and wait for the per-member outcome.
    pub async fn emit_with_report(&self, payload: Payload) -> Result<EmitReport, RoomError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::Emit {
                payload,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| self.stopped())?;

        rx.await.map_err(|_| self.stopped())
    }

    /// Stop the worker loop if the hub has no members.
    ///
    /// Returns whether it stopped. An already stopped hub reports
    /// `RoomError::HubStopped`.
    pub async fn stop_if_empty(&self) -> Result<bool, RoomError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(HubCommand::StopIfEmpty { respond_to: tx })
            .await
            .map_err(|_| self.stopped())?;

        rx.await.map_err(|_| self.stopped())
    }

    /// Stop the worker loop.
    ///
    /// Commands queued before the stop are still processed; later ones fail
    /// with `RoomError::HubStopped`. Stopping twice is harmless.
    pub async fn stop(&self) {
        let _ = self.sender.send(HubCommand::Stop).await;
    }
}

// ============================================================================
// Weak Hub Handle
// ============================================================================

/// A hub reference that does not keep the hub's queue open.
#[derive(Debug, Clone)]
pub struct WeakHubHandle {
    id: HubId,
    tenant_id: TenantId,
    sender: mpsc::WeakSender<HubCommand>,
}

impl WeakHubHandle {
    /// Identity of the referenced hub.
    pub fn id(&self) -> HubId {
        self.id
    }

    /// Returns a usable handle if anything else still holds the hub.
    pub fn upgrade(&self) -> Option<HubHandle> {
        self.sender.upgrade().map(|sender| HubHandle {
            id: self.id,
            tenant_id: self.tenant_id,
            sender,
        })
    }
}

// ============================================================================
// Hub Actor
// ============================================================================

/// The hub actor - owns one tenant's clients.
///
/// Runs in a single task; all mutations of `clients` happen there.
pub struct HubActor {
    /// Handed to clients on attach
    this: WeakHubHandle,

    receiver: mpsc::Receiver<HubCommand>,

    clients: HashMap<ClientId, Client>,
}

impl HubActor {
    /// Creates a hub actor. `this` must refer to the queue `receiver` drains.
    pub fn new(this: WeakHubHandle, receiver: mpsc::Receiver<HubCommand>) -> Self {
        Self {
            this,
            receiver,
            clients: HashMap::new(),
        }
    }

    /// Runs the actor event loop until stopped or every handle is dropped.
    pub async fn run(mut self) {
        info!(
            tenant_id = %self.this.tenant_id,
            hub_id = %self.this.id,
            "Hub started"
        );

        while let Some(cmd) = self.receiver.recv().await {
            if self.handle_command(cmd).is_break() {
                break;
            }
        }

        info!(
            tenant_id = %self.this.tenant_id,
            hub_id = %self.this.id,
            clients = self.clients.len(),
            "Hub stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: HubCommand) -> ControlFlow<()> {
        match cmd {
            HubCommand::Add { client, respond_to } => {
                let result = self.handle_add(client);
                let _ = respond_to.send(result);
            }
            HubCommand::Get {
                client_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.clients.get(&client_id).cloned());
            }
            HubCommand::Remove {
                client_id,
                instance,
                respond_to,
            } => {
                let result = self.handle_remove(&client_id, instance);
                let _ = respond_to.send(result);
            }
            HubCommand::Size { respond_to } => {
                let _ = respond_to.send(self.clients.len());
            }
            HubCommand::Emit {
                payload,
                respond_to,
            } => {
                let report = self.handle_emit(&payload);
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(report);
                }
            }
            HubCommand::StopIfEmpty { respond_to } => {
                let empty = self.clients.is_empty();
                let _ = respond_to.send(empty);
                if empty {
                    return ControlFlow::Break(());
                }
            }
            HubCommand::Stop => return ControlFlow::Break(()),
        }

        ControlFlow::Continue(())
    }

    fn handle_add(&mut self, client: Client) -> Result<bool, RoomError> {
        if !client.is_alive() {
            return Err(RoomError::ClientGone(client.id().clone()));
        }
        client.attach(self.this.clone())?;

        let client_id = client.id().clone();
        let replaced = self.clients.insert(client_id.clone(), client).is_some();

        debug!(
            tenant_id = %self.this.tenant_id,
            client_id = %client_id,
            replaced,
            members = self.clients.len(),
            "Client added to hub"
        );

        Ok(replaced)
    }

    fn handle_remove(&mut self, client_id: &ClientId, instance: Option<ClientInstance>) -> bool {
        if let (Some(current), Some(instance)) = (self.clients.get(client_id), instance) {
            if current.instance() != instance {
                debug!(
                    tenant_id = %self.this.tenant_id,
                    client_id = %client_id,
                    "Ignoring removal by replaced client"
                );
                return false;
            }
        }

        let removed = self.clients.remove(client_id).is_some();

        if removed {
            debug!(
                tenant_id = %self.this.tenant_id,
                client_id = %client_id,
                members = self.clients.len(),
                "Client removed from hub"
            );
        }

        removed
    }

    /// Queues the payload for every member. A full or closed member queue
    /// only affects that member.
    fn handle_emit(&self, payload: &Payload) -> EmitReport {
        let mut report = EmitReport::default();

        for client in self.clients.values() {
            report.record(client.send(payload.clone()));
        }

        debug!(
            tenant_id = %self.this.tenant_id,
            delivered = report.delivered,
            dropped = report.dropped,
            closed = report.closed,
            "Hub broadcast"
        );

        report
    }

    /// Returns the number of members.
    #[cfg(test)]
    pub fn member_count(&self) -> usize {
        self.clients.len()
    }
}
