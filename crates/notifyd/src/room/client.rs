//! Client actor - one live connection's membership and inbound traffic.
//!
//! A [`Client`] is the handle stored in a hub and held by the gateway. The
//! [`ClientActor`] behind it owns the inbound queue and the back-reference to
//! the owning hub. The back-reference is weak: a client never keeps a hub
//! alive, it only uses it to ask for its own removal.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use notify_core::{ClientId, Payload, TenantId};

use super::commands::{ClientCommand, DeliveryError, RoomError};
use super::hub::WeakHubHandle;

/// Raw bytes read from the socket.
pub type InboundFrame = Vec<u8>;

static NEXT_CLIENT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Tells apart two clients spawned with the same [`ClientId`].
///
/// A hub only removes the entry a leaving client actually owns, so a stale
/// duplicate cannot evict the client that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientInstance(u64);

impl ClientInstance {
    fn next() -> Self {
        Self(NEXT_CLIENT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }
}

// ============================================================================
// Client Handle
// ============================================================================

/// Handle for one live connection.
///
/// Cheap to clone. The hub keeps one clone per member to push payloads; the
/// gateway keeps one to tear the client down.
#[derive(Debug, Clone)]
pub struct Client {
    id: ClientId,
    instance: ClientInstance,
    tenant_id: TenantId,
    user_id: String,
    outbound: mpsc::Sender<Payload>,
    commands: mpsc::UnboundedSender<ClientCommand>,
    liveness: CancellationToken,
}

impl Client {
    /// Spawns the client actor and returns its handle.
    ///
    /// The actor starts consuming `inbound` immediately. `outbound` is the
    /// queue the connection's writer drains.
    pub fn spawn(
        id: ClientId,
        tenant_id: TenantId,
        user_id: impl Into<String>,
        outbound: mpsc::Sender<Payload>,
        inbound: mpsc::Receiver<InboundFrame>,
    ) -> Self {
        let (client, actor) = Self::build(id, tenant_id, user_id.into(), outbound, inbound);
        tokio::spawn(actor.run());
        client
    }

    fn build(
        id: ClientId,
        tenant_id: TenantId,
        user_id: String,
        outbound: mpsc::Sender<Payload>,
        inbound: mpsc::Receiver<InboundFrame>,
    ) -> (Self, ClientActor) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let liveness = CancellationToken::new();
        let instance = ClientInstance::next();

        let actor = ClientActor {
            id: id.clone(),
            instance,
            tenant_id,
            user_id: user_id.clone(),
            connected_at: Utc::now(),
            commands: cmd_rx,
            inbound: Some(inbound),
            hub: None,
            liveness: liveness.clone(),
        };

        let client = Self {
            id,
            instance,
            tenant_id,
            user_id,
            outbound,
            commands: cmd_tx,
            liveness,
        };
        (client, actor)
    }

    /// Identity of this client within its hub.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Which of the clients sharing this identity this one is.
    pub fn instance(&self) -> ClientInstance {
        self.instance
    }

    /// Tenant this client belongs to.
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// User the connection key was issued to.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Queues a payload for the connection's writer.
    ///
    /// Never waits. When the queue is full the new payload is dropped.
    pub fn send(&self, payload: Payload) -> Result<(), DeliveryError> {
        match self.outbound.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    client_id = %self.id,
                    tenant_id = %self.tenant_id,
                    "Outbound queue full, dropping frame"
                );
                Err(DeliveryError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(client_id = %self.id, "Outbound queue closed");
                Err(DeliveryError::Closed)
            }
        }
    }

    /// Points this client at `hub`, detaching it from any previous hub.
    ///
    /// Called by the hub actor when the client is added.
    pub(crate) fn attach(&self, hub: WeakHubHandle) -> Result<(), RoomError> {
        self.commands
            .send(ClientCommand::Attach { hub })
            .map_err(|_| RoomError::ClientGone(self.id.clone()))
    }

    /// Leaves the owning hub and stops the actor.
    ///
    /// Idempotent: returns once the client has left its hub, whether this
    /// call or an earlier one did the work.
    pub async fn die(&self) {
        let (tx, rx) = oneshot::channel();

        if self.commands.send(ClientCommand::Die { respond_to: tx }).is_err() {
            // Already dead
            return;
        }

        // A dropped reply means a concurrent die() finished first
        let _ = rx.await;
    }

    /// Returns true until the client has died.
    pub fn is_alive(&self) -> bool {
        !self.liveness.is_cancelled()
    }

    /// Resolves once the client has died.
    pub fn dead(&self) -> WaitForCancellationFuture<'_> {
        self.liveness.cancelled()
    }
}

// ============================================================================
// Client Actor
// ============================================================================

/// The client actor - owns the inbound queue and the hub back-reference.
pub struct ClientActor {
    id: ClientId,
    instance: ClientInstance,
    tenant_id: TenantId,
    user_id: String,
    connected_at: DateTime<Utc>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    /// `None` once the socket reader has gone away
    inbound: Option<mpsc::Receiver<InboundFrame>>,
    hub: Option<WeakHubHandle>,
    liveness: CancellationToken,
}

impl ClientActor {
    /// Runs the actor until it dies.
    ///
    /// Commands take priority over inbound frames so an attach queued before
    /// a die is always applied first.
    pub async fn run(mut self) {
        info!(
            client_id = %self.id,
            tenant_id = %self.tenant_id,
            user_id = %self.user_id,
            "Client connected"
        );

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(ClientCommand::Attach { hub }) => self.handle_attach(hub).await,
                    Some(ClientCommand::Die { respond_to }) => {
                        // Refuse attaches from here on
                        self.commands.close();
                        self.handle_die().await;
                        self.drain_after_die().await;
                        self.liveness.cancel();
                        let _ = respond_to.send(());
                        break;
                    }
                    None => {
                        // Every handle dropped
                        self.handle_die().await;
                        break;
                    }
                },

                frame = recv_inbound(&mut self.inbound) => match frame {
                    Some(frame) => self.handle_inbound(&frame),
                    None => self.inbound = None,
                },
            }
        }

        self.liveness.cancel();
    }

    /// Switches the back-reference, leaving the previous hub first.
    async fn handle_attach(&mut self, hub: WeakHubHandle) {
        if let Some(previous) = self.hub.take() {
            if previous.id() != hub.id() {
                self.leave(&previous).await;
            }
        }

        debug!(
            client_id = %self.id,
            hub_id = %hub.id(),
            "Client attached to hub"
        );
        self.hub = Some(hub);
    }

    async fn handle_die(&mut self) {
        if let Some(hub) = self.hub.take() {
            self.leave(&hub).await;
        }

        let connected_secs = Utc::now()
            .signed_duration_since(self.connected_at)
            .num_seconds();
        info!(
            client_id = %self.id,
            tenant_id = %self.tenant_id,
            connected_secs,
            "Client disconnected"
        );
    }

    /// Settles commands that were queued before the queue closed.
    ///
    /// A hub that sent an attach has already inserted this client, so it is
    /// asked to drop it again.
    async fn drain_after_die(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                ClientCommand::Attach { hub } => self.leave(&hub).await,
                ClientCommand::Die { respond_to } => {
                    let _ = respond_to.send(());
                }
            }
        }
    }

    /// Asks a hub to drop this client. A hub that is already gone has nothing to drop.
    async fn leave(&self, hub: &WeakHubHandle) {
        let Some(hub) = hub.upgrade() else {
            return;
        };

        match hub.remove_instance(self.id.clone(), self.instance).await {
            Ok(_) => {}
            Err(e) => debug!(client_id = %self.id, error = %e, "Hub gone before removal"),
        }
    }

    fn handle_inbound(&self, frame: &[u8]) {
        debug!(
            client_id = %self.id,
            tenant_id = %self.tenant_id,
            bytes = frame.len(),
            message = %String::from_utf8_lossy(frame),
            "Client read"
        );
    }
}

/// Receives from the inbound queue, pending forever once it has closed.
async fn recv_inbound(inbound: &mut Option<mpsc::Receiver<InboundFrame>>) -> Option<InboundFrame> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::hub::spawn_hub;
    use std::time::Duration;
    use tokio::time::timeout;

    fn create_client(id: &str, buffer: usize) -> (Client, mpsc::Receiver<Payload>, mpsc::Sender<InboundFrame>) {
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(4);
        let client = Client::spawn(ClientId::new(id), TenantId::new(7), "user", out_tx, in_rx);
        (client, out_rx, in_tx)
    }

    #[tokio::test]
    async fn test_send_queues_payload() {
        let (client, mut out_rx, _in_tx) = create_client("a", 4);

        client.send(Payload::from("X")).unwrap();

        assert_eq!(out_rx.recv().await.unwrap().as_str(), "X");
    }

    #[tokio::test]
    async fn test_send_drops_newest_when_full() {
        let (client, mut out_rx, _in_tx) = create_client("a", 2);

        client.send(Payload::from("1")).unwrap();
        client.send(Payload::from("2")).unwrap();
        assert_eq!(client.send(Payload::from("3")), Err(DeliveryError::Full));

        // Queued frames survive in order; the overflowing one is gone
        assert_eq!(out_rx.recv().await.unwrap().as_str(), "1");
        assert_eq!(out_rx.recv().await.unwrap().as_str(), "2");
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_closed_writer() {
        let (client, out_rx, _in_tx) = create_client("a", 2);
        drop(out_rx);

        assert_eq!(client.send(Payload::from("X")), Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn test_die_is_idempotent() {
        let (client, _out_rx, _in_tx) = create_client("a", 2);
        assert!(client.is_alive());

        client.die().await;
        client.die().await;

        timeout(Duration::from_secs(1), client.dead())
            .await
            .expect("liveness token should be cancelled");
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn test_attach_after_death_fails() {
        let hub = spawn_hub(TenantId::new(7), 8);
        let (client, _out_rx, _in_tx) = create_client("a", 2);
        client.die().await;

        let err = client.attach(hub.downgrade()).unwrap_err();
        assert_eq!(err, RoomError::ClientGone(ClientId::new("a")));
    }

    #[tokio::test]
    async fn test_die_removes_from_hub() {
        let hub = spawn_hub(TenantId::new(7), 8);
        let (client, _out_rx, _in_tx) = create_client("a", 2);

        hub.add(client.clone()).await.unwrap();
        assert_eq!(hub.size().await.unwrap(), 1);

        client.die().await;
        assert_eq!(hub.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_die_removes_once() {
        let hub = spawn_hub(TenantId::new(7), 8);
        let (client, _out_rx, _in_tx) = create_client("a", 2);
        hub.add(client.clone()).await.unwrap();

        let c1 = client.clone();
        let c2 = client.clone();
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { c1.die().await }),
            tokio::spawn(async move { c2.die().await }),
        );
        r1.unwrap();
        r2.unwrap();

        assert_eq!(hub.size().await.unwrap(), 0);
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn test_attach_queued_behind_die_is_undone() {
        let (out_tx, _out_rx) = mpsc::channel(2);
        let (_in_tx, in_rx) = mpsc::channel(2);
        let (client, actor) = Client::build(
            ClientId::new("a"),
            TenantId::new(7),
            "user".to_string(),
            out_tx,
            in_rx,
        );
        let first = spawn_hub(TenantId::new(7), 8);
        let second = spawn_hub(TenantId::new(7), 8);

        // The actor is not running yet, so the queue is Attach(first), Die, Attach(second)
        first.add(client.clone()).await.unwrap();
        let (tx, rx) = oneshot::channel();
        client.commands.send(ClientCommand::Die { respond_to: tx }).unwrap();
        second.add(client.clone()).await.unwrap();
        assert_eq!(second.size().await.unwrap(), 1);

        actor.run().await;

        rx.await.unwrap();
        assert!(!client.is_alive());
        assert_eq!(first.size().await.unwrap(), 0);
        assert_eq!(second.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_inbound_consumed_while_alive() {
        let (client, _out_rx, in_tx) = create_client("a", 2);

        for _ in 0..16 {
            in_tx.send(b"hello".to_vec()).await.unwrap();
        }

        // The actor drains inbound frames; a closed inbound queue does not kill it
        drop(in_tx);
        assert!(client.is_alive());
        client.die().await;
    }

    #[tokio::test]
    async fn test_dropping_all_handles_leaves_hub() {
        let hub = spawn_hub(TenantId::new(7), 8);
        let (client, _out_rx, _in_tx) = create_client("a", 2);
        let liveness = client.liveness.clone();

        hub.add(client.clone()).await.unwrap();
        // Remove the hub's copy first so the gateway's copy is the last one
        hub.remove(ClientId::new("a")).await.unwrap();
        drop(client);

        timeout(Duration::from_secs(1), liveness.cancelled())
            .await
            .expect("actor should stop once every handle is dropped");
    }
}
