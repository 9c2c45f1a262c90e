//! Connection handler for one WebSocket.
//!
//! Each upgraded socket gets its own `ConnectionHandler` that:
//! - Exchanges the one-time connection key for a session descriptor
//! - Spawns a `Client` and attaches it to the tenant's hub
//! - Runs the read pump and the write/control pump until either side ends
//! - Tears the client down and asks the cluster to retire an emptied hub
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Transport failures end the connection; they never reach the process

use std::borrow::Cow;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use notify_core::{ClientId, ConnectionKey, Payload, SessionDescriptor};
use notify_protocol::CloseReason;

use crate::app::AppContext;
use crate::room::{Client, HubHandle, InboundFrame, RoomError};

/// Attempts at landing in a live hub when racing a retirement.
const ATTACH_ATTEMPTS: usize = 3;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Why a connection ended, for logging.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    #[error("WebSocket error: {0}")]
    Transport(String),

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    Eof,
}

/// Handles one upgraded WebSocket from key check to teardown.
pub struct ConnectionHandler {
    ctx: AppContext,

    /// Raw `key` query parameter
    key: Option<String>,
}

impl ConnectionHandler {
    pub fn new(ctx: AppContext, key: Option<String>) -> Self {
        Self { ctx, key }
    }

    /// Runs the connection to completion.
    pub async fn run(self, socket: WebSocket) {
        let (mut sink, stream) = socket.split();

        let (key, descriptor) = match self.validate().await {
            Ok(validated) => validated,
            Err(reason) => {
                warn!(reason = %reason, "Rejecting connection");
                send_close(&mut sink, reason).await;
                return;
            }
        };

        let tenant_id = descriptor.tenant_id;
        let limits = &self.ctx.config.limits;
        let (out_tx, out_rx) = mpsc::channel(limits.outbound_buffer);
        let (in_tx, in_rx) = mpsc::channel(limits.inbound_buffer);
        let client = Client::spawn(
            ClientId::from(&key),
            tenant_id,
            descriptor.user_id,
            out_tx,
            in_rx,
        );

        let hub = match self.attach(&client).await {
            Ok(hub) => hub,
            Err(e) => {
                warn!(client_id = %client.id(), tenant_id = %tenant_id, error = %e, "Attach failed");
                client.die().await;
                match attach_failure_reason(&e) {
                    Some(reason) => send_close(&mut sink, reason).await,
                    None => close_transport(&mut sink).await,
                }
                return;
            }
        };

        let conn = self.ctx.shutdown.child_token();
        let writer = tokio::spawn(write_pump(
            sink,
            out_rx,
            client.clone(),
            conn.clone(),
            self.ctx.shutdown.clone(),
            self.ctx.config.keepalive.ping_period(),
            self.ctx.config.keepalive.write_wait(),
        ));

        let result = self.read_pump(stream, in_tx, &client, &conn).await;
        match result {
            Ok(()) | Err(ConnectionError::Eof) => {
                debug!(client_id = %client.id(), "Connection closed by peer")
            }
            Err(e) => info!(client_id = %client.id(), error = %e, "Connection terminated"),
        }

        conn.cancel();
        client.die().await;
        if let Err(e) = writer.await {
            warn!(client_id = %client.id(), error = %e, "Write pump panicked");
        }

        match self.ctx.cluster.retire_if_empty(tenant_id, hub.id()).await {
            Ok(true) => debug!(tenant_id = %tenant_id, "Last client left, hub retired"),
            Ok(false) => {}
            Err(e) => debug!(tenant_id = %tenant_id, error = %e, "Hub retirement skipped"),
        }
    }

    /// Exchanges the key for a descriptor and burns the key.
    async fn validate(&self) -> Result<(ConnectionKey, SessionDescriptor), CloseReason> {
        let key = ConnectionKey::parse(self.key.clone().unwrap_or_default())
            .map_err(|_| CloseReason::EmptyKey)?;

        let descriptor = match self.ctx.keys.resolve(&key).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                debug!(key = %key.redacted(), "Unknown or expired key");
                return Err(CloseReason::InvalidKey);
            }
            Err(e) => {
                warn!(key = %key.redacted(), error = %e, "Key lookup failed");
                return Err(CloseReason::InvalidKey);
            }
        };

        if let Err(e) = self.ctx.keys.invalidate(&key).await {
            warn!(key = %key.redacted(), error = %e, "Failed to invalidate connection key");
        }

        Ok((key, descriptor))
    }

    /// Adds the client to its tenant's hub.
    ///
    /// A hub retired between lookup and add rejects the client; the lookup is
    /// then repeated and lands in a fresh hub.
    async fn attach(&self, client: &Client) -> Result<HubHandle, ConnectionError> {
        let tenant_id = client.tenant_id();
        let mut last = RoomError::HubStopped(tenant_id);

        for attempt in 1..=ATTACH_ATTEMPTS {
            let hub = self.ctx.cluster.get_or_create(tenant_id).await?;

            match hub.add(client.clone()).await {
                Ok(()) => return Ok(hub),
                Err(e @ RoomError::HubStopped(_)) => {
                    debug!(tenant_id = %tenant_id, attempt, "Hub stopped during attach, retrying");
                    last = e;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last.into())
    }

    /// Forwards inbound frames to the client until the peer goes away, the
    /// read deadline lapses or the connection is cancelled.
    async fn read_pump(
        &self,
        mut stream: WsStream,
        inbound: mpsc::Sender<InboundFrame>,
        client: &Client,
        conn: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        let pong_wait = self.ctx.config.keepalive.pong_wait();
        let max = self.ctx.config.limits.max_message_size;

        loop {
            // Every frame, pongs included, renews the deadline
            let next = tokio::select! {
                _ = conn.cancelled() => return Ok(()),
                next = timeout(pong_wait, stream.next()) => next,
            };

            let msg = match next {
                Err(_) => return Err(ConnectionError::Timeout),
                Ok(None) => return Err(ConnectionError::Eof),
                Ok(Some(Err(e))) => return Err(ConnectionError::Transport(e.to_string())),
                Ok(Some(Ok(msg))) => msg,
            };

            let frame = match msg {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(data) => data,
                Message::Close(frame) => {
                    debug!(client_id = %client.id(), frame = ?frame, "Client initiated close");
                    return Ok(());
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            if frame.len() > max {
                return Err(ConnectionError::MessageTooLarge {
                    size: frame.len(),
                    max,
                });
            }

            if inbound.send(frame).await.is_err() {
                // Client actor is gone
                return Ok(());
            }
        }
    }
}

/// Drains the client's outbound queue onto the socket and sends keepalive
/// probes. On process shutdown it sends a normal close frame first.
async fn write_pump(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Payload>,
    client: Client,
    conn: CancellationToken,
    shutdown: CancellationToken,
    ping_period: Duration,
    write_wait: Duration,
) {
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                send_close(&mut sink, CloseReason::ServerShutdown).await;
                break Ok(());
            }

            _ = conn.cancelled() => break Ok(()),

            payload = outbound.recv() => match payload {
                Some(payload) => {
                    let msg = Message::Text(payload.as_str().to_owned());
                    if let Err(e) = send_with_deadline(&mut sink, msg, write_wait).await {
                        break Err(e);
                    }
                }
                None => break Ok(()),
            },

            _ = ping.tick() => {
                if let Err(e) = send_with_deadline(&mut sink, Message::Ping(Vec::new()), write_wait).await {
                    break Err(e);
                }
            }

            _ = client.dead() => break Ok(()),
        }
    };

    if let Err(e) = result {
        debug!(client_id = %client.id(), error = %e, "Write pump failed");
    }

    // Wake the read pump
    conn.cancel();
}

async fn send_with_deadline(sink: &mut WsSink, msg: Message, write_wait: Duration) -> Result<(), ConnectionError> {
    match timeout(write_wait, sink.send(msg)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Close reason for a connection that could not join its hub.
///
/// Only a cluster that has shut down means the server is going away.
fn attach_failure_reason(err: &ConnectionError) -> Option<CloseReason> {
    match err {
        ConnectionError::Room(RoomError::ClusterShutDown) => Some(CloseReason::ServerShutdown),
        _ => None,
    }
}

/// Close frame without a status code.
async fn close_transport(sink: &mut WsSink) {
    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!(error = %e, "Failed to send close frame");
    }
}

/// Best-effort close frame.
async fn send_close(sink: &mut WsSink, reason: CloseReason) {
    let frame = CloseFrame {
        code: reason.code(),
        reason: Cow::Borrowed(reason.reason()),
    };

    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!(reason = %reason, error = %e, "Failed to send close frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_core::TenantId;

    #[test]
    fn test_connection_error_display() {
        assert_eq!(ConnectionError::Timeout.to_string(), "Read timeout");
        assert_eq!(
            ConnectionError::MessageTooLarge { size: 5000, max: 4096 }.to_string(),
            "Message too large: 5000 bytes (max: 4096)"
        );
    }

    #[test]
    fn test_attach_failure_reason() {
        let shutdown = ConnectionError::Room(RoomError::ClusterShutDown);
        assert_eq!(attach_failure_reason(&shutdown), Some(CloseReason::ServerShutdown));

        let stopped = ConnectionError::Room(RoomError::HubStopped(TenantId::new(7)));
        assert_eq!(attach_failure_reason(&stopped), None);

        let gone = ConnectionError::Room(RoomError::ClientGone(ClientId::new("k1")));
        assert_eq!(attach_failure_reason(&gone), None);
    }

    #[test]
    fn test_room_error_converts() {
        let err: ConnectionError = RoomError::ClusterShutDown.into();
        assert!(matches!(err, ConnectionError::Room(RoomError::ClusterShutDown)));
    }
}
