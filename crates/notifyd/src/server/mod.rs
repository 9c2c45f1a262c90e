//! WebSocket gateway for the notification daemon.
//!
//! The server:
//! - Listens for HTTP connections and upgrades requests on the WebSocket route
//! - Spawns a ConnectionHandler for each upgraded socket
//! - Runs the publisher bridge alongside the listener
//! - Shuts down in order via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  NotifyServer   │
//! │  (axum Router)  │
//! └───────┬─────────┘
//!         │ GET /ws?key=...
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  ClusterHandle  │◀──── Publisher bridge
//! │   (per socket)  │     │                 │
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Shutdown order
//!
//! 1. The shutdown token is cancelled and the listener stops accepting
//! 2. Every connection sends a normal close frame and tears down
//! 3. Connections get `shutdown_grace_ms` to finish
//! 4. The publisher bridge stops
//! 5. The cluster stops every hub

mod connection;

pub use connection::{ConnectionError, ConnectionHandler};

use std::io;
use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::AppContext;
use crate::publisher::{Publisher, PublisherStats};
use crate::store::EventReceiver;

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Server error: {0}")]
    Serve(#[from] io::Error),
}

/// Query string of an upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct UpgradeParams {
    pub key: Option<String>,
}

/// Build the HTTP router with the WebSocket route.
pub fn router(ctx: AppContext) -> Router {
    let path = ctx.config.ws_path.clone();
    Router::new().route(&path, get(ws_upgrade)).with_state(ctx)
}

/// GET /ws?key=KEY
///
/// Always upgrades; a missing or bad key is answered with a close frame so
/// browsers see the reason.
async fn ws_upgrade(
    State(ctx): State<AppContext>,
    Query(params): Query<UpgradeParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let tracker = ctx.connections.clone();
    ws.on_upgrade(move |socket| tracker.track_future(ConnectionHandler::new(ctx, params.key).run(socket)))
}

/// The notification daemon's network front.
pub struct NotifyServer {
    ctx: AppContext,

    /// Publisher bridge and its subscription, started with the listener
    bridge: Option<(Publisher, EventReceiver)>,
}

impl NotifyServer {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx, bridge: None }
    }

    /// Run `publisher` on `events` for the lifetime of the server.
    pub fn with_bridge(mut self, publisher: Publisher, events: EventReceiver) -> Self {
        self.bridge = Some((publisher, events));
        self
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.ctx.config.socket_addr()?;
        TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
            addr,
            error: e.to_string(),
        })
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until the shutdown token is
    /// cancelled, then tear everything down in order.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        info!(
            addr = %addr,
            path = %self.ctx.config.ws_path,
            "Notification server listening"
        );

        let bridge_stop = CancellationToken::new();
        let bridge = self.bridge.map(|(publisher, events)| {
            let stop = bridge_stop.clone();
            tokio::spawn(async move { publisher.run(events, stop).await })
        });

        let shutdown = self.ctx.shutdown.clone();
        let result = axum::serve(listener, router(self.ctx.clone()))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        info!("Server shutdown requested");

        // A listener failure also has to close the open connections
        self.ctx.shutdown.cancel();
        drain_connections(&self.ctx).await;

        bridge_stop.cancel();
        stop_bridge(bridge).await;

        self.ctx.cluster.shutdown().await;
        info!("Notification server stopped");

        result.map_err(ServerError::Serve)
    }
}

/// Wait, up to the grace period, for every connection to finish closing.
async fn drain_connections(ctx: &AppContext) {
    let open = ctx.connections.len();
    ctx.connections.close();

    if open > 0 {
        info!(connections = open, "Waiting for connections to close");
    }

    if timeout(ctx.config.shutdown_grace(), ctx.connections.wait()).await.is_err() {
        warn!(
            remaining = ctx.connections.len(),
            "Connections still open after grace period"
        );
    }
}

async fn stop_bridge(bridge: Option<JoinHandle<(EventReceiver, PublisherStats)>>) {
    let Some(handle) = bridge else {
        return;
    };

    match handle.await {
        Ok((_events, stats)) => debug!(
            forwarded = stats.forwarded,
            discarded = stats.discarded,
            "Publisher bridge joined"
        ),
        Err(e) => warn!(error = %e, "Publisher bridge panicked"),
    }
}
