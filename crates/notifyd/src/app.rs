//! Application context shared by every long-running component.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::room::{spawn_cluster, ClusterHandle};
use crate::store::KeyStore;

/// Everything a connection or background task needs, built once at startup.
///
/// Cheap to clone. Cancelling `shutdown` asks every component to stop.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub cluster: ClusterHandle,
    pub keys: Arc<dyn KeyStore>,

    /// Process-wide shutdown signal
    pub shutdown: CancellationToken,

    /// Live WebSocket connections
    pub connections: TaskTracker,
}

impl AppContext {
    /// Builds the context and spawns the cluster actor.
    pub fn new(config: Config, keys: Arc<dyn KeyStore>, shutdown: CancellationToken) -> Self {
        let cluster = spawn_cluster(config.cluster_config());

        Self {
            config: Arc::new(config),
            cluster,
            keys,
            shutdown,
            connections: TaskTracker::new(),
        }
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("cluster", &self.cluster)
            .field("shutdown", &self.shutdown.is_cancelled())
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}
