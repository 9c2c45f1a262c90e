//! External collaborators: the connection-key store and the pub/sub transport.
//!
//! Both are traits so the daemon can run against Redis in production and
//! against in-process maps in development and tests.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use notify_core::{ConnectionKey, DomainError, SessionDescriptor};

mod memory;
mod redis_backend;

pub use memory::{MemoryKeyStore, MemoryPubSub};
pub use redis_backend::{RedisKeyStore, RedisPubSub};

/// Raw events delivered by a [`PubSub`] subscription, in publish order.
pub type EventReceiver = mpsc::Receiver<Vec<u8>>;

/// Buffer between a subscription's transport task and its receiver.
pub const SUBSCRIPTION_BUFFER: usize = 256;

// ============================================================================
// Key Store
// ============================================================================

/// Exchanges one-time connection keys for session descriptors.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Look up the descriptor stored under `key`.
    ///
    /// Returns `Ok(None)` for an unknown or expired key.
    async fn resolve(&self, key: &ConnectionKey) -> Result<Option<SessionDescriptor>, KeyStoreError>;

    /// Delete `key` so it cannot be used again. Deleting an absent key succeeds.
    async fn invalidate(&self, key: &ConnectionKey) -> Result<(), KeyStoreError>;
}

/// Errors from a key store backend.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed session descriptor: {0}")]
    Malformed(#[from] DomainError),
}

// ============================================================================
// Pub/Sub
// ============================================================================

/// Channel-based publish/subscribe transport.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Subscribe to `channel`.
    ///
    /// The receiver yields every message published after the call returns.
    /// It closes when the transport goes away.
    async fn subscribe(&self, channel: &str) -> Result<EventReceiver, PubSubError>;

    /// Publish `message` on `channel`.
    async fn publish(&self, channel: &str, message: Vec<u8>) -> Result<(), PubSubError>;
}

/// Errors from a pub/sub backend.
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("pub/sub connection failed: {0}")]
    Connect(String),

    #[error("failed to subscribe to {channel}: {reason}")]
    Subscribe { channel: String, reason: String },

    #[error("failed to publish on {channel}: {reason}")]
    Publish { channel: String, reason: String },
}
