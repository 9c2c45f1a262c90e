//! In-process key store and pub/sub, used by the `memory` backend and tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use notify_core::{ConnectionKey, SessionDescriptor};

use crate::config::SeedKey;

use super::{EventReceiver, KeyStore, KeyStoreError, PubSub, PubSubError, SUBSCRIPTION_BUFFER};

// ============================================================================
// Key Store
// ============================================================================

#[derive(Debug)]
struct Ticket {
    descriptor: SessionDescriptor,
    expires_at: Option<Instant>,
}

impl Ticket {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Key store backed by a map, with optional per-key expiry.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    tickets: Mutex<HashMap<String, Ticket>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding the configured seed keys.
    pub fn seeded(seeds: &[SeedKey]) -> Self {
        let store = Self::new();
        for seed in seeds {
            store.insert(
                seed.key.clone(),
                SessionDescriptor::new(seed.store_id, seed.user_id.clone(), ""),
            );
        }
        store
    }

    /// Store a descriptor that never expires.
    pub fn insert(&self, key: impl Into<String>, descriptor: SessionDescriptor) {
        self.store(key.into(), descriptor, None);
    }

    /// Store a descriptor that resolves to nothing once `ttl` has elapsed.
    pub fn insert_with_ttl(&self, key: impl Into<String>, descriptor: SessionDescriptor, ttl: Duration) {
        self.store(key.into(), descriptor, Some(Instant::now() + ttl));
    }

    /// Number of stored keys, expired ones included.
    pub fn len(&self) -> usize {
        self.tickets.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn store(&self, key: String, descriptor: SessionDescriptor, expires_at: Option<Instant>) {
        if let Ok(mut tickets) = self.tickets.lock() {
            tickets.insert(
                key,
                Ticket {
                    descriptor,
                    expires_at,
                },
            );
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Ticket>>, KeyStoreError> {
        self.tickets
            .lock()
            .map_err(|_| KeyStoreError::Unavailable("key store lock poisoned".to_string()))
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn resolve(&self, key: &ConnectionKey) -> Result<Option<SessionDescriptor>, KeyStoreError> {
        let mut tickets = self.lock()?;

        match tickets.get(key.as_str()) {
            Some(ticket) if ticket.is_expired(Instant::now()) => {
                tickets.remove(key.as_str());
                Ok(None)
            }
            Some(ticket) => Ok(Some(ticket.descriptor.clone())),
            None => Ok(None),
        }
    }

    async fn invalidate(&self, key: &ConnectionKey) -> Result<(), KeyStoreError> {
        self.lock()?.remove(key.as_str());
        Ok(())
    }
}

// ============================================================================
// Pub/Sub
// ============================================================================

/// Fan-out pub/sub: every subscriber of a channel receives every message.
#[derive(Debug, Default)]
pub struct MemoryPubSub {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .ok()
            .and_then(|subs| subs.get(channel).map(|s| s.iter().filter(|tx| !tx.is_closed()).count()))
            .unwrap_or(0)
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn subscribe(&self, channel: &str) -> Result<EventReceiver, PubSubError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let mut subs = self.subscribers.lock().map_err(|_| PubSubError::Subscribe {
            channel: channel.to_string(),
            reason: "subscriber table poisoned".to_string(),
        })?;
        subs.entry(channel.to_string()).or_default().push(tx);

        debug!(channel, "Memory subscription added");
        Ok(rx)
    }

    async fn publish(&self, channel: &str, message: Vec<u8>) -> Result<(), PubSubError> {
        // Snapshot the senders so no lock is held across an await
        let targets: Vec<_> = {
            let mut subs = self.subscribers.lock().map_err(|_| PubSubError::Publish {
                channel: channel.to_string(),
                reason: "subscriber table poisoned".to_string(),
            })?;

            match subs.get_mut(channel) {
                Some(senders) => {
                    senders.retain(|tx| !tx.is_closed());
                    senders.clone()
                }
                None => Vec::new(),
            }
        };

        for tx in targets {
            // A subscriber dropped mid-publish simply misses the message
            let _ = tx.send(message.clone()).await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_core::TenantId;

    fn key(s: &str) -> ConnectionKey {
        ConnectionKey::parse(s).unwrap()
    }

    fn descriptor() -> SessionDescriptor {
        SessionDescriptor::new(TenantId::new(7), "u-1", "jwt")
    }

    #[tokio::test]
    async fn test_resolve_and_invalidate() {
        let store = MemoryKeyStore::new();
        store.insert("k1", descriptor());

        assert_eq!(store.resolve(&key("k1")).await.unwrap(), Some(descriptor()));

        store.invalidate(&key("k1")).await.unwrap();
        assert_eq!(store.resolve(&key("k1")).await.unwrap(), None);

        // Invalidating twice is fine
        store.invalidate(&key("k1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_seeded_keys_resolve_once() {
        let store = MemoryKeyStore::seeded(&[SeedKey {
            key: "dev-1".to_string(),
            store_id: TenantId::new(9),
            user_id: "dev".to_string(),
        }]);
        assert_eq!(store.len(), 1);

        let resolved = store.resolve(&key("dev-1")).await.unwrap().unwrap();
        assert_eq!(resolved.tenant_id, TenantId::new(9));
        assert_eq!(resolved.user_id, "dev");

        store.invalidate(&key("dev-1")).await.unwrap();
        assert_eq!(store.resolve(&key("dev-1")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_key_resolves_to_none() {
        let store = MemoryKeyStore::new();
        assert_eq!(store.resolve(&key("missing")).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_resolves_to_none() {
        let store = MemoryKeyStore::new();
        store.insert_with_ttl("k1", descriptor(), Duration::from_secs(60));

        assert!(store.resolve(&key("k1")).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.resolve(&key("k1")).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_publish_fans_out() {
        let pubsub = MemoryPubSub::new();
        let mut a = pubsub.subscribe("NOTIFICATION").await.unwrap();
        let mut b = pubsub.subscribe("NOTIFICATION").await.unwrap();
        let mut other = pubsub.subscribe("OTHER").await.unwrap();

        pubsub.publish("NOTIFICATION", b"hello".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), b"hello");
        assert_eq!(b.recv().await.unwrap(), b"hello");
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_prunes_closed_subscribers() {
        let pubsub = MemoryPubSub::new();
        let a = pubsub.subscribe("NOTIFICATION").await.unwrap();
        let _b = pubsub.subscribe("NOTIFICATION").await.unwrap();
        assert_eq!(pubsub.subscriber_count("NOTIFICATION"), 2);

        drop(a);
        pubsub.publish("NOTIFICATION", b"x".to_vec()).await.unwrap();
        assert_eq!(pubsub.subscriber_count("NOTIFICATION"), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let pubsub = MemoryPubSub::new();
        pubsub.publish("NOTIFICATION", b"x".to_vec()).await.unwrap();
    }
}
