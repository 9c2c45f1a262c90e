//! Redis-backed key store and pub/sub.
//!
//! Connection keys are plain string values (`GET`/`DEL`); notifications use
//! Redis channels. Each subscription gets its own pub/sub connection whose
//! messages are forwarded into an mpsc receiver by a background task.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use notify_core::{ConnectionKey, SessionDescriptor};

use super::{EventReceiver, KeyStore, KeyStoreError, PubSub, PubSubError, SUBSCRIPTION_BUFFER};

// ============================================================================
// Key Store
// ============================================================================

/// Key store reading upstream-issued tickets from Redis.
#[derive(Clone)]
pub struct RedisKeyStore {
    conn: MultiplexedConnection,
}

impl RedisKeyStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, KeyStoreError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(unavailable)?;

        info!(url, "Key store connected");
        Ok(Self { conn })
    }
}

fn unavailable(err: redis::RedisError) -> KeyStoreError {
    KeyStoreError::Unavailable(err.to_string())
}

#[async_trait]
impl KeyStore for RedisKeyStore {
    async fn resolve(&self, key: &ConnectionKey) -> Result<Option<SessionDescriptor>, KeyStoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key.as_str()).await.map_err(unavailable)?;

        match raw {
            Some(raw) => Ok(Some(SessionDescriptor::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    async fn invalidate(&self, key: &ConnectionKey) -> Result<(), KeyStoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key.as_str()).await.map_err(unavailable)
    }
}

// ============================================================================
// Pub/Sub
// ============================================================================

/// Pub/sub over Redis channels.
#[derive(Clone)]
pub struct RedisPubSub {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl RedisPubSub {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, PubSubError> {
        let client = redis::Client::open(url).map_err(|e| PubSubError::Connect(e.to_string()))?;
        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PubSubError::Connect(e.to_string()))?;

        info!(url, "Pub/sub connected");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn subscribe(&self, channel: &str) -> Result<EventReceiver, PubSubError> {
        let subscribe_err = |e: redis::RedisError| PubSubError::Subscribe {
            channel: channel.to_string(),
            reason: e.to_string(),
        };

        let mut pubsub = self.client.get_async_pubsub().await.map_err(subscribe_err)?;
        pubsub.subscribe(channel).await.map_err(subscribe_err)?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let channel = channel.to_string();

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();

            loop {
                let msg = tokio::select! {
                    _ = tx.closed() => break,
                    msg = messages.next() => msg,
                };

                let Some(msg) = msg else {
                    warn!(channel = %channel, "Redis subscription stream ended");
                    break;
                };

                match msg.get_payload::<Vec<u8>>() {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(channel = %channel, error = %e, "Unreadable pub/sub payload"),
                }
            }

            debug!(channel = %channel, "Redis subscription forwarder stopped");
        });

        Ok(rx)
    }

    async fn publish(&self, channel: &str, message: Vec<u8>) -> Result<(), PubSubError> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(channel, message)
            .await
            .map_err(|e| PubSubError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = RedisKeyStore::connect("not-a-url").await.err().unwrap();
        assert!(matches!(err, KeyStoreError::Unavailable(_)));

        let err = RedisPubSub::connect("not-a-url").await.err().unwrap();
        assert!(matches!(err, PubSubError::Connect(_)));
    }
}
