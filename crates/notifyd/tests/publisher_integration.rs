//! Integration tests for the publisher bridge.
//!
//! The bridge is wired to the in-memory pub/sub and a real cluster; clients
//! are plain room clients whose outbound queues stand in for sockets.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.
//! We test the panic-free behavior of production code through assertions.

use std::time::Duration;

use notify_core::{ClientId, Payload, TenantId};
use notify_protocol::{NotificationEnvelope, NOTIFICATION_CHANNEL};
use notifyd::publisher::{Publisher, PublisherStats};
use notifyd::room::{spawn_cluster, Client, ClusterConfig, ClusterHandle, InboundFrame};
use notifyd::store::{EventReceiver, MemoryPubSub, PubSub};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Helpers
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_millis(500);

struct Bridge {
    pubsub: MemoryPubSub,
    cluster: ClusterHandle,
    stop: CancellationToken,
    task: JoinHandle<(EventReceiver, PublisherStats)>,
}

impl Bridge {
    async fn start() -> Self {
        let pubsub = MemoryPubSub::new();
        let cluster = spawn_cluster(ClusterConfig::default());
        let publisher = Publisher::new(cluster.clone(), NOTIFICATION_CHANNEL);
        let events = publisher.subscribe(&pubsub).await.unwrap();
        let stop = CancellationToken::new();

        let run_stop = stop.clone();
        let task = tokio::spawn(async move { publisher.run(events, run_stop).await });

        Self {
            pubsub,
            cluster,
            stop,
            task,
        }
    }

    async fn join(&self, id: &str, tenant: i64) -> (Client, mpsc::Receiver<Payload>, mpsc::Sender<InboundFrame>) {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (in_tx, in_rx) = mpsc::channel(4);
        let client = Client::spawn(ClientId::new(id), TenantId::new(tenant), "user", out_tx, in_rx);

        let hub = self.cluster.get_or_create(TenantId::new(tenant)).await.unwrap();
        hub.add(client.clone()).await.unwrap();
        (client, out_rx, in_tx)
    }

    async fn publish(&self, tenant: i64, payload: &str) {
        let raw = NotificationEnvelope::new(TenantId::new(tenant), payload)
            .encode()
            .unwrap();
        self.pubsub
            .publish(NOTIFICATION_CHANNEL, raw.into_bytes())
            .await
            .unwrap();
    }
}

async fn recv(rx: &mut mpsc::Receiver<Payload>) -> Option<String> {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .ok()
        .flatten()
        .map(|p| p.as_str().to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_envelope_reaches_tenant_clients() {
    let bridge = Bridge::start().await;
    let (_a, mut a_out, _a_in) = bridge.join("a", 7).await;
    let (_b, mut b_out, _b_in) = bridge.join("b", 7).await;
    let (_c, mut c_out, _c_in) = bridge.join("c", 9).await;

    bridge.publish(7, r#""X""#).await;

    assert_eq!(recv(&mut a_out).await.as_deref(), Some(r#""X""#));
    assert_eq!(recv(&mut b_out).await.as_deref(), Some(r#""X""#));
    assert!(timeout(Duration::from_millis(100), c_out.recv()).await.is_err());
}

#[tokio::test]
async fn test_malformed_event_does_not_stop_bridge() {
    let bridge = Bridge::start().await;
    let (_a, mut a_out, _a_in) = bridge.join("a", 7).await;

    let junk: [&[u8]; 3] = [b"{", br#"{"store_id":"seven","payload":1}"#, br#"{"store_id":7}"#];
    for junk in junk {
        bridge
            .pubsub
            .publish(NOTIFICATION_CHANNEL, junk.to_vec())
            .await
            .unwrap();
    }
    bridge.publish(7, r#"{"event_name":"ACCEPT_PIZZA"}"#).await;

    assert_eq!(
        recv(&mut a_out).await.as_deref(),
        Some(r#"{"event_name":"ACCEPT_PIZZA"}"#)
    );

    bridge.stop.cancel();
    let (_events, stats) = bridge.task.await.unwrap();
    assert_eq!(stats.discarded, 3);
    assert_eq!(stats.forwarded, 1);
}

#[tokio::test]
async fn test_events_for_unknown_tenant_are_dropped() {
    let bridge = Bridge::start().await;

    bridge.publish(42, r#""nobody""#).await;
    bridge.stop.cancel();

    let (_events, stats) = bridge.task.await.unwrap();
    assert!(stats.forwarded <= 1);
    assert_eq!(bridge.cluster.hub_count().await, 0);
}

#[tokio::test]
async fn test_stop_keeps_subscription_open() {
    let mut bridge = Bridge::start().await;
    bridge.stop.cancel();

    let (mut events, _) = (&mut bridge.task).await.unwrap();

    // The transport still delivers into the handed-back receiver
    bridge.publish(7, r#""late""#).await;
    let raw = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
    let envelope = NotificationEnvelope::decode(&raw).unwrap();
    assert_eq!(envelope.payload.as_str(), r#""late""#);
    assert_eq!(bridge.pubsub.subscriber_count(NOTIFICATION_CHANNEL), 1);
}
