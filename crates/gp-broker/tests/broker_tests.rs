//! Broker pub/sub integration tests
//!
//! Run against the in-process broker (the `local` URI), which shares one
//! broker instance per process. Each test uses unique destination names to
//! stay isolated from its neighbours.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use gp_broker::{
    observe_stage, BrokerConnection, CurrentStage, Destination, InboundMessage, MessageHandler,
    Publisher, StageBroadcaster, Subscriber, LOCAL_BROKER_URI,
};

/// Handler that forwards every payload to a channel for assertions
struct Collector {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl MessageHandler for Collector {
    async fn on_message(&self, message: InboundMessage) {
        let text = message.text().unwrap_or("<binary>").to_string();
        let _ = self.tx.send(text);
    }
}

fn collector() -> (Arc<Collector>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Collector { tx }), rx)
}

async fn recv_within(rx: &mut mpsc::UnboundedReceiver<String>, ms: u64) -> Option<String> {
    tokio::time::timeout(Duration::from_millis(ms), rx.recv())
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn test_topic_broadcast_reaches_all_subscribers() {
    let topic = Destination::topic("it-broadcast-topic");

    let mut receivers = Vec::new();
    let mut connections = Vec::new();
    for _ in 0..3 {
        let connection = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
        let (handler, rx) = collector();
        Subscriber::new(connection.clone())
            .subscribe_topic(&topic, handler)
            .await
            .unwrap();
        receivers.push(rx);
        connections.push(connection);
    }

    let publisher = Publisher::new(LOCAL_BROKER_URI, topic.clone());
    publisher.send("stage event").await.unwrap();

    for rx in &mut receivers {
        assert_eq!(recv_within(rx, 2000).await.as_deref(), Some("stage event"));
    }

    for connection in &connections {
        connection.close().await;
    }
}

#[tokio::test]
async fn test_late_subscriber_misses_earlier_messages() {
    let topic = Destination::topic("it-late-subscriber-topic");
    let publisher = Publisher::new(LOCAL_BROKER_URI, topic.clone());

    // Nobody is listening yet; this message is lost
    publisher.send("early").await.unwrap();

    let connection = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
    let (handler, mut rx) = collector();
    Subscriber::new(connection.clone())
        .subscribe_topic(&topic, handler)
        .await
        .unwrap();

    publisher.send("late").await.unwrap();

    assert_eq!(recv_within(&mut rx, 2000).await.as_deref(), Some("late"));
    assert!(recv_within(&mut rx, 200).await.is_none());

    connection.close().await;
}

#[tokio::test]
async fn test_per_publisher_fifo() {
    let topic = Destination::topic("it-fifo-topic");

    let connection = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
    let (handler, mut rx) = collector();
    Subscriber::new(connection.clone())
        .subscribe_topic(&topic, handler)
        .await
        .unwrap();

    let publisher = Publisher::new(LOCAL_BROKER_URI, topic.clone());
    for i in 0..5 {
        publisher.send(&format!("event-{}", i)).await.unwrap();
    }

    for i in 0..5 {
        assert_eq!(
            recv_within(&mut rx, 2000).await,
            Some(format!("event-{}", i))
        );
    }

    connection.close().await;
}

#[tokio::test]
async fn test_queue_is_point_to_point() {
    let queue = Destination::queue("it-p2p-queue");

    let conn_a = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
    let conn_b = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
    let (handler_a, mut rx_a) = collector();
    let (handler_b, mut rx_b) = collector();
    Subscriber::new(conn_a.clone())
        .subscribe_queue(&queue, handler_a)
        .await
        .unwrap();
    Subscriber::new(conn_b.clone())
        .subscribe_queue(&queue, handler_b)
        .await
        .unwrap();

    let publisher = Publisher::new(LOCAL_BROKER_URI, queue.clone());
    let sent: Vec<String> = (0..4).map(|i| format!("alert-{}", i)).collect();
    for payload in &sent {
        publisher.send(payload).await.unwrap();
    }

    // Each message goes to exactly one of the competing consumers
    let mut received = Vec::new();
    while let Some(msg) = recv_within(&mut rx_a, 300).await {
        received.push(msg);
    }
    while let Some(msg) = recv_within(&mut rx_b, 300).await {
        received.push(msg);
    }

    received.sort();
    assert_eq!(received, sent);

    conn_a.close().await;
    conn_b.close().await;
}

#[tokio::test]
async fn test_fallback_connect_makes_publisher_usable() {
    let topic = Destination::topic("it-fallback-topic");

    let connection = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
    let (handler, mut rx) = collector();
    Subscriber::new(connection.clone())
        .subscribe_topic(&topic, handler)
        .await
        .unwrap();

    // Port 1 refuses connections; the publisher must fall back to the
    // in-process broker without caller intervention
    let publisher = Publisher::new("amqp://127.0.0.1:1", topic.clone());
    publisher.send("made it").await.unwrap();

    assert_eq!(recv_within(&mut rx, 2000).await.as_deref(), Some("made it"));

    connection.close().await;
}

#[tokio::test]
async fn test_stage_broadcast_updates_observer_cache() {
    let cache = Arc::new(CurrentStage::new());
    let connection = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
    observe_stage(connection.clone(), cache.clone()).await.unwrap();

    let broadcaster = StageBroadcaster::new(LOCAL_BROKER_URI);
    broadcaster.broadcast(4).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while cache.get() != Some(4) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cache.get(), Some(4));

    broadcaster.close().await;
    connection.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let connection = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
    connection.close().await;
    connection.close().await;

    // Never-connected instance
    let never_connected = BrokerConnection::new("amqp://127.0.0.1:1");
    never_connected.close().await;
    never_connected.close().await;
}

#[tokio::test]
async fn test_publish_from_within_handler_does_not_deadlock() {
    let inbound = Destination::topic("it-relay-inbound");
    let outbound = Destination::topic("it-relay-outbound");

    struct Relay {
        publisher: Publisher,
    }

    #[async_trait]
    impl MessageHandler for Relay {
        async fn on_message(&self, message: InboundMessage) {
            if let Some(text) = message.text() {
                let _ = self.publisher.send(&format!("relayed: {}", text)).await;
            }
        }
    }

    let relay_connection = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
    let relay = Arc::new(Relay {
        publisher: Publisher::with_connection(relay_connection.clone(), outbound.clone()),
    });
    Subscriber::new(relay_connection.clone())
        .subscribe_topic(&inbound, relay)
        .await
        .unwrap();

    let sink_connection = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
    let (handler, mut rx) = collector();
    Subscriber::new(sink_connection.clone())
        .subscribe_topic(&outbound, handler)
        .await
        .unwrap();

    Publisher::new(LOCAL_BROKER_URI, inbound.clone())
        .send("ping")
        .await
        .unwrap();

    assert_eq!(
        recv_within(&mut rx, 2000).await.as_deref(),
        Some("relayed: ping")
    );

    relay_connection.close().await;
    sink_connection.close().await;
}
