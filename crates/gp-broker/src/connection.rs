//! Broker connection lifecycle.
//!
//! A [`BrokerConnection`] owns exactly one connection+channel pair. Connecting
//! tries the configured AMQP address first and falls back to the process-local
//! in-memory broker when that address is unusable, so tests and standalone
//! runs work without a network broker. A closed connection is never reused;
//! callers reinstantiate.

use std::sync::Arc;

use futures::StreamExt;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    ExchangeKind,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::destination::{Destination, DestinationKind};
use crate::inproc::InProcessBroker;
use crate::subscriber::{InboundMessage, MessageHandler};
use crate::{BrokerError, Result, LOCAL_BROKER_URI};

/// Lifecycle state of a [`BrokerConnection`].
///
/// Transitions are `Disconnected -> Connecting -> Connected -> Closed`; there
/// is no way back to `Connected` after `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

enum Transport {
    Amqp {
        connection: Connection,
        channel: Channel,
    },
    InProcess(Arc<InProcessBroker>),
}

/// One connection+channel pair to the broker.
pub struct BrokerConnection {
    uri: String,
    state: parking_lot::RwLock<ConnectionState>,
    transport: tokio::sync::RwLock<Option<Transport>>,
    /// Signals subscriber delivery tasks on close
    shutdown: broadcast::Sender<()>,
}

impl BrokerConnection {
    /// Create a connection in the `Disconnected` state without touching the
    /// network. Call [`open`](Self::open) to establish it.
    pub fn new(primary_uri: impl Into<String>) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Self {
            uri: primary_uri.into(),
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            transport: tokio::sync::RwLock::new(None),
            shutdown,
        })
    }

    /// Connect to `primary_uri`, falling back to the in-process broker when
    /// the primary address is unusable.
    pub async fn connect(primary_uri: &str) -> Result<Arc<Self>> {
        let connection = Self::new(primary_uri);
        connection.open().await?;
        Ok(connection)
    }

    /// Establish the connection. Fails on an already-closed instance.
    pub async fn open(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                ConnectionState::Closed => return Err(BrokerError::Closed),
                ConnectionState::Connected => return Ok(()),
                _ => *state = ConnectionState::Connecting,
            }
        }

        let transport = self.open_transport().await.map_err(|e| {
            *self.state.write() = ConnectionState::Disconnected;
            e
        })?;

        *self.transport.write().await = Some(transport);
        *self.state.write() = ConnectionState::Connected;
        Ok(())
    }

    async fn open_transport(&self) -> Result<Transport> {
        if self.uri == LOCAL_BROKER_URI {
            info!("Using in-process broker");
            return Ok(Transport::InProcess(InProcessBroker::shared()));
        }

        match Self::open_amqp(&self.uri).await {
            Ok(transport) => {
                info!(uri = %self.uri, "Connected to AMQP broker");
                Ok(transport)
            }
            Err(e) => {
                warn!(
                    uri = %self.uri,
                    error = %e,
                    "Primary broker unreachable, falling back to in-process broker"
                );
                Ok(Transport::InProcess(InProcessBroker::shared()))
            }
        }
    }

    async fn open_amqp(uri: &str) -> Result<Transport> {
        let connection = Connection::connect(
            uri,
            ConnectionProperties::default().with_connection_name("gridpulse".into()),
        )
        .await
        .map_err(|e| BrokerError::Connect(format!("AMQP connection failed: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connect(format!("Failed to create channel: {}", e)))?;

        Ok(Transport::Amqp {
            connection,
            channel,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Close the connection: channel first, then the connection itself.
    ///
    /// Idempotent: repeated calls, or a call on a never-connected instance,
    /// are no-ops. Delivery tasks are signalled so in-flight callbacks finish;
    /// a publish racing this call fails with [`BrokerError::Closed`].
    pub async fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }

        let _ = self.shutdown.send(());

        if let Some(Transport::Amqp {
            connection,
            channel,
        }) = self.transport.write().await.take()
        {
            let _ = channel.close(200, "shutdown").await;
            let _ = connection.close(200, "shutdown").await;
        }

        debug!(uri = %self.uri, "Broker connection closed");
    }

    pub(crate) async fn publish(&self, destination: &Destination, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let guard = self.transport.read().await;
        let transport = guard.as_ref().ok_or(BrokerError::Closed)?;

        match transport {
            Transport::InProcess(broker) => {
                broker.publish(destination, payload.to_vec());
                Ok(())
            }
            Transport::Amqp { channel, .. } => {
                Self::publish_amqp(channel, destination, payload).await
            }
        }
    }

    async fn publish_amqp(
        channel: &Channel,
        destination: &Destination,
        payload: &[u8],
    ) -> Result<()> {
        // Non-persistent delivery: a message nobody is listening for is lost
        let properties = BasicProperties::default()
            .with_delivery_mode(1)
            .with_content_type("text/plain".into());

        let (exchange, routing_key) = match destination.kind() {
            DestinationKind::Topic => {
                channel
                    .exchange_declare(
                        destination.name(),
                        ExchangeKind::Fanout,
                        ExchangeDeclareOptions {
                            durable: false,
                            auto_delete: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| BrokerError::Publish(format!("Exchange declare failed: {}", e)))?;
                (destination.name(), "")
            }
            DestinationKind::Queue => {
                channel
                    .queue_declare(
                        destination.name(),
                        QueueDeclareOptions {
                            durable: false,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| BrokerError::Publish(format!("Queue declare failed: {}", e)))?;
                ("", destination.name())
            }
        };

        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish(format!("Publish failed: {}", e)))?
            .await
            .map_err(|e| BrokerError::Publish(format!("Publish confirm failed: {}", e)))?;

        Ok(())
    }

    /// Register `handler` for `destination` on a dedicated delivery task.
    pub(crate) async fn subscribe(
        &self,
        destination: &Destination,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }

        let guard = self.transport.read().await;
        let transport = guard.as_ref().ok_or(BrokerError::Closed)?;

        match transport {
            Transport::InProcess(broker) => {
                self.subscribe_inproc(broker.clone(), destination, handler)
            }
            Transport::Amqp { channel, .. } => {
                self.subscribe_amqp(channel, destination, handler).await
            }
        }
    }

    fn subscribe_inproc(
        &self,
        broker: Arc<InProcessBroker>,
        destination: &Destination,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let mut shutdown_rx = self.shutdown.subscribe();

        match destination.kind() {
            DestinationKind::Topic => {
                let mut rx = broker.subscribe_topic(destination.name());
                let name = destination.name().to_string();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            received = rx.recv() => match received {
                                Ok(bytes) => handler.on_message(InboundMessage::new(bytes)).await,
                                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                    warn!(topic = %name, skipped, "Topic subscriber lagging, messages dropped");
                                }
                                Err(broadcast::error::RecvError::Closed) => break,
                            }
                        }
                    }
                });
            }
            DestinationKind::Queue => {
                let rx = broker.subscribe_queue(destination.name());
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => break,
                            received = async { rx.lock().await.recv().await } => match received {
                                Some(bytes) => handler.on_message(InboundMessage::new(bytes)).await,
                                None => break,
                            }
                        }
                    }
                });
            }
        }

        Ok(())
    }

    async fn subscribe_amqp(
        &self,
        channel: &Channel,
        destination: &Destination,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let queue_name = match destination.kind() {
            DestinationKind::Queue => {
                channel
                    .queue_declare(
                        destination.name(),
                        QueueDeclareOptions {
                            durable: false,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| BrokerError::Subscribe(format!("Queue declare failed: {}", e)))?;
                destination.name().to_string()
            }
            DestinationKind::Topic => {
                // Broadcast: fanout exchange plus a private queue per subscriber
                channel
                    .exchange_declare(
                        destination.name(),
                        ExchangeKind::Fanout,
                        ExchangeDeclareOptions {
                            durable: false,
                            auto_delete: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        BrokerError::Subscribe(format!("Exchange declare failed: {}", e))
                    })?;

                let queue = channel
                    .queue_declare(
                        "",
                        QueueDeclareOptions {
                            exclusive: true,
                            auto_delete: true,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| BrokerError::Subscribe(format!("Queue declare failed: {}", e)))?;

                channel
                    .queue_bind(
                        queue.name().as_str(),
                        destination.name(),
                        "",
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| BrokerError::Subscribe(format!("Queue bind failed: {}", e)))?;

                queue.name().as_str().to_string()
            }
        };

        // Auto-ack: at-most-once is the accepted consistency level
        let mut consumer = channel
            .basic_consume(
                &queue_name,
                &format!("gp-{}", uuid::Uuid::new_v4()),
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Subscribe(format!("Consumer registration failed: {}", e)))?;

        let mut shutdown_rx = self.shutdown.subscribe();
        let name = destination.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    delivery = consumer.next() => match delivery {
                        Some(Ok(delivery)) => {
                            handler.on_message(InboundMessage::new(delivery.data)).await;
                        }
                        Some(Err(e)) => {
                            error!(destination = %name, error = %e, "Broker delivery stream error");
                            break;
                        }
                        None => break,
                    }
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_transitions() {
        let connection = BrokerConnection::new(LOCAL_BROKER_URI);
        assert_eq!(connection.state(), ConnectionState::Disconnected);

        connection.open().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);

        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_no_reopen_after_close() {
        let connection = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
        connection.close().await;
        assert!(matches!(
            connection.open().await,
            Err(BrokerError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_publish_after_close_fails_cleanly() {
        let connection = BrokerConnection::connect(LOCAL_BROKER_URI).await.unwrap();
        connection.close().await;
        let result = connection
            .publish(&Destination::topic("closed-topic"), b"late")
            .await;
        assert!(matches!(result, Err(BrokerError::Closed)));
    }
}
