//! Text-payload publishing.

use std::sync::Arc;

use tracing::debug;

use crate::connection::BrokerConnection;
use crate::destination::Destination;
use crate::Result;

/// Sends text payloads to one destination.
///
/// A publisher is lazy: the first `send` establishes a [`BrokerConnection`]
/// with the usual fallback sequence if none was supplied. If the connection is
/// later closed, the next `send` makes a fresh one; a closed connection is
/// never reused. Delivery is non-persistent: a topic message published while
/// no subscriber is listening is lost, never replayed.
pub struct Publisher {
    broker_uri: String,
    destination: Destination,
    connection: tokio::sync::RwLock<Option<Arc<BrokerConnection>>>,
}

impl Publisher {
    pub fn new(broker_uri: impl Into<String>, destination: Destination) -> Self {
        Self {
            broker_uri: broker_uri.into(),
            destination,
            connection: tokio::sync::RwLock::new(None),
        }
    }

    /// Use an already-established connection instead of connecting lazily.
    pub fn with_connection(connection: Arc<BrokerConnection>, destination: Destination) -> Self {
        Self {
            broker_uri: String::new(),
            destination,
            connection: tokio::sync::RwLock::new(Some(connection)),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Send a text payload, auto-connecting on first use.
    pub async fn send(&self, payload: &str) -> Result<()> {
        let connection = self.ensure_connected().await?;
        connection
            .publish(&self.destination, payload.as_bytes())
            .await?;
        debug!(destination = %self.destination, payload = %payload, "Message sent");
        Ok(())
    }

    async fn ensure_connected(&self) -> Result<Arc<BrokerConnection>> {
        if let Some(connection) = self.connection.read().await.as_ref() {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
        }

        let mut slot = self.connection.write().await;
        // Re-check after taking the write lock; another caller may have won
        if let Some(connection) = slot.as_ref() {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
        }

        let connection = BrokerConnection::connect(&self.broker_uri).await?;
        *slot = Some(connection.clone());
        Ok(connection)
    }

    /// Close the underlying connection, if any. Idempotent.
    pub async fn close(&self) {
        if let Some(connection) = self.connection.write().await.take() {
            connection.close().await;
        }
    }
}
