//! Asynchronous message consumption.
//!
//! A [`Subscriber`] registers a [`MessageHandler`] against a destination;
//! the handler runs on an implementation-chosen delivery task, concurrently
//! with the rest of the process. Registration is fire-and-forget. The only
//! ordering guarantee is per publisher/subscriber pair FIFO; nothing is
//! ordered across different publishers or different subscribers.

use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::BrokerConnection;
use crate::destination::{Destination, DestinationKind};
use crate::{BrokerError, Result};

/// A raw inbound broker message.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    body: Vec<u8>,
}

impl InboundMessage {
    pub fn new(body: Vec<u8>) -> Self {
        Self { body }
    }

    /// The payload as UTF-8 text, or `None` for a malformed (non-text) body.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }
}

/// Handler invoked once per inbound message on a delivery task.
///
/// Handlers may publish from inside `on_message`; that never deadlocks against
/// the connection that delivered the message. Handlers should not block the
/// delivery task for unbounded time.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: InboundMessage);
}

/// Registers message handlers on a [`BrokerConnection`].
pub struct Subscriber {
    connection: Arc<BrokerConnection>,
}

impl Subscriber {
    pub fn new(connection: Arc<BrokerConnection>) -> Self {
        Self { connection }
    }

    /// Subscribe to a broadcast topic. A queue-kind destination is rejected
    /// immediately with [`BrokerError::KindMismatch`], before any broker I/O.
    pub async fn subscribe_topic(
        &self,
        destination: &Destination,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        Self::check_kind(destination, DestinationKind::Topic)?;
        self.connection.subscribe(destination, handler).await
    }

    /// Subscribe to a point-to-point queue. A topic-kind destination is
    /// rejected immediately with [`BrokerError::KindMismatch`].
    pub async fn subscribe_queue(
        &self,
        destination: &Destination,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        Self::check_kind(destination, DestinationKind::Queue)?;
        self.connection.subscribe(destination, handler).await
    }

    fn check_kind(destination: &Destination, expected: DestinationKind) -> Result<()> {
        if destination.kind() != expected {
            return Err(BrokerError::KindMismatch {
                name: destination.name().to_string(),
                expected,
                actual: destination.kind(),
            });
        }
        Ok(())
    }
}
