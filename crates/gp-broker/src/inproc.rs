//! Process-local in-memory broker.
//!
//! Stands in for the network broker in tests and standalone runs; selected by
//! the [`crate::LOCAL_BROKER_URI`] sentinel or reached through the connection
//! fallback path. One broker instance is shared by the whole process so that
//! publishers and subscribers in the same process see each other, the same way
//! an in-VM broker would.
//!
//! Topics are broadcast channels (every active subscriber gets a copy; a
//! publish with zero subscribers is lost). Queues are mpsc channels with a
//! shared receiver, so competing consumers each take distinct messages.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::destination::{Destination, DestinationKind};

/// Buffered messages per topic before the slowest subscriber starts lagging.
const TOPIC_BUFFER: usize = 256;

pub(crate) struct InProcessBroker {
    topics: DashMap<String, broadcast::Sender<Vec<u8>>>,
    queues: DashMap<String, QueueChannel>,
}

#[derive(Clone)]
struct QueueChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

static LOCAL_BROKER: OnceLock<Arc<InProcessBroker>> = OnceLock::new();

impl InProcessBroker {
    /// The process-wide broker instance.
    pub(crate) fn shared() -> Arc<InProcessBroker> {
        LOCAL_BROKER
            .get_or_init(|| {
                Arc::new(InProcessBroker {
                    topics: DashMap::new(),
                    queues: DashMap::new(),
                })
            })
            .clone()
    }

    fn topic_sender(&self, name: &str) -> broadcast::Sender<Vec<u8>> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
            .clone()
    }

    fn queue_channel(&self, name: &str) -> QueueChannel {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                QueueChannel {
                    tx,
                    rx: Arc::new(Mutex::new(rx)),
                }
            })
            .clone()
    }

    pub(crate) fn publish(&self, destination: &Destination, payload: Vec<u8>) {
        match destination.kind() {
            DestinationKind::Topic => {
                // A send error means no active subscribers; the message is lost
                let _ = self.topic_sender(destination.name()).send(payload);
            }
            DestinationKind::Queue => {
                let _ = self.queue_channel(destination.name()).tx.send(payload);
            }
        }
    }

    pub(crate) fn subscribe_topic(&self, name: &str) -> broadcast::Receiver<Vec<u8>> {
        self.topic_sender(name).subscribe()
    }

    pub(crate) fn subscribe_queue(
        &self,
        name: &str,
    ) -> Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>> {
        self.queue_channel(name).rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topic_publish_without_subscribers_is_lost() {
        let broker = InProcessBroker::shared();
        let dest = Destination::topic("inproc-lost-topic");
        broker.publish(&dest, b"dropped".to_vec());

        // A subscriber registered afterwards sees nothing
        let mut rx = broker.subscribe_topic(dest.name());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_queue_buffers_until_consumed() {
        let broker = InProcessBroker::shared();
        let dest = Destination::queue("inproc-buffered-queue");
        broker.publish(&dest, b"one".to_vec());

        let rx = broker.subscribe_queue(dest.name());
        let msg = rx.lock().await.recv().await.unwrap();
        assert_eq!(msg, b"one");
    }
}
