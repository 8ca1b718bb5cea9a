//! Stage-change event distribution.
//!
//! The stage-owning service pushes [`StageEvent`]s through a
//! [`StageBroadcaster`]; every interested service runs a [`StageObserver`]
//! that keeps a [`CurrentStage`] cache fresh. The cache is the only shared
//! state crossing the broker-delivery boundary: the observer callback is its
//! single writer, request handlers only read.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use gp_common::StageEvent;

use crate::connection::BrokerConnection;
use crate::destination::Destination;
use crate::publisher::Publisher;
use crate::subscriber::{InboundMessage, MessageHandler, Subscriber};
use crate::{Result, STAGE_TOPIC};

/// Locally cached load-shedding stage.
///
/// `None` until a stage has been learned, from the broker or an initial fetch.
/// Readers may observe a stale value, never a partially written one.
pub struct CurrentStage {
    inner: parking_lot::RwLock<Option<u32>>,
}

impl CurrentStage {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::RwLock::new(None),
        }
    }

    pub fn with_initial(stage: u32) -> Self {
        Self {
            inner: parking_lot::RwLock::new(Some(stage)),
        }
    }

    pub fn get(&self) -> Option<u32> {
        *self.inner.read()
    }

    pub fn set(&self, stage: u32) {
        *self.inner.write() = Some(stage);
    }
}

impl Default for CurrentStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side: publishes stage changes on the `stage` topic.
pub struct StageBroadcaster {
    publisher: Publisher,
}

impl StageBroadcaster {
    pub fn new(broker_uri: impl Into<String>) -> Self {
        Self {
            publisher: Publisher::new(broker_uri, Destination::topic(STAGE_TOPIC)),
        }
    }

    pub fn with_connection(connection: Arc<BrokerConnection>) -> Self {
        Self {
            publisher: Publisher::with_connection(connection, Destination::topic(STAGE_TOPIC)),
        }
    }

    pub async fn broadcast(&self, stage: u32) -> Result<()> {
        self.publisher.send(&StageEvent::new(stage).to_json()).await?;
        info!(stage, "Stage change broadcast");
        Ok(())
    }

    pub async fn close(&self) {
        self.publisher.close().await;
    }
}

/// Consumer side: updates a [`CurrentStage`] from inbound stage events.
pub struct StageObserver {
    cache: Arc<CurrentStage>,
}

impl StageObserver {
    pub fn new(cache: Arc<CurrentStage>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl MessageHandler for StageObserver {
    async fn on_message(&self, message: InboundMessage) {
        let Some(text) = message.text() else {
            warn!("Ignoring non-text stage message");
            return;
        };
        match StageEvent::from_json(text) {
            Ok(event) => {
                self.cache.set(event.stage);
                info!(stage = event.stage, "Stage updated from broker");
            }
            Err(e) => {
                warn!(error = %e, payload = %text, "Ignoring unparseable stage event");
            }
        }
    }
}

/// Subscribe a [`StageObserver`] over `cache` on the `stage` topic.
pub async fn observe_stage(
    connection: Arc<BrokerConnection>,
    cache: Arc<CurrentStage>,
) -> Result<()> {
    Subscriber::new(connection)
        .subscribe_topic(
            &Destination::topic(STAGE_TOPIC),
            Arc::new(StageObserver::new(cache)),
        )
        .await
}
