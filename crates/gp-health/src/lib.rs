//! Health monitoring with edge-triggered alerting.
//!
//! A [`HealthMonitor`] probes each configured dependency on a fixed cadence.
//! Alerting is edge-triggered to avoid alert storms: exactly one alert fires
//! on an up-to-down transition, a recovery is only logged, and repeated probes
//! in the same state produce nothing beyond routine diagnostics. Probe and
//! publish failures never terminate the monitoring loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use gp_broker::{Destination, Publisher, ALERT_QUEUE};

/// Sink for outbound alerts. The queue-backed implementation is
/// [`QueueAlertPublisher`]; tests substitute a recording one.
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish_alert(&self, text: &str) -> gp_broker::Result<()>;
}

/// Publishes alerts onto the `alert` queue.
pub struct QueueAlertPublisher {
    publisher: Publisher,
}

impl QueueAlertPublisher {
    pub fn new(broker_uri: impl Into<String>) -> Self {
        Self {
            publisher: Publisher::new(broker_uri, Destination::queue(ALERT_QUEUE)),
        }
    }
}

#[async_trait]
impl AlertPublisher for QueueAlertPublisher {
    async fn publish_alert(&self, text: &str) -> gp_broker::Result<()> {
        self.publisher.send(text).await
    }
}

/// One dependency to probe: a cheap, idempotent HTTP endpoint whose
/// reachability is all that matters; status and body are ignored.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub name: String,
    pub url: String,
}

impl ProbeTarget {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Configuration for health monitoring
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Name of the owning service, used as the alert text prefix
    pub service_name: String,
    /// Probe interval
    pub check_interval: Duration,
    /// Per-probe HTTP timeout
    pub probe_timeout: Duration,
    /// Dependencies to probe
    pub targets: Vec<ProbeTarget>,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            service_name: "service".to_string(),
            check_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            targets: Vec::new(),
        }
    }
}

/// Availability of one monitored dependency. Written only by the probe loop.
struct TargetState {
    available: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Transition {
    None,
    WentDown,
    Recovered,
}

/// Edge-triggered dependency monitor.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    client: reqwest::Client,
    alerts: Arc<dyn AlertPublisher>,
    states: parking_lot::Mutex<HashMap<String, TargetState>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig, alerts: Arc<dyn AlertPublisher>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            client,
            alerts,
            states: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Current availability of a target. Optimistic default: a target is
    /// assumed up until a probe proves otherwise.
    pub fn is_available(&self, name: &str) -> bool {
        self.states
            .lock()
            .get(name)
            .map(|s| s.available)
            .unwrap_or(true)
    }

    /// A probe succeeds iff the request completes without a transport error;
    /// the response status and body are irrelevant to the health decision.
    async fn probe(&self, target: &ProbeTarget) -> bool {
        self.client.get(&target.url).send().await.is_ok()
    }

    fn record_probe(&self, name: &str, up: bool) -> Transition {
        let mut states = self.states.lock();
        let state = states
            .entry(name.to_string())
            .or_insert(TargetState { available: true });

        match (state.available, up) {
            (true, false) => {
                state.available = false;
                Transition::WentDown
            }
            (false, true) => {
                state.available = true;
                Transition::Recovered
            }
            _ => Transition::None,
        }
    }

    async fn handle_probe_result(&self, target: &ProbeTarget, up: bool) {
        match self.record_probe(&target.name, up) {
            Transition::WentDown => {
                warn!(target = %target.name, url = %target.url, "Dependency appears down");
                let text = format!(
                    "{}: Unable to contact {} service at {}",
                    self.config.service_name, target.name, target.url
                );
                if let Err(e) = self.alerts.publish_alert(&text).await {
                    // Logged, never propagated: the loop must survive a
                    // broker outage too
                    error!(target = %target.name, error = %e, "Failed to publish alert");
                }
            }
            Transition::Recovered => {
                info!(target = %target.name, url = %target.url, "Dependency has recovered");
            }
            Transition::None => {
                debug!(target = %target.name, up, "Probe state unchanged");
            }
        }
    }

    async fn check_target(&self, target: &ProbeTarget) {
        let up = self.probe(target).await;
        self.handle_probe_result(target, up).await;
    }

    /// Probe every configured target once.
    pub async fn run_once(&self) {
        for target in &self.config.targets {
            self.check_target(target).await;
        }
    }

    /// Probe loop: an immediate sweep to establish the baseline, then one
    /// sweep per interval until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        self.run_once().await;

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Health monitor shutting down");
                    break;
                }
            }
        }
    }
}

/// Spawn the probe loop as a background task.
pub fn spawn_health_monitor(
    monitor: Arc<HealthMonitor>,
    shutdown_tx: broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(monitor.run(shutdown_rx))
}
