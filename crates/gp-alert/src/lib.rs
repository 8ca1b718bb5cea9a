//! Alert delivery - fan-out of alert messages to delivery backends
//!
//! Provides:
//! - `DeliveryBackend` trait for pluggable alert channels
//! - Console and ntfy.sh backends
//! - `BackendRegistry` built from configuration, console by default
//! - `AlertFanout` message handler that delivers each alert to every backend

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use gp_broker::{InboundMessage, MessageHandler};
use gp_config::AlertConfig;

/// Placeholder text delivered when an alert body is not valid UTF-8.
const MALFORMED_ALERT_TEXT: &str = "received malformed alert";

/// Delivery failure for a single backend.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("HTTP delivery failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// A single alert delivery channel.
#[async_trait]
pub trait DeliveryBackend: Send + Sync {
    /// Backend identifier, as used in configuration.
    fn name(&self) -> &str;

    /// Deliver one alert. Errors are isolated per backend by the caller.
    async fn deliver(&self, text: &str) -> Result<(), DeliveryError>;
}

/// Writes alerts to standard output. Always available, never fails.
pub struct ConsoleBackend;

#[async_trait]
impl DeliveryBackend for ConsoleBackend {
    fn name(&self) -> &str {
        "console"
    }

    async fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        println!("ALERT: {}", text);
        Ok(())
    }
}

/// Pushes alerts to a ntfy.sh topic via HTTP POST.
pub struct NtfyBackend {
    client: reqwest::Client,
    url: String,
}

impl NtfyBackend {
    pub fn new(base_url: &str, topic: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: format!("{}/{}", base_url.trim_end_matches('/'), topic),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DeliveryBackend for NtfyBackend {
    fn name(&self) -> &str {
        "ntfy"
    }

    async fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .header("Priority", "high")
            .body(text.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DeliveryError::Rejected(format!(
                "ntfy returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// The installed set of delivery backends.
pub struct BackendRegistry {
    backends: Vec<Arc<dyn DeliveryBackend>>,
}

impl BackendRegistry {
    /// Build the registry from configuration. Unknown backend names are
    /// skipped with a warning; an empty result falls back to the console
    /// backend so alerts are never silently dropped.
    pub fn from_config(config: &AlertConfig) -> Self {
        let mut backends: Vec<Arc<dyn DeliveryBackend>> = Vec::new();
        for name in &config.backends {
            match name.as_str() {
                "console" => backends.push(Arc::new(ConsoleBackend)),
                "ntfy" => backends.push(Arc::new(NtfyBackend::new(
                    &config.ntfy_base_url,
                    &config.ntfy_topic,
                ))),
                other => {
                    warn!(backend = %other, "Unknown alert backend, skipping");
                }
            }
        }
        if backends.is_empty() {
            info!("No alert backends configured, using console");
            backends.push(Arc::new(ConsoleBackend));
        }
        Self { backends }
    }

    pub fn with_backends(backends: Vec<Arc<dyn DeliveryBackend>>) -> Self {
        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

/// Delivers each inbound alert to every installed backend. A failing
/// backend is logged and skipped; the rest still receive the alert.
pub struct AlertFanout {
    registry: BackendRegistry,
}

impl AlertFanout {
    pub fn new(registry: BackendRegistry) -> Self {
        info!(backends = ?registry.backend_names(), "AlertFanout initialized");
        Self { registry }
    }

    pub async fn deliver_all(&self, text: &str) {
        for backend in &self.registry.backends {
            if let Err(e) = backend.deliver(text).await {
                error!(backend = %backend.name(), error = %e, "Alert delivery failed");
            }
        }
    }
}

#[async_trait]
impl MessageHandler for AlertFanout {
    async fn on_message(&self, message: InboundMessage) {
        let text = match message.text() {
            Some(t) => t.to_string(),
            None => {
                warn!("Alert body is not valid UTF-8");
                MALFORMED_ALERT_TEXT.to_string()
            }
        };
        self.deliver_all(&text).await;
    }
}
