//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError, ProbeTargetConfig};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "gridpulse.toml",
    "config.toml",
    "./config/gridpulse.toml",
    "/etc/gridpulse/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("GRIDPULSE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // Broker
        if let Ok(val) = env::var("GRIDPULSE_BROKER_URI") {
            config.broker.uri = val;
        }

        // Stage service
        if let Ok(val) = env::var("GRIDPULSE_STAGE_PORT") {
            if let Ok(port) = val.parse() {
                config.stage_service.port = port;
            }
        }
        if let Ok(val) = env::var("GRIDPULSE_INITIAL_STAGE") {
            if let Ok(stage) = val.parse() {
                config.stage_service.initial_stage = stage;
            }
        }

        // Web service
        if let Ok(val) = env::var("GRIDPULSE_WEB_PORT") {
            if let Ok(port) = val.parse() {
                config.web_service.port = port;
            }
        }
        if let Ok(val) = env::var("GRIDPULSE_STAGE_URL") {
            config.web_service.stage_url = val;
        }

        // Health monitoring
        if let Ok(val) = env::var("GRIDPULSE_HEALTH_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.health.check_interval_secs = secs;
            }
        }
        if let Ok(val) = env::var("GRIDPULSE_HEALTH_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.health.probe_timeout_secs = secs;
            }
        }
        // GRIDPULSE_HEALTH_TARGETS=places=http://host:7000/ping,schedule=http://host:7002/ping
        if let Ok(val) = env::var("GRIDPULSE_HEALTH_TARGETS") {
            let targets: Vec<ProbeTargetConfig> = val
                .split(',')
                .filter_map(|entry| {
                    let (name, url) = entry.split_once('=')?;
                    Some(ProbeTargetConfig {
                        name: name.trim().to_string(),
                        url: url.trim().to_string(),
                    })
                })
                .collect();
            if !targets.is_empty() {
                config.health.targets = targets;
            }
        }

        // Alerts
        if let Ok(val) = env::var("GRIDPULSE_ALERT_BACKENDS") {
            config.alerts.backends = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = env::var("GRIDPULSE_NTFY_TOPIC") {
            config.alerts.ntfy_topic = val;
        }
        if let Ok(val) = env::var("GRIDPULSE_NTFY_BASE_URL") {
            config.alerts.ntfy_base_url = val;
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
