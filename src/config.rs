use std::collections::HashMap;
use std::time::Duration;

use tracing::trace;

use crate::RuleDefinition;
use crate::notify::ChannelConfig;

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    /// Services to poll for health
    #[serde(default)]
    pub services: Vec<ServiceConfig>,

    /// Alert rules installed at startup
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,

    /// Notification channels, keyed by channel id
    #[serde(default)]
    pub channels: HashMap<String, ChannelConfig>,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub collector: CollectorConfig,
}

/// A service to be health-checked
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServiceConfig {
    /// Unique service name
    pub name: String,

    /// Base URL, e.g. `http://localhost:3002`
    pub base_url: String,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    /// Per-probe timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,

    /// Per-service poll interval. Defaults to the poller base interval.
    pub poll_interval_secs: Option<u64>,
}

impl ServiceConfig {
    /// Resolve into the poller's runtime representation.
    pub fn resolve(&self, default_interval: Duration) -> MonitoredService {
        MonitoredService {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            health_path: self.health_path.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            poll_interval: self
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(default_interval),
        }
    }
}

/// Resolved service entry as held by the health poller
#[derive(Debug, Clone, serde::Serialize)]
pub struct MonitoredService {
    pub name: String,
    pub base_url: String,
    pub health_path: String,
    #[serde(serialize_with = "serialize_secs")]
    pub timeout: Duration,
    #[serde(serialize_with = "serialize_secs")]
    pub poll_interval: Duration,
}

impl MonitoredService {
    pub fn probe_url(&self) -> String {
        format!("{}{}", self.base_url, self.health_path)
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PollerConfig {
    /// Base poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EngineConfig {
    /// Rule evaluation interval in seconds
    #[serde(default = "default_eval_interval")]
    pub interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_eval_interval(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_metrics_push")]
    pub metrics_interval_secs: u64,

    #[serde(default = "default_alerts_push")]
    pub alerts_interval_secs: u64,

    #[serde(default = "default_health_push")]
    pub health_interval_secs: u64,

    /// Clients idle for longer than this are disconnected
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,

    /// How often the inactivity sweep runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            metrics_interval_secs: default_metrics_push(),
            alerts_interval_secs: default_alerts_push(),
            health_interval_secs: default_health_push(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CollectorConfig {
    /// Whether the host metrics collector runs at all
    #[serde(default = "default_collector_enabled")]
    pub enabled: bool,

    /// Sampling interval in seconds
    #[serde(default = "default_collector_interval")]
    pub interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            enabled: default_collector_enabled(),
            interval_secs: default_collector_interval(),
        }
    }
}

fn default_health_path() -> String {
    String::from("/health")
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    30
}

fn default_eval_interval() -> u64 {
    30
}

fn default_metrics_push() -> u64 {
    5
}

fn default_alerts_push() -> u64 {
    10
}

fn default_health_push() -> u64 {
    30
}

fn default_inactivity_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    120
}

fn default_collector_enabled() -> bool {
    true
}

fn default_collector_interval() -> u64 {
    15
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
