//! Helper functions for integration tests

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use vigil::actors::engine::EngineHandle;
use vigil::actors::health::HealthHandle;
use vigil::actors::messages::{AlertEvent, HealthChangeEvent};
use vigil::config::{EngineConfig, PollerConfig, ServiceConfig};
use vigil::metrics::MetricsAggregator;
use vigil::notify::{ChannelConfig, Dispatcher};
use vigil::registry::Registry;
use vigil::store::InMemoryAlertStore;
use vigil::{AlertSeverity, ComparisonOp, RuleCondition, RuleDefinition};

/// Long enough that periodic ticks never interfere with a driven test
pub const QUIET_INTERVAL_SECS: u64 = 3600;

/// A wired-up core driven manually through `poll_all`/`evaluate_now`
pub struct TestCore {
    pub registry: Arc<Registry>,
    pub metrics: Arc<MetricsAggregator>,
    pub health: HealthHandle,
    pub engine: EngineHandle,
    pub alert_tx: broadcast::Sender<AlertEvent>,
    pub health_tx: broadcast::Sender<HealthChangeEvent>,
}

impl TestCore {
    pub async fn shutdown(self) {
        self.engine.shutdown().await;
        self.health.shutdown().await;
    }
}

pub fn spawn_core(
    services: Vec<ServiceConfig>,
    rules: Vec<RuleDefinition>,
    channels: Vec<(String, ChannelConfig)>,
) -> TestCore {
    let (alert_tx, _) = broadcast::channel(64);
    let (health_tx, _) = broadcast::channel(64);

    let registry = Arc::new(
        Registry::from_config(rules, channels.into_iter().collect::<HashMap<_, _>>())
            .expect("valid test rules"),
    );
    let metrics = Arc::new(MetricsAggregator::new());

    let health = HealthHandle::spawn(
        services,
        PollerConfig {
            interval_secs: QUIET_INTERVAL_SECS,
        },
        health_tx.clone(),
    );

    let engine = EngineHandle::spawn(
        registry.clone(),
        metrics.clone(),
        health.clone(),
        Box::new(InMemoryAlertStore::new()),
        Arc::new(Dispatcher::new()),
        EngineConfig {
            interval_secs: QUIET_INTERVAL_SECS,
        },
        alert_tx.clone(),
    );

    TestCore {
        registry,
        metrics,
        health,
        engine,
        alert_tx,
        health_tx,
    }
}

pub fn service_config(name: &str, base_url: &str) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        base_url: base_url.to_string(),
        health_path: "/health".to_string(),
        timeout_secs: 2,
        poll_interval_secs: None,
    }
}

pub fn threshold_rule(
    id: &str,
    metric: &str,
    operator: ComparisonOp,
    threshold: f64,
) -> RuleDefinition {
    RuleDefinition {
        id: Some(id.to_string()),
        name: format!("Test rule {id}"),
        description: None,
        metric: metric.to_string(),
        condition: RuleCondition {
            operator,
            threshold,
            sustained_secs: 0,
        },
        severity: AlertSeverity::High,
        enabled: true,
        channels: vec![],
        silence_secs: 0,
        max_notifications: 0,
        fingerprint_labels: vec![],
    }
}

/// A localhost URL nothing is listening on (connection refused)
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}
