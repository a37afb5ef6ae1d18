//! Runtime wiring
//!
//! Constructs the shared stores and spawns every actor once, handing the
//! caller explicit handles. Nothing here is process-global: multiple
//! independent runtimes can coexist (tests rely on this).

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::actors::collector::CollectorHandle;
use crate::actors::engine::EngineHandle;
use crate::actors::health::HealthHandle;
use crate::actors::hub::HubHandle;
use crate::actors::messages::{AlertEvent, HealthChangeEvent};
use crate::config::Config;
use crate::error::MonitorResult;
use crate::metrics::MetricsAggregator;
use crate::notify::Dispatcher;
use crate::registry::Registry;
use crate::store::InMemoryAlertStore;

/// Capacity of the discrete event channels
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A running monitoring core
pub struct Runtime {
    pub metrics: Arc<MetricsAggregator>,
    pub registry: Arc<Registry>,
    pub health: HealthHandle,
    pub engine: EngineHandle,
    pub hub: HubHandle,
    collector: Option<CollectorHandle>,

    /// Senders kept for late subscribers (e.g. a transport layer that
    /// wants raw events instead of hub envelopes)
    pub alert_events: broadcast::Sender<AlertEvent>,
    pub health_events: broadcast::Sender<HealthChangeEvent>,
}

impl Runtime {
    /// Wire up stores and spawn all actors from a configuration.
    pub fn start(config: Config) -> MonitorResult<Self> {
        let (alert_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (health_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let metrics = Arc::new(MetricsAggregator::new());
        let registry = Arc::new(Registry::from_config(config.rules, config.channels)?);

        let health = HealthHandle::spawn(config.services, config.poller, health_events.clone());

        let engine = EngineHandle::spawn(
            registry.clone(),
            metrics.clone(),
            health.clone(),
            Box::new(InMemoryAlertStore::new()),
            Arc::new(Dispatcher::new()),
            config.engine,
            alert_events.clone(),
        );

        let hub = HubHandle::spawn(
            metrics.clone(),
            health.clone(),
            engine.clone(),
            alert_events.subscribe(),
            health_events.subscribe(),
            config.hub,
        );

        let collector = config
            .collector
            .enabled
            .then(|| CollectorHandle::spawn(metrics.clone(), config.collector.clone()));

        info!("monitoring runtime started");

        Ok(Self {
            metrics,
            registry,
            health,
            engine,
            hub,
            collector,
            alert_events,
            health_events,
        })
    }

    /// Halt every periodic task.
    ///
    /// In-flight probes and dispatches complete or are abandoned; no
    /// partial state is left behind since all mutations pass through the
    /// actor loops being stopped.
    pub async fn shutdown(self) {
        info!("shutting down monitoring runtime");

        self.hub.shutdown().await;
        if let Some(collector) = &self.collector {
            collector.shutdown().await;
        }
        self.engine.shutdown().await;
        self.health.shutdown().await;
    }
}
