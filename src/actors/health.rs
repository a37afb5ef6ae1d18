//! HealthPollerActor - Polls service health endpoints
//!
//! Owns the registered service set and the latest probe result per
//! service.
//!
//! ## Key Properties
//!
//! 1. **Concurrent fan-out** - every due service is probed in one
//!    `join_all`, each request bounded by its own timeout, so a slow or
//!    failing probe never delays or fails its siblings
//! 2. **Recovered failures** - network errors are classified and recorded
//!    on the result, never surfaced as errors to `poll_all` callers
//! 3. **Race-free removal** - service add/remove are commands into the
//!    same loop that folds results in; a result arriving for a service
//!    that is no longer registered is discarded
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → concurrent probes → fold latest results → flip? publish HealthChangeEvent
//!     ↑
//!     └─── Commands (PollAll, PollOne, AddService, RemoveService, GetSnapshot, ...)
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant as TokioInstant, interval_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::config::{MonitoredService, PollerConfig, ServiceConfig};
use crate::error::{MonitorError, ProbeErrorKind};

use super::messages::{
    HealthChangeEvent, HealthCheckResult, HealthCommand, HealthStatistics, SystemHealthSnapshot,
    SystemStatus,
};

/// Actor that polls every registered service for health
pub struct HealthPollerActor {
    /// Registered services by name
    services: HashMap<String, MonitoredService>,

    /// Latest probe result per service
    latest: HashMap<String, HealthCheckResult>,

    /// Last poll instant per service, for per-service intervals
    last_polled: HashMap<String, Instant>,

    /// HTTP client (reused across probes; per-request timeouts)
    client: reqwest::Client,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<HealthCommand>,

    /// Broadcast sender for health flip events
    event_tx: broadcast::Sender<HealthChangeEvent>,

    /// Base tick interval
    base_interval: Duration,
}

impl HealthPollerActor {
    pub fn new(
        services: Vec<ServiceConfig>,
        config: PollerConfig,
        command_rx: mpsc::Receiver<HealthCommand>,
        event_tx: broadcast::Sender<HealthChangeEvent>,
    ) -> Self {
        let base_interval = Duration::from_secs(config.interval_secs);

        let services = services
            .iter()
            .map(|s| (s.name.clone(), s.resolve(base_interval)))
            .collect();

        Self {
            services,
            latest: HashMap::new(),
            last_polled: HashMap::new(),
            client: reqwest::Client::new(),
            command_rx,
            event_tx,
            base_interval,
        }
    }

    /// Run the actor's main loop until shutdown
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting health poller with {} services, base interval {:?}",
            self.services.len(),
            self.base_interval
        );

        // one immediate check before any command is served, then ticks at
        // the base interval
        self.poll_due().await;
        let mut ticker = interval_at(
            TokioInstant::now() + self.base_interval,
            self.base_interval,
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_due().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    if self.handle_command(cmd).await {
                        break;
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("health poller stopped");
    }

    /// Returns true when the actor should shut down
    async fn handle_command(&mut self, cmd: HealthCommand) -> bool {
        match cmd {
            HealthCommand::PollAll { respond_to } => {
                let targets: Vec<MonitoredService> = self.services.values().cloned().collect();
                self.poll_targets(targets).await;
                let _ = respond_to.send(self.snapshot());
            }

            HealthCommand::PollOne { name, respond_to } => {
                let result = match self.services.get(&name).cloned() {
                    Some(service) => {
                        let result = probe(&self.client, &service).await;
                        self.fold_in(result.clone());
                        self.last_polled.insert(name, Instant::now());
                        Ok(result)
                    }
                    None => Err(MonitorError::NotFound(format!("service '{name}'"))),
                };
                let _ = respond_to.send(result);
            }

            HealthCommand::AddService { config } => {
                let service = config.resolve(self.base_interval);
                let known = self.services.contains_key(&service.name);
                debug!(
                    "{} service '{}' ({})",
                    if known { "updated" } else { "added" },
                    service.name,
                    service.probe_url()
                );
                self.services.insert(service.name.clone(), service);
            }

            HealthCommand::RemoveService { name, respond_to } => {
                let removed = self.services.remove(&name).is_some();
                if removed {
                    // drop the latest slot too; an in-flight probe result
                    // for this service will be discarded on fold-in
                    self.latest.remove(&name);
                    self.last_polled.remove(&name);
                    debug!("removed service '{name}' from health checks");
                }
                let _ = respond_to.send(removed);
            }

            HealthCommand::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            HealthCommand::ListServices { respond_to } => {
                let mut services: Vec<MonitoredService> =
                    self.services.values().cloned().collect();
                services.sort_by(|a, b| a.name.cmp(&b.name));
                let _ = respond_to.send(services);
            }

            HealthCommand::GetStatistics { respond_to } => {
                let _ = respond_to.send(self.statistics());
            }

            HealthCommand::Shutdown => {
                debug!("received shutdown command");
                return true;
            }
        }

        false
    }

    /// Probe every service whose own interval has elapsed
    async fn poll_due(&mut self) {
        let now = Instant::now();
        let due: Vec<MonitoredService> = self
            .services
            .values()
            .filter(|s| {
                self.last_polled
                    .get(&s.name)
                    .is_none_or(|t| now.duration_since(*t) >= s.poll_interval)
            })
            .cloned()
            .collect();

        if !due.is_empty() {
            self.poll_targets(due).await;
        }
    }

    /// Fan out probes for the given targets and fold the results in
    async fn poll_targets(&mut self, targets: Vec<MonitoredService>) {
        if targets.is_empty() {
            return;
        }

        trace!("probing {} services", targets.len());

        let client = self.client.clone();
        let results = join_all(targets.iter().map(|s| probe(&client, s))).await;

        let now = Instant::now();
        for target in &targets {
            self.last_polled.insert(target.name.clone(), now);
        }

        let mut healthy = 0;
        let total = results.len();
        for result in results {
            if result.healthy {
                healthy += 1;
            }
            self.fold_in(result);
        }

        debug!("health check completed: {healthy}/{total} services healthy");
    }

    /// Store a probe result as the latest slot for its service.
    ///
    /// Results for services removed while the probe was in flight are
    /// discarded. Publishes a HealthChangeEvent when the healthy flag
    /// flips (or a service's first result is unhealthy).
    fn fold_in(&mut self, result: HealthCheckResult) {
        if !self.services.contains_key(&result.service_name) {
            trace!(
                "discarding result for removed service '{}'",
                result.service_name
            );
            return;
        }

        let previous = self
            .latest
            .get(&result.service_name)
            .map(|r| r.healthy);

        let flipped = match previous {
            Some(was_healthy) => was_healthy != result.healthy,
            None => !result.healthy,
        };

        if flipped {
            debug!(
                "service '{}' is now {}",
                result.service_name,
                if result.healthy { "healthy" } else { "unhealthy" }
            );
            let _ = self.event_tx.send(HealthChangeEvent {
                service_name: result.service_name.clone(),
                healthy: result.healthy,
                timestamp: result.timestamp,
            });
        }

        self.latest.insert(result.service_name.clone(), result);
    }

    fn snapshot(&self) -> SystemHealthSnapshot {
        compute_snapshot(&self.services, &self.latest)
    }

    fn statistics(&self) -> HealthStatistics {
        let results: Vec<&HealthCheckResult> = self.latest.values().collect();
        if results.is_empty() {
            return HealthStatistics::default();
        }

        let healthy: Vec<&&HealthCheckResult> = results.iter().filter(|r| r.healthy).collect();
        let response_times: Vec<u64> = healthy.iter().map(|r| r.response_time_ms).collect();

        HealthStatistics {
            average_response_time_ms: if response_times.is_empty() {
                0.0
            } else {
                response_times.iter().sum::<u64>() as f64 / response_times.len() as f64
            },
            min_response_time_ms: response_times.iter().copied().min().unwrap_or(0),
            max_response_time_ms: response_times.iter().copied().max().unwrap_or(0),
            success_rate: healthy.len() as f64 / results.len() as f64 * 100.0,
            total_checks: results.len(),
        }
    }
}

/// Issue one health probe, classifying any failure.
///
/// Never returns an error: failures are recorded on the result.
async fn probe(client: &reqwest::Client, service: &MonitoredService) -> HealthCheckResult {
    let url = service.probe_url();
    trace!("checking health of {url}");

    let start = Instant::now();
    let outcome = client
        .get(&url)
        .timeout(service.timeout)
        .header("User-Agent", "metrics-service-health-checker")
        .header("X-Service-Name", "metrics-service")
        .send()
        .await;
    let response_time_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(response) => {
            let status = response.status().as_u16();
            let healthy = (200..400).contains(&status);

            // body is opaque; passed through as details when parseable
            let details = if healthy {
                response.json::<serde_json::Value>().await.ok()
            } else {
                None
            };

            if !healthy {
                warn!("service '{}' returned status {status}", service.name);
            }

            HealthCheckResult {
                service_name: service.name.clone(),
                healthy,
                response_time_ms,
                status_code: Some(status),
                error: (!healthy).then(|| format!("unexpected status code: {status}")),
                error_kind: (!healthy).then_some(ProbeErrorKind::HttpError),
                details,
                timestamp: Utc::now(),
            }
        }

        Err(e) => {
            let kind = ProbeErrorKind::classify(&e);
            error!(
                "health check for '{}' failed ({}): {e}",
                service.name,
                kind.as_str()
            );

            HealthCheckResult {
                service_name: service.name.clone(),
                healthy: false,
                response_time_ms,
                status_code: e.status().map(|s| s.as_u16()),
                error: Some(e.to_string()),
                error_kind: Some(kind),
                details: None,
                timestamp: Utc::now(),
            }
        }
    }
}

/// Pure aggregation over the latest result per service.
///
/// Services without a result yet count as unhealthy. healthy iff no
/// unhealthy services, critical iff no healthy ones, degraded otherwise.
pub fn compute_snapshot(
    services: &HashMap<String, MonitoredService>,
    latest: &HashMap<String, HealthCheckResult>,
) -> SystemHealthSnapshot {
    let mut per_service = std::collections::BTreeMap::new();
    let mut healthy_services = 0;

    for name in services.keys() {
        let result = latest.get(name).cloned();
        if result.as_ref().is_some_and(|r| r.healthy) {
            healthy_services += 1;
        }
        per_service.insert(name.clone(), result);
    }

    let total_services = services.len();
    let unhealthy_services = total_services - healthy_services;

    let status = if unhealthy_services == 0 {
        SystemStatus::Healthy
    } else if healthy_services == 0 {
        SystemStatus::Critical
    } else {
        SystemStatus::Degraded
    };

    let health_percentage = if total_services > 0 {
        healthy_services as f64 / total_services as f64 * 100.0
    } else {
        0.0
    };

    SystemHealthSnapshot {
        status,
        total_services,
        healthy_services,
        unhealthy_services,
        health_percentage,
        services: per_service,
        timestamp: Utc::now(),
    }
}

/// Handle for controlling a HealthPollerActor
#[derive(Clone)]
pub struct HealthHandle {
    sender: mpsc::Sender<HealthCommand>,
}

impl HealthHandle {
    /// Spawn a new health poller actor
    pub fn spawn(
        services: Vec<ServiceConfig>,
        config: PollerConfig,
        event_tx: broadcast::Sender<HealthChangeEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = HealthPollerActor::new(services, config, cmd_rx, event_tx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Force-probe every service and return the recomputed snapshot
    pub async fn poll_all(&self) -> Result<SystemHealthSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::PollAll { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    /// Probe a single service immediately
    pub async fn poll_one(&self, name: impl Into<String>) -> Result<HealthCheckResult> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::PollOne {
                name: name.into(),
                respond_to: tx,
            })
            .await?;
        Ok(rx.await??)
    }

    /// Register or update a service
    pub async fn add_service(&self, config: ServiceConfig) -> Result<()> {
        self.sender
            .send(HealthCommand::AddService { config })
            .await?;
        Ok(())
    }

    /// Remove a service, returning whether it was registered
    pub async fn remove_service(&self, name: impl Into<String>) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::RemoveService {
                name: name.into(),
                respond_to: tx,
            })
            .await?;
        Ok(rx.await?)
    }

    /// Current snapshot without probing
    pub async fn snapshot(&self) -> Result<SystemHealthSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::GetSnapshot { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    pub async fn list_services(&self) -> Result<Vec<MonitoredService>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::ListServices { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    pub async fn statistics(&self) -> Result<HealthStatistics> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::GetStatistics { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    /// Shut down the poller
    pub async fn shutdown(&self) {
        let _ = self.sender.send(HealthCommand::Shutdown).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
