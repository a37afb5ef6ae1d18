//! BroadcastHubActor - Topic-based real-time fan-out
//!
//! Owns the per-client subscription state and pushes JSON envelopes to
//! connected clients. Clients register an unbounded sender; the
//! transport layer (WebSocket or otherwise) bridges it to the wire.
//!
//! ## Push Cadence
//!
//! - `metrics_update` every 5s, `alerts_update` every 10s,
//!   `health_update` every 30s, only to clients subscribed to the topic
//!   (or to `all`)
//! - discrete `alert:triggered` and `health:change` events forward
//!   immediately, independent of the periodic cadence
//! - one `initial_data` snapshot on connect, regardless of subscriptions
//!
//! Clients idle past the inactivity threshold are dropped by a periodic
//! sweep and their subscription state discarded.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::HubConfig;
use crate::metrics::{MetricCategory, MetricsAggregator};

use super::engine::EngineHandle;
use super::health::HealthHandle;
use super::messages::{
    AlertEvent, Envelope, HealthChangeEvent, HubCommand, HubStats, Topic,
};

/// Per-client connection state
struct ClientState {
    sender: mpsc::UnboundedSender<Envelope>,
    topics: HashSet<Topic>,
    connected_at: DateTime<Utc>,
    last_activity: Instant,
}

/// Actor that owns client subscriptions and pushes updates
pub struct BroadcastHubActor {
    clients: HashMap<String, ClientState>,

    command_rx: mpsc::Receiver<HubCommand>,

    /// New-alert events from the engine
    alert_rx: broadcast::Receiver<AlertEvent>,

    /// Health flip events from the poller
    health_rx: broadcast::Receiver<HealthChangeEvent>,

    metrics: Arc<MetricsAggregator>,
    health: HealthHandle,
    engine: EngineHandle,

    config: HubConfig,
}

impl BroadcastHubActor {
    pub fn new(
        metrics: Arc<MetricsAggregator>,
        health: HealthHandle,
        engine: EngineHandle,
        alert_rx: broadcast::Receiver<AlertEvent>,
        health_rx: broadcast::Receiver<HealthChangeEvent>,
        command_rx: mpsc::Receiver<HubCommand>,
        config: HubConfig,
    ) -> Self {
        Self {
            clients: HashMap::new(),
            command_rx,
            alert_rx,
            health_rx,
            metrics,
            health,
            engine,
            config,
        }
    }

    /// Run the actor's main loop until shutdown
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting broadcast hub");

        let mut metrics_ticker = interval(Duration::from_secs(self.config.metrics_interval_secs));
        let mut alerts_ticker = interval(Duration::from_secs(self.config.alerts_interval_secs));
        let mut health_ticker = interval(Duration::from_secs(self.config.health_interval_secs));
        let mut sweep_ticker = interval(Duration::from_secs(self.config.sweep_interval_secs));

        loop {
            tokio::select! {
                _ = metrics_ticker.tick() => {
                    self.push_metrics_update().await;
                }

                _ = alerts_ticker.tick() => {
                    self.push_alerts_update().await;
                }

                _ = health_ticker.tick() => {
                    self.push_health_update().await;
                }

                _ = sweep_ticker.tick() => {
                    self.sweep_inactive();
                }

                result = self.alert_rx.recv() => {
                    match result {
                        Ok(event) => self.push_alert_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("hub lagged, skipped {skipped} alert events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            trace!("alert event channel closed");
                        }
                    }
                }

                result = self.health_rx.recv() => {
                    match result {
                        Ok(event) => self.push_health_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("hub lagged, skipped {skipped} health events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            trace!("health event channel closed");
                        }
                    }
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

        debug!("broadcast hub stopped");
    }

    /// Returns true when the actor should shut down
    async fn handle_command(&mut self, cmd: HubCommand) -> bool {
        match cmd {
            HubCommand::Connect { client_id, sender } => {
                self.on_connect(client_id, sender).await;
            }

            HubCommand::Disconnect { client_id } => {
                if self.clients.remove(&client_id).is_some() {
                    info!(
                        "client disconnected: {client_id} ({} remaining)",
                        self.clients.len()
                    );
                }
            }

            HubCommand::Subscribe { client_id, topic } => {
                if let Some(client) = self.clients.get_mut(&client_id) {
                    client.topics.insert(topic);
                    client.last_activity = Instant::now();
                    debug!("client {client_id} subscribed to {}", topic.as_str());

                    let confirmation = Envelope::new(
                        "subscription_confirmed",
                        json!({ "topic": topic.as_str() }),
                    );
                    let _ = client.sender.send(confirmation);
                }
            }

            HubCommand::Unsubscribe { client_id, topic } => {
                if let Some(client) = self.clients.get_mut(&client_id) {
                    match topic {
                        Some(topic) => {
                            client.topics.remove(&topic);
                        }
                        None => client.topics.clear(),
                    }
                    client.last_activity = Instant::now();

                    let confirmation = Envelope::new(
                        "unsubscription_confirmed",
                        json!({ "topic": topic.map(Topic::as_str) }),
                    );
                    let _ = client.sender.send(confirmation);
                }
            }

            HubCommand::Ping { client_id } => {
                if let Some(client) = self.clients.get_mut(&client_id) {
                    client.last_activity = Instant::now();
                    let _ = client.sender.send(Envelope::new("pong", json!({})));
                }
            }

            HubCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }

            HubCommand::Shutdown => {
                debug!("received shutdown command");
                return true;
            }
        }

        false
    }

    /// Register a client and push the initial full snapshot.
    async fn on_connect(&mut self, client_id: String, sender: mpsc::UnboundedSender<Envelope>) {
        let initial = self.initial_data().await;
        let _ = sender.send(initial);

        self.clients.insert(
            client_id.clone(),
            ClientState {
                sender,
                topics: HashSet::new(),
                connected_at: Utc::now(),
                last_activity: Instant::now(),
            },
        );

        info!(
            "client connected: {client_id} ({} total)",
            self.clients.len()
        );
    }

    /// Full snapshot pushed on connect, regardless of subscriptions.
    async fn initial_data(&self) -> Envelope {
        let metrics = self.metrics.complete_summary().await;
        let health = self.health.snapshot().await.ok();
        let alerts = self.engine.list_active().await.unwrap_or_default();

        Envelope::new(
            "initial_data",
            json!({
                "metrics": metrics,
                "health": health,
                "alerts": alerts,
                "status": "connected",
            }),
        )
    }

    // ========================================================================
    // Periodic pushes
    // ========================================================================

    async fn push_metrics_update(&mut self) {
        if !self.any_subscriber(Topic::Metrics) {
            return;
        }

        let system = self.metrics.get_summary(MetricCategory::System).await;
        let business = self.metrics.get_summary(MetricCategory::Business).await;

        let envelope = Envelope::new(
            "metrics_update",
            json!({ "system": system, "business": business }),
        );
        self.broadcast_to(Topic::Metrics, envelope);
    }

    async fn push_alerts_update(&mut self) {
        if !self.any_subscriber(Topic::Alerts) {
            return;
        }

        let Ok(active) = self.engine.list_active().await else {
            warn!("failed to fetch active alerts for broadcast");
            return;
        };

        let critical = active
            .iter()
            .filter(|a| a.severity == crate::AlertSeverity::Critical)
            .count();

        let envelope = Envelope::new(
            "alerts_update",
            json!({ "active": active, "count": active.len(), "critical": critical }),
        );
        self.broadcast_to(Topic::Alerts, envelope);
    }

    async fn push_health_update(&mut self) {
        if !self.any_subscriber(Topic::Health) {
            return;
        }

        let Ok(snapshot) = self.health.snapshot().await else {
            warn!("failed to fetch health snapshot for broadcast");
            return;
        };

        let envelope = Envelope::new("health_update", json!(snapshot));
        self.broadcast_to(Topic::Health, envelope);
    }

    // ========================================================================
    // Discrete pushes
    // ========================================================================

    fn push_alert_event(&mut self, event: AlertEvent) {
        let envelope = Envelope::new("alert:triggered", json!(event.alert));
        self.broadcast_to(Topic::Alerts, envelope);
    }

    fn push_health_event(&mut self, event: HealthChangeEvent) {
        let envelope = Envelope::new("health:change", json!(event));
        self.broadcast_to(Topic::Health, envelope);
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    fn any_subscriber(&self, topic: Topic) -> bool {
        self.clients
            .values()
            .any(|c| c.topics.contains(&topic) || c.topics.contains(&Topic::All))
    }

    /// Send an envelope to every client subscribed to the topic. Clients
    /// whose receiver is gone are dropped.
    fn broadcast_to(&mut self, topic: Topic, envelope: Envelope) {
        let mut dead = Vec::new();

        for (client_id, client) in &self.clients {
            if !(client.topics.contains(&topic) || client.topics.contains(&Topic::All)) {
                continue;
            }

            if client.sender.send(envelope.clone()).is_err() {
                dead.push(client_id.clone());
            }
        }

        for client_id in dead {
            debug!("dropping client {client_id}: receiver gone");
            self.clients.remove(&client_id);
        }
    }

    fn sweep_inactive(&mut self) {
        let threshold = Duration::from_secs(self.config.inactivity_timeout_secs);

        let idle: Vec<String> = self
            .clients
            .iter()
            .filter(|(_, c)| c.last_activity.elapsed() > threshold)
            .map(|(id, _)| id.clone())
            .collect();

        for client_id in idle {
            info!("disconnecting inactive client: {client_id}");
            self.clients.remove(&client_id);
        }
    }

    fn stats(&self) -> HubStats {
        let mut subscriptions: BTreeMap<String, usize> = BTreeMap::new();
        for client in self.clients.values() {
            for topic in &client.topics {
                *subscriptions.entry(topic.as_str().to_string()).or_insert(0) += 1;
            }
        }

        HubStats {
            connected_clients: self.clients.len(),
            subscriptions,
            oldest_connection: self.clients.values().map(|c| c.connected_at).min(),
            newest_connection: self.clients.values().map(|c| c.connected_at).max(),
        }
    }
}

/// Handle for controlling the BroadcastHubActor
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Spawn a new broadcast hub actor
    pub fn spawn(
        metrics: Arc<MetricsAggregator>,
        health: HealthHandle,
        engine: EngineHandle,
        alert_rx: broadcast::Receiver<AlertEvent>,
        health_rx: broadcast::Receiver<HealthChangeEvent>,
        config: HubConfig,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor =
            BroadcastHubActor::new(metrics, health, engine, alert_rx, health_rx, cmd_rx, config);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Register a client and receive its envelope stream.
    ///
    /// The first envelope is the `initial_data` snapshot.
    pub async fn connect(
        &self,
        client_id: impl Into<String>,
    ) -> Result<mpsc::UnboundedReceiver<Envelope>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sender
            .send(HubCommand::Connect {
                client_id: client_id.into(),
                sender: tx,
            })
            .await?;
        Ok(rx)
    }

    pub async fn disconnect(&self, client_id: impl Into<String>) -> Result<()> {
        self.sender
            .send(HubCommand::Disconnect {
                client_id: client_id.into(),
            })
            .await?;
        Ok(())
    }

    pub async fn subscribe(&self, client_id: impl Into<String>, topic: Topic) -> Result<()> {
        self.sender
            .send(HubCommand::Subscribe {
                client_id: client_id.into(),
                topic,
            })
            .await?;
        Ok(())
    }

    pub async fn unsubscribe(
        &self,
        client_id: impl Into<String>,
        topic: Option<Topic>,
    ) -> Result<()> {
        self.sender
            .send(HubCommand::Unsubscribe {
                client_id: client_id.into(),
                topic,
            })
            .await?;
        Ok(())
    }

    /// Activity refresh for a client
    pub async fn ping(&self, client_id: impl Into<String>) -> Result<()> {
        self.sender
            .send(HubCommand::Ping {
                client_id: client_id.into(),
            })
            .await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<HubStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::GetStats { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    /// Shut down the hub, dropping all client connections
    pub async fn shutdown(&self) {
        let _ = self.sender.send(HubCommand::Shutdown).await;
    }
}
