//! AlertEngineActor - Evaluates rules and owns the alert lifecycle
//!
//! ## State Machine
//!
//! ```text
//! (condition holds, no active alert for fingerprint)
//!            │ create
//!            ▼
//!         active ──── acknowledge ────▶ acknowledged
//!            │                              │
//!            │ resolve / auto-resolve       │ resolve
//!            ▼                              ▼
//!         resolved ◀────────────────────────┘   (terminal)
//! ```
//!
//! Every alert mutation, from periodic evaluation to the manual
//! management calls, passes through this actor's command loop. That
//! single-writer discipline is what upholds the invariant of at most one
//! active alert per fingerprint: the create-or-skip decision can never
//! race a manual create or resolve.
//!
//! Evaluation ticks are single-flight by construction: the pass is
//! awaited inline in the loop and missed ticks are skipped, so a slow
//! pass cannot overlap the next one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::EngineConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::metrics::MetricsAggregator;
use crate::notify::Dispatcher;
use crate::registry::{Registry, SERVICE_UP_METRIC};
use crate::store::{AlertFilter, AlertStore};
use crate::{Alert, AlertRule, AlertStatus, fingerprint};

use super::health::HealthHandle;
use super::messages::{
    AlertEvent, AlertStatistics, EngineCommand, ManualAlertRequest, SystemHealthSnapshot,
};

/// Per-fingerprint evaluation bookkeeping
///
/// `last_notified` survives auto-resolve so the silence window also damps
/// flapping conditions; the other fields are per-alert.
#[derive(Debug, Clone, Copy, Default)]
struct FingerprintState {
    /// Since when the condition has held continuously
    held_since: Option<DateTime<Utc>>,

    /// When a notification was last dispatched for this fingerprint
    last_notified: Option<DateTime<Utc>>,

    /// Notifications dispatched for the current alert
    notified_for_alert: u32,
}

/// Actor that evaluates alert rules and owns alert state
pub struct AlertEngineActor {
    registry: Arc<Registry>,
    metrics: Arc<MetricsAggregator>,
    health: HealthHandle,
    store: Box<dyn AlertStore>,
    dispatcher: Arc<Dispatcher>,

    command_rx: mpsc::Receiver<EngineCommand>,

    /// Broadcast sender for new-alert events
    event_tx: broadcast::Sender<AlertEvent>,

    eval_interval: Duration,

    fingerprints: HashMap<String, FingerprintState>,

    /// Monotonic suffix for alert id generation
    alert_seq: u64,
}

impl AlertEngineActor {
    pub fn new(
        registry: Arc<Registry>,
        metrics: Arc<MetricsAggregator>,
        health: HealthHandle,
        store: Box<dyn AlertStore>,
        dispatcher: Arc<Dispatcher>,
        config: EngineConfig,
        command_rx: mpsc::Receiver<EngineCommand>,
        event_tx: broadcast::Sender<AlertEvent>,
    ) -> Self {
        Self {
            registry,
            metrics,
            health,
            store,
            dispatcher,
            command_rx,
            event_tx,
            eval_interval: Duration::from_secs(config.interval_secs),
            fingerprints: HashMap::new(),
            alert_seq: 0,
        }
    }

    /// Run the actor's main loop until shutdown
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting alert engine with evaluation interval {:?}",
            self.eval_interval
        );

        // first evaluation one full interval after start; evaluation is
        // awaited inline and missed ticks are skipped, so passes never
        // overlap or burst to catch up
        let mut ticker = interval_at(Instant::now() + self.eval_interval, self.eval_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate_all().await;
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

        debug!("alert engine stopped");
    }

    /// Returns true when the actor should shut down
    async fn handle_command(&mut self, cmd: EngineCommand) -> bool {
        match cmd {
            EngineCommand::EvaluateNow { respond_to } => {
                self.evaluate_all().await;
                let _ = respond_to.send(());
            }

            EngineCommand::CreateManualAlert {
                request,
                respond_to,
            } => {
                let _ = respond_to.send(self.create_manual_alert(request).await);
            }

            EngineCommand::Acknowledge {
                id,
                by,
                comment,
                respond_to,
            } => {
                let _ = respond_to.send(self.acknowledge(&id, by, comment).await);
            }

            EngineCommand::Resolve {
                id,
                by,
                comment,
                respond_to,
            } => {
                let _ = respond_to.send(self.resolve(&id, by, comment).await);
            }

            EngineCommand::GetAlert { id, respond_to } => {
                let result = match self.store.get(&id).await {
                    Ok(Some(alert)) => Ok(alert),
                    Ok(None) => Err(MonitorError::NotFound(format!("alert '{id}'"))),
                    Err(e) => Err(e.into()),
                };
                let _ = respond_to.send(result);
            }

            EngineCommand::ListAlerts { filter, respond_to } => {
                let _ = respond_to.send(self.store.list(filter).await.map_err(Into::into));
            }

            EngineCommand::ListActive { respond_to } => {
                let _ = respond_to.send(self.store.list_active().await.map_err(Into::into));
            }

            EngineCommand::GetStatistics { period, respond_to } => {
                let _ = respond_to.send(self.statistics(&period).await);
            }

            EngineCommand::Shutdown => {
                debug!("received shutdown command");
                return true;
            }
        }

        false
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// One evaluation pass over all enabled rules
    async fn evaluate_all(&mut self) {
        let rules = self.registry.enabled_rules().await;
        if rules.is_empty() {
            return;
        }

        // one snapshot query serves every service_up rule this pass
        let snapshot = if rules.iter().any(|r| r.metric == SERVICE_UP_METRIC) {
            self.health.snapshot().await.ok()
        } else {
            None
        };

        trace!("evaluating {} rules", rules.len());

        for rule in rules {
            if let Err(e) = self.evaluate_rule(&rule, snapshot.as_ref()).await {
                error!("error evaluating rule '{}': {e}", rule.name);
            }
        }
    }

    async fn evaluate_rule(
        &mut self,
        rule: &AlertRule,
        snapshot: Option<&SystemHealthSnapshot>,
    ) -> MonitorResult<()> {
        let instances = self.rule_instances(rule, snapshot).await;

        if instances.is_empty() {
            // no value available; neither create nor resolve this tick
            debug!("no value available for metric '{}', skipping", rule.metric);
            return Ok(());
        }

        for (labels, value) in instances {
            self.evaluate_instance(rule, labels, value).await?;
        }

        Ok(())
    }

    /// Expand a rule into its `(fingerprint labels, value)` instances.
    ///
    /// `service_up` rules get one instance per registered service; rules
    /// with fingerprint labels get one per matching series; everything
    /// else is a single aggregate instance.
    async fn rule_instances(
        &self,
        rule: &AlertRule,
        snapshot: Option<&SystemHealthSnapshot>,
    ) -> Vec<(BTreeMap<String, String>, f64)> {
        if rule.metric == SERVICE_UP_METRIC {
            let Some(snapshot) = snapshot else {
                return Vec::new();
            };

            return snapshot
                .services
                .iter()
                .map(|(name, result)| {
                    let mut labels = BTreeMap::new();
                    labels.insert("service".to_string(), name.clone());
                    let up = result.as_ref().is_some_and(|r| r.healthy);
                    (labels, if up { 1.0 } else { 0.0 })
                })
                .collect();
        }

        if !rule.fingerprint_labels.is_empty() {
            return self
                .metrics
                .series_values(&rule.metric)
                .await
                .into_iter()
                .map(|(labels, value)| {
                    let projected = labels
                        .into_iter()
                        .filter(|(key, _)| rule.fingerprint_labels.contains(key))
                        .collect();
                    (projected, value)
                })
                .collect();
        }

        match self.metrics.get_value(&rule.metric, None).await {
            Some(value) => vec![(BTreeMap::new(), value)],
            None => Vec::new(),
        }
    }

    async fn evaluate_instance(
        &mut self,
        rule: &AlertRule,
        labels: BTreeMap<String, String>,
        value: f64,
    ) -> MonitorResult<()> {
        let fp = fingerprint(&rule.id, &labels);
        let holds = rule.condition.operator.evaluate(value, rule.condition.threshold);
        let now = Utc::now();

        trace!(
            "rule '{}' [{fp}]: {value} {} {} → {holds}",
            rule.id,
            rule.condition.operator.as_str(),
            rule.condition.threshold
        );

        let active = self.store.find_active(&fp).await?;

        if holds {
            let state = self.fingerprints.entry(fp.clone()).or_default();
            let held_since = *state.held_since.get_or_insert(now);

            match active {
                None => {
                    let sustained =
                        chrono::Duration::seconds(rule.condition.sustained_secs as i64);
                    if now.signed_duration_since(held_since) >= sustained {
                        self.create_rule_alert(rule, fp, labels, value, now).await?;
                    } else {
                        trace!(
                            "rule '{}' [{fp}] holding, waiting out sustain window",
                            rule.id
                        );
                    }
                }

                Some(mut alert) => {
                    alert.occurrence_count += 1;
                    alert.last_occurrence_at = now;
                    self.store.put(alert.clone()).await?;

                    if self.should_notify(&fp, rule, now) {
                        self.dispatch(rule, &alert, now).await;
                    }
                }
            }
        } else {
            if let Some(state) = self.fingerprints.get_mut(&fp) {
                state.held_since = None;
            }

            if let Some(alert) = active {
                debug!(
                    "condition for '{}' [{fp}] no longer holds, auto-resolving",
                    rule.id
                );
                self.resolve_alert(alert, "system", Some("Condition no longer met".to_string()), now)
                    .await?;
            }
        }

        Ok(())
    }

    async fn create_rule_alert(
        &mut self,
        rule: &AlertRule,
        fp: String,
        labels: BTreeMap<String, String>,
        value: f64,
        now: DateTime<Utc>,
    ) -> MonitorResult<()> {
        let alert = Alert {
            id: self.next_alert_id(now),
            rule_id: Some(rule.id.clone()),
            fingerprint: fp.clone(),
            title: rule.name.clone(),
            message: format!(
                "{}. Current value: {value}",
                rule.description.as_deref().unwrap_or(&rule.name)
            ),
            severity: rule.severity,
            status: AlertStatus::Active,
            source: "rule".to_string(),
            created_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            ack_comment: None,
            resolved_at: None,
            resolved_by: None,
            resolve_comment: None,
            occurrence_count: 1,
            last_occurrence_at: now,
            data: json!({
                "metric": rule.metric,
                "currentValue": value,
                "threshold": rule.condition.threshold,
                "operator": rule.condition.operator,
                "labels": labels,
            }),
        };

        self.store.put(alert.clone()).await?;
        self.registry.record_trigger(&rule.id).await;

        if let Some(state) = self.fingerprints.get_mut(&fp) {
            state.notified_for_alert = 0;
        }

        info!(
            "alert triggered: {} [{fp}] severity={} value={value}",
            alert.title,
            alert.severity.as_str()
        );

        let _ = self.event_tx.send(AlertEvent {
            alert: alert.clone(),
            timestamp: now,
        });

        if self.should_notify(&fp, rule, now) {
            self.dispatch(rule, &alert, now).await;
        }

        Ok(())
    }

    /// Whether a notification may go out for this fingerprint now,
    /// honoring the silence window and the per-alert cap.
    fn should_notify(&mut self, fp: &str, rule: &AlertRule, now: DateTime<Utc>) -> bool {
        let state = self.fingerprints.entry(fp.to_string()).or_default();

        if rule.max_notifications > 0 && state.notified_for_alert >= rule.max_notifications {
            return false;
        }

        if rule.silence_secs > 0
            && let Some(last) = state.last_notified
            && now.signed_duration_since(last)
                < chrono::Duration::seconds(rule.silence_secs as i64)
        {
            return false;
        }

        true
    }

    /// Fire-and-forget dispatch to the rule's channels.
    ///
    /// Outcomes are logged by the dispatcher; they never feed back into
    /// alert state and there is no retry.
    async fn dispatch(&mut self, rule: &AlertRule, alert: &Alert, now: DateTime<Utc>) {
        if let Some(state) = self.fingerprints.get_mut(&alert.fingerprint) {
            state.last_notified = Some(now);
            state.notified_for_alert += 1;
        }

        let channels = self.registry.resolve_channels(&rule.channels).await;
        if channels.len() < rule.channels.len() {
            warn!(
                "rule '{}' references unknown notification channels",
                rule.id
            );
        }
        if channels.is_empty() {
            return;
        }

        let dispatcher = self.dispatcher.clone();
        let alert = alert.clone();
        tokio::spawn(async move {
            dispatcher.dispatch_all(&channels, &alert).await;
        });
    }

    // ========================================================================
    // Manual operations
    // ========================================================================

    async fn create_manual_alert(&mut self, request: ManualAlertRequest) -> MonitorResult<Alert> {
        if request.title.trim().is_empty() {
            return Err(MonitorError::Validation(
                "alert title must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let id = self.next_alert_id(now);
        let fp = request.fingerprint.unwrap_or_else(|| id.clone());

        if let Some(existing) = self.store.find_active(&fp).await? {
            return Err(MonitorError::ConcurrencyConflict(format!(
                "active alert '{}' already exists for fingerprint '{fp}'",
                existing.id
            )));
        }

        let alert = Alert {
            id,
            rule_id: None,
            fingerprint: fp,
            title: request.title,
            message: request.message,
            severity: request.severity,
            status: AlertStatus::Active,
            source: "manual".to_string(),
            created_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            ack_comment: None,
            resolved_at: None,
            resolved_by: None,
            resolve_comment: None,
            occurrence_count: 1,
            last_occurrence_at: now,
            data: request.data,
        };

        self.store.put(alert.clone()).await?;
        info!("manual alert created: {} ({})", alert.title, alert.id);

        let _ = self.event_tx.send(AlertEvent {
            alert: alert.clone(),
            timestamp: now,
        });

        Ok(alert)
    }

    /// Acknowledge an alert. A no-op when already acknowledged or
    /// resolved.
    async fn acknowledge(
        &mut self,
        id: &str,
        by: String,
        comment: Option<String>,
    ) -> MonitorResult<Alert> {
        let Some(mut alert) = self.store.get(id).await? else {
            return Err(MonitorError::NotFound(format!("alert '{id}'")));
        };

        match alert.status {
            AlertStatus::Active => {
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_at = Some(Utc::now());
                alert.acknowledged_by = Some(by.clone());
                alert.ack_comment = comment;
                self.store.put(alert.clone()).await?;

                info!("alert acknowledged: {} by {by}", alert.title);
                Ok(alert)
            }

            // already in or past the target state
            AlertStatus::Acknowledged | AlertStatus::Resolved => Ok(alert),
        }
    }

    /// Resolve an alert. A no-op when already resolved.
    async fn resolve(
        &mut self,
        id: &str,
        by: String,
        comment: Option<String>,
    ) -> MonitorResult<Alert> {
        let Some(alert) = self.store.get(id).await? else {
            return Err(MonitorError::NotFound(format!("alert '{id}'")));
        };

        match alert.status {
            AlertStatus::Active | AlertStatus::Acknowledged => {
                self.resolve_alert(alert, &by, comment, Utc::now()).await
            }

            AlertStatus::Resolved => Ok(alert),
        }
    }

    async fn resolve_alert(
        &mut self,
        mut alert: Alert,
        by: &str,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> MonitorResult<Alert> {
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        alert.resolved_by = Some(by.to_string());
        alert.resolve_comment = comment;
        self.store.put(alert.clone()).await?;

        // the silence window (last_notified) survives, damping flaps
        if let Some(state) = self.fingerprints.get_mut(&alert.fingerprint) {
            state.held_since = None;
            state.notified_for_alert = 0;
        }

        info!("alert resolved: {} by {by}", alert.title);
        Ok(alert)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    async fn statistics(&self, period: &str) -> MonitorResult<AlertStatistics> {
        let window = parse_period(period);
        let since = Utc::now() - window;

        let alerts = self
            .store
            .list(AlertFilter {
                limit: Some(usize::MAX),
                ..Default::default()
            })
            .await?;

        let recent: Vec<&Alert> = alerts.iter().filter(|a| a.created_at >= since).collect();

        let mut by_severity = BTreeMap::new();
        let mut by_source = BTreeMap::new();
        for alert in &recent {
            *by_severity
                .entry(alert.severity.as_str().to_string())
                .or_insert(0) += 1;
            *by_source.entry(alert.source.clone()).or_insert(0) += 1;
        }

        Ok(AlertStatistics {
            period: period.to_string(),
            total: recent.len(),
            active: recent
                .iter()
                .filter(|a| a.status == AlertStatus::Active)
                .count(),
            acknowledged: recent
                .iter()
                .filter(|a| a.status == AlertStatus::Acknowledged)
                .count(),
            resolved: recent
                .iter()
                .filter(|a| a.status == AlertStatus::Resolved)
                .count(),
            by_severity,
            by_source,
        })
    }

    fn next_alert_id(&mut self, now: DateTime<Utc>) -> String {
        self.alert_seq += 1;
        format!("alert_{}_{:04}", now.timestamp_millis(), self.alert_seq)
    }
}

/// Parse a statistics period like `"15m"`, `"24h"`, `"7d"` or `"2w"`.
/// Falls back to 24 hours for anything unparseable.
fn parse_period(period: &str) -> chrono::Duration {
    let re = regex::Regex::new(r"^(\d+)([mhdw])$").expect("static period pattern");

    let Some(captures) = re.captures(period.trim()) else {
        return chrono::Duration::hours(24);
    };

    let value: i64 = captures[1].parse().unwrap_or(24);
    match &captures[2] {
        "m" => chrono::Duration::minutes(value),
        "h" => chrono::Duration::hours(value),
        "d" => chrono::Duration::days(value),
        "w" => chrono::Duration::weeks(value),
        _ => chrono::Duration::hours(24),
    }
}

/// Handle for controlling the AlertEngineActor
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Spawn a new alert engine actor
    pub fn spawn(
        registry: Arc<Registry>,
        metrics: Arc<MetricsAggregator>,
        health: HealthHandle,
        store: Box<dyn AlertStore>,
        dispatcher: Arc<Dispatcher>,
        config: EngineConfig,
        event_tx: broadcast::Sender<AlertEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AlertEngineActor::new(
            registry, metrics, health, store, dispatcher, config, cmd_rx, event_tx,
        );
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run one evaluation pass immediately
    pub async fn evaluate_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::EvaluateNow { respond_to: tx })
            .await?;
        rx.await?;
        Ok(())
    }

    pub async fn create_manual_alert(&self, request: ManualAlertRequest) -> Result<Alert> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::CreateManualAlert {
                request,
                respond_to: tx,
            })
            .await?;
        Ok(rx.await??)
    }

    pub async fn acknowledge(
        &self,
        id: impl Into<String>,
        by: impl Into<String>,
        comment: Option<String>,
    ) -> Result<Alert> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Acknowledge {
                id: id.into(),
                by: by.into(),
                comment,
                respond_to: tx,
            })
            .await?;
        Ok(rx.await??)
    }

    pub async fn resolve(
        &self,
        id: impl Into<String>,
        by: impl Into<String>,
        comment: Option<String>,
    ) -> Result<Alert> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::Resolve {
                id: id.into(),
                by: by.into(),
                comment,
                respond_to: tx,
            })
            .await?;
        Ok(rx.await??)
    }

    pub async fn get_alert(&self, id: impl Into<String>) -> Result<Alert> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::GetAlert {
                id: id.into(),
                respond_to: tx,
            })
            .await?;
        Ok(rx.await??)
    }

    pub async fn list_alerts(&self, filter: AlertFilter) -> Result<Vec<Alert>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::ListAlerts {
                filter,
                respond_to: tx,
            })
            .await?;
        Ok(rx.await??)
    }

    pub async fn list_active(&self) -> Result<Vec<Alert>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::ListActive { respond_to: tx })
            .await?;
        Ok(rx.await??)
    }

    pub async fn statistics(&self, period: impl Into<String>) -> Result<AlertStatistics> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EngineCommand::GetStatistics {
                period: period.into(),
                respond_to: tx,
            })
            .await?;
        Ok(rx.await??)
    }

    /// Shut down the engine
    pub async fn shutdown(&self) {
        let _ = self.sender.send(EngineCommand::Shutdown).await;
    }
}
