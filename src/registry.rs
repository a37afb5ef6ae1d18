//! Rule and channel configuration registry
//!
//! The registry exclusively owns alert rule definitions and the
//! notification channel table. It holds no polling or evaluation logic;
//! the engine reads enabled rules from it each tick and reports
//! trigger bookkeeping back.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{MonitorError, MonitorResult};
use crate::notify::ChannelConfig;
use crate::{AlertRule, RuleDefinition};

/// Metric name that routes rule evaluation to the health poller
pub const SERVICE_UP_METRIC: &str = "service_up";

#[derive(Default)]
pub struct Registry {
    rules: RwLock<HashMap<String, AlertRule>>,
    channels: RwLock<HashMap<String, ChannelConfig>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from startup configuration.
    ///
    /// Invalid rule definitions are rejected, so a registry built from a
    /// config file either contains all of its rules or fails loudly.
    pub fn from_config(
        rules: Vec<RuleDefinition>,
        channels: HashMap<String, ChannelConfig>,
    ) -> MonitorResult<Self> {
        let mut installed = HashMap::new();
        for def in rules {
            let rule = build_rule(def)?;
            installed.insert(rule.id.clone(), rule);
        }

        Ok(Self {
            rules: RwLock::new(installed),
            channels: RwLock::new(channels),
        })
    }

    // ========================================================================
    // Rules
    // ========================================================================

    pub async fn create_rule(&self, def: RuleDefinition) -> MonitorResult<AlertRule> {
        let rule = build_rule(def)?;

        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.id) {
            return Err(MonitorError::Validation(format!(
                "alert rule '{}' already exists",
                rule.id
            )));
        }

        info!("alert rule created: {} ({})", rule.name, rule.id);
        rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    /// Replace the definitional fields of a rule, preserving its id and
    /// trigger bookkeeping.
    pub async fn update_rule(&self, id: &str, def: RuleDefinition) -> MonitorResult<AlertRule> {
        validate_definition(&def)?;

        let mut rules = self.rules.write().await;
        let existing = rules
            .get_mut(id)
            .ok_or_else(|| MonitorError::NotFound(format!("alert rule '{id}'")))?;

        existing.name = def.name;
        existing.description = def.description;
        existing.metric = def.metric;
        existing.condition = def.condition;
        existing.severity = def.severity;
        existing.enabled = def.enabled;
        existing.channels = def.channels;
        existing.silence_secs = def.silence_secs;
        existing.max_notifications = def.max_notifications;
        existing.fingerprint_labels = def.fingerprint_labels;
        existing.updated_at = Some(Utc::now());

        info!("alert rule updated: {} ({})", existing.name, id);
        Ok(existing.clone())
    }

    pub async fn delete_rule(&self, id: &str) -> MonitorResult<()> {
        let mut rules = self.rules.write().await;
        let removed = rules
            .remove(id)
            .ok_or_else(|| MonitorError::NotFound(format!("alert rule '{id}'")))?;

        info!("alert rule deleted: {} ({})", removed.name, id);
        Ok(())
    }

    /// Flip the enabled flag, returning the new state.
    pub async fn toggle_rule(&self, id: &str) -> MonitorResult<AlertRule> {
        let mut rules = self.rules.write().await;
        let rule = rules
            .get_mut(id)
            .ok_or_else(|| MonitorError::NotFound(format!("alert rule '{id}'")))?;

        rule.enabled = !rule.enabled;
        rule.updated_at = Some(Utc::now());

        info!(
            "alert rule {}: {} ({})",
            if rule.enabled { "enabled" } else { "disabled" },
            rule.name,
            id
        );
        Ok(rule.clone())
    }

    pub async fn get_rule(&self, id: &str) -> Option<AlertRule> {
        self.rules.read().await.get(id).cloned()
    }

    pub async fn list_rules(&self) -> Vec<AlertRule> {
        let mut rules: Vec<AlertRule> = self.rules.read().await.values().cloned().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    pub async fn enabled_rules(&self) -> Vec<AlertRule> {
        let mut rules: Vec<AlertRule> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.enabled)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    /// Bump trigger bookkeeping after the engine created an alert.
    pub async fn record_trigger(&self, id: &str) {
        if let Some(rule) = self.rules.write().await.get_mut(id) {
            rule.trigger_count += 1;
            rule.last_triggered = Some(Utc::now());
        }
    }

    // ========================================================================
    // Channels
    // ========================================================================

    pub async fn add_channel(&self, id: impl Into<String>, channel: ChannelConfig) {
        self.channels.write().await.insert(id.into(), channel);
    }

    pub async fn get_channel(&self, id: &str) -> Option<ChannelConfig> {
        self.channels.read().await.get(id).cloned()
    }

    pub async fn list_channels(&self) -> Vec<(String, ChannelConfig)> {
        let mut channels: Vec<(String, ChannelConfig)> = self
            .channels
            .read()
            .await
            .iter()
            .map(|(id, c)| (id.clone(), c.clone()))
            .collect();
        channels.sort_by(|a, b| a.0.cmp(&b.0));
        channels
    }

    /// Resolve a rule's channel id list to configured channels.
    ///
    /// Unknown ids are skipped with a warning at dispatch time, matching
    /// best-effort delivery.
    pub async fn resolve_channels(&self, ids: &[String]) -> Vec<(String, ChannelConfig)> {
        let channels = self.channels.read().await;
        ids.iter()
            .filter_map(|id| channels.get(id).map(|c| (id.clone(), c.clone())))
            .collect()
    }
}

fn build_rule(mut def: RuleDefinition) -> MonitorResult<AlertRule> {
    validate_definition(&def)?;

    let id = def.id.take().unwrap_or_else(|| slugify(&def.name));
    if id.is_empty() {
        return Err(MonitorError::Validation(
            "rule id must not be empty".to_string(),
        ));
    }

    Ok(AlertRule::from_definition(id, def))
}

fn validate_definition(def: &RuleDefinition) -> MonitorResult<()> {
    if def.name.trim().is_empty() {
        return Err(MonitorError::Validation(
            "rule name must not be empty".to_string(),
        ));
    }
    if def.metric.trim().is_empty() {
        return Err(MonitorError::Validation(
            "rule metric must not be empty".to_string(),
        ));
    }
    if !def.condition.threshold.is_finite() {
        return Err(MonitorError::Validation(format!(
            "rule '{}' has a non-finite threshold",
            def.name
        )));
    }
    Ok(())
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// The rule set installed when a config provides none.
pub fn default_rules() -> Vec<RuleDefinition> {
    use crate::{AlertSeverity, ComparisonOp, RuleCondition};

    let rule = |id: &str,
                name: &str,
                description: &str,
                metric: &str,
                operator: ComparisonOp,
                threshold: f64,
                severity: AlertSeverity,
                fingerprint_labels: Vec<String>| RuleDefinition {
        id: Some(id.to_string()),
        name: name.to_string(),
        description: Some(description.to_string()),
        metric: metric.to_string(),
        condition: RuleCondition {
            operator,
            threshold,
            sustained_secs: 0,
        },
        severity,
        enabled: true,
        channels: vec!["default".to_string()],
        silence_secs: 600,
        max_notifications: 0,
        fingerprint_labels,
    };

    vec![
        rule(
            "cpu_high",
            "CPU Usage High",
            "CPU usage is above 80%",
            "system_cpu_usage_percent",
            ComparisonOp::Gt,
            80.0,
            crate::AlertSeverity::Medium,
            vec![],
        ),
        rule(
            "memory_critical",
            "Memory Usage Critical",
            "Memory usage is above 90%",
            "system_memory_usage_percent",
            ComparisonOp::Gt,
            90.0,
            crate::AlertSeverity::Critical,
            vec![],
        ),
        rule(
            "service_down",
            "Service Down",
            "A monitored service is down",
            SERVICE_UP_METRIC,
            ComparisonOp::Eq,
            0.0,
            crate::AlertSeverity::Critical,
            vec!["service".to_string()],
        ),
        rule(
            "http_errors_high",
            "HTTP Errors High",
            "HTTP error rate is above 5%",
            "http_error_rate",
            ComparisonOp::Gt,
            5.0,
            crate::AlertSeverity::Medium,
            vec![],
        ),
        rule(
            "response_time_slow",
            "Response Time Slow",
            "Average response time is above 1 second",
            "http_request_duration_seconds",
            ComparisonOp::Gt,
            1.0,
            crate::AlertSeverity::Medium,
            vec![],
        ),
    ]
}
