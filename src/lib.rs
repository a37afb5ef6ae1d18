pub mod actors;
pub mod config;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod registry;
pub mod runtime;
pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordinal alert classification driving notification urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// Lifecycle state of an alert.
///
/// Transitions: `active → acknowledged → resolved` and `active → resolved`.
/// `resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

/// Comparison operator of a rule condition.
///
/// Serialized as the operator literal (`">"`, `"<="`, ...) so rule
/// definitions read the way they are written in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl ComparisonOp {
    /// Strict numeric comparison, no coercion.
    pub fn evaluate(self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOp::Gt => value > threshold,
            ComparisonOp::Lt => value < threshold,
            ComparisonOp::Ge => value >= threshold,
            ComparisonOp::Le => value <= threshold,
            ComparisonOp::Eq => value == threshold,
            ComparisonOp::Ne => value != threshold,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Gt => ">",
            ComparisonOp::Lt => "<",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Le => "<=",
            ComparisonOp::Eq => "==",
            ComparisonOp::Ne => "!=",
        }
    }
}

/// Threshold condition of an alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub operator: ComparisonOp,
    pub threshold: f64,

    /// Seconds the condition must hold continuously before an alert fires.
    /// 0 fires on the first crossing.
    #[serde(default)]
    pub sustained_secs: u64,
}

/// User-supplied part of an alert rule, without engine bookkeeping.
///
/// This is what the management surface and config files provide; the
/// registry turns it into a full [`AlertRule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Stable identifier. Generated from the name when omitted.
    #[serde(default)]
    pub id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Metric the rule evaluates. The well-known name `service_up`
    /// evaluates against the health poller instead of the aggregator.
    pub metric: String,

    pub condition: RuleCondition,

    pub severity: AlertSeverity,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Ids of notification channels to dispatch to.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Minimum seconds between repeat notifications for one fingerprint.
    #[serde(default)]
    pub silence_secs: u64,

    /// Maximum notifications per alert. 0 = unlimited.
    #[serde(default)]
    pub max_notifications: u32,

    /// Label dimensions the dedup fingerprint is scoped to. Empty means
    /// the rule fingerprints on its id alone; `["service"]` makes a
    /// per-service rule fire independently per service.
    #[serde(default)]
    pub fingerprint_labels: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

/// An alert rule as held by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub metric: String,
    pub condition: RuleCondition,
    pub severity: AlertSeverity,
    pub enabled: bool,
    pub channels: Vec<String>,
    pub silence_secs: u64,
    pub max_notifications: u32,
    pub fingerprint_labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_triggered: Option<DateTime<Utc>>,
    pub trigger_count: u64,
}

impl AlertRule {
    pub fn from_definition(id: String, def: RuleDefinition) -> Self {
        Self {
            id,
            name: def.name,
            description: def.description,
            metric: def.metric,
            condition: def.condition,
            severity: def.severity,
            enabled: def.enabled,
            channels: def.channels,
            silence_secs: def.silence_secs,
            max_notifications: def.max_notifications,
            fingerprint_labels: def.fingerprint_labels,
            created_at: Utc::now(),
            updated_at: None,
            last_triggered: None,
            trigger_count: 0,
        }
    }
}

/// A single alert instance.
///
/// Exactly one alert may be `active` per fingerprint; the engine actor
/// serializes all mutations to uphold this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,

    /// Originating rule, `None` for manually created alerts.
    pub rule_id: Option<String>,

    /// Dedup key identifying "the same condition" across ticks.
    pub fingerprint: String,

    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub status: AlertStatus,

    /// `"rule"` or `"manual"`.
    pub source: String,

    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub ack_comment: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolve_comment: Option<String>,

    /// Ticks the condition has held while this alert was active.
    pub occurrence_count: u64,
    pub last_occurrence_at: DateTime<Utc>,

    /// Context captured at creation (metric, value, threshold, ...).
    pub data: serde_json::Value,
}

/// Derive the dedup fingerprint for a rule and its scoped label values.
pub fn fingerprint(rule_id: &str, labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return rule_id.to_string();
    }

    let dims = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");

    format!("{rule_id}{{{dims}}}")
}
