//! Message types for actor communication
//!
//! Commands are request/response messages sent to a specific actor via
//! mpsc; events are broadcast notifications published to multiple
//! subscribers and therefore cloneable.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::config::{MonitoredService, ServiceConfig};
use crate::error::{MonitorResult, ProbeErrorKind};
use crate::store::AlertFilter;
use crate::{Alert, AlertSeverity};

// ============================================================================
// Health
// ============================================================================

/// Outcome of one health probe. Immutable once produced; each poll tick
/// overwrites the latest slot for the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub service_name: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub error_kind: Option<ProbeErrorKind>,

    /// Opaque JSON body returned by a healthy probe
    pub details: Option<serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

/// Aggregate health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Point-in-time aggregate over the latest result per service
///
/// Services without a result yet appear with `None` and count as
/// unhealthy.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthSnapshot {
    pub status: SystemStatus,
    pub total_services: usize,
    pub healthy_services: usize,
    pub unhealthy_services: usize,
    pub health_percentage: f64,
    pub services: BTreeMap<String, Option<HealthCheckResult>>,
    pub timestamp: DateTime<Utc>,
}

/// Response time and success statistics over the latest results
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthStatistics {
    pub average_response_time_ms: f64,
    pub min_response_time_ms: u64,
    pub max_response_time_ms: u64,
    pub success_rate: f64,
    pub total_checks: usize,
}

/// Event published when a service's health flips
#[derive(Debug, Clone, Serialize)]
pub struct HealthChangeEvent {
    pub service_name: String,
    pub healthy: bool,
    pub timestamp: DateTime<Utc>,
}

/// Commands that can be sent to the HealthPollerActor
#[derive(Debug)]
pub enum HealthCommand {
    /// Force-probe every registered service and return the recomputed
    /// snapshot
    PollAll {
        respond_to: oneshot::Sender<SystemHealthSnapshot>,
    },

    /// Probe a single service immediately
    PollOne {
        name: String,
        respond_to: oneshot::Sender<MonitorResult<HealthCheckResult>>,
    },

    /// Register a service, or update it if the name is already known
    AddService { config: ServiceConfig },

    /// Remove a service. Safe to call while a poll cycle is in flight;
    /// a late result for the removed service is discarded.
    RemoveService {
        name: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Recompute the snapshot from the latest results, without probing
    GetSnapshot {
        respond_to: oneshot::Sender<SystemHealthSnapshot>,
    },

    ListServices {
        respond_to: oneshot::Sender<Vec<MonitoredService>>,
    },

    GetStatistics {
        respond_to: oneshot::Sender<HealthStatistics>,
    },

    /// Gracefully shut down the poller
    Shutdown,
}

// ============================================================================
// Alert engine
// ============================================================================

/// Event published when the engine creates an alert
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub alert: Alert,
    pub timestamp: DateTime<Utc>,
}

/// Payload for manually created alerts
#[derive(Debug, Clone, Deserialize)]
pub struct ManualAlertRequest {
    pub title: String,
    pub message: String,
    pub severity: AlertSeverity,

    /// Explicit dedup fingerprint. Defaults to the generated alert id,
    /// which never collides.
    #[serde(default)]
    pub fingerprint: Option<String>,

    #[serde(default)]
    pub data: serde_json::Value,
}

/// Alert counts over a time period
#[derive(Debug, Clone, Serialize)]
pub struct AlertStatistics {
    pub period: String,
    pub total: usize,
    pub active: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
}

/// Commands that can be sent to the AlertEngineActor
///
/// All alert mutations go through this channel; the actor is the single
/// writer that upholds at-most-one-active-alert-per-fingerprint.
#[derive(Debug)]
pub enum EngineCommand {
    /// Run one evaluation pass immediately (testing and manual refresh)
    EvaluateNow {
        respond_to: oneshot::Sender<()>,
    },

    CreateManualAlert {
        request: ManualAlertRequest,
        respond_to: oneshot::Sender<MonitorResult<Alert>>,
    },

    Acknowledge {
        id: String,
        by: String,
        comment: Option<String>,
        respond_to: oneshot::Sender<MonitorResult<Alert>>,
    },

    Resolve {
        id: String,
        by: String,
        comment: Option<String>,
        respond_to: oneshot::Sender<MonitorResult<Alert>>,
    },

    GetAlert {
        id: String,
        respond_to: oneshot::Sender<MonitorResult<Alert>>,
    },

    ListAlerts {
        filter: AlertFilter,
        respond_to: oneshot::Sender<MonitorResult<Vec<Alert>>>,
    },

    ListActive {
        respond_to: oneshot::Sender<MonitorResult<Vec<Alert>>>,
    },

    GetStatistics {
        period: String,
        respond_to: oneshot::Sender<MonitorResult<AlertStatistics>>,
    },

    /// Gracefully shut down the engine
    Shutdown,
}

// ============================================================================
// Broadcast hub
// ============================================================================

/// A named category of real-time update a client can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Metrics,
    Health,
    Alerts,
    All,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::Metrics => "metrics",
            Topic::Health => "health",
            Topic::Alerts => "alerts",
            Topic::All => "all",
        }
    }
}

/// JSON envelope pushed to clients
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Connected client statistics
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connected_clients: usize,

    /// Subscription counts keyed by topic name
    pub subscriptions: BTreeMap<String, usize>,

    pub oldest_connection: Option<DateTime<Utc>>,
    pub newest_connection: Option<DateTime<Utc>>,
}

/// Commands that can be sent to the BroadcastHubActor
#[derive(Debug)]
pub enum HubCommand {
    /// Register a client; the hub pushes envelopes into `sender`
    Connect {
        client_id: String,
        sender: mpsc::UnboundedSender<Envelope>,
    },

    Disconnect {
        client_id: String,
    },

    Subscribe {
        client_id: String,
        topic: Topic,
    },

    /// `None` clears all subscriptions for the client
    Unsubscribe {
        client_id: String,
        topic: Option<Topic>,
    },

    /// Activity refresh; answered with a `pong` envelope
    Ping {
        client_id: String,
    },

    GetStats {
        respond_to: oneshot::Sender<HubStats>,
    },

    /// Gracefully shut down the hub
    Shutdown,
}

// ============================================================================
// Host metrics collector
// ============================================================================

/// Commands that can be sent to the SystemCollectorActor
#[derive(Debug)]
pub enum CollectorCommand {
    /// Take one sample immediately (testing and manual refresh)
    SampleNow {
        respond_to: oneshot::Sender<()>,
    },

    /// Gracefully shut down the collector
    Shutdown,
}
