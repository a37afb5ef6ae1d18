//! Notification dispatch
//!
//! Maps alerts to channel-specific payloads and performs the delivery
//! calls. Delivery is best-effort and fire-and-forget: a failed send is
//! recorded in the returned outcome and logged, but never retried and
//! never rolls back the alert it belongs to.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::{Alert, AlertSeverity};

/// Request timeout for channel deliveries
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A configured notification channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Generic JSON webhook with configurable headers
    Webhook {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },

    /// Chat webhook using Slack-style attachments
    Slack { url: String },

    /// Email notification. Delivery requires an external mail relay and
    /// is currently a logged stub.
    Email { to: String },
}

/// Result of one delivery attempt
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub channel: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DispatchOutcome {
    fn success(channel: &str, status_code: Option<u16>) -> Self {
        Self {
            channel: channel.to_string(),
            success: true,
            status_code,
            error: None,
            timestamp: Utc::now(),
        }
    }

    fn failure(channel: &str, status_code: Option<u16>, error: String) -> Self {
        Self {
            channel: channel.to_string(),
            success: false,
            status_code,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }
}

/// Dispatches alerts to notification channels
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: Client,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(DISPATCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Deliver an alert to every channel, concurrently and independently.
    ///
    /// One channel failing does not block or fail the others.
    pub async fn dispatch_all(
        &self,
        channels: &[(String, ChannelConfig)],
        alert: &Alert,
    ) -> Vec<DispatchOutcome> {
        let sends = channels.iter().map(|(id, channel)| self.send(id, channel, alert));

        let outcomes = join_all(sends).await;
        for outcome in &outcomes {
            if outcome.success {
                info!(
                    "notification sent for alert {} via channel {}",
                    alert.id, outcome.channel
                );
            } else {
                error!(
                    "notification for alert {} via channel {} failed: {}",
                    alert.id,
                    outcome.channel,
                    outcome.error.as_deref().unwrap_or("unknown")
                );
            }
        }

        outcomes
    }

    /// Deliver an alert to a single channel.
    #[instrument(skip(self, channel, alert), fields(alert_id = %alert.id))]
    pub async fn send(
        &self,
        channel_id: &str,
        channel: &ChannelConfig,
        alert: &Alert,
    ) -> DispatchOutcome {
        match channel {
            ChannelConfig::Webhook { url, headers } => {
                self.post_json(channel_id, url, headers, webhook_payload(alert))
                    .await
            }
            ChannelConfig::Slack { url } => {
                self.post_json(channel_id, url, &HashMap::new(), slack_payload(alert))
                    .await
            }
            ChannelConfig::Email { to } => {
                // no mail relay wired up; record the intent
                warn!("email notification for alert {} to {} (stub)", alert.id, to);
                DispatchOutcome::success(channel_id, None)
            }
        }
    }

    async fn post_json(
        &self,
        channel_id: &str,
        url: &str,
        headers: &HashMap<String, String>,
        payload: serde_json::Value,
    ) -> DispatchOutcome {
        let mut request = self.client.post(url).json(&payload);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    DispatchOutcome::success(channel_id, Some(status.as_u16()))
                } else {
                    DispatchOutcome::failure(
                        channel_id,
                        Some(status.as_u16()),
                        format!("delivery failed with status {}", status),
                    )
                }
            }
            Err(e) => DispatchOutcome::failure(channel_id, None, e.to_string()),
        }
    }
}

/// Standard webhook payload for an alert.
pub fn webhook_payload(alert: &Alert) -> serde_json::Value {
    json!({
        "alert": {
            "id": alert.id,
            "title": alert.title,
            "message": alert.message,
            "severity": alert.severity,
            "status": alert.status,
            "source": alert.source,
            "createdAt": alert.created_at.to_rfc3339(),
            "data": alert.data,
        },
        "service": "metrics-service",
        "timestamp": Utc::now().to_rfc3339(),
    })
}

fn slack_payload(alert: &Alert) -> serde_json::Value {
    let color = match alert.severity {
        AlertSeverity::Critical => "#ff0000",
        AlertSeverity::High => "#ff7700",
        AlertSeverity::Medium => "#ffaa00",
        AlertSeverity::Low => "#0066cc",
    };

    json!({
        "text": format!("Alert: {}", alert.title),
        "attachments": [{
            "color": color,
            "title": alert.title,
            "text": alert.message,
            "fields": [
                { "title": "Severity", "value": alert.severity.as_str(), "short": true },
                { "title": "Status", "value": alert.status.as_str(), "short": true },
                { "title": "Source", "value": alert.source, "short": true },
                { "title": "Time", "value": alert.created_at.to_rfc3339(), "short": true },
            ],
            "footer": "Metrics Service",
            "ts": alert.created_at.timestamp(),
        }],
    })
}
