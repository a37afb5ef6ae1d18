//! Error types for the monitoring core

use std::fmt;

/// Result type alias for management surface operations
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors surfaced to callers of the management surface
///
/// Probe failures are deliberately absent: they are recorded on the
/// `HealthCheckResult` and never propagated as errors.
#[derive(Debug)]
pub enum MonitorError {
    /// Malformed rule, metric or service definition
    Validation(String),

    /// Unknown service, rule or alert id
    NotFound(String),

    /// Operation not permitted for the metric kind (e.g. negative
    /// counter increment)
    InvalidOperation(String),

    /// Duplicate active-alert creation attempt for a fingerprint
    ConcurrencyConflict(String),

    /// Notification channel delivery failure
    Notification(String),

    /// Alert repository failure
    Store(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Validation(msg) => write!(f, "validation failed: {}", msg),
            MonitorError::NotFound(msg) => write!(f, "not found: {}", msg),
            MonitorError::InvalidOperation(msg) => write!(f, "invalid operation: {}", msg),
            MonitorError::ConcurrencyConflict(msg) => {
                write!(f, "concurrent alert creation conflict: {}", msg)
            }
            MonitorError::Notification(msg) => write!(f, "notification failed: {}", msg),
            MonitorError::Store(msg) => write!(f, "alert store error: {}", msg),
        }
    }
}

impl std::error::Error for MonitorError {}

impl From<crate::store::error::StoreError> for MonitorError {
    fn from(err: crate::store::error::StoreError) -> Self {
        MonitorError::Store(err.to_string())
    }
}

/// Classification of a failed health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    ConnectionRefused,
    Timeout,
    /// The probe completed with a 4xx/5xx status
    HttpError,
    Unknown,
}

impl ProbeErrorKind {
    /// Map a transport-level failure to its kind.
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeErrorKind::Timeout
        } else if err.is_connect() {
            ProbeErrorKind::ConnectionRefused
        } else {
            ProbeErrorKind::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeErrorKind::ConnectionRefused => "connection_refused",
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::HttpError => "http_error",
            ProbeErrorKind::Unknown => "unknown",
        }
    }
}
