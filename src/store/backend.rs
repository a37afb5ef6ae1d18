//! Alert store trait definition

use async_trait::async_trait;

use crate::{Alert, AlertSeverity, AlertStatus};

use super::error::StoreResult;

/// Filter and pagination parameters for listing alerts
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<AlertSeverity>,

    /// Maximum number of results (default 50)
    pub limit: Option<usize>,

    pub offset: usize,
}

/// Trait for alert repositories
///
/// The engine actor is the only writer; implementations therefore do not
/// need to provide cross-key transactional guarantees, only per-call
/// consistency.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are used across async
/// tasks.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert or replace an alert by id
    async fn put(&self, alert: Alert) -> StoreResult<()>;

    /// Fetch an alert by id
    async fn get(&self, id: &str) -> StoreResult<Option<Alert>>;

    /// Remove an alert by id, returning whether it existed
    async fn delete(&self, id: &str) -> StoreResult<bool>;

    /// List alerts matching the filter, newest first
    async fn list(&self, filter: AlertFilter) -> StoreResult<Vec<Alert>>;

    /// All alerts with status `active`, newest first
    async fn list_active(&self) -> StoreResult<Vec<Alert>>;

    /// The active alert for a fingerprint, if any
    ///
    /// The at-most-one-active-per-fingerprint invariant means this is
    /// `Option`, never a list.
    async fn find_active(&self, fingerprint: &str) -> StoreResult<Option<Alert>>;

    /// Total number of stored alerts
    async fn count(&self) -> StoreResult<usize>;
}
