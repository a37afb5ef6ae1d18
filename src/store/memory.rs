//! In-memory alert store (no persistence)
//!
//! Default backend and the one used by tests. All data is lost on
//! restart, which matches the core's non-goal of durable alert history.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Alert, AlertStatus};

use super::backend::{AlertFilter, AlertStore};
use super::error::StoreResult;

const DEFAULT_LIST_LIMIT: usize = 50;

/// In-memory alert store backed by a `RwLock`ed map
#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<HashMap<String, Alert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn put(&self, alert: Alert) -> StoreResult<()> {
        self.alerts.write().await.insert(alert.id.clone(), alert);
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Alert>> {
        Ok(self.alerts.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        Ok(self.alerts.write().await.remove(id).is_some())
    }

    async fn list(&self, filter: AlertFilter) -> StoreResult<Vec<Alert>> {
        let alerts = self.alerts.read().await;

        let mut matching: Vec<Alert> = alerts
            .values()
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .filter(|a| filter.severity.is_none_or(|s| a.severity == s))
            .cloned()
            .collect();

        // newest first
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(limit)
            .collect())
    }

    async fn list_active(&self) -> StoreResult<Vec<Alert>> {
        self.list(AlertFilter {
            status: Some(AlertStatus::Active),
            limit: Some(usize::MAX),
            ..Default::default()
        })
        .await
    }

    async fn find_active(&self, fingerprint: &str) -> StoreResult<Option<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .find(|a| a.status == AlertStatus::Active && a.fingerprint == fingerprint)
            .cloned())
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.alerts.read().await.len())
    }
}
