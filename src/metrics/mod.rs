//! Metric aggregation and retrieval surface
//!
//! The aggregator maintains the current value of every time series and
//! exposes read, write and export operations. It is shared behind an
//! `Arc`; writers (request hooks, the host collector, webhook ingestion)
//! run concurrently and every update takes one write-lock section, so
//! updates are atomic per series and immediately visible to readers.

pub mod export;
pub mod series;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::{MonitorError, MonitorResult};

pub use series::{MetricCategory, MetricKind, MetricSample, Series, SeriesKey, SeriesValue};

/// Registration metadata for a metric name
#[derive(Debug, Clone)]
pub struct MetricSpec {
    pub name: String,
    pub kind: MetricKind,
    pub category: MetricCategory,
    pub help: String,

    /// Declared label names; recorded samples must use exactly these
    pub label_names: Vec<String>,
}

/// Handle returned by [`MetricsAggregator::register_custom`]
///
/// Carries no reference to the aggregator; it is a stamp for building
/// correctly-typed samples for the registered metric.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    pub name: String,
    pub kind: MetricKind,
    pub category: MetricCategory,
}

impl MetricHandle {
    pub fn sample(&self, value: f64) -> MetricSample {
        MetricSample::new(self.name.clone(), self.kind, value).category(self.category)
    }
}

/// Snapshot of one series for summaries
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSnapshot {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub kind: MetricKind,
    pub value: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantiles: Option<Vec<(f64, f64)>>,

    pub last_updated: DateTime<Utc>,
}

/// Structured snapshot of all series in one category
#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    pub category: MetricCategory,
    pub series: Vec<SeriesSnapshot>,
    pub timestamp: DateTime<Utc>,
}

/// All three category summaries at one point in time
#[derive(Debug, Clone, Serialize)]
pub struct CompleteSummary {
    pub system: CategorySummary,
    pub application: CategorySummary,
    pub business: CategorySummary,
    pub timestamp: DateTime<Utc>,
}

/// Shared time-series store
#[derive(Default)]
pub struct MetricsAggregator {
    series: RwLock<HashMap<SeriesKey, Series>>,
    specs: RwLock<HashMap<String, MetricSpec>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom metric with help text and declared labels.
    ///
    /// Registration is optional (`record` creates series implicitly),
    /// but registered metrics get HELP/TYPE lines in the Prometheus
    /// exposition and label-name validation on record.
    pub async fn register_custom(
        &self,
        kind: MetricKind,
        name: impl Into<String>,
        help: impl Into<String>,
        label_names: Vec<String>,
        category: MetricCategory,
    ) -> MonitorResult<MetricHandle> {
        let name = name.into();
        if name.is_empty() {
            return Err(MonitorError::Validation(
                "metric name must not be empty".to_string(),
            ));
        }

        let mut specs = self.specs.write().await;
        if let Some(existing) = specs.get(&name)
            && existing.kind != kind
        {
            return Err(MonitorError::Validation(format!(
                "metric '{}' already registered as {}",
                name,
                existing.kind.as_str()
            )));
        }

        specs.insert(
            name.clone(),
            MetricSpec {
                name: name.clone(),
                kind,
                category,
                help: help.into(),
                label_names,
            },
        );

        Ok(MetricHandle {
            name,
            kind,
            category,
        })
    }

    /// Record a sample.
    ///
    /// The update is visible to any subsequent read; there is no
    /// buffering window.
    pub async fn record(&self, sample: MetricSample) -> MonitorResult<()> {
        if sample.name.is_empty() {
            return Err(MonitorError::Validation(
                "metric name must not be empty".to_string(),
            ));
        }
        if !sample.value.is_finite() {
            return Err(MonitorError::Validation(format!(
                "non-finite value for metric '{}'",
                sample.name
            )));
        }

        self.validate_against_spec(&sample).await?;

        let key = SeriesKey::of(&sample);
        let mut series = self.series.write().await;
        match series.get_mut(&key) {
            Some(existing) => existing.apply(&sample)?,
            None => {
                let mut created = Series::new(sample.kind, sample.category, None);
                created.apply(&sample)?;
                trace!("created series {} {:?}", sample.name, sample.labels);
                series.insert(key, created);
            }
        }

        Ok(())
    }

    async fn validate_against_spec(&self, sample: &MetricSample) -> MonitorResult<()> {
        let specs = self.specs.read().await;
        let Some(spec) = specs.get(&sample.name) else {
            return Ok(());
        };

        if spec.kind != sample.kind {
            return Err(MonitorError::Validation(format!(
                "metric '{}' is registered as {}, got a {} sample",
                sample.name,
                spec.kind.as_str(),
                sample.kind.as_str()
            )));
        }

        if !spec.label_names.is_empty() {
            let mut declared: Vec<&str> = spec.label_names.iter().map(String::as_str).collect();
            declared.sort_unstable();
            let recorded: Vec<&str> = sample.labels.keys().map(String::as_str).collect();
            if declared != recorded {
                return Err(MonitorError::Validation(format!(
                    "metric '{}' declares labels {:?}, got {:?}",
                    sample.name, spec.label_names, recorded
                )));
            }
        }

        Ok(())
    }

    /// Current scalar value of a series.
    ///
    /// With `labels` the exact series is looked up. Without, the single
    /// series of that name is returned if unambiguous, falling back to
    /// the unlabeled series.
    pub async fn get_value(
        &self,
        name: &str,
        labels: Option<&BTreeMap<String, String>>,
    ) -> Option<f64> {
        let series = self.series.read().await;

        if let Some(labels) = labels {
            let key = SeriesKey::new(name, labels.clone());
            return series.get(&key).and_then(Series::current_value);
        }

        let mut matching = series.iter().filter(|(key, _)| key.name == name);
        let first = matching.next()?;
        if matching.next().is_none() {
            return first.1.current_value();
        }

        let unlabeled = SeriesKey::new(name, BTreeMap::new());
        series.get(&unlabeled).and_then(Series::current_value)
    }

    /// All series of a name with their current values, for per-label
    /// rule expansion.
    pub async fn series_values(&self, name: &str) -> Vec<(BTreeMap<String, String>, f64)> {
        self.series
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.name == name)
            .filter_map(|(key, s)| s.current_value().map(|v| (key.labels.clone(), v)))
            .collect()
    }

    /// Structured snapshot of every series in a category.
    pub async fn get_summary(&self, category: MetricCategory) -> CategorySummary {
        let series = self.series.read().await;

        let mut snapshots: Vec<SeriesSnapshot> = series
            .iter()
            .filter(|(_, s)| s.category == category)
            .map(|(key, s)| SeriesSnapshot {
                name: key.name.clone(),
                labels: key.labels.clone(),
                kind: s.kind,
                value: s.current_value(),
                quantiles: s.quantiles(),
                last_updated: s.last_updated,
            })
            .collect();

        snapshots.sort_by(|a, b| a.name.cmp(&b.name));

        CategorySummary {
            category,
            series: snapshots,
            timestamp: Utc::now(),
        }
    }

    /// All three category summaries at once.
    pub async fn complete_summary(&self) -> CompleteSummary {
        CompleteSummary {
            system: self.get_summary(MetricCategory::System).await,
            application: self.get_summary(MetricCategory::Application).await,
            business: self.get_summary(MetricCategory::Business).await,
            timestamp: Utc::now(),
        }
    }

    /// Flat Prometheus text exposition of all current series.
    pub async fn export_prometheus(&self) -> String {
        let series = self.series.read().await;
        let specs = self.specs.read().await;
        export::render(&series, &specs)
    }
}
