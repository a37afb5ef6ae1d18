//! Time series primitives for the aggregator
//!
//! A time series is identified by its metric name plus its sorted label
//! pairs; two samples with different label values for the same name are
//! distinct series.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Default histogram bucket bounds in seconds
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Observations kept per summary series for quantile computation
const SUMMARY_WINDOW: usize = 1024;

/// Quantiles reported by summary series
pub const SUMMARY_QUANTILES: [f64; 3] = [0.5, 0.9, 0.99];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricCategory {
    System,
    Application,
    Business,
}

impl MetricCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricCategory::System => "system",
            MetricCategory::Application => "application",
            MetricCategory::Business => "business",
        }
    }
}

/// A single recorded observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub kind: MetricKind,

    #[serde(default = "default_category")]
    pub category: MetricCategory,

    pub value: f64,

    /// Ordered label map; identity-relevant
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn default_category() -> MetricCategory {
    MetricCategory::Application
}

impl MetricSample {
    pub fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            category: MetricCategory::Application,
            value,
            labels: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Counter, value)
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Gauge, value)
    }

    pub fn histogram(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Histogram, value)
    }

    pub fn summary(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Summary, value)
    }

    pub fn category(mut self, category: MetricCategory) -> Self {
        self.category = category;
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Storage identity of a time series: `(name, sorted label pairs)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl SeriesKey {
    pub fn new(name: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    pub fn of(sample: &MetricSample) -> Self {
        Self {
            name: sample.name.clone(),
            labels: sample.labels.clone(),
        }
    }
}

/// Per-kind accumulated state of one series
#[derive(Debug, Clone)]
pub enum SeriesValue {
    Counter {
        total: f64,
    },
    Gauge {
        value: f64,
    },
    Histogram {
        bounds: Vec<f64>,
        /// Per-bucket (non-cumulative) observation counts; rendered
        /// cumulatively on export
        counts: Vec<u64>,
        sum: f64,
        count: u64,
    },
    Summary {
        window: VecDeque<f64>,
        sum: f64,
        count: u64,
    },
}

/// One stored time series
#[derive(Debug, Clone)]
pub struct Series {
    pub kind: MetricKind,
    pub category: MetricCategory,
    pub value: SeriesValue,
    pub last_updated: DateTime<Utc>,
}

impl Series {
    pub fn new(kind: MetricKind, category: MetricCategory, bounds: Option<Vec<f64>>) -> Self {
        let value = match kind {
            MetricKind::Counter => SeriesValue::Counter { total: 0.0 },
            MetricKind::Gauge => SeriesValue::Gauge { value: 0.0 },
            MetricKind::Histogram => {
                let bounds = bounds.unwrap_or_else(|| DEFAULT_BUCKETS.to_vec());
                let counts = vec![0; bounds.len() + 1];
                SeriesValue::Histogram {
                    bounds,
                    counts,
                    sum: 0.0,
                    count: 0,
                }
            }
            MetricKind::Summary => SeriesValue::Summary {
                window: VecDeque::with_capacity(SUMMARY_WINDOW),
                sum: 0.0,
                count: 0,
            },
        };

        Self {
            kind,
            category,
            value,
            last_updated: Utc::now(),
        }
    }

    /// Fold a sample into this series.
    ///
    /// Counters are monotonic: a negative increment fails with
    /// `InvalidOperation`. Gauges are last-write-wins. Histograms and
    /// summaries accumulate the observation.
    pub fn apply(&mut self, sample: &MetricSample) -> Result<(), MonitorError> {
        if sample.kind != self.kind {
            return Err(MonitorError::InvalidOperation(format!(
                "metric '{}' is a {}, cannot record a {} sample",
                sample.name,
                self.kind.as_str(),
                sample.kind.as_str()
            )));
        }

        match &mut self.value {
            SeriesValue::Counter { total } => {
                if sample.value < 0.0 {
                    return Err(MonitorError::InvalidOperation(format!(
                        "negative increment {} on counter '{}'",
                        sample.value, sample.name
                    )));
                }
                *total += sample.value;
            }
            SeriesValue::Gauge { value } => {
                *value = sample.value;
            }
            SeriesValue::Histogram {
                bounds,
                counts,
                sum,
                count,
            } => {
                let bucket = bounds
                    .iter()
                    .position(|b| sample.value <= *b)
                    .unwrap_or(bounds.len());
                counts[bucket] += 1;
                *sum += sample.value;
                *count += 1;
            }
            SeriesValue::Summary { window, sum, count } => {
                if window.len() == SUMMARY_WINDOW {
                    window.pop_front();
                }
                window.push_back(sample.value);
                *sum += sample.value;
                *count += 1;
            }
        }

        self.last_updated = sample.timestamp;
        Ok(())
    }

    /// Scalar value of this series, as seen by rule evaluation.
    ///
    /// Counters and gauges report directly; histograms and summaries
    /// report the mean of their observations.
    pub fn current_value(&self) -> Option<f64> {
        match &self.value {
            SeriesValue::Counter { total } => Some(*total),
            SeriesValue::Gauge { value } => Some(*value),
            SeriesValue::Histogram { sum, count, .. } | SeriesValue::Summary { sum, count, .. } => {
                if *count == 0 {
                    None
                } else {
                    Some(*sum / *count as f64)
                }
            }
        }
    }

    /// Nearest-rank quantiles over the summary window (no interpolation).
    pub fn quantiles(&self) -> Option<Vec<(f64, f64)>> {
        let SeriesValue::Summary { window, .. } = &self.value else {
            return None;
        };

        if window.is_empty() {
            return Some(SUMMARY_QUANTILES.iter().map(|q| (*q, 0.0)).collect());
        }

        let mut sorted: Vec<f64> = window.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        Some(
            SUMMARY_QUANTILES
                .iter()
                .map(|q| {
                    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
                    (*q, sorted[rank - 1])
                })
                .collect(),
        )
    }
}
