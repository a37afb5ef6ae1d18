//! Prometheus text exposition (`text/plain; version=0.0.4`)

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use super::series::{Series, SeriesKey, SeriesValue};
use super::{MetricKind, MetricSpec};

/// Render all series as flat Prometheus exposition text.
///
/// Series are grouped by metric name, sorted for deterministic output.
/// Registered metrics get `# HELP` / `# TYPE` comment lines.
pub fn render(series: &HashMap<SeriesKey, Series>, specs: &HashMap<String, MetricSpec>) -> String {
    let mut by_name: BTreeMap<&str, Vec<(&SeriesKey, &Series)>> = BTreeMap::new();
    for (key, value) in series {
        by_name.entry(key.name.as_str()).or_default().push((key, value));
    }

    let mut out = String::new();

    for (name, mut entries) in by_name {
        entries.sort_by(|a, b| a.0.labels.cmp(&b.0.labels));

        if let Some(spec) = specs.get(name) {
            if !spec.help.is_empty() {
                let _ = writeln!(out, "# HELP {} {}", name, spec.help);
            }
            let _ = writeln!(out, "# TYPE {} {}", name, spec.kind.as_str());
        } else if let Some((_, first)) = entries.first() {
            let _ = writeln!(out, "# TYPE {} {}", name, first.kind.as_str());
        }

        for (key, entry) in entries {
            render_series(&mut out, name, &key.labels, entry);
        }
    }

    out
}

fn render_series(out: &mut String, name: &str, labels: &BTreeMap<String, String>, series: &Series) {
    match (&series.kind, &series.value) {
        (MetricKind::Counter, SeriesValue::Counter { total }) => {
            let _ = writeln!(out, "{}{} {}", name, label_set(labels, &[]), format_value(*total));
        }
        (MetricKind::Gauge, SeriesValue::Gauge { value }) => {
            let _ = writeln!(out, "{}{} {}", name, label_set(labels, &[]), format_value(*value));
        }
        (
            MetricKind::Histogram,
            SeriesValue::Histogram {
                bounds,
                counts,
                sum,
                count,
            },
        ) => {
            let mut cumulative = 0u64;
            for (bound, bucket_count) in bounds.iter().zip(counts.iter()) {
                cumulative += bucket_count;
                let le = ("le".to_string(), format_value(*bound));
                let _ = writeln!(
                    out,
                    "{}_bucket{} {}",
                    name,
                    label_set(labels, &[le]),
                    cumulative
                );
            }
            cumulative += counts.last().copied().unwrap_or(0);
            let inf = ("le".to_string(), "+Inf".to_string());
            let _ = writeln!(out, "{}_bucket{} {}", name, label_set(labels, &[inf]), cumulative);
            let _ = writeln!(out, "{}_sum{} {}", name, label_set(labels, &[]), format_value(*sum));
            let _ = writeln!(out, "{}_count{} {}", name, label_set(labels, &[]), count);
        }
        (MetricKind::Summary, SeriesValue::Summary { sum, count, .. }) => {
            if let Some(quantiles) = series.quantiles() {
                for (q, value) in quantiles {
                    let quantile = ("quantile".to_string(), format_value(q));
                    let _ = writeln!(
                        out,
                        "{}{} {}",
                        name,
                        label_set(labels, &[quantile]),
                        format_value(value)
                    );
                }
            }
            let _ = writeln!(out, "{}_sum{} {}", name, label_set(labels, &[]), format_value(*sum));
            let _ = writeln!(out, "{}_count{} {}", name, label_set(labels, &[]), count);
        }
        // kind and value are constructed together; a mismatch cannot be
        // rendered meaningfully
        _ => {}
    }
}

fn label_set(labels: &BTreeMap<String, String>, extra: &[(String, String)]) -> String {
    if labels.is_empty() && extra.is_empty() {
        return String::new();
    }

    let rendered = labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain(extra.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .map(|(k, v)| format!("{}=\"{}\"", k, escape(v)))
        .collect::<Vec<_>>()
        .join(",");

    format!("{{{rendered}}}")
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
