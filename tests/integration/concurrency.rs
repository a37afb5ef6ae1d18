//! Concurrency and race condition tests
//!
//! - the at-most-one-active-alert-per-fingerprint invariant under
//!   concurrent create attempts
//! - concurrent metric writers
//! - service removal racing an in-flight poll cycle

use std::collections::HashMap;
use std::time::Duration;

use vigil::actors::messages::ManualAlertRequest;
use vigil::error::MonitorError;
use vigil::metrics::MetricSample;
use vigil::{AlertSeverity, AlertStatus, ComparisonOp};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::helpers::*;

#[tokio::test]
async fn test_concurrent_manual_creates_single_active_per_fingerprint() {
    let core = spawn_core(vec![], vec![], vec![]);

    let mut tasks = vec![];
    for i in 0..20 {
        let engine = core.engine.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .create_manual_alert(ManualAlertRequest {
                    title: format!("racer {i}"),
                    message: "".to_string(),
                    severity: AlertSeverity::High,
                    fingerprint: Some("shared_fingerprint".to_string()),
                    data: serde_json::Value::Null,
                })
                .await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => {
                assert!(matches!(
                    e.downcast_ref::<MonitorError>().unwrap(),
                    MonitorError::ConcurrencyConflict(_)
                ));
                conflicts += 1;
            }
        }
    }

    assert_eq!(created, 1, "exactly one create must win");
    assert_eq!(conflicts, 19);

    let active = core.engine.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].fingerprint, "shared_fingerprint");

    core.shutdown().await;
}

#[tokio::test]
async fn test_evaluation_racing_manual_resolution_stays_consistent() {
    let core = spawn_core(
        vec![],
        vec![threshold_rule("cpu", "cpu_usage", ComparisonOp::Gt, 80.0)],
        vec![],
    );

    core.metrics
        .record(MetricSample::gauge("cpu_usage", 95.0))
        .await
        .unwrap();
    core.engine.evaluate_now().await.unwrap();

    let alert_id = core.engine.list_active().await.unwrap()[0].id.clone();

    // resolve manually while evaluation passes keep running
    let resolver = {
        let engine = core.engine.clone();
        tokio::spawn(async move { engine.resolve(&alert_id, "ops", None).await })
    };

    let evaluator = {
        let engine = core.engine.clone();
        tokio::spawn(async move {
            for _ in 0..5 {
                engine.evaluate_now().await.unwrap();
            }
        })
    };

    resolver.await.unwrap().unwrap();
    evaluator.await.unwrap();

    // the condition still holds, so a new alert may exist; but never
    // more than one active per fingerprint
    let active = core.engine.list_active().await.unwrap();
    assert!(active.len() <= 1);

    let mut fingerprints: Vec<&str> = active.iter().map(|a| a.fingerprint.as_str()).collect();
    fingerprints.dedup();
    assert_eq!(fingerprints.len(), active.len());

    core.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_counter_writers_lose_no_increments() {
    let core = spawn_core(vec![], vec![], vec![]);

    let mut tasks = vec![];
    for _ in 0..10 {
        let metrics = core.metrics.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..100 {
                metrics
                    .record(MetricSample::counter("http_requests_total", 1.0))
                    .await
                    .unwrap();
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(
        core.metrics.get_value("http_requests_total", None).await,
        Some(1000.0)
    );

    core.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_gauge_writers_keep_series_isolated() {
    let core = spawn_core(vec![], vec![], vec![]);

    let mut tasks = vec![];
    for i in 0..8 {
        let metrics = core.metrics.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..50 {
                metrics
                    .record(
                        MetricSample::gauge("queue_size", i as f64)
                            .label("queue", format!("q{i}")),
                    )
                    .await
                    .unwrap();
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    let values: HashMap<String, f64> = core
        .metrics
        .series_values("queue_size")
        .await
        .into_iter()
        .map(|(labels, value)| (labels.get("queue").unwrap().clone(), value))
        .collect();

    assert_eq!(values.len(), 8);
    for i in 0..8 {
        assert_eq!(values.get(&format!("q{i}")), Some(&(i as f64)));
    }

    core.shutdown().await;
}

#[tokio::test]
async fn test_remove_service_during_slow_poll_discards_result() {
    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&slow)
        .await;

    let core = spawn_core(
        vec![service_config("doomed-service", &slow.uri())],
        vec![],
        vec![],
    );

    // start a full poll; its probe takes 500ms
    let poller = {
        let health = core.health.clone();
        tokio::spawn(async move { health.poll_all().await })
    };

    // remove while the probe is in flight; the command queues behind the
    // poll and the late result must not resurrect the service
    let removed = core.health.remove_service("doomed-service").await.unwrap();
    assert!(removed);

    poller.await.unwrap().unwrap();

    let snapshot = core.health.snapshot().await.unwrap();
    assert_eq!(snapshot.total_services, 0);
    assert!(!snapshot.services.contains_key("doomed-service"));

    core.shutdown().await;
}

#[tokio::test]
async fn test_manual_create_then_rule_evaluation_does_not_duplicate() {
    let mut rule = threshold_rule("cpu", "cpu_usage", ComparisonOp::Gt, 80.0);
    rule.fingerprint_labels = vec![];

    let core = spawn_core(vec![], vec![rule], vec![]);

    // a manual alert claims the rule's fingerprint before any evaluation
    core.engine
        .create_manual_alert(ManualAlertRequest {
            title: "Preclaimed".to_string(),
            message: "".to_string(),
            severity: AlertSeverity::High,
            fingerprint: Some("cpu".to_string()),
            data: serde_json::Value::Null,
        })
        .await
        .unwrap();

    core.metrics
        .record(MetricSample::gauge("cpu_usage", 95.0))
        .await
        .unwrap();
    core.engine.evaluate_now().await.unwrap();

    // the engine sees the existing active alert and only re-occurs it
    let active = core.engine.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].status, AlertStatus::Active);
    assert_eq!(active[0].occurrence_count, 2);

    core.shutdown().await;
}
