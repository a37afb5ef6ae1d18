//! Alert lifecycle and rule evaluation
//!
//! Covers the create / re-occur / auto-resolve state machine, manual
//! operations and their idempotence, and fingerprint scoping.

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use vigil::actors::messages::ManualAlertRequest;
use vigil::error::MonitorError;
use vigil::metrics::MetricSample;
use vigil::store::AlertFilter;
use vigil::{AlertSeverity, AlertStatus, ComparisonOp};

use super::helpers::*;

#[tokio::test]
async fn test_crossing_up_then_down_creates_and_auto_resolves_once() {
    let core = spawn_core(
        vec![],
        vec![threshold_rule("cpu_high", "cpu_usage", ComparisonOp::Gt, 80.0)],
        vec![],
    );

    // below threshold: nothing fires
    core.metrics
        .record(MetricSample::gauge("cpu_usage", 50.0))
        .await
        .unwrap();
    core.engine.evaluate_now().await.unwrap();
    assert!(core.engine.list_active().await.unwrap().is_empty());

    // crossing up
    core.metrics
        .record(MetricSample::gauge("cpu_usage", 92.0))
        .await
        .unwrap();
    core.engine.evaluate_now().await.unwrap();

    let active = core.engine.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    let alert = &active[0];
    assert_eq!(alert.status, AlertStatus::Active);
    assert_eq!(alert.rule_id.as_deref(), Some("cpu_high"));
    assert_eq!(alert.data["currentValue"], 92.0);

    // condition keeps holding: no duplicates, occurrences grow
    core.engine.evaluate_now().await.unwrap();
    core.engine.evaluate_now().await.unwrap();

    let active = core.engine.list_active().await.unwrap();
    assert_eq!(active.len(), 1, "no duplicate alerts while condition holds");
    assert_eq!(active[0].occurrence_count, 3);

    // crossing down: auto-resolve by the system
    core.metrics
        .record(MetricSample::gauge("cpu_usage", 40.0))
        .await
        .unwrap();
    core.engine.evaluate_now().await.unwrap();

    assert!(core.engine.list_active().await.unwrap().is_empty());
    let resolved = core.engine.get_alert(&alert.id).await.unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("system"));

    // staying below keeps it resolved, nothing new fires
    core.engine.evaluate_now().await.unwrap();
    assert!(core.engine.list_active().await.unwrap().is_empty());

    core.shutdown().await;
}

#[tokio::test]
async fn test_missing_metric_skips_rule() {
    let core = spawn_core(
        vec![],
        vec![threshold_rule("ghost", "never_recorded", ComparisonOp::Gt, 1.0)],
        vec![],
    );

    core.engine.evaluate_now().await.unwrap();
    assert!(core.engine.list_active().await.unwrap().is_empty());

    core.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_value_does_not_resolve_existing_alert() {
    let mut rule = threshold_rule("service_down", "service_up", ComparisonOp::Eq, 0.0);
    rule.fingerprint_labels = vec!["service".to_string()];

    let core = spawn_core(
        vec![service_config("orders", &refused_url())],
        vec![rule],
        vec![],
    );

    core.health.poll_all().await.unwrap();
    core.engine.evaluate_now().await.unwrap();
    assert_eq!(core.engine.list_active().await.unwrap().len(), 1);

    // once the service is deregistered the rule has no value to evaluate:
    // the tick must neither fire nor resolve
    assert!(core.health.remove_service("orders").await.unwrap());
    core.engine.evaluate_now().await.unwrap();

    let active = core.engine.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].status, AlertStatus::Active);

    core.shutdown().await;
}

#[tokio::test]
async fn test_rule_trigger_bookkeeping() {
    let core = spawn_core(
        vec![],
        vec![threshold_rule("err", "error_rate", ComparisonOp::Gt, 5.0)],
        vec![],
    );

    core.metrics
        .record(MetricSample::gauge("error_rate", 9.0))
        .await
        .unwrap();
    core.engine.evaluate_now().await.unwrap();

    let rule = core.registry.get_rule("err").await.unwrap();
    assert_eq!(rule.trigger_count, 1);
    assert!(rule.last_triggered.is_some());

    // still holding: same alert, no new trigger
    core.engine.evaluate_now().await.unwrap();
    let rule = core.registry.get_rule("err").await.unwrap();
    assert_eq!(rule.trigger_count, 1);

    core.shutdown().await;
}

#[tokio::test]
async fn test_disabled_rule_is_not_evaluated() {
    let core = spawn_core(
        vec![],
        vec![threshold_rule("cpu", "cpu_usage", ComparisonOp::Gt, 80.0)],
        vec![],
    );

    core.registry.toggle_rule("cpu").await.unwrap();

    core.metrics
        .record(MetricSample::gauge("cpu_usage", 99.0))
        .await
        .unwrap();
    core.engine.evaluate_now().await.unwrap();

    assert!(core.engine.list_active().await.unwrap().is_empty());

    core.shutdown().await;
}

#[tokio::test]
async fn test_sustained_condition_defers_alert() {
    let mut rule = threshold_rule("cpu_sustained", "cpu_usage", ComparisonOp::Gt, 80.0);
    rule.condition.sustained_secs = 3600;

    let core = spawn_core(vec![], vec![rule], vec![]);

    core.metrics
        .record(MetricSample::gauge("cpu_usage", 95.0))
        .await
        .unwrap();

    // holds, but the sustain window has not elapsed
    core.engine.evaluate_now().await.unwrap();
    core.engine.evaluate_now().await.unwrap();
    assert!(core.engine.list_active().await.unwrap().is_empty());

    core.shutdown().await;
}

#[tokio::test]
async fn test_per_service_fingerprints_fire_independently() {
    let mut rule = threshold_rule("service_down", "service_up", ComparisonOp::Eq, 0.0);
    rule.fingerprint_labels = vec!["service".to_string()];

    let core = spawn_core(
        vec![
            service_config("users", &refused_url()),
            service_config("payments", &refused_url()),
        ],
        vec![rule],
        vec![],
    );

    core.health.poll_all().await.unwrap();
    core.engine.evaluate_now().await.unwrap();

    let mut active = core.engine.list_active().await.unwrap();
    active.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

    assert_eq!(active.len(), 2, "one alert per down service");
    assert_eq!(active[0].fingerprint, "service_down{service=payments}");
    assert_eq!(active[1].fingerprint, "service_down{service=users}");

    // evaluating again must not merge or duplicate the instances
    core.engine.evaluate_now().await.unwrap();
    assert_eq!(core.engine.list_active().await.unwrap().len(), 2);

    core.shutdown().await;
}

#[tokio::test]
async fn test_acknowledge_then_resolve_transitions() {
    let core = spawn_core(vec![], vec![], vec![]);

    let alert = core
        .engine
        .create_manual_alert(ManualAlertRequest {
            title: "Disk almost full".to_string(),
            message: "Manually raised by ops".to_string(),
            severity: AlertSeverity::Medium,
            fingerprint: None,
            data: serde_json::Value::Null,
        })
        .await
        .unwrap();
    assert_eq!(alert.status, AlertStatus::Active);
    assert_eq!(alert.source, "manual");

    let acked = core
        .engine
        .acknowledge(&alert.id, "ops", Some("looking into it".to_string()))
        .await
        .unwrap();
    assert_eq!(acked.status, AlertStatus::Acknowledged);
    assert_eq!(acked.acknowledged_by.as_deref(), Some("ops"));
    assert!(acked.acknowledged_at.is_some());

    let resolved = core
        .engine
        .resolve(&alert.id, "ops", None)
        .await
        .unwrap();
    assert_eq!(resolved.status, AlertStatus::Resolved);
    assert_eq!(resolved.resolved_by.as_deref(), Some("ops"));

    core.shutdown().await;
}

#[tokio::test]
async fn test_resolve_twice_is_idempotent() {
    let core = spawn_core(vec![], vec![], vec![]);

    let alert = core
        .engine
        .create_manual_alert(ManualAlertRequest {
            title: "One-off".to_string(),
            message: "".to_string(),
            severity: AlertSeverity::Low,
            fingerprint: None,
            data: serde_json::Value::Null,
        })
        .await
        .unwrap();

    let first = core.engine.resolve(&alert.id, "alice", None).await.unwrap();
    let first_resolved_at = first.resolved_at.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let second = core.engine.resolve(&alert.id, "bob", None).await.unwrap();
    assert_eq!(second.resolved_at.unwrap(), first_resolved_at);
    assert_eq!(
        second.resolved_by.as_deref(),
        Some("alice"),
        "second resolve must not overwrite the first"
    );

    // acknowledging a resolved alert is also a no-op
    let acked = core.engine.acknowledge(&alert.id, "bob", None).await.unwrap();
    assert_eq!(acked.status, AlertStatus::Resolved);
    assert!(acked.acknowledged_by.is_none());

    core.shutdown().await;
}

#[tokio::test]
async fn test_manual_operations_on_unknown_alert_are_not_found() {
    let core = spawn_core(vec![], vec![], vec![]);

    let err = core
        .engine
        .resolve("alert_404", "ops", None)
        .await
        .unwrap_err();
    assert_matches!(
        err.downcast_ref::<MonitorError>().unwrap(),
        MonitorError::NotFound(_)
    );

    let err = core
        .engine
        .acknowledge("alert_404", "ops", None)
        .await
        .unwrap_err();
    assert_matches!(
        err.downcast_ref::<MonitorError>().unwrap(),
        MonitorError::NotFound(_)
    );

    core.shutdown().await;
}

#[tokio::test]
async fn test_manual_alert_with_conflicting_fingerprint_rejected() {
    let core = spawn_core(vec![], vec![], vec![]);

    let request = ManualAlertRequest {
        title: "Deploy freeze".to_string(),
        message: "freeze active".to_string(),
        severity: AlertSeverity::Low,
        fingerprint: Some("deploy_freeze".to_string()),
        data: serde_json::Value::Null,
    };

    core.engine
        .create_manual_alert(request.clone())
        .await
        .unwrap();

    let err = core.engine.create_manual_alert(request).await.unwrap_err();
    assert_matches!(
        err.downcast_ref::<MonitorError>().unwrap(),
        MonitorError::ConcurrencyConflict(_)
    );

    assert_eq!(core.engine.list_active().await.unwrap().len(), 1);

    core.shutdown().await;
}

#[tokio::test]
async fn test_alert_statistics_and_filters() {
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

    core.engine
        .create_manual_alert(ManualAlertRequest {
            title: "Manual".to_string(),
            message: "".to_string(),
            severity: AlertSeverity::Low,
            fingerprint: None,
            data: serde_json::Value::Null,
        })
        .await
        .unwrap();

    let stats = core.engine.statistics("24h").await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 2);
    assert_eq!(stats.by_source.get("rule"), Some(&1));
    assert_eq!(stats.by_source.get("manual"), Some(&1));
    assert_eq!(stats.by_severity.get("high"), Some(&1));
    assert_eq!(stats.by_severity.get("low"), Some(&1));

    let high_only = core
        .engine
        .list_alerts(AlertFilter {
            severity: Some(AlertSeverity::High),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(high_only.len(), 1);

    core.shutdown().await;
}
