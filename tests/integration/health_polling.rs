//! Health polling behavior
//!
//! These tests drive the poller against mock HTTP services:
//! - probe classification (healthy, http_error, connection_refused, timeout)
//! - snapshot aggregation
//! - service add/remove during operation
//! - health flip events

use std::time::Duration;

use pretty_assertions::assert_eq;
use vigil::actors::messages::SystemStatus;
use vigil::error::ProbeErrorKind;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::helpers::*;

#[tokio::test]
async fn test_healthy_probe_records_status_and_details() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "uptime": 1234,
        })))
        .mount(&mock_server)
        .await;

    let core = spawn_core(
        vec![service_config("user-service", &mock_server.uri())],
        vec![],
        vec![],
    );

    let result = core.health.poll_one("user-service").await.unwrap();
    assert!(result.healthy);
    assert_eq!(result.status_code, Some(200));
    assert!(result.error_kind.is_none());
    assert_eq!(result.details.unwrap()["status"], "ok");

    core.shutdown().await;
}

#[tokio::test]
async fn test_server_error_probe_is_http_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let core = spawn_core(
        vec![service_config("payment-service", &mock_server.uri())],
        vec![],
        vec![],
    );

    let result = core.health.poll_one("payment-service").await.unwrap();
    assert!(!result.healthy);
    assert_eq!(result.status_code, Some(503));
    assert_eq!(result.error_kind, Some(ProbeErrorKind::HttpError));

    core.shutdown().await;
}

#[tokio::test]
async fn test_client_error_probe_is_unhealthy() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let core = spawn_core(
        vec![service_config("ia-service", &mock_server.uri())],
        vec![],
        vec![],
    );

    let result = core.health.poll_one("ia-service").await.unwrap();
    assert!(!result.healthy);
    assert_eq!(result.error_kind, Some(ProbeErrorKind::HttpError));

    core.shutdown().await;
}

#[tokio::test]
async fn test_redirect_status_counts_as_healthy() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(302))
        .mount(&mock_server)
        .await;

    let core = spawn_core(
        vec![service_config("legacy-service", &mock_server.uri())],
        vec![],
        vec![],
    );

    let result = core.health.poll_one("legacy-service").await.unwrap();
    assert!(result.healthy, "3xx must count as healthy");

    core.shutdown().await;
}

#[tokio::test]
async fn test_connection_refused_classification() {
    let core = spawn_core(
        vec![service_config("gone-service", &refused_url())],
        vec![],
        vec![],
    );

    let result = core.health.poll_one("gone-service").await.unwrap();
    assert!(!result.healthy);
    assert_eq!(result.error_kind, Some(ProbeErrorKind::ConnectionRefused));
    assert!(result.status_code.is_none());
    assert!(result.error.is_some());

    core.shutdown().await;
}

#[tokio::test]
async fn test_timeout_classification() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let mut config = service_config("slow-service", &mock_server.uri());
    config.timeout_secs = 1;

    let core = spawn_core(vec![config], vec![], vec![]);

    let result = core.health.poll_one("slow-service").await.unwrap();
    assert!(!result.healthy);
    assert_eq!(result.error_kind, Some(ProbeErrorKind::Timeout));

    core.shutdown().await;
}

#[tokio::test]
async fn test_degraded_snapshot_one_up_three_refused() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let core = spawn_core(
        vec![
            service_config("up-service", &mock_server.uri()),
            service_config("down-1", &refused_url()),
            service_config("down-2", &refused_url()),
            service_config("down-3", &refused_url()),
        ],
        vec![],
        vec![],
    );

    let snapshot = core.health.poll_all().await.unwrap();
    assert_eq!(snapshot.status, SystemStatus::Degraded);
    assert_eq!(snapshot.total_services, 4);
    assert_eq!(snapshot.healthy_services, 1);
    assert_eq!(snapshot.unhealthy_services, 3);
    assert_eq!(snapshot.health_percentage, 25.0);

    core.shutdown().await;
}

#[tokio::test]
async fn test_slow_probe_does_not_fail_siblings() {
    let fast = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&fast)
        .await;

    let slow = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&slow)
        .await;

    let mut slow_config = service_config("slow-service", &slow.uri());
    slow_config.timeout_secs = 1;

    let core = spawn_core(
        vec![service_config("fast-service", &fast.uri()), slow_config],
        vec![],
        vec![],
    );

    // partial results are fine; the fast sibling must be healthy
    let snapshot = core.health.poll_all().await.unwrap();
    let fast_result = snapshot.services.get("fast-service").unwrap();
    assert!(fast_result.as_ref().unwrap().healthy);
    let slow_result = snapshot.services.get("slow-service").unwrap();
    assert!(!slow_result.as_ref().unwrap().healthy);

    core.shutdown().await;
}

#[tokio::test]
async fn test_add_service_upserts_and_remove_reports() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let core = spawn_core(vec![], vec![], vec![]);

    core.health
        .add_service(service_config("new-service", &refused_url()))
        .await
        .unwrap();

    // upsert: same name, working URL now
    core.health
        .add_service(service_config("new-service", &mock_server.uri()))
        .await
        .unwrap();

    let services = core.health.list_services().await.unwrap();
    assert_eq!(services.len(), 1);

    let result = core.health.poll_one("new-service").await.unwrap();
    assert!(result.healthy);

    assert!(core.health.remove_service("new-service").await.unwrap());
    assert!(!core.health.remove_service("new-service").await.unwrap());

    let snapshot = core.health.snapshot().await.unwrap();
    assert_eq!(snapshot.total_services, 0);

    core.shutdown().await;
}

#[tokio::test]
async fn test_health_flip_publishes_change_event() {
    let mock_server = MockServer::start().await;
    // healthy for the startup poll and the first driven poll, 404 after
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    let core = spawn_core(
        vec![service_config("flappy-service", &mock_server.uri())],
        vec![],
        vec![],
    );
    let mut events = core.health_tx.subscribe();

    let first = core.health.poll_one("flappy-service").await.unwrap();
    assert!(first.healthy);

    let second = core.health.poll_one("flappy-service").await.unwrap();
    assert!(!second.healthy);

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("flip event within deadline")
        .unwrap();
    assert_eq!(event.service_name, "flappy-service");
    assert!(!event.healthy);

    core.shutdown().await;
}

#[tokio::test]
async fn test_statistics_over_latest_results() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let core = spawn_core(
        vec![
            service_config("a", &mock_server.uri()),
            service_config("b", &refused_url()),
        ],
        vec![],
        vec![],
    );

    core.health.poll_all().await.unwrap();

    let stats = core.health.statistics().await.unwrap();
    assert_eq!(stats.total_checks, 2);
    assert_eq!(stats.success_rate, 50.0);

    core.shutdown().await;
}
