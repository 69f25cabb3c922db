//! Handshake outcomes must be visible in the logs at the right level.

#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::frontend::{raw_exchange, upgrade_request, wait_until, Received, TestFrontend};
use helpers::log_validator::LogValidator;
use script_inspector::{DebugAgent, EchoBackend, InspectorConfig, SocketServer, TargetRegistry, TaskRunner};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;

async fn start_server() -> (Arc<SocketServer>, String, u16, TaskRunner) {
    let runner = TaskRunner::new();
    let agent = DebugAgent::new(Arc::new(EchoBackend::new()), Arc::new(runner.handle()), "Logged");
    agent.start().unwrap();
    let registry = Arc::new(TargetRegistry::new());
    let target_id = registry.add_target(agent);
    let server = SocketServer::new(InspectorConfig::default().with_port(0), registry);
    let port = server.start().await.unwrap();
    (server, target_id, port, runner)
}

// The default current-thread runtime keeps every server task on this
// thread, so a thread-local subscriber sees all of them.
#[tokio::test]
async fn test_rejected_host_is_logged_as_warning() {
    let validator = LogValidator::new();
    let subscriber = tracing_subscriber::registry().with(validator.layer());
    let _guard = tracing::subscriber::set_default(subscriber);

    let (_server, target_id, port, _runner) = start_server().await;
    let response = raw_exchange(
        port,
        &upgrade_request("evil.example.com:9229", &format!("/{}", target_id)),
    )
    .await;
    assert!(response.starts_with("HTTP/1.0 400"));

    let entry = validator
        .find(Level::WARN, "Host not allowed: evil.example.com")
        .expect("rejected host was not logged");
    assert!(entry.message.contains("Rejecting request"));
    assert_eq!(entry.module, "script_inspector::transport::http");
    assert_eq!(entry.field("path"), Some(format!("/{}", target_id).as_str()));
}

#[tokio::test]
async fn test_only_inspector_events_are_captured() {
    let validator = LogValidator::new();
    let subscriber = tracing_subscriber::registry().with(validator.layer());
    let _guard = tracing::subscriber::set_default(subscriber);

    tracing::info!(target: "other_crate", "not ours");
    let (_server, _target_id, port, _runner) = start_server().await;
    let response = raw_exchange(port, "GET /json/version HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.0 200"));

    let logs = validator.get_logs();
    assert!(!logs.is_empty());
    assert!(logs.iter().all(|log| log.module.starts_with("script_inspector")));
    assert!(validator.find(Level::INFO, "not ours").is_none());
    assert!(!validator.from_module("transport::listener").is_empty());
}

#[tokio::test]
async fn test_unknown_target_is_logged_as_warning() {
    let validator = LogValidator::new();
    let subscriber = tracing_subscriber::registry().with(validator.layer());
    let _guard = tracing::subscriber::set_default(subscriber);

    let (_server, _target_id, port, _runner) = start_server().await;
    let response = raw_exchange(port, &upgrade_request("localhost", "/not-a-target")).await;
    assert!(response.starts_with("HTTP/1.0 400"));
    assert!(validator
        .find(Level::WARN, "Target not found: not-a-target")
        .is_some());
}

#[tokio::test]
async fn test_session_lifecycle_logs() {
    let validator = LogValidator::new();
    let subscriber = tracing_subscriber::registry().with(validator.layer());
    let _guard = tracing::subscriber::set_default(subscriber);

    let (server, target_id, port, _runner) = start_server().await;
    let mut frontend = TestFrontend::connect(port, &target_id).await;
    frontend.send_close().await;
    assert_eq!(frontend.receive().await, Received::Close);
    let server_clone = server.clone();
    assert!(wait_until(|| server_clone.session_count() == 0).await);

    let result = validator.validate();
    validator.print_summary(&result);
    assert!(result.is_valid(), "{:?}", result);

    let stats = validator.get_stats();
    assert!(stats.total > 0);
    assert_eq!(stats.error, 0);
}
