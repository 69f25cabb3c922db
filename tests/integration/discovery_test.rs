//! HTTP discovery endpoints, queried the way DevTools does.

#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::frontend::{wait_until, TestFrontend};
use script_inspector::{DebugAgent, EchoBackend, InspectorConfig, SocketServer, TargetRegistry, TaskRunner};
use serde_json::Value;
use std::sync::Arc;

async fn start_server(titles: &[&str]) -> (Arc<SocketServer>, Vec<String>, u16, TaskRunner) {
    let runner = TaskRunner::new();
    let registry = Arc::new(TargetRegistry::new());
    let ids = titles
        .iter()
        .map(|title| {
            let agent = DebugAgent::new(Arc::new(EchoBackend::new()), Arc::new(runner.handle()), *title);
            agent.start().unwrap();
            registry.add_target(agent)
        })
        .collect();

    let server = SocketServer::new(InspectorConfig::default().with_port(0), registry);
    let port = server.start().await.unwrap();
    (server, ids, port, runner)
}

#[tokio::test]
async fn test_json_list_describes_every_target() {
    let (_server, ids, port, _runner) = start_server(&["First", "Second"]).await;

    let targets: Vec<Value> = reqwest::get(format!("http://127.0.0.1:{}/json/list", port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(targets.len(), 2);
    let mut sorted = ids.clone();
    sorted.sort();
    let listed: Vec<&str> = targets.iter().map(|t| t["id"].as_str().unwrap()).collect();
    assert_eq!(listed, sorted);

    for target in &targets {
        let id = target["id"].as_str().unwrap();
        assert_eq!(target["type"], "node");
        assert_eq!(target["url"], format!("file://{}", id));
        assert_eq!(
            target["webSocketDebuggerUrl"],
            format!("ws://127.0.0.1:{}/{}", port, id)
        );
        assert!(target["devtoolsFrontendUrl"].as_str().unwrap().contains(id));
        assert!(target.get("faviconUrl").is_some());
        assert!(target.get("description").is_some());
    }
    let titles: Vec<&str> = targets.iter().map(|t| t["title"].as_str().unwrap()).collect();
    assert!(titles.contains(&"First") && titles.contains(&"Second"));
}

#[tokio::test]
async fn test_json_and_json_list_match() {
    let (_server, _ids, port, _runner) = start_server(&["Only"]).await;

    let list: Value = reqwest::get(format!("http://127.0.0.1:{}/json/list", port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let json: Value = reqwest::get(format!("http://127.0.0.1:{}/json", port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list, json);
}

#[tokio::test]
async fn test_content_type_and_version() {
    let (_server, _ids, port, _runner) = start_server(&["Only"]).await;

    let response = reqwest::get(format!("http://127.0.0.1:{}/json/version", port))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/json; charset=UTF-8"
    );
    let version: Value = response.json().await.unwrap();
    assert_eq!(version["Protocol-Version"], "1.1");
    assert!(version["Browser"].is_string());
}

#[tokio::test]
async fn test_unknown_path_is_bad_request() {
    let (_server, _ids, port, _runner) = start_server(&["Only"]).await;

    let response = reqwest::get(format!("http://127.0.0.1:{}/json/protocol", port))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_attached_target_hides_debugger_url() {
    let (server, ids, port, _runner) = start_server(&["Only"]).await;
    let _frontend = TestFrontend::connect(port, &ids[0]).await;
    let server_clone = server.clone();
    assert!(wait_until(|| server_clone.session_count() == 1).await);

    let targets: Vec<Value> = reqwest::get(format!("http://127.0.0.1:{}/json", port))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(targets[0]["id"], ids[0].as_str());
    assert!(targets[0].get("webSocketDebuggerUrl").is_none());
}
