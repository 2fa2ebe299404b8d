// ABOUTME: Tests for the periodic health watcher
// ABOUTME: Verifies check history and automatic recovery of port_down projects

mod common;

use common::{fast_settings, orchestrator, MockProvider};
use std::sync::Arc;
use std::time::Duration;
use voxcraft_sandbox::{HealthWatcher, MemoryProjectStore, ProjectStore, SandboxState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AGENT: &str = "export default { assistant: { firstMessage: 'hello' } };\n";

#[tokio::test]
async fn test_check_now_records_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let provider = MockProvider::new(Some(server.uri()));
    let store = Arc::new(MemoryProjectStore::new());
    let orch = Arc::new(orchestrator(&provider, &store, fast_settings()));
    orch.create_sandbox("p1").await.expect("create sandbox");

    let watcher = HealthWatcher::new(orch.clone());
    assert!(watcher.get_latest_check("p1").await.is_none());

    let round = watcher.check_now().await;
    assert_eq!(round.len(), 1);
    assert_eq!(round[0].state, SandboxState::Running);
    assert!(!round[0].recovery_attempted);

    watcher.check_now().await;
    assert_eq!(watcher.get_check_history("p1").await.len(), 2);
    let latest = watcher.get_latest_check("p1").await.expect("latest check");
    assert_eq!(latest.endpoint, Some(server.uri()));
}

#[tokio::test]
async fn test_check_now_recovers_port_down_project() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let provider = MockProvider::new(Some(server.uri()));
    let store = Arc::new(MemoryProjectStore::new());
    store.set_source("p1", AGENT).await.expect("store write");
    let orch = Arc::new(orchestrator(&provider, &store, fast_settings()));
    orch.create_sandbox("p1").await.expect("create sandbox");

    let watcher = HealthWatcher::new(orch.clone());
    let round = watcher.check_now().await;

    assert_eq!(round.len(), 1);
    assert_eq!(round[0].state, SandboxState::PortDown);
    assert!(round[0].recovery_attempted);
    // The bulk check consumed the failing answer; recover sees a healthy
    // server and reports nothing to do
    assert!(round[0].message.is_some());
}

#[tokio::test]
async fn test_crashed_projects_recover_concurrently() {
    // Without a public endpoint every live sandbox reads as port_down
    let provider = MockProvider::new(None);
    provider.set_npm_delay(Duration::from_millis(200));
    let store = Arc::new(MemoryProjectStore::new());
    let orch = Arc::new(orchestrator(&provider, &store, fast_settings()));
    for project in ["p1", "p2", "p3"] {
        store.set_source(project, AGENT).await.expect("store write");
        orch.create_sandbox(project).await.expect("create sandbox");
    }

    let watcher = HealthWatcher::new(orch.clone());
    let round = watcher.check_now().await;

    assert_eq!(round.len(), 3);
    for check in &round {
        assert_eq!(check.state, SandboxState::PortDown);
        assert!(check.recovery_attempted);
        assert_eq!(
            check.message.as_deref(),
            Some("redeployed, not yet responding")
        );
    }
    assert_eq!(provider.with_state(|s| s.spawned.len()), 3);
    assert_eq!(provider.npm_peak(), 3);
}

#[tokio::test]
async fn test_watcher_skips_recovery_when_disabled() {
    let provider = MockProvider::new(None);
    let store = Arc::new(MemoryProjectStore::new());
    let mut settings = fast_settings();
    settings.auto_recover = false;
    let orch = Arc::new(orchestrator(&provider, &store, settings));
    orch.create_sandbox("p1").await.expect("create sandbox");

    let watcher = HealthWatcher::new(orch.clone());
    let round = watcher.check_now().await;

    assert_eq!(round[0].state, SandboxState::PortDown);
    assert!(!round[0].recovery_attempted);
    assert!(provider.with_state(|s| s.spawned.is_empty()));
}

#[tokio::test]
async fn test_start_and_stop() {
    let provider = MockProvider::new(None);
    let store = Arc::new(MemoryProjectStore::new());
    let mut settings = fast_settings();
    settings.health_interval = Duration::from_millis(20);
    let orch = Arc::new(orchestrator(&provider, &store, settings));

    let watcher = HealthWatcher::new(orch);
    assert!(!watcher.is_running().await);

    watcher.start().await;
    assert!(watcher.is_running().await);
    watcher.start().await;

    watcher.stop().await;
    assert!(!watcher.is_running().await);
}
