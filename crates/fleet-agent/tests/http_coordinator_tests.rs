//! HTTP transport tests against a mock coordinator.

use fleet_agent::cache::CommandMounter;
use fleet_agent::{AgentConfig, FileConfigSource, HttpCoordinator, LifecycleSupervisor};
use fleet_core::agent::{Arch, Os, WorkChannel};
use fleet_core::lifecycle::{ExitStatus, LifecyclePhase};
use fleet_core::ports::CoordinatorTransport;
use fleet_core::protocol::{AgentStatus, LivenessSignal, RegistrationRequest};
use fleet_core::{BootId, Error};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn coordinator() -> HttpCoordinator {
    HttpCoordinator::new(Duration::from_secs(1), Duration::from_secs(1))
        .expect("Failed to build client")
}

fn request(agent_name: Option<&str>) -> RegistrationRequest {
    RegistrationRequest {
        agent_name: agent_name.map(str::to_string),
        label_prefix: "fleet-linux-cpu".to_string(),
        capability_tags: BTreeSet::from(["linux".to_string()]),
        boot_id: BootId::new(),
        hostname: None,
        os: Os::Linux,
        arch: Arch::X86_64,
        version: "0.1.0".to_string(),
    }
}

fn channel(server: &MockServer) -> WorkChannel {
    WorkChannel {
        address: Url::parse(&server.uri()).expect("Invalid server uri"),
        agent_name: "linux-cpu-7".to_string(),
        token: "tok-1".to_string(),
        heartbeat_interval: None,
    }
}

#[tokio::test]
async fn test_register_returns_ack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/register"))
        .and(body_partial_json(json!({ "label_prefix": "fleet-linux-cpu" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "agent_name": "linux-cpu-7",
            "work_channel": "tok-1",
            "heartbeat_interval_secs": 15
        })))
        .expect(1)
        .mount(&server)
        .await;

    let address = Url::parse(&server.uri()).unwrap();
    let ack = coordinator()
        .register(&address, &request(None))
        .await
        .expect("Registration failed");

    assert_eq!(ack.agent_name, "linux-cpu-7");
    assert_eq!(ack.work_channel, "tok-1");
    assert_eq!(ack.heartbeat_interval_secs, Some(15));
}

#[tokio::test]
async fn test_forbidden_is_rejected_with_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/register"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({ "reason": "unknown agent name" })),
        )
        .mount(&server)
        .await;

    let address = Url::parse(&server.uri()).unwrap();
    let err = coordinator()
        .register(&address, &request(Some("linux-cpu-99")))
        .await
        .unwrap_err();

    match err {
        Error::Rejected { reason } => assert_eq!(reason, "unknown agent name"),
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_plain_text_rejection_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/register"))
        .respond_with(ResponseTemplate::new(409).set_body_string("name already connected"))
        .mount(&server)
        .await;

    let address = Url::parse(&server.uri()).unwrap();
    let err = coordinator()
        .register(&address, &request(Some("linux-cpu-7")))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Rejected { ref reason } if reason == "name already connected"));
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/register"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let address = Url::parse(&server.uri()).unwrap();
    let err = coordinator()
        .register(&address, &request(None))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Unreachable(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_too_many_requests_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/register"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let address = Url::parse(&server.uri()).unwrap();
    let err = coordinator()
        .register(&address, &request(None))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Unreachable(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_request_timeout_status_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/register"))
        .respond_with(ResponseTemplate::new(408))
        .mount(&server)
        .await;

    let address = Url::parse(&server.uri()).unwrap();
    let err = coordinator()
        .register(&address, &request(None))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { seconds: 1 }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_ack_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/register"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let address = Url::parse(&server.uri()).unwrap();
    let err = coordinator()
        .register(&address, &request(None))
        .await
        .unwrap_err();

    match err {
        Error::Rejected { reason } => assert!(reason.starts_with("malformed registration ack")),
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ack_missing_fields_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "agent_name": "x" })))
        .mount(&server)
        .await;

    let address = Url::parse(&server.uri()).unwrap();
    let err = coordinator()
        .register(&address, &request(None))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Rejected { .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_connection_refused_is_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let address = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();
    let err = coordinator()
        .register(&address, &request(None))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Unreachable(_)));
}

#[tokio::test]
async fn test_slow_coordinator_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/register"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "agent_name": "linux-cpu-7", "work_channel": "tok-1" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let address = Url::parse(&server.uri()).unwrap();
    let err = coordinator()
        .register(&address, &request(None))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { seconds: 1 }));
}

#[tokio::test]
async fn test_heartbeat_carries_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/linux-cpu-7/heartbeat"))
        .and(header("authorization", "Bearer tok-1"))
        .and(body_partial_json(json!({ "status": "idle" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let signal = LivenessSignal {
        agent_name: "linux-cpu-7".to_string(),
        boot_id: BootId::new(),
        status: AgentStatus::Idle,
        capacity: None,
        timestamp: chrono::Utc::now(),
    };

    coordinator()
        .send_liveness(&channel(&server), &signal)
        .await
        .expect("Heartbeat failed");
}

#[tokio::test]
async fn test_deregister_tolerates_unknown_agent() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/agents/linux-cpu-7"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    coordinator()
        .deregister(&channel(&server))
        .await
        .expect("Deregistration failed");
}

#[tokio::test]
async fn test_full_boot_against_coordinator() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/register"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "agent_name": "linux-cpu-7",
            "work_channel": "tok-1"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/agents/linux-cpu-7/heartbeat"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/agents/linux-cpu-7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("coordinator_url"), server.uri()).unwrap();
    let mut config = AgentConfig::default();
    config.coordinator.url_file = dir.path().join("coordinator_url");
    config.coordinator.secondary_url_file = None;
    config.identity.agent_name_file = None;
    config.identity.capability_tags_file = None;
    config.identity.detect_capabilities = false;
    config.cache.address_file = None;
    config.workspace.dir = dir.path().join("workspace");
    config.status_file = Some(dir.path().join("status"));

    let cancel = CancellationToken::new();
    let supervisor = LifecycleSupervisor::new(
        config.clone(),
        Box::new(FileConfigSource::new(&config)),
        Arc::new(coordinator()),
        Arc::new(CommandMounter::new(&config.cache)),
        cancel.clone(),
    );
    let mut phase = supervisor.subscribe();
    let handle = tokio::spawn(supervisor.run());

    tokio::time::timeout(
        Duration::from_secs(5),
        phase.wait_for(|p| *p == LifecyclePhase::Connected),
    )
    .await
    .expect("Agent did not connect in time")
    .expect("Supervisor dropped");
    cancel.cancel();

    let outcome = handle.await.expect("Supervisor panicked");
    assert_eq!(outcome.status, ExitStatus::Shutdown);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.agent_name.as_deref(), Some("linux-cpu-7"));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("status")).unwrap(),
        "shutdown\n"
    );
}
