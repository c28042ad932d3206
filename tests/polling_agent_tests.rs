mod common;

use std::sync::Arc;

use clawpilot::auth::MemoryDeviceTokenStore;
use clawpilot::config::ClawPilotConfig;
use clawpilot::dashboard::{ConsumeEnd, Dashboard};
use clawpilot::error::ClawPilotError;
use clawpilot::events::RunEvent;
use clawpilot::gateway::{AgentTransport, HttpDecisionSink, PollingAgent, RunAgentInput};
use clawpilot::run::RunStatus;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::test_config;

fn config_for(server: &MockServer) -> ClawPilotConfig {
    let mut config = test_config(&server.uri(), Arc::new(MemoryDeviceTokenStore::new()));
    config.device_token = Some("dev-tok".into());
    config
}

async fn mount_start(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_json(json!({"messages": [{"role": "user", "content": "triage inbox"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_poll(server: &MockServer, priority: u8, times: Option<u64>, body: serde_json::Value) {
    let mock = Mock::given(method("GET"))
        .and(path("/runs/run-1"))
        .and(header("authorization", "Bearer dev-tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .with_priority(priority);
    let mock = match times {
        Some(n) => mock.up_to_n_times(n),
        None => mock,
    };
    mock.mount(server).await;
}

fn types(events: &[RunEvent]) -> Vec<String> {
    events.iter().map(|e| e.event_type.to_string()).collect()
}

#[tokio::test]
async fn polled_run_streams_events_until_terminal() {
    let server = MockServer::start().await;
    mount_start(&server, json!({"id": "run-1", "status": "queued", "tools": []})).await;
    Mock::given(method("GET"))
        .and(path("/runs/run-1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_poll(
        &server,
        2,
        Some(1),
        json!({
            "id": "run-1",
            "status": "running",
            "tools": [{"id": "t1", "name": "email", "status": "pending", "args": {"to": "ops@example.com"}}]
        }),
    )
    .await;
    mount_poll(
        &server,
        3,
        None,
        json!({"id": "run-1", "status": "succeeded", "tools": [{"id": "t1", "status": "approved"}]}),
    )
    .await;

    let agent = PollingAgent::new(&config_for(&server)).unwrap();
    let items: Vec<_> = agent
        .run(RunAgentInput::new("main", Vec::new()))
        .await
        .expect("run started")
        .collect()
        .await;
    let events: Vec<RunEvent> = items
        .into_iter()
        .map(|item| item.expect("no fatal poll errors"))
        .collect();

    assert_eq!(
        types(&events),
        vec![
            "RUN_STARTED",
            "STEP_STARTED",
            "STEP_FINISHED",
            "STEP_STARTED",
            "TOOL_CALL_START",
            "TOOL_CALL_ARGS",
            "TOOL_CALL_END",
            "TOOL_CALL_RESULT",
            "STEP_FINISHED",
            "RUN_FINISHED",
        ]
    );
    assert!(events.iter().all(|e| e.run_id.as_deref() == Some("run-1")));
    assert_eq!(events[3].step_name.as_deref(), Some("running"));
    assert_eq!(events[5].delta.as_deref(), Some(r#"{"to":"ops@example.com"}"#));
}

#[tokio::test]
async fn fatal_poll_error_ends_the_stream() {
    let server = MockServer::start().await;
    mount_start(&server, json!({"id": "run-1", "status": "queued"})).await;
    Mock::given(method("GET"))
        .and(path("/runs/run-1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "no such run"})))
        .expect(1)
        .mount(&server)
        .await;

    let agent = PollingAgent::new(&config_for(&server)).unwrap();
    let mut items: Vec<_> = agent
        .run(RunAgentInput::new("main", Vec::new()))
        .await
        .expect("run started")
        .collect()
        .await;

    let last = items.pop().expect("stream yielded items");
    assert!(matches!(last, Err(ClawPilotError::Api { status: 404, .. })));
    assert_eq!(items.len(), 2);
}

#[tokio::test]
async fn failed_start_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "agent offline"}})),
        )
        .mount(&server)
        .await;

    let agent = PollingAgent::new(&config_for(&server)).unwrap();
    let err = agent
        .run(RunAgentInput::prompt("main", "hello"))
        .await
        .err()
        .expect("start should fail");
    assert!(matches!(err, ClawPilotError::Api { status: 500, .. }));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "queued"})))
        .mount(&server)
        .await;
    let agent = PollingAgent::new(&config_for(&server)).unwrap();
    let err = agent
        .run(RunAgentInput::new("main", Vec::new()))
        .await
        .err()
        .expect("run without id");
    assert!(matches!(err, ClawPilotError::InvalidState(_)));
}

#[tokio::test]
async fn dashboard_queues_flagged_tools_from_polled_runs() {
    let server = MockServer::start().await;
    mount_start(&server, json!({"id": "run-1", "status": "queued", "tools": []})).await;
    let flagged = json!([{"id": "t1", "name": "search", "requires_approval": true}]);
    mount_poll(
        &server,
        1,
        Some(1),
        json!({"id": "run-1", "status": "awaiting_approval", "tools": flagged}),
    )
    .await;
    mount_poll(
        &server,
        2,
        None,
        json!({"id": "run-1", "status": "completed", "tools": flagged}),
    )
    .await;
    Mock::given(method("PATCH"))
        .and(path("/runs/run-1/tools/t1"))
        .and(body_json(json!({"action": "approve", "payload": {"result": "go ahead"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tools": []})))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let agent = PollingAgent::new(&config).unwrap();
    let dashboard = Dashboard::from_config(&config)
        .with_decision_sink(Arc::new(HttpDecisionSink::new(&config).unwrap()));

    let end = dashboard
        .run(&agent, RunAgentInput::new("main", Vec::new()), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(end, ConsumeEnd::StreamEnded);

    let snapshot = dashboard.snapshot();
    assert_eq!(snapshot.runs[0].status, RunStatus::Finished);
    assert_eq!(snapshot.pending.len(), 1);
    assert_eq!(snapshot.pending[0].tool_call_name, "search");
    assert_eq!(snapshot.pending[0].run_id, "run-1");

    dashboard.approve("t1", "go ahead").await.expect("decision delivered");
    assert!(dashboard.snapshot().pending.is_empty());
}
