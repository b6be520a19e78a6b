//! Gateway tests grouped by endpoint behavior, run against a live listener.
use super::*;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use tempfile::{tempdir, TempDir};
use tokio_tungstenite::{connect_async, tungstenite::Message as ClientWsMessage};

use pilot_ai::{AiError, CompletionRequest, CompletionResponse, CompletionUsage};
use pilot_events::{TEST_EVENT_FRAME_KIND_FINISH, TEST_EVENT_FRAME_KIND_LOG};
use pilot_script::{TestScript, TestStep, SCRIPT_SCHEMA_VERSION};

struct CannedGatewayLlmClient {
    replies: Mutex<Vec<Result<String, AiError>>>,
}

impl CannedGatewayLlmClient {
    fn new(replies: Vec<Result<String, AiError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
        }
    }
}

#[async_trait]
impl LlmClient for CannedGatewayLlmClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, AiError> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop()
            .expect("unexpected provider call");
        reply.map(|text| CompletionResponse {
            text,
            finish_reason: Some("STOP".to_string()),
            usage: CompletionUsage {
                input_tokens: 10,
                output_tokens: 20,
                total_tokens: 30,
            },
        })
    }
}

struct PanicGatewayLlmClient;

#[async_trait]
impl LlmClient for PanicGatewayLlmClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, AiError> {
        panic!("provider should not be invoked when the gateway rejects the request");
    }
}

fn write_mock_driver_cli(path: &std::path::Path) {
    std::fs::write(
        path,
        r#"#!/usr/bin/env python3
import json
import sys

command = sys.argv[1] if len(sys.argv) > 1 else ""

if command in ("start-session", "shutdown-session", "navigate", "wait-for", "click", "type"):
    print(json.dumps({"status": "ok"}))
    raise SystemExit(0)

if command == "title":
    print(json.dumps({"status": "ok", "value": "Mock Driver Page"}))
    raise SystemExit(0)

if command == "current-url":
    print(json.dumps({"status": "ok", "value": "https://example.com/after"}))
    raise SystemExit(0)

if command == "element-text":
    print(json.dumps({"status": "ok", "value": "Welcome"}))
    raise SystemExit(0)

if command == "screenshot":
    print(json.dumps({"status": "ok", "value": "shot.png"}))
    raise SystemExit(0)

print("unsupported command", file=sys.stderr)
raise SystemExit(2)
"#,
    )
    .expect("write mock driver cli");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).expect("chmod");
    }
}

struct GatewayHarness {
    dir: TempDir,
    base_url: String,
    ws_url: String,
}

impl GatewayHarness {
    fn scripts_dir(&self) -> PathBuf {
        self.dir.path().join("scripts")
    }

    fn store(&self) -> ScriptStore {
        ScriptStore::new(self.scripts_dir(), ScriptPolicy::default())
    }
}

async fn spawn_gateway(client: Arc<dyn LlmClient>) -> GatewayHarness {
    let dir = tempdir().expect("tempdir");
    let driver_path = dir.path().join("mock-driver.py");
    write_mock_driver_cli(&driver_path);

    let config = GatewayServerConfig {
        client,
        bind: "127.0.0.1:0".to_string(),
        scripts_dir: dir.path().join("scripts"),
        screenshots_dir: dir.path().join("screenshots"),
        driver_cli_path: driver_path.to_string_lossy().to_string(),
        generator: ScriptGeneratorConfig::default(),
        policy: ScriptPolicy::default(),
    };
    let state = Arc::new(GatewayState::new(&config).expect("gateway state"));
    let app = build_gateway_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    GatewayHarness {
        dir,
        base_url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}{WS_ENDPOINT}"),
    }
}

fn sample_script_json() -> String {
    serde_json::to_string(&serde_json::json!({
        "schema_version": SCRIPT_SCHEMA_VERSION,
        "description": "open the landing page",
        "steps": [
            {"op": "navigate", "url": "https://example.com"},
            {"op": "assert_title_contains", "expected": "Mock Driver"}
        ]
    }))
    .expect("serialize sample script")
}

async fn error_code_of(response: reqwest::Response) -> String {
    let body: Value = response.json().await.expect("error body");
    body["error"]["code"]
        .as_str()
        .expect("error code field")
        .to_string()
}

#[tokio::test]
async fn functional_root_endpoint_reports_liveness() {
    let harness = spawn_gateway(Arc::new(PanicGatewayLlmClient)).await;
    let response = reqwest::get(&harness.base_url).await.expect("get root");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.expect("root body");
    assert!(body.contains("gateway is running"));
}

#[tokio::test]
async fn functional_generate_test_rejects_blank_description() {
    let harness = spawn_gateway(Arc::new(PanicGatewayLlmClient)).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}{GENERATE_TEST_ENDPOINT}", harness.base_url))
        .json(&serde_json::json!({ "test_description": "   " }))
        .send()
        .await
        .expect("post generate");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(error_code_of(response).await, "missing_test_description");
}

#[tokio::test]
async fn functional_generate_test_persists_artifact_on_success() {
    let harness = spawn_gateway(Arc::new(CannedGatewayLlmClient::new(vec![Ok(
        sample_script_json(),
    )])))
    .await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}{GENERATE_TEST_ENDPOINT}", harness.base_url))
        .json(&serde_json::json!({ "test_description": "check the landing page title" }))
        .send()
        .await
        .expect("post generate");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.expect("generate body");
    let file_name = body["file_name"].as_str().expect("file_name");
    assert!(file_name.starts_with("test-"));
    assert!(file_name.ends_with(".json"));
    assert!(harness.scripts_dir().join(file_name).is_file());
}

#[tokio::test]
async fn functional_generate_test_maps_provider_failure_to_bad_gateway() {
    let harness = spawn_gateway(Arc::new(CannedGatewayLlmClient::new(vec![Err(
        AiError::HttpStatus {
            status: 500,
            body: "provider exploded".to_string(),
        },
    )])))
    .await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}{GENERATE_TEST_ENDPOINT}", harness.base_url))
        .json(&serde_json::json!({ "test_description": "check the landing page title" }))
        .send()
        .await
        .expect("post generate");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert_eq!(error_code_of(response).await, "script_generation_error");
    assert_eq!(
        std::fs::read_dir(harness.scripts_dir()).expect("scripts dir").count(),
        0
    );
}

#[tokio::test]
async fn functional_run_test_rejects_missing_file_name() {
    let harness = spawn_gateway(Arc::new(PanicGatewayLlmClient)).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}{RUN_TEST_ENDPOINT}", harness.base_url))
        .json(&serde_json::json!({}))
        .send()
        .await
        .expect("post run");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert_eq!(error_code_of(response).await, "missing_file_name");
}

#[tokio::test]
async fn functional_run_test_maps_unknown_artifact_to_not_found() {
    let harness = spawn_gateway(Arc::new(PanicGatewayLlmClient)).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}{RUN_TEST_ENDPOINT}", harness.base_url))
        .json(&serde_json::json!({ "file_name": "test-1234-0.json" }))
        .send()
        .await
        .expect("post run");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(error_code_of(response).await, "script_load_error");
}

#[tokio::test]
async fn functional_run_test_maps_contract_violation_to_unprocessable() {
    let harness = spawn_gateway(Arc::new(PanicGatewayLlmClient)).await;
    std::fs::write(
        harness.scripts_dir().join("test-junk.json"),
        "{\"steps\": []}",
    )
    .expect("write junk artifact");
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}{RUN_TEST_ENDPOINT}", harness.base_url))
        .json(&serde_json::json!({ "file_name": "test-junk.json" }))
        .send()
        .await
        .expect("post run");
    assert_eq!(
        response.status(),
        reqwest::StatusCode::UNPROCESSABLE_ENTITY
    );
    assert_eq!(error_code_of(response).await, "script_contract_error");
}

#[tokio::test]
async fn integration_run_test_streams_events_to_websocket_subscriber() {
    let harness = spawn_gateway(Arc::new(PanicGatewayLlmClient)).await;
    let saved = harness
        .store()
        .save(&TestScript {
            schema_version: SCRIPT_SCHEMA_VERSION,
            description: "title check against the mock driver".to_string(),
            steps: vec![
                TestStep::Navigate {
                    url: "https://example.com".to_string(),
                },
                TestStep::AssertTitleContains {
                    expected: "Mock Driver".to_string(),
                },
            ],
        })
        .expect("save script");

    let (mut socket, _) = connect_async(&harness.ws_url).await.expect("ws connect");

    let greeting = read_frame(&mut socket).await;
    assert_eq!(greeting.run_id, WS_GREETING_RUN_ID);
    assert_eq!(greeting.kind, TEST_EVENT_FRAME_KIND_LOG);
    assert_eq!(greeting.payload["kind"], "info");

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}{RUN_TEST_ENDPOINT}", harness.base_url))
        .json(&serde_json::json!({ "file_name": saved.name }))
        .send()
        .await
        .expect("post run");
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    let body: Value = response.json().await.expect("run body");
    let run_id = body["run_id"].as_str().expect("run_id").to_string();
    assert_eq!(body["file_name"], saved.name.as_str());

    let mut frames = Vec::new();
    loop {
        let frame = read_frame(&mut socket).await;
        assert_eq!(frame.run_id, run_id);
        let finished = frame.kind == TEST_EVENT_FRAME_KIND_FINISH;
        frames.push(frame);
        if finished {
            break;
        }
    }

    assert!(frames.iter().any(|frame| {
        frame.kind == TEST_EVENT_FRAME_KIND_LOG
            && frame.payload["kind"] == "success"
            && frame.payload["message"]
                .as_str()
                .is_some_and(|message| message.contains("title verification passed"))
    }));
    assert_eq!(
        frames
            .iter()
            .filter(|frame| frame.kind == TEST_EVENT_FRAME_KIND_FINISH)
            .count(),
        1
    );
}

async fn read_frame(
    socket: &mut (impl StreamExt<Item = Result<ClientWsMessage, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> TestEventFrame {
    loop {
        let message = tokio::time::timeout(std::time::Duration::from_secs(10), socket.next())
            .await
            .expect("timed out waiting for websocket frame")
            .expect("websocket closed early")
            .expect("websocket receive failed");
        if let ClientWsMessage::Text(raw) = message {
            return serde_json::from_str(&raw).expect("frame decodes");
        }
    }
}
