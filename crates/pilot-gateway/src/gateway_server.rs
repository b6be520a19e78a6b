use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use pilot_ai::LlmClient;
use pilot_browser::{DriverCliConfig, DriverCliLauncher};
use pilot_events::{
    build_test_event_frame, mint_run_id, BroadcastEventSink, TestEvent, TestEventFrame,
};
use pilot_runner::ScriptRunner;
use pilot_script::{
    ScriptError, ScriptGenerator, ScriptGeneratorConfig, ScriptPolicy, ScriptStore,
};

pub const ROOT_ENDPOINT: &str = "/";
pub const GENERATE_TEST_ENDPOINT: &str = "/generate-test";
pub const RUN_TEST_ENDPOINT: &str = "/run-test";
pub const WS_ENDPOINT: &str = "/ws";

const ROOT_BANNER: &str = "pilot browser test gateway is running";
const WS_GREETING_RUN_ID: &str = "gateway";
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
/// Public struct `GatewayServerConfig` used across pilot components.
pub struct GatewayServerConfig {
    pub client: Arc<dyn LlmClient>,
    pub bind: String,
    pub scripts_dir: PathBuf,
    pub screenshots_dir: PathBuf,
    pub driver_cli_path: String,
    pub generator: ScriptGeneratorConfig,
    pub policy: ScriptPolicy,
}

/// Shared handler state: generator, runner, and the event broadcast channel.
pub struct GatewayState {
    generator: ScriptGenerator,
    runner: Arc<ScriptRunner>,
    events: broadcast::Sender<TestEventFrame>,
}

impl GatewayState {
    pub fn new(config: &GatewayServerConfig) -> Result<Self> {
        let generator_store = ScriptStore::new(&config.scripts_dir, config.policy.clone());
        generator_store
            .ensure_root()
            .context("failed to prepare the scripts directory")?;
        let runner_store = ScriptStore::new(&config.scripts_dir, config.policy.clone());
        let launcher = DriverCliLauncher::new(DriverCliConfig {
            cli_path: config.driver_cli_path.clone(),
            screenshots_dir: config.screenshots_dir.clone(),
        })
        .context("failed to configure the browser driver launcher")?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            generator: ScriptGenerator::new(
                Arc::clone(&config.client),
                generator_store,
                config.generator.clone(),
            ),
            runner: Arc::new(ScriptRunner::new(runner_store, Arc::new(launcher))),
            events,
        })
    }

    pub fn event_sender(&self) -> broadcast::Sender<TestEventFrame> {
        self.events.clone()
    }

    fn sink_for_run(&self, run_id: &str) -> BroadcastEventSink {
        BroadcastEventSink::new(run_id, self.events.clone())
    }
}

/// Error payload mapped to the gateway's JSON error envelope.
#[derive(Debug)]
struct GatewayApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl GatewayApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn from_script_error(error: &ScriptError) -> Self {
        let status = match error {
            ScriptError::NotFound(_) | ScriptError::Io { .. } => StatusCode::NOT_FOUND,
            ScriptError::Contract(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ScriptError::Generation(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, error.error_code(), error.to_string())
    }
}

impl IntoResponse for GatewayApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": {
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

pub async fn run_gateway_server(config: GatewayServerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.scripts_dir)
        .with_context(|| format!("failed to create {}", config.scripts_dir.display()))?;
    std::fs::create_dir_all(&config.screenshots_dir)
        .with_context(|| format!("failed to create {}", config.screenshots_dir.display()))?;

    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway server address")?;

    println!(
        "gateway server listening: addr={} scripts_dir={}",
        local_addr,
        config.scripts_dir.display()
    );

    let state = Arc::new(GatewayState::new(&config)?);
    let app = build_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")?;

    Ok(())
}

pub fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(ROOT_ENDPOINT, get(handle_root))
        .route(GENERATE_TEST_ENDPOINT, post(handle_generate_test))
        .route(RUN_TEST_ENDPOINT, post(handle_run_test))
        .route(WS_ENDPOINT, get(handle_ws_upgrade))
        .with_state(state)
}

async fn handle_root() -> &'static str {
    ROOT_BANNER
}

#[derive(Debug, Deserialize)]
struct GenerateTestRequest {
    #[serde(default)]
    test_description: Option<String>,
}

async fn handle_generate_test(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<GenerateTestRequest>,
) -> Response {
    let description = request.test_description.unwrap_or_default();
    if description.trim().is_empty() {
        return GatewayApiError::bad_request(
            "missing_test_description",
            "test_description is required",
        )
        .into_response();
    }

    let run_id = mint_run_id();
    let sink = state.sink_for_run(&run_id);
    match state.generator.generate(&description, &sink).await {
        Ok(saved) => (
            StatusCode::OK,
            Json(json!({
                "message": "test script generated",
                "file_name": saved.name,
            })),
        )
            .into_response(),
        Err(error) => {
            tracing::warn!(%error, "test script generation failed");
            GatewayApiError::new(StatusCode::BAD_GATEWAY, error.error_code(), error.to_string())
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunTestRequest {
    #[serde(default)]
    file_name: Option<String>,
}

async fn handle_run_test(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<RunTestRequest>,
) -> Response {
    let file_name = request.file_name.unwrap_or_default();
    if file_name.trim().is_empty() {
        return GatewayApiError::bad_request("missing_file_name", "file_name is required")
            .into_response();
    }

    // Pre-flight load so the caller gets load/contract rejections as HTTP
    // status instead of a dangling acknowledgement. Artifacts are never
    // deleted, so the accepted run cannot lose the race with this check.
    if let Err(error) = state.runner.store().load(&file_name) {
        return GatewayApiError::from_script_error(&error).into_response();
    }

    let run_id = mint_run_id();
    let sink = state.sink_for_run(&run_id);
    let runner = Arc::clone(&state.runner);
    let task_file_name = file_name.clone();
    let task_run_id = run_id.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(error) = runner.run(&task_file_name, &sink) {
            // Already event-delivered; the acknowledged caller only watches
            // the stream.
            tracing::warn!(run_id = %task_run_id, %error, "accepted run rejected its artifact");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "test run started",
            "file_name": file_name,
            "run_id": run_id,
        })),
    )
        .into_response()
}

async fn handle_ws_upgrade(
    State(state): State<Arc<GatewayState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| run_ws_connection(socket, state))
}

async fn run_ws_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut outbound, mut inbound) = socket.split();

    let greeting = build_test_event_frame(
        WS_GREETING_RUN_ID,
        &TestEvent::info("connected to pilot event stream"),
    );
    if send_frame(&mut outbound, &greeting).await.is_err() {
        return;
    }

    let mut events = state.events.subscribe();
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(frame) => {
                    if send_frame(&mut outbound, &frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "websocket subscriber lagged, frames skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = inbound.next() => match message {
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    tracing::debug!(%error, "websocket receive failed");
                    break;
                }
            },
        }
    }
}

async fn send_frame(
    outbound: &mut (impl SinkExt<WsMessage> + Unpin),
    frame: &TestEventFrame,
) -> Result<(), ()> {
    let raw = serde_json::to_string(frame).map_err(|error| {
        tracing::debug!(%error, "failed to serialize event frame");
    })?;
    outbound
        .send(WsMessage::Text(raw.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
mod tests;
