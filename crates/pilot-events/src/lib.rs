//! Event taxonomy and sink plumbing for test-run progress reporting.
//!
//! A run reports progress as a sequence of `TestEvent::Log` emissions and
//! ends with exactly one `TestEvent::Finish`. Sinks are write-only and
//! fire-and-forget: nothing in this crate buffers history or blocks the
//! emitter on a slow subscriber.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub const TEST_EVENT_SCHEMA_VERSION: u32 = 1;
pub const TEST_EVENT_FRAME_KIND_LOG: &str = "test.log";
pub const TEST_EVENT_FRAME_KIND_FINISH: &str = "test.finish";

static RUN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Mints a process-unique, time-derived run identifier.
pub fn mint_run_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let count = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("run-{millis}-{count}")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `EventKind` values.
pub enum EventKind {
    Info,
    Success,
    Warning,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl FromStr for EventKind {
    type Err = FrameParseError;

    fn from_str(value: &str) -> Result<Self, FrameParseError> {
        match value {
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(FrameParseError::UnsupportedLogKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `TestEvent` values.
pub enum TestEvent {
    Log { kind: EventKind, message: String },
    Finish { message: String },
}

impl TestEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Log {
            kind: EventKind::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::Log {
            kind: EventKind::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::Log {
            kind: EventKind::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Log {
            kind: EventKind::Error,
            message: message.into(),
        }
    }

    pub fn finish(message: impl Into<String>) -> Self {
        Self::Finish {
            message: message.into(),
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Log { message, .. } | Self::Finish { message } => message.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Wire frame carried over the websocket stream, one per emitted event.
pub struct TestEventFrame {
    pub schema_version: u32,
    pub run_id: String,
    pub kind: String,
    pub payload: Value,
}

pub fn build_test_event_frame(run_id: &str, event: &TestEvent) -> TestEventFrame {
    let (kind, payload) = match event {
        TestEvent::Log { kind, message } => (
            TEST_EVENT_FRAME_KIND_LOG,
            json!({ "kind": kind.as_str(), "message": message }),
        ),
        TestEvent::Finish { message } => {
            (TEST_EVENT_FRAME_KIND_FINISH, json!({ "message": message }))
        }
    };

    TestEventFrame {
        schema_version: TEST_EVENT_SCHEMA_VERSION,
        run_id: run_id.to_string(),
        kind: kind.to_string(),
        payload,
    }
}

#[derive(Debug, Error)]
/// Enumerates supported `FrameParseError` values.
pub enum FrameParseError {
    #[error("failed to parse test event frame JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unsupported test event frame schema_version {0} (expected {TEST_EVENT_SCHEMA_VERSION})")]
    UnsupportedSchema(u32),
    #[error("test event frame run_id must be non-empty")]
    EmptyRunId,
    #[error("unsupported test event frame kind '{0}'")]
    UnsupportedFrameKind(String),
    #[error("unsupported test event log kind '{0}'")]
    UnsupportedLogKind(String),
    #[error("test event frame payload field '{0}' must be a string")]
    InvalidPayloadField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Decoded counterpart of `TestEventFrame`, used by subscribers and tests.
pub struct ParsedTestEvent {
    pub run_id: String,
    pub event: TestEvent,
}

pub fn parse_test_event_frame(raw: &str) -> Result<ParsedTestEvent, FrameParseError> {
    let frame: TestEventFrame = serde_json::from_str(raw)?;
    if frame.schema_version != TEST_EVENT_SCHEMA_VERSION {
        return Err(FrameParseError::UnsupportedSchema(frame.schema_version));
    }
    let run_id = frame.run_id.trim();
    if run_id.is_empty() {
        return Err(FrameParseError::EmptyRunId);
    }

    let message = frame
        .payload
        .get("message")
        .and_then(Value::as_str)
        .ok_or(FrameParseError::InvalidPayloadField("message"))?
        .to_string();

    let event = match frame.kind.as_str() {
        TEST_EVENT_FRAME_KIND_LOG => {
            let kind = frame
                .payload
                .get("kind")
                .and_then(Value::as_str)
                .ok_or(FrameParseError::InvalidPayloadField("kind"))?
                .parse::<EventKind>()?;
            TestEvent::Log { kind, message }
        }
        TEST_EVENT_FRAME_KIND_FINISH => TestEvent::Finish { message },
        other => return Err(FrameParseError::UnsupportedFrameKind(other.to_string())),
    };

    Ok(ParsedTestEvent {
        run_id: run_id.to_string(),
        event,
    })
}

/// Trait contract for `EventSink` behavior.
///
/// Emission is a single atomic publish; implementations must never block the
/// caller on subscriber progress and must never return failure to it.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TestEvent);
}

/// Fans frames out to websocket subscribers through a tokio broadcast
/// channel. Frames emitted while no subscriber is attached are dropped.
pub struct BroadcastEventSink {
    run_id: String,
    sender: tokio::sync::broadcast::Sender<TestEventFrame>,
}

impl BroadcastEventSink {
    pub fn new(run_id: impl Into<String>, sender: tokio::sync::broadcast::Sender<TestEventFrame>) -> Self {
        Self {
            run_id: run_id.into(),
            sender,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: TestEvent) {
        let frame = build_test_event_frame(&self.run_id, &event);
        if self.sender.send(frame).is_err() {
            tracing::debug!(run_id = %self.run_id, "no event subscribers; frame dropped");
        }
    }
}

#[derive(Debug, Default)]
/// In-memory sink for tests and one-shot CLI summaries.
pub struct CollectingEventSink {
    events: Mutex<Vec<TestEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<TestEvent> {
        self.events.lock().expect("event sink lock").clone()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: TestEvent) {
        self.events.lock().expect("event sink lock").push(event);
    }
}

#[derive(Debug, Clone, Default)]
/// Prints events line-by-line, used by the one-shot CLI run command.
pub struct StdoutEventSink;

impl EventSink for StdoutEventSink {
    fn emit(&self, event: TestEvent) {
        match event {
            TestEvent::Log { kind, message } => println!("[{}] {message}", kind.as_str()),
            TestEvent::Finish { message } => println!("[finish] {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        build_test_event_frame, mint_run_id, parse_test_event_frame, BroadcastEventSink,
        CollectingEventSink, EventKind, EventSink, TestEvent, TEST_EVENT_FRAME_KIND_FINISH,
        TEST_EVENT_FRAME_KIND_LOG, TEST_EVENT_SCHEMA_VERSION,
    };

    #[test]
    fn unit_mint_run_id_is_unique_and_prefixed() {
        let a = mint_run_id();
        let b = mint_run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("run-"));
    }

    #[test]
    fn unit_log_frame_round_trips_through_wire_format() {
        let event = TestEvent::success("title verification passed");
        let frame = build_test_event_frame("run-1-1", &event);
        assert_eq!(frame.schema_version, TEST_EVENT_SCHEMA_VERSION);
        assert_eq!(frame.kind, TEST_EVENT_FRAME_KIND_LOG);
        assert_eq!(frame.payload["kind"], "success");

        let raw = serde_json::to_string(&frame).expect("serialize frame");
        let parsed = parse_test_event_frame(&raw).expect("parse frame");
        assert_eq!(parsed.run_id, "run-1-1");
        assert_eq!(parsed.event, event);
    }

    #[test]
    fn unit_finish_frame_round_trips_through_wire_format() {
        let event = TestEvent::finish("test execution finished");
        let frame = build_test_event_frame("run-1-2", &event);
        assert_eq!(frame.kind, TEST_EVENT_FRAME_KIND_FINISH);

        let raw = serde_json::to_string(&frame).expect("serialize frame");
        let parsed = parse_test_event_frame(&raw).expect("parse frame");
        assert!(parsed.event.is_finish());
        assert_eq!(parsed.event.message(), "test execution finished");
    }

    #[test]
    fn regression_parse_rejects_unsupported_schema_and_blank_run_id() {
        let unsupported = r#"{"schema_version":9,"run_id":"run-1","kind":"test.log","payload":{"kind":"info","message":"x"}}"#;
        let error = parse_test_event_frame(unsupported).expect_err("schema should fail");
        assert!(error.to_string().contains("unsupported test event frame schema_version"));

        let blank = r#"{"schema_version":1,"run_id":"  ","kind":"test.log","payload":{"kind":"info","message":"x"}}"#;
        let error = parse_test_event_frame(blank).expect_err("blank run_id should fail");
        assert!(error.to_string().contains("run_id must be non-empty"));
    }

    #[test]
    fn regression_parse_rejects_unknown_frame_and_log_kinds() {
        let unknown_frame = r#"{"schema_version":1,"run_id":"run-1","kind":"test.other","payload":{"message":"x"}}"#;
        let error = parse_test_event_frame(unknown_frame).expect_err("frame kind should fail");
        assert!(error.to_string().contains("unsupported test event frame kind"));

        let unknown_log = r#"{"schema_version":1,"run_id":"run-1","kind":"test.log","payload":{"kind":"fatal","message":"x"}}"#;
        let error = parse_test_event_frame(unknown_log).expect_err("log kind should fail");
        assert!(error.to_string().contains("unsupported test event log kind"));
    }

    #[test]
    fn functional_collecting_sink_preserves_emission_order() {
        let sink = CollectingEventSink::new();
        sink.emit(TestEvent::info("first"));
        sink.emit(TestEvent::error("second"));
        sink.emit(TestEvent::finish("third"));

        let events = sink.snapshot();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].message(), "first");
        assert!(matches!(
            events[1],
            TestEvent::Log {
                kind: EventKind::Error,
                ..
            }
        ));
        assert!(events[2].is_finish());
    }

    #[test]
    fn functional_broadcast_sink_tags_frames_with_run_id_and_tolerates_no_subscribers() {
        let (sender, mut receiver) = tokio::sync::broadcast::channel(16);
        let sink = BroadcastEventSink::new("run-7-7", sender.clone());
        sink.emit(TestEvent::info("browser session acquired"));

        let frame = receiver.try_recv().expect("one frame");
        assert_eq!(frame.run_id, "run-7-7");
        assert_eq!(frame.payload["message"], "browser session acquired");

        drop(receiver);
        // Emission with no receivers must not panic or error back to the run.
        sink.emit(TestEvent::info("dropped"));
    }
}
