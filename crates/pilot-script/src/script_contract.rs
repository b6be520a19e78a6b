use serde::{Deserialize, Serialize};
use thiserror::Error;

use pilot_events::EventKind;

pub const SCRIPT_SCHEMA_VERSION: u32 = 1;

pub const SCRIPT_ERROR_CODE_LOAD: &str = "script_load_error";
pub const SCRIPT_ERROR_CODE_CONTRACT: &str = "script_contract_error";
pub const SCRIPT_ERROR_CODE_GENERATION: &str = "script_generation_error";

fn script_schema_version() -> u32 {
    SCRIPT_SCHEMA_VERSION
}

fn default_wait_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Error)]
/// Enumerates supported `ScriptError` values.
pub enum ScriptError {
    #[error("script artifact '{0}' was not found")]
    NotFound(String),
    #[error("script contract violation: {0}")]
    Contract(String),
    #[error("script generation failed: {0}")]
    Generation(String),
    #[error("script store io failure at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ScriptError {
    fn contract(reason: impl Into<String>) -> Self {
        Self::Contract(reason.into())
    }

    /// Stable classification code carried on error events.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::Io { .. } => SCRIPT_ERROR_CODE_LOAD,
            Self::Contract(_) => SCRIPT_ERROR_CODE_CONTRACT,
            Self::Generation(_) => SCRIPT_ERROR_CODE_GENERATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Caps on what a stored script may ask the browser session to do.
pub struct ScriptPolicy {
    pub max_steps: usize,
    pub max_wait_timeout_ms: u64,
}

impl Default for ScriptPolicy {
    fn default() -> Self {
        Self {
            max_steps: 32,
            max_wait_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
/// Enumerates supported `TestStep` values.
///
/// This is the whole capability surface generated scripts can reach; there
/// is deliberately no filesystem or raw-process operation here.
pub enum TestStep {
    Navigate {
        url: String,
    },
    WaitFor {
        selector: String,
        #[serde(default = "default_wait_timeout_ms")]
        timeout_ms: u64,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Screenshot {
        label: String,
    },
    AssertTitleContains {
        expected: String,
    },
    AssertUrlContains {
        expected: String,
    },
    AssertTextContains {
        selector: String,
        expected: String,
    },
    Log {
        kind: EventKind,
        message: String,
    },
}

impl TestStep {
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::WaitFor { .. } => "wait_for",
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Screenshot { .. } => "screenshot",
            Self::AssertTitleContains { .. } => "assert_title_contains",
            Self::AssertUrlContains { .. } => "assert_url_contains",
            Self::AssertTextContains { .. } => "assert_text_contains",
            Self::Log { .. } => "log",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `TestScript` used across pilot components.
pub struct TestScript {
    #[serde(default = "script_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<TestStep>,
}

/// Parses a raw script document and validates it against the contract.
///
/// The document must be exactly one JSON object with a `steps` array; a JSON
/// array, scalar, or multi-document blob is a contract violation, never a
/// partial load.
pub fn parse_script_document(raw: &str, policy: &ScriptPolicy) -> Result<TestScript, ScriptError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|error| ScriptError::contract(format!("invalid JSON: {error}")))?;
    if !value.is_object() {
        return Err(ScriptError::contract(
            "script document must be a single JSON object with a steps array",
        ));
    }

    let script: TestScript = serde_json::from_value(value)
        .map_err(|error| ScriptError::contract(format!("unsupported script shape: {error}")))?;
    validate_test_script(&script, policy)?;
    Ok(script)
}

pub fn validate_test_script(script: &TestScript, policy: &ScriptPolicy) -> Result<(), ScriptError> {
    if script.schema_version != SCRIPT_SCHEMA_VERSION {
        return Err(ScriptError::contract(format!(
            "unsupported script schema_version {} (expected {})",
            script.schema_version, SCRIPT_SCHEMA_VERSION
        )));
    }
    if script.steps.is_empty() {
        return Err(ScriptError::contract("script must include at least one step"));
    }
    let max_steps = policy.max_steps.max(1);
    if script.steps.len() > max_steps {
        return Err(ScriptError::contract(format!(
            "script has {} steps; policy allows at most {}",
            script.steps.len(),
            max_steps
        )));
    }

    for (index, step) in script.steps.iter().enumerate() {
        validate_step(step, index, policy)?;
    }
    Ok(())
}

fn validate_step(step: &TestStep, index: usize, policy: &ScriptPolicy) -> Result<(), ScriptError> {
    let op = step.op_name();
    match step {
        TestStep::Navigate { url } => {
            if !is_valid_url(url) {
                return Err(ScriptError::contract(format!(
                    "step {index} ({op}) requires an http(s) url, got '{}'",
                    url.trim()
                )));
            }
        }
        TestStep::WaitFor {
            selector,
            timeout_ms,
        } => {
            require_selector(selector, index, op)?;
            let cap = policy.max_wait_timeout_ms.max(1);
            if *timeout_ms == 0 || *timeout_ms > cap {
                return Err(ScriptError::contract(format!(
                    "step {index} ({op}) timeout_ms must be in 1..={cap}, got {timeout_ms}"
                )));
            }
        }
        TestStep::Click { selector } => require_selector(selector, index, op)?,
        TestStep::Type { selector, text } => {
            require_selector(selector, index, op)?;
            if text.trim().is_empty() {
                return Err(ScriptError::contract(format!(
                    "step {index} ({op}) requires non-empty text"
                )));
            }
        }
        TestStep::Screenshot { label } => {
            let label = label.trim();
            if label.is_empty()
                || !label
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
            {
                return Err(ScriptError::contract(format!(
                    "step {index} ({op}) label must be non-empty and limited to [A-Za-z0-9_-]"
                )));
            }
        }
        TestStep::AssertTitleContains { expected } | TestStep::AssertUrlContains { expected } => {
            require_expected(expected, index, op)?;
        }
        TestStep::AssertTextContains { selector, expected } => {
            require_selector(selector, index, op)?;
            require_expected(expected, index, op)?;
        }
        TestStep::Log { message, .. } => {
            if message.trim().is_empty() {
                return Err(ScriptError::contract(format!(
                    "step {index} ({op}) requires a non-empty message"
                )));
            }
        }
    }
    Ok(())
}

fn require_selector(selector: &str, index: usize, op: &str) -> Result<(), ScriptError> {
    if selector.trim().is_empty() {
        return Err(ScriptError::contract(format!(
            "step {index} ({op}) requires a non-empty selector"
        )));
    }
    Ok(())
}

fn require_expected(expected: &str, index: usize, op: &str) -> Result<(), ScriptError> {
    if expected.trim().is_empty() {
        return Err(ScriptError::contract(format!(
            "step {index} ({op}) requires a non-empty expected value"
        )));
    }
    Ok(())
}

fn is_valid_url(url: &str) -> bool {
    let trimmed = url.trim();
    !trimmed.is_empty() && (trimmed.starts_with("http://") || trimmed.starts_with("https://"))
}
