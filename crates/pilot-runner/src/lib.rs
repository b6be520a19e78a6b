//! Binds one script artifact to one fresh browser session and drives it to
//! completion.
//!
//! The contract this crate guarantees, regardless of what the script does:
//! the session is launched at most once and closed on every exit path, step
//! failures are caught and reported through the sink instead of propagating,
//! and every started run ends with exactly one terminal finish event emitted
//! after teardown.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use pilot_browser::{BrowserSession, SessionError, SessionLauncher};
use pilot_events::{EventSink, TestEvent};
use pilot_script::{ScriptError, ScriptStore, TestScript, TestStep};

pub const RUN_ERROR_CODE_SESSION: &str = "browser_session_error";
pub const RUN_ERROR_CODE_VERIFICATION: &str = "verification_failure";

pub const RUN_FINISH_MESSAGE: &str = "test execution finished";

#[derive(Debug, Error)]
enum StepFailure {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Verification(String),
}

impl StepFailure {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Session(_) => RUN_ERROR_CODE_SESSION,
            Self::Verification(_) => RUN_ERROR_CODE_VERIFICATION,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
/// Enumerates supported `RunOutcome` values.
pub enum RunOutcome {
    Passed,
    Failed { error_code: String, message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Public struct `RunReport` used across pilot components.
pub struct RunReport {
    pub script_name: String,
    pub outcome: RunOutcome,
    pub steps_executed: usize,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Passed)
    }
}

/// Executes stored script artifacts, one fresh session per run.
pub struct ScriptRunner {
    store: ScriptStore,
    launcher: Arc<dyn SessionLauncher>,
}

impl ScriptRunner {
    pub fn new(store: ScriptStore, launcher: Arc<dyn SessionLauncher>) -> Self {
        Self { store, launcher }
    }

    pub fn store(&self) -> &ScriptStore {
        &self.store
    }

    /// Runs one artifact against one fresh browser session.
    ///
    /// Load and contract violations return `Err` before any session exists
    /// (one classified error event, no terminal event: no run began). Once a
    /// session launch is attempted the run always completes with `Ok` and a
    /// terminal finish event; step, verification, and teardown failures are
    /// reported on the sink, never raised past this boundary.
    pub fn run(&self, name: &str, sink: &dyn EventSink) -> Result<RunReport, ScriptError> {
        let script = match self.store.load(name) {
            Ok(script) => script,
            Err(error) => {
                tracing::warn!(artifact = name, %error, "script rejected before session launch");
                sink.emit(TestEvent::error(format!(
                    "[{}] {error}",
                    error.error_code()
                )));
                return Err(error);
            }
        };

        sink.emit(TestEvent::info(format!("executing test script: {name}")));

        let mut session = match self.launcher.launch() {
            Ok(session) => session,
            Err(error) => {
                sink.emit(TestEvent::error(format!(
                    "[{RUN_ERROR_CODE_SESSION}] {error}"
                )));
                sink.emit(TestEvent::finish(RUN_FINISH_MESSAGE));
                return Ok(RunReport {
                    script_name: name.to_string(),
                    outcome: RunOutcome::Failed {
                        error_code: RUN_ERROR_CODE_SESSION.to_string(),
                        message: error.to_string(),
                    },
                    steps_executed: 0,
                    duration_ms: 0,
                });
            }
        };
        sink.emit(TestEvent::info("browser session acquired"));

        // The clock covers script execution only, not session acquisition.
        let started = Instant::now();
        let mut steps_executed = 0usize;
        let result = execute_steps(session.as_mut(), &script, sink, &mut steps_executed);
        let duration_ms = elapsed_ms(started);

        let outcome = match result {
            Ok(()) => {
                sink.emit(TestEvent::info(format!(
                    "test completed in {:.2} seconds",
                    duration_ms as f64 / 1000.0
                )));
                RunOutcome::Passed
            }
            Err(failure) => {
                // Safety net: the failure stops the run but never the host.
                sink.emit(TestEvent::error(format!(
                    "[{}] {failure}",
                    failure.error_code()
                )));
                RunOutcome::Failed {
                    error_code: failure.error_code().to_string(),
                    message: failure.to_string(),
                }
            }
        };

        match session.close() {
            Ok(()) => sink.emit(TestEvent::info("browser session closed")),
            Err(error) => {
                // Teardown failure is reported, never re-thrown; the session
                // is considered released either way.
                tracing::warn!(artifact = name, %error, "browser session teardown failed");
                sink.emit(TestEvent::error(format!(
                    "[{RUN_ERROR_CODE_SESSION}] {error}"
                )));
            }
        }

        sink.emit(TestEvent::finish(RUN_FINISH_MESSAGE));

        Ok(RunReport {
            script_name: name.to_string(),
            outcome,
            steps_executed,
            duration_ms,
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn execute_steps(
    session: &mut dyn BrowserSession,
    script: &TestScript,
    sink: &dyn EventSink,
    steps_executed: &mut usize,
) -> Result<(), StepFailure> {
    for step in &script.steps {
        execute_step(session, step, sink)?;
        *steps_executed += 1;
    }
    Ok(())
}

fn execute_step(
    session: &mut dyn BrowserSession,
    step: &TestStep,
    sink: &dyn EventSink,
) -> Result<(), StepFailure> {
    match step {
        TestStep::Navigate { url } => {
            sink.emit(TestEvent::info(format!("navigating to {url}")));
            session.navigate(url)?;
        }
        TestStep::WaitFor {
            selector,
            timeout_ms,
        } => {
            sink.emit(TestEvent::info(format!(
                "waiting for '{selector}' (up to {timeout_ms} ms)"
            )));
            session.wait_for(selector, *timeout_ms)?;
        }
        TestStep::Click { selector } => {
            sink.emit(TestEvent::info(format!("clicking '{selector}'")));
            session.click(selector)?;
        }
        TestStep::Type { selector, text } => {
            // The typed text is not logged; it may hold credentials.
            sink.emit(TestEvent::info(format!("typing into '{selector}'")));
            session.type_text(selector, text)?;
        }
        TestStep::Screenshot { label } => {
            let stored = session.screenshot(label)?;
            sink.emit(TestEvent::info(format!("captured screenshot: {stored}")));
        }
        TestStep::AssertTitleContains { expected } => {
            let title = session.title()?;
            if title.contains(expected.as_str()) {
                sink.emit(TestEvent::success(format!(
                    "title verification passed: '{title}' contains '{expected}'"
                )));
            } else {
                return Err(StepFailure::Verification(format!(
                    "expected title to contain '{expected}', got '{title}'"
                )));
            }
        }
        TestStep::AssertUrlContains { expected } => {
            let url = session.current_url()?;
            if url.contains(expected.as_str()) {
                sink.emit(TestEvent::success(format!(
                    "url verification passed: {url}"
                )));
            } else {
                return Err(StepFailure::Verification(format!(
                    "expected url to contain '{expected}', got '{url}'"
                )));
            }
        }
        TestStep::AssertTextContains { selector, expected } => {
            let text = session.element_text(selector)?;
            if text.contains(expected.as_str()) {
                sink.emit(TestEvent::success(format!(
                    "text verification passed for '{selector}'"
                )));
            } else {
                return Err(StepFailure::Verification(format!(
                    "expected text of '{selector}' to contain '{expected}', got '{text}'"
                )));
            }
        }
        TestStep::Log { kind, message } => {
            sink.emit(TestEvent::Log {
                kind: *kind,
                message: message.clone(),
            });
        }
    }
    Ok(())
}
