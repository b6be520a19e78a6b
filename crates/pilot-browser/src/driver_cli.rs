use std::path::PathBuf;
use std::process::Command;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::{BrowserSession, SessionError, SessionLauncher};

#[derive(Debug, Clone)]
/// Public struct `DriverCliConfig` used across pilot components.
pub struct DriverCliConfig {
    /// Path to the browser driver executable (subcommand + JSON payload ABI).
    pub cli_path: String,
    /// Directory the driver writes screenshots into.
    pub screenshots_dir: PathBuf,
}

#[derive(Debug, Clone)]
/// Launches browser sessions by spawning the driver CLI.
pub struct DriverCliLauncher {
    config: DriverCliConfig,
}

impl DriverCliLauncher {
    pub fn new(config: DriverCliConfig) -> Result<Self, SessionError> {
        if config.cli_path.trim().is_empty() {
            return Err(SessionError::Launch(
                "browser driver cli path cannot be empty".to_string(),
            ));
        }
        std::fs::create_dir_all(&config.screenshots_dir).map_err(|error| {
            SessionError::Launch(format!(
                "failed to create screenshots directory {}: {error}",
                config.screenshots_dir.display()
            ))
        })?;
        Ok(Self { config })
    }
}

impl SessionLauncher for DriverCliLauncher {
    fn launch(&self) -> Result<Box<dyn BrowserSession>, SessionError> {
        let mut session = DriverCliSession {
            cli_path: self.config.cli_path.trim().to_string(),
            closed: false,
        };
        session
            .invoke(
                "start-session",
                json!({
                    "screenshots_dir": self.config.screenshots_dir.display().to_string(),
                }),
            )
            .map_err(|error| SessionError::Launch(error.to_string()))?;
        Ok(Box::new(session))
    }
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    status: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
/// One live driver-backed browser session.
pub struct DriverCliSession {
    cli_path: String,
    closed: bool,
}

impl DriverCliSession {
    fn invoke(&mut self, subcommand: &str, payload: Value) -> Result<Value, SessionError> {
        let payload_raw = payload.to_string();
        let output = Command::new(&self.cli_path)
            .arg(subcommand)
            .arg(&payload_raw)
            .output()
            .map_err(|error| SessionError::Command {
                command: subcommand.to_string(),
                reason: format!("failed to launch driver '{}': {error}", self.cli_path),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let detail = if !stderr.is_empty() {
                stderr
            } else if !stdout.is_empty() {
                stdout
            } else {
                "no output".to_string()
            };
            return Err(SessionError::Command {
                command: subcommand.to_string(),
                reason: detail,
            });
        }

        let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if raw.is_empty() {
            return Err(SessionError::InvalidResponse {
                command: subcommand.to_string(),
                reason: "driver returned empty response".to_string(),
            });
        }
        let reply: DriverReply =
            serde_json::from_str(&raw).map_err(|error| SessionError::InvalidResponse {
                command: subcommand.to_string(),
                reason: format!("{error}: {raw}"),
            })?;

        if reply.status != "ok" {
            let reason = if reply.message.trim().is_empty() {
                format!("driver reported status '{}'", reply.status)
            } else {
                reply.message
            };
            return Err(SessionError::Command {
                command: subcommand.to_string(),
                reason,
            });
        }
        Ok(reply.value)
    }

    fn invoke_for_text(&mut self, subcommand: &str, payload: Value) -> Result<String, SessionError> {
        let value = self.invoke(subcommand, payload)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SessionError::InvalidResponse {
                command: subcommand.to_string(),
                reason: format!("expected string value, got {value}"),
            })
    }
}

impl BrowserSession for DriverCliSession {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.invoke("navigate", json!({ "url": url })).map(|_| ())
    }

    fn wait_for(&mut self, selector: &str, timeout_ms: u64) -> Result<(), SessionError> {
        self.invoke(
            "wait-for",
            json!({ "selector": selector, "timeout_ms": timeout_ms }),
        )
        .map(|_| ())
    }

    fn click(&mut self, selector: &str) -> Result<(), SessionError> {
        self.invoke("click", json!({ "selector": selector })).map(|_| ())
    }

    fn type_text(&mut self, selector: &str, text: &str) -> Result<(), SessionError> {
        self.invoke("type", json!({ "selector": selector, "text": text }))
            .map(|_| ())
    }

    fn title(&mut self) -> Result<String, SessionError> {
        self.invoke_for_text("title", json!({}))
    }

    fn current_url(&mut self) -> Result<String, SessionError> {
        self.invoke_for_text("current-url", json!({}))
    }

    fn element_text(&mut self, selector: &str) -> Result<String, SessionError> {
        self.invoke_for_text("element-text", json!({ "selector": selector }))
    }

    fn screenshot(&mut self, label: &str) -> Result<String, SessionError> {
        self.invoke_for_text("screenshot", json!({ "label": label }))
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.invoke("shutdown-session", json!({}))
            .map_err(|error| SessionError::Teardown(error.to_string()))?;
        self.closed = true;
        Ok(())
    }
}

impl Drop for DriverCliSession {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(error) = self.close() {
                tracing::warn!(%error, "browser session drop cleanup failed");
            }
        }
    }
}
