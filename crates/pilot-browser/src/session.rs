use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `SessionError` values.
pub enum SessionError {
    #[error("browser session launch failed: {0}")]
    Launch(String),
    #[error("browser command '{command}' failed: {reason}")]
    Command { command: String, reason: String },
    #[error("browser driver returned an invalid '{command}' response: {reason}")]
    InvalidResponse { command: String, reason: String },
    #[error("browser session teardown failed: {0}")]
    Teardown(String),
}

/// Trait contract for `BrowserSession` behavior.
///
/// One live, stateful browser instance bound to a single page context,
/// exclusively owned by the run that launched it. Every wait takes an
/// explicit timeout; there is no unbounded blocking operation here.
pub trait BrowserSession: Send {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError>;
    fn wait_for(&mut self, selector: &str, timeout_ms: u64) -> Result<(), SessionError>;
    fn click(&mut self, selector: &str) -> Result<(), SessionError>;
    fn type_text(&mut self, selector: &str, text: &str) -> Result<(), SessionError>;
    fn title(&mut self) -> Result<String, SessionError>;
    fn current_url(&mut self) -> Result<String, SessionError>;
    fn element_text(&mut self, selector: &str) -> Result<String, SessionError>;
    /// Captures a screenshot under the configured screenshots directory and
    /// returns the stored file name.
    fn screenshot(&mut self, label: &str) -> Result<String, SessionError>;
    /// Best-effort teardown; callers treat failure as reportable, not fatal.
    fn close(&mut self) -> Result<(), SessionError>;
}

/// Trait contract for `SessionLauncher` behavior.
///
/// Each call produces a fresh, independent session; there is no pooling.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self) -> Result<Box<dyn BrowserSession>, SessionError>;
}
