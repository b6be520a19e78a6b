//! Browser session capability surface and the driver-CLI implementation.
//!
//! `BrowserSession` exposes exactly the operations a generated script may
//! use. Scripts never see the driver subprocess, the filesystem, or any
//! wider automation API than this trait.

mod driver_cli;
mod session;

pub use driver_cli::{DriverCliConfig, DriverCliLauncher, DriverCliSession};
pub use session::{BrowserSession, SessionError, SessionLauncher};
