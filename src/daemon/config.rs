//! Daemon configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::time::Duration;

use crate::types::DEFAULT_TOTAL_SECONDS;

use super::service::ServiceTiming;

/// Directory under the home directory holding the socket and state file.
pub const APP_DIR: &str = ".sense-of-time";

/// Socket file name.
pub const SOCKET_FILE: &str = "sense-of-time.sock";

/// State file name.
pub const STATE_FILE: &str = "state.json";

/// Returns `~/.sense-of-time`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn app_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Cannot determine the home directory")?;
    Ok(home.join(APP_DIR))
}

/// Returns the default socket path.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_socket_path() -> Result<PathBuf> {
    Ok(app_dir()?.join(SOCKET_FILE))
}

/// Returns the default state file path.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_state_path() -> Result<PathBuf> {
    Ok(app_dir()?.join(STATE_FILE))
}

/// Configuration of a daemon process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,
    /// Where the timer state is persisted (`None` keeps it in memory)
    pub state_path: Option<PathBuf>,
    /// Countdown length for a fresh state, in seconds
    pub default_total_seconds: u32,
    /// Engine timer periods
    pub timing: ServiceTiming,
    /// How long a restored attachment may go without a listener
    pub reattach_grace: Duration,
    /// Shell command that opens a timer window
    pub window_command: Option<String>,
    /// Shell command run when the countdown completes
    pub notify_command: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let dir = app_dir().unwrap_or_else(|_| std::env::temp_dir().join(APP_DIR));
        Self {
            socket_path: dir.join(SOCKET_FILE),
            state_path: Some(dir.join(STATE_FILE)),
            default_total_seconds: DEFAULT_TOTAL_SECONDS,
            timing: ServiceTiming::default(),
            reattach_grace: Duration::from_secs(3),
            window_command: None,
            notify_command: None,
        }
    }
}

impl DaemonConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_total_seconds == 0 {
            return Err("default duration must be at least 1 second".to_string());
        }
        let ServiceTiming {
            tick,
            heartbeat,
            heartbeat_deadline,
            sweep,
        } = self.timing;
        if tick.is_zero() || heartbeat.is_zero() || sweep.is_zero() {
            return Err("tick, heartbeat and sweep periods must be non-zero".to_string());
        }
        if heartbeat_deadline.is_zero() || heartbeat_deadline >= heartbeat {
            return Err("heartbeat deadline must be shorter than the heartbeat period".to_string());
        }
        if self.socket_path.as_os_str().is_empty() {
            return Err("socket path must not be empty".to_string());
        }
        if self.state_path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
            return Err("state path must not be empty".to_string());
        }
        Ok(())
    }
}
