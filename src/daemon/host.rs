//! Host integration: creating timer windows and system notifications.
//!
//! The daemon cannot draw windows itself. When no surface is subscribed and
//! a client asks for a timer window, the host runs a configured command
//! (for example a terminal running `sense-of-time watch`). On expiry it can
//! run a notification command. All host failures are recoverable.

use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

/// Default timeout for host commands in seconds.
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

// ============================================================================
// HostError
// ============================================================================

/// Errors from host integrations.
#[derive(Debug, Error)]
pub enum HostError {
    /// No command is configured for this action
    #[error("no {0} command configured")]
    NotConfigured(&'static str),

    /// Host commands need a tokio runtime
    #[error("host command requires a running tokio runtime")]
    NoRuntime,

    /// The command could not be started
    #[error("failed to run host command `{command}`: {reason}")]
    CommandFailed {
        /// Command line
        command: String,
        /// What went wrong
        reason: String,
    },
}

// ============================================================================
// WindowHost
// ============================================================================

/// Host-side actions the engine can request.
pub trait WindowHost: Send {
    /// Asks the host to create a new timer window.
    fn open_window(&mut self) -> Result<(), HostError>;

    /// Shows a system notification for a completed countdown.
    fn notify_completed(&mut self) -> Result<(), HostError>;
}

/// Runs configured shell commands for host actions.
#[derive(Debug, Clone, Default)]
pub struct CommandHost {
    window_command: Option<String>,
    notify_command: Option<String>,
}

impl CommandHost {
    /// Creates a host from optional shell command lines.
    pub fn new(window_command: Option<String>, notify_command: Option<String>) -> Self {
        Self {
            window_command,
            notify_command,
        }
    }

    fn spawn(kind: &'static str, command: Option<&String>) -> Result<(), HostError> {
        let command = command.ok_or(HostError::NotConfigured(kind))?.clone();
        let handle = tokio::runtime::Handle::try_current().map_err(|_| HostError::NoRuntime)?;

        info!(kind, %command, "running host command");
        handle.spawn(async move {
            if let Err(e) = run_command(&command, DEFAULT_TIMEOUT_SECONDS).await {
                warn!(kind, "host command failed: {}", e);
            }
        });
        Ok(())
    }
}

impl WindowHost for CommandHost {
    fn open_window(&mut self) -> Result<(), HostError> {
        Self::spawn("window", self.window_command.as_ref())
    }

    fn notify_completed(&mut self) -> Result<(), HostError> {
        Self::spawn("notify", self.notify_command.as_ref())
    }
}

/// Runs `command` through `sh -c` in a blocking task, bounded by a timeout.
async fn run_command(command: &str, timeout_seconds: u64) -> Result<(), HostError> {
    let task = tokio::task::spawn_blocking({
        let command = command.to_string();
        move || Command::new("sh").arg("-c").arg(&command).status()
    });

    let status = timeout(Duration::from_secs(timeout_seconds), task)
        .await
        .map_err(|_| HostError::CommandFailed {
            command: command.to_string(),
            reason: format!("timed out after {}s", timeout_seconds),
        })?
        .map_err(|e| HostError::CommandFailed {
            command: command.to_string(),
            reason: e.to_string(),
        })?
        .map_err(|e| HostError::CommandFailed {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(HostError::CommandFailed {
            command: command.to_string(),
            reason: format!("exited with {}", status),
        })
    }
}

// ============================================================================
// MockWindowHost
// ============================================================================

/// Mock host for testing. Clones share counters.
#[derive(Debug, Clone, Default)]
pub struct MockWindowHost {
    opened: Arc<AtomicUsize>,
    notified: Arc<AtomicUsize>,
    should_fail: Arc<AtomicBool>,
}

impl MockWindowHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn notify_count(&self) -> usize {
        self.notified.load(Ordering::SeqCst)
    }
}

impl WindowHost for MockWindowHost {
    fn open_window(&mut self) -> Result<(), HostError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(HostError::NotConfigured("window"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn notify_completed(&mut self) -> Result<(), HostError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(HostError::NotConfigured("notify"));
        }
        self.notified.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
