//! Command definitions for the sense-of-time CLI.
//!
//! Uses clap derive macro for argument parsing.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::DURATION_PRESETS_MINUTES;

// ============================================================================
// CLI Structure
// ============================================================================

/// Countdown timer daemon and clients
#[derive(Parser, Debug)]
#[command(
    name = "sense-of-time",
    version,
    about = "A short countdown timer kept in sync across windows",
    long_about = "A short countdown timer owned by a background daemon.\n\
                  Timer windows attach to the daemon; when the last one goes away the countdown resets.",
    propagate_version = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Daemon socket path (defaults to ~/.sense-of-time/sense-of-time.sock)
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,
}

// ============================================================================
// Subcommands
// ============================================================================

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show current timer status
    Status,

    /// Start or resume the countdown (needs an attached timer window)
    Start,

    /// Pause the countdown
    Stop,

    /// Reset the countdown to its full duration
    Reset,

    /// Set the countdown duration and open the timer window
    Set(SetArgs),

    /// Open (or focus) the timer window
    Open,

    /// Attach this terminal as a timer window
    Watch(WatchArgs),

    /// Run as daemon (background service)
    Daemon(DaemonArgs),

    /// Generate shell completion scripts
    Completions {
        /// Shell type for completion script
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ============================================================================
// Command Arguments
// ============================================================================

/// Arguments for the set command
#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    /// Duration in minutes (1 or 5)
    #[arg(value_parser = validate_preset_minutes)]
    pub minutes: u32,

    /// Also start the countdown
    #[arg(short, long)]
    pub start: bool,
}

/// Arguments for the watch command
#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    /// Start the countdown once attached, unless it is already running
    #[arg(short, long)]
    pub autostart: bool,

    /// Surface identifier to attach as (generated by the daemon if omitted)
    #[arg(long, value_name = "ID")]
    pub surface_id: Option<String>,
}

/// Arguments for the daemon command
#[derive(Args, Debug, Clone, Default)]
pub struct DaemonArgs {
    /// State file path (defaults to ~/.sense-of-time/state.json)
    #[arg(long, value_name = "PATH", conflicts_with = "no_persist")]
    pub state_file: Option<PathBuf>,

    /// Keep the timer state in memory only
    #[arg(long)]
    pub no_persist: bool,

    /// Default countdown length in seconds
    #[arg(
        long,
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u32).range(1..=86_400)
    )]
    pub duration: Option<u32>,

    /// Shell command that opens a timer window
    #[arg(long, value_name = "COMMAND")]
    pub window_command: Option<String>,

    /// Shell command run when the countdown completes
    #[arg(long, value_name = "COMMAND")]
    pub notify_command: Option<String>,
}

// ============================================================================
// Validation Functions
// ============================================================================

/// Validates a duration preset in minutes.
fn validate_preset_minutes(s: &str) -> Result<u32, String> {
    let minutes: u32 = s
        .parse()
        .map_err(|_| format!("'{}' is not a number of minutes", s))?;
    if !DURATION_PRESETS_MINUTES.contains(&minutes) {
        return Err(format!(
            "duration must be one of {:?} minutes",
            DURATION_PRESETS_MINUTES
        ));
    }
    Ok(minutes)
}

// ============================================================================
// Tests
// ============================================================================
