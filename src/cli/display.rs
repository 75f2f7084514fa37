//! Display utilities for the sense-of-time CLI.
//!
//! This module provides formatted output for:
//! - Command results and status
//! - Error messages
//! - The countdown line rendered by `watch`

use crate::types::{IpcResponse, TimerPhase, TimerState, WindowAction};

/// Width of the progress bar in `watch`, in cells.
pub const PROGRESS_WIDTH: usize = 30;

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

// ============================================================================
// Urgency
// ============================================================================

/// Colour band of the remaining time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// More than a minute left
    Normal,
    /// A minute or less
    Warning,
    /// Ten seconds or less
    Critical,
}

impl Urgency {
    /// Band for `remaining_seconds`.
    pub fn for_remaining(remaining_seconds: u32) -> Self {
        match remaining_seconds {
            0..=10 => Urgency::Critical,
            11..=60 => Urgency::Warning,
            _ => Urgency::Normal,
        }
    }

    fn colour(self) -> Option<&'static str> {
        match self {
            Urgency::Normal => None,
            Urgency::Warning => Some(YELLOW),
            Urgency::Critical => Some(RED),
        }
    }
}

// ============================================================================
// Display
// ============================================================================

/// Display utilities for CLI output.
pub struct Display;

impl Display {
    /// Shows the result of a timer command.
    pub fn show_command_result(response: &IpcResponse) {
        if !response.message.is_empty() {
            println!("* {}", response.message);
        }
        if let Some(state) = response.timer_state() {
            println!("  Remaining: {}", Self::format_time(state.remaining_seconds));
        }
    }

    /// Shows the result of `open`.
    pub fn show_window_result(response: &IpcResponse) {
        let window = response.data.as_ref().and_then(|d| d.window);
        match window {
            Some(WindowAction::Unavailable) | None => {
                println!("! {}", response.message);
                println!("  Run `sense-of-time watch` in a terminal, or start the daemon with --window-command");
            }
            Some(_) => println!("* {}", response.message),
        }
    }

    /// Shows the current timer status.
    pub fn show_status(response: &IpcResponse) {
        println!("Sense of Time status");
        println!("─────────────────────────────");

        let Some(state) = response.timer_state() else {
            println!("The daemon returned no timer state");
            return;
        };

        let phase = state.phase();
        println!("State: {}", phase.as_str());
        println!(
            "Remaining: {} / {}",
            Self::format_time(state.remaining_seconds),
            Self::format_time(state.total_duration_seconds)
        );
        match (&state.attached_surface_id, state.surface_attached) {
            (Some(id), true) => println!("Window: attached ({})", id),
            _ => println!("Window: none"),
        }
    }

    /// Shows an error message.
    pub fn show_error(message: &str) {
        eprintln!("Error: {}", message);
    }

    /// Formats seconds as `mm:ss`.
    pub fn format_time(total_seconds: u32) -> String {
        format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
    }

    /// Renders a `width`-cell bar filled in proportion to elapsed time.
    pub fn progress_bar(state: &TimerState, width: usize) -> String {
        let total = state.total_duration_seconds.max(1) as usize;
        let remaining = (state.remaining_seconds as usize).min(total);
        let filled = (total - remaining) * width / total;
        format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
    }

    /// Renders the single countdown line shown by `watch`.
    pub fn render_countdown(state: &TimerState, colour: bool) -> String {
        let time = Self::format_time(state.remaining_seconds);
        let time = match Urgency::for_remaining(state.remaining_seconds).colour() {
            Some(code) if colour && state.phase() != TimerPhase::Idle => {
                format!("{}{}{}", code, time, RESET)
            }
            _ => time,
        };
        let label = match state.phase() {
            TimerPhase::Idle => "ready",
            TimerPhase::Running => "running",
            TimerPhase::Paused => "paused",
            TimerPhase::Expired => "time's up",
        };
        format!(
            "{} {} {}",
            time,
            Self::progress_bar(state, PROGRESS_WIDTH),
            label
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
