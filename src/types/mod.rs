//! Core data types for the countdown timer.
//!
//! This module defines the data structures used for:
//! - The timer state record and its transitions
//! - Surface identifiers
//! - IPC request/response and push event serialization

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Default countdown length (one minute).
pub const DEFAULT_TOTAL_SECONDS: u32 = 60;

/// Duration presets offered to users, in minutes.
pub const DURATION_PRESETS_MINUTES: [u32; 2] = [1, 5];

// ============================================================================
// SurfaceId
// ============================================================================

/// Opaque identifier of a UI surface (popup, detached window, overlay).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(String);

impl SurfaceId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TimerPhase
// ============================================================================

/// Phase derived from a [`TimerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    /// Full duration remaining, not running
    Idle,
    /// Counting down
    Running,
    /// Stopped with partial progress
    Paused,
    /// Reached zero, waiting for a reset or restart
    Expired,
}

impl TimerPhase {
    /// Returns the string representation of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerPhase::Idle => "idle",
            TimerPhase::Running => "running",
            TimerPhase::Paused => "paused",
            TimerPhase::Expired => "expired",
        }
    }
}

impl Default for TimerPhase {
    fn default() -> Self {
        TimerPhase::Idle
    }
}

// ============================================================================
// TimerState
// ============================================================================

/// The authoritative timer record.
///
/// Only the timer engine mutates it; surfaces receive clones as snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    /// Configured countdown length in seconds (> 0)
    pub total_duration_seconds: u32,
    /// Seconds left, never above the total
    pub remaining_seconds: u32,
    /// True while counting down
    pub running: bool,
    /// Wall-clock origin of the running interval
    #[serde(default)]
    pub started_at_epoch_ms: Option<u64>,
    /// Surface currently treated as authoritative for liveness
    #[serde(default)]
    pub attached_surface_id: Option<SurfaceId>,
    /// Whether any surface is currently considered live
    #[serde(default)]
    pub surface_attached: bool,
}

impl Default for TimerState {
    fn default() -> Self {
        Self::new(DEFAULT_TOTAL_SECONDS)
    }
}

impl TimerState {
    /// Creates an idle, detached state with the given duration.
    pub fn new(total_duration_seconds: u32) -> Self {
        let total = total_duration_seconds.max(1);
        Self {
            total_duration_seconds: total,
            remaining_seconds: total,
            running: false,
            started_at_epoch_ms: None,
            attached_surface_id: None,
            surface_attached: false,
        }
    }

    /// Returns the phase this state is in.
    pub fn phase(&self) -> TimerPhase {
        if self.running {
            TimerPhase::Running
        } else if self.remaining_seconds == 0 {
            TimerPhase::Expired
        } else if self.remaining_seconds == self.total_duration_seconds {
            TimerPhase::Idle
        } else {
            TimerPhase::Paused
        }
    }

    /// Computes remaining seconds at `now_ms` from the running interval origin.
    ///
    /// Returns the stored value when not running. The result never exceeds
    /// the stored value, so clock steps backwards cannot add time.
    pub fn remaining_at(&self, now_ms: u64) -> u32 {
        let Some(started) = self.started_at_epoch_ms.filter(|_| self.running) else {
            return self.remaining_seconds;
        };
        let elapsed_secs = now_ms.saturating_sub(started) / 1000;
        let total = u64::from(self.total_duration_seconds);
        let recomputed = total.saturating_sub(elapsed_secs.min(total)) as u32;
        recomputed.min(self.remaining_seconds)
    }

    /// Starts counting down from the current remaining value.
    ///
    /// An expired state restarts from the full duration. The interval origin
    /// is back-dated by the progress already made so that
    /// [`remaining_at`](Self::remaining_at) continues from here.
    pub fn start(&mut self, now_ms: u64) {
        if self.remaining_seconds == 0 {
            self.remaining_seconds = self.total_duration_seconds;
        }
        let consumed_ms =
            u64::from(self.total_duration_seconds - self.remaining_seconds) * 1000;
        self.running = true;
        self.started_at_epoch_ms = Some(now_ms.saturating_sub(consumed_ms));
    }

    /// Stops counting down, keeping partial progress.
    pub fn pause(&mut self, now_ms: u64) {
        self.remaining_seconds = self.remaining_at(now_ms);
        self.running = false;
        self.started_at_epoch_ms = None;
    }

    /// Marks the countdown as finished.
    pub fn expire(&mut self) {
        self.remaining_seconds = 0;
        self.running = false;
        self.started_at_epoch_ms = None;
    }

    /// Returns to the full duration, not running.
    pub fn reset(&mut self) {
        self.remaining_seconds = self.total_duration_seconds;
        self.running = false;
        self.started_at_epoch_ms = None;
    }

    /// Replaces the configured duration and resets to it.
    pub fn configure(&mut self, total_duration_seconds: u32) {
        self.total_duration_seconds = total_duration_seconds.max(1);
        self.reset();
    }

    /// Records `surface_id` as the authoritative live surface.
    pub fn attach(&mut self, surface_id: SurfaceId) {
        self.attached_surface_id = Some(surface_id);
        self.surface_attached = true;
    }

    /// Clears the attachment. Returns true if a surface was attached.
    pub fn detach(&mut self) -> bool {
        let was_attached = self.surface_attached;
        self.surface_attached = false;
        self.attached_surface_id = None;
        was_attached
    }

    /// Returns true if `surface_id` is the recorded authoritative surface.
    pub fn is_attached_to(&self, surface_id: &SurfaceId) -> bool {
        self.surface_attached && self.attached_surface_id.as_ref() == Some(surface_id)
    }

    /// Returns true if the state is running without an attached surface
    /// or without an interval origin.
    pub fn is_orphaned(&self) -> bool {
        self.running && (!self.surface_attached || self.started_at_epoch_ms.is_none())
    }
}

// ============================================================================
// IPC Types
// ============================================================================

/// Command from a surface (or CLI) to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum IpcRequest {
    /// Query the current snapshot
    GetTimerState,
    /// Start or resume the countdown
    StartTimer,
    /// Pause the countdown
    StopTimer,
    /// Return to the full duration
    ResetTimer,
    /// Reconfigure the duration while not running
    UpdateTimerState {
        /// Seconds left (accepted for compatibility, capped at the total)
        #[serde(rename = "timeLeft", default, skip_serializing_if = "Option::is_none")]
        time_left: Option<u32>,
        /// New total duration in seconds
        #[serde(rename = "totalTime", default, skip_serializing_if = "Option::is_none")]
        total_time: Option<u32>,
    },
    /// A surface became visible; the connection becomes its push stream
    PopupOpened {
        /// Surface identifier (assigned by the daemon when absent)
        #[serde(rename = "surfaceId", default, skip_serializing_if = "Option::is_none")]
        surface_id: Option<SurfaceId>,
    },
    /// A surface is going away
    PopupClosed {
        /// Surface identifier (any surface when absent)
        #[serde(rename = "surfaceId", default, skip_serializing_if = "Option::is_none")]
        surface_id: Option<SurfaceId>,
    },
    /// Focus an existing timer window or ask the host to create one
    OpenTimerWindow,
    /// Liveness probe
    Ping,
}

impl IpcRequest {
    /// Returns the wire action name.
    pub fn action(&self) -> &'static str {
        match self {
            IpcRequest::GetTimerState => "getTimerState",
            IpcRequest::StartTimer => "startTimer",
            IpcRequest::StopTimer => "stopTimer",
            IpcRequest::ResetTimer => "resetTimer",
            IpcRequest::UpdateTimerState { .. } => "updateTimerState",
            IpcRequest::PopupOpened { .. } => "popupOpened",
            IpcRequest::PopupClosed { .. } => "popupClosed",
            IpcRequest::OpenTimerWindow => "openTimerWindow",
            IpcRequest::Ping => "ping",
        }
    }
}

/// Outcome of an `openTimerWindow` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAction {
    /// An existing surface was asked to come to the front
    Focused,
    /// The host was asked to create a new window
    Created,
    /// No surface exists and the host cannot create one
    Unavailable,
}

/// Response data for IPC responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    /// Post-command snapshot
    #[serde(rename = "timerState", skip_serializing_if = "Option::is_none")]
    pub timer_state: Option<TimerState>,
    /// Derived phase name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Identifier of the surface that attached
    #[serde(rename = "surfaceId", skip_serializing_if = "Option::is_none")]
    pub surface_id: Option<SurfaceId>,
    /// What happened for `openTimerWindow`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowAction>,
    /// Liveness acknowledgement for `ping`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<bool>,
}

impl ResponseData {
    /// Creates response data from a timer snapshot.
    pub fn from_timer_state(state: &TimerState) -> Self {
        Self {
            timer_state: Some(state.clone()),
            phase: Some(state.phase().as_str().to_string()),
            ..Self::default()
        }
    }

    /// Creates a bare liveness acknowledgement.
    pub fn received() -> Self {
        Self {
            received: Some(true),
            ..Self::default()
        }
    }
}

/// IPC response from daemon to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Response status ("success" or "error")
    pub status: String,
    /// Human-readable message
    pub message: String,
    /// Optional response data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
}

impl IpcResponse {
    /// Creates a success response.
    pub fn success(message: impl Into<String>, data: Option<ResponseData>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data,
        }
    }

    /// Creates an error response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            data: None,
        }
    }

    /// Returns true for a success response.
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Returns the snapshot carried by this response, if any.
    pub fn timer_state(&self) -> Option<&TimerState> {
        self.data.as_ref().and_then(|d| d.timer_state.as_ref())
    }
}

/// Event pushed from the daemon to subscribed surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PushEvent {
    /// The timer state changed
    TimerUpdate {
        /// New snapshot
        #[serde(rename = "timerState")]
        timer_state: TimerState,
    },
    /// The countdown reached zero
    TimerCompleted,
    /// Heartbeat probe; the surface must answer with a [`SurfaceAck`]
    Ping,
    /// Bring the surface to the front
    Focus,
}

/// A surface's answer to a heartbeat [`PushEvent::Ping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceAck {
    /// Always true for a live surface
    pub received: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------------
    // TimerPhase Tests
    // ------------------------------------------------------------------------

    mod timer_phase_tests {
        use super::*;

        #[test]
        fn test_default_is_idle() {
            assert_eq!(TimerPhase::default(), TimerPhase::Idle);
        }

        #[test]
        fn test_as_str() {
            assert_eq!(TimerPhase::Idle.as_str(), "idle");
            assert_eq!(TimerPhase::Running.as_str(), "running");
            assert_eq!(TimerPhase::Paused.as_str(), "paused");
            assert_eq!(TimerPhase::Expired.as_str(), "expired");
        }
    }

    // ------------------------------------------------------------------------
    // TimerState Tests
    // ------------------------------------------------------------------------

    mod timer_state_tests {
        use super::*;

        fn attached(total: u32) -> TimerState {
            let mut state = TimerState::new(total);
            state.attach(SurfaceId::new("window-1"));
            state
        }

        #[test]
        fn test_default_state() {
            let state = TimerState::default();
            assert_eq!(state.total_duration_seconds, DEFAULT_TOTAL_SECONDS);
            assert_eq!(state.remaining_seconds, DEFAULT_TOTAL_SECONDS);
            assert!(!state.running);
            assert!(!state.surface_attached);
            assert_eq!(state.phase(), TimerPhase::Idle);
        }

        #[test]
        fn test_zero_total_is_clamped() {
            let state = TimerState::new(0);
            assert_eq!(state.total_duration_seconds, 1);
        }

        #[test]
        fn test_remaining_at_counts_whole_seconds() {
            let mut state = attached(300);
            state.start(10_000);

            assert_eq!(state.remaining_at(10_999), 300);
            assert_eq!(state.remaining_at(11_000), 299);
            assert_eq!(state.remaining_at(10_000 + 120_000), 180);
            assert_eq!(state.remaining_at(10_000 + 900_000), 0);
        }

        #[test]
        fn test_remaining_at_never_increases() {
            let mut state = attached(300);
            state.start(50_000);
            state.remaining_seconds = 250;

            // Clock stepped backwards to the interval origin
            assert_eq!(state.remaining_at(50_000), 250);
        }

        #[test]
        fn test_pause_then_resume_continues() {
            let mut state = attached(300);
            state.start(0);
            state.pause(100_000);

            assert_eq!(state.remaining_seconds, 200);
            assert_eq!(state.phase(), TimerPhase::Paused);
            assert!(state.started_at_epoch_ms.is_none());

            state.start(500_000);
            assert_eq!(state.remaining_at(500_000), 200);
            assert_eq!(state.remaining_at(510_000), 190);
        }

        #[test]
        fn test_start_from_expired_restarts_full() {
            let mut state = attached(120);
            state.expire();
            assert_eq!(state.phase(), TimerPhase::Expired);

            state.start(1_000);
            assert_eq!(state.remaining_seconds, 120);
            assert_eq!(state.started_at_epoch_ms, Some(1_000));
        }

        #[test]
        fn test_configure_resets() {
            let mut state = attached(60);
            state.remaining_seconds = 12;
            state.configure(300);

            assert_eq!(state.total_duration_seconds, 300);
            assert_eq!(state.remaining_seconds, 300);
        }

        #[test]
        fn test_attach_last_writer_wins() {
            let mut state = TimerState::default();
            state.attach(SurfaceId::new("a"));
            state.attach(SurfaceId::new("b"));

            assert!(state.is_attached_to(&SurfaceId::new("b")));
            assert!(!state.is_attached_to(&SurfaceId::new("a")));
        }

        #[test]
        fn test_detach_reports_previous() {
            let mut state = attached(60);
            assert!(state.detach());
            assert!(!state.detach());
            assert!(state.attached_surface_id.is_none());
        }

        #[test]
        fn test_is_orphaned() {
            let mut state = attached(60);
            state.start(0);
            assert!(!state.is_orphaned());

            state.surface_attached = false;
            assert!(state.is_orphaned());

            state.surface_attached = true;
            state.started_at_epoch_ms = None;
            assert!(state.is_orphaned());
        }

        #[test]
        fn test_serialize_camel_case() {
            let mut state = attached(60);
            state.start(42);
            let json = serde_json::to_value(&state).unwrap();

            assert_eq!(json["totalDurationSeconds"], 60);
            assert_eq!(json["remainingSeconds"], 60);
            assert_eq!(json["running"], true);
            assert_eq!(json["startedAtEpochMs"], 42);
            assert_eq!(json["attachedSurfaceId"], "window-1");
            assert_eq!(json["surfaceAttached"], true);
        }
    }

    // ------------------------------------------------------------------------
    // IPC Type Tests
    // ------------------------------------------------------------------------

    mod ipc_tests {
        use super::*;

        #[test]
        fn test_request_action_tags() {
            let json = serde_json::to_string(&IpcRequest::GetTimerState).unwrap();
            assert_eq!(json, r#"{"action":"getTimerState"}"#);

            let json = serde_json::to_string(&IpcRequest::OpenTimerWindow).unwrap();
            assert_eq!(json, r#"{"action":"openTimerWindow"}"#);
        }

        #[test]
        fn test_request_update_timer_state_payload() {
            let request: IpcRequest =
                serde_json::from_str(r#"{"action":"updateTimerState","timeLeft":300,"totalTime":300}"#)
                    .unwrap();
            assert_eq!(
                request,
                IpcRequest::UpdateTimerState {
                    time_left: Some(300),
                    total_time: Some(300),
                }
            );
        }

        #[test]
        fn test_request_popup_opened_without_id() {
            let request: IpcRequest = serde_json::from_str(r#"{"action":"popupOpened"}"#).unwrap();
            assert_eq!(request, IpcRequest::PopupOpened { surface_id: None });
            assert_eq!(request.action(), "popupOpened");
        }

        #[test]
        fn test_request_unknown_action_rejected() {
            let result: Result<IpcRequest, _> = serde_json::from_str(r#"{"action":"explode"}"#);
            assert!(result.is_err());
        }

        #[test]
        fn test_push_event_wire_format() {
            let event = PushEvent::TimerUpdate {
                timer_state: TimerState::new(60),
            };
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["action"], "timerUpdate");
            assert_eq!(json["timerState"]["remainingSeconds"], 60);

            let json = serde_json::to_string(&PushEvent::TimerCompleted).unwrap();
            assert_eq!(json, r#"{"action":"timerCompleted"}"#);
        }

        #[test]
        fn test_surface_ack_format() {
            let ack: SurfaceAck = serde_json::from_str(r#"{"received":true}"#).unwrap();
            assert!(ack.received);
        }

        #[test]
        fn test_response_from_timer_state() {
            let state = TimerState::new(300);
            let data = ResponseData::from_timer_state(&state);
            let response = IpcResponse::success("", Some(data));

            assert!(response.is_success());
            assert_eq!(response.timer_state(), Some(&state));
            assert_eq!(
                response.data.as_ref().and_then(|d| d.phase.as_deref()),
                Some("idle")
            );
        }

        #[test]
        fn test_error_response_has_no_data() {
            let response = IpcResponse::error("boom");
            assert!(!response.is_success());
            assert!(response.data.is_none());

            let json = serde_json::to_string(&response).unwrap();
            assert!(!json.contains("data"));
        }
    }
}
