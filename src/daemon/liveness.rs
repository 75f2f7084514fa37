//! Liveness tracking for UI surfaces.
//!
//! Decides whether a surface is attached, from three kinds of evidence:
//! - lifecycle signals (`popupOpened` / `popupClosed`)
//! - window-close events (a surface's push stream closing)
//! - heartbeat probe outcomes
//!
//! The tracker only edits the attachment fields of [`TimerState`]. Applying
//! the auto-reset policy is left to the engine.

use crate::types::{SurfaceId, TimerState};

/// Why a surface was considered gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// The surface said it is closing
    Explicit,
    /// The surface's window (push stream) closed
    WindowClosed,
    /// A heartbeat probe went unanswered
    HeartbeatMissed,
    /// The consistency sweep found an orphaned countdown
    Sweep,
}

impl DetachReason {
    /// Returns the string representation used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetachReason::Explicit => "explicit",
            DetachReason::WindowClosed => "window_closed",
            DetachReason::HeartbeatMissed => "heartbeat_missed",
            DetachReason::Sweep => "sweep",
        }
    }
}

/// Result of one heartbeat probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The surface answered in time
    Acknowledged,
    /// No push stream is registered for the surface
    NoListener,
    /// The probe was sent but the answer never came (or delivery failed)
    Unanswered,
}

/// Tracks attachment of the authoritative surface.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    /// Until this instant a missing listener is tolerated (after a restore)
    reattach_grace_until_ms: Option<u64>,
}

impl LivenessTracker {
    /// Creates a tracker with no grace period.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tolerates a missing listener until `until_ms`, giving a surface that
    /// was attached before a restart time to reconnect.
    pub fn with_reattach_grace(until_ms: u64) -> Self {
        Self {
            reattach_grace_until_ms: Some(until_ms),
        }
    }

    /// Returns true while the re-attach grace period is active.
    pub fn in_grace(&self, now_ms: u64) -> bool {
        self.reattach_grace_until_ms.is_some_and(|until| now_ms < until)
    }

    /// Records `surface_id` as attached. Returns the surface it replaced.
    pub fn attach(&mut self, state: &mut TimerState, surface_id: SurfaceId) -> Option<SurfaceId> {
        self.reattach_grace_until_ms = None;
        let previous = state
            .attached_surface_id
            .take()
            .filter(|prev| *prev != surface_id);
        state.attach(surface_id);
        previous
    }

    /// Applies an explicit detach signal.
    ///
    /// With an id, only the matching surface is detached. Without one, any
    /// attachment is cleared. Returns true if the state went detached.
    pub fn explicit_detach(&mut self, state: &mut TimerState, surface_id: Option<&SurfaceId>) -> bool {
        match surface_id {
            Some(id) if !state.is_attached_to(id) => false,
            _ => state.detach(),
        }
    }

    /// Applies a window-close event. Only the recorded surface counts.
    pub fn window_closed(&mut self, state: &mut TimerState, surface_id: &SurfaceId) -> bool {
        state.is_attached_to(surface_id) && state.detach()
    }

    /// Returns the surface the heartbeat should probe, if any.
    pub fn probe_target(&self, state: &TimerState) -> Option<SurfaceId> {
        if state.surface_attached {
            state.attached_surface_id.clone()
        } else {
            None
        }
    }

    /// Applies a probe outcome. Returns true if the state went detached.
    ///
    /// Outcomes for a surface that is no longer authoritative are ignored.
    pub fn record_probe(
        &mut self,
        state: &mut TimerState,
        surface_id: &SurfaceId,
        outcome: ProbeOutcome,
        now_ms: u64,
    ) -> bool {
        if !state.is_attached_to(surface_id) {
            return false;
        }
        match outcome {
            ProbeOutcome::Acknowledged => {
                self.reattach_grace_until_ms = None;
                false
            }
            ProbeOutcome::NoListener if self.in_grace(now_ms) => {
                tracing::debug!(surface = %surface_id, "no listener yet; within re-attach grace");
                false
            }
            ProbeOutcome::NoListener | ProbeOutcome::Unanswered => state.detach(),
        }
    }

    /// Returns true if the sweep must reset the countdown.
    pub fn needs_sweep_reset(&self, state: &TimerState) -> bool {
        state.is_orphaned()
    }
}
