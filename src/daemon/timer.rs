//! Timer engine for the countdown daemon.
//!
//! This module provides the core timer functionality:
//! - State transitions (Idle → Running → Paused/Expired)
//! - Remaining time recomputed from wall-clock elapsed time
//! - Persist-then-broadcast of every mutation
//! - Auto-reset when the authoritative surface goes away
//! - A named expiry alarm as a backstop for starved ticks
//!
//! The engine is synchronous and owns all state. [`super::service`] drives
//! it from a single task, so every mutation is serialized.

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::types::{PushEvent, SurfaceId, TimerState, WindowAction};

use super::alarm::{AlarmSchedule, PendingAlarm, EXPIRY_ALARM};
use super::clock::{Clock, SystemClock};
use super::host::{CommandHost, WindowHost};
use super::liveness::{DetachReason, LivenessTracker, ProbeOutcome};
use super::store::{MemoryStateStore, StateStore};
use super::surfaces::{SurfaceHandle, SurfaceRegistry};

// ============================================================================
// TimerEvent
// ============================================================================

/// Timer events for logging and external integrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// Countdown started or resumed
    Started {
        /// Remaining seconds at start
        remaining_seconds: u32,
    },
    /// Countdown paused
    Paused {
        /// Remaining seconds at pause
        remaining_seconds: u32,
    },
    /// Countdown returned to the full duration
    Reset,
    /// Duration changed
    Configured {
        /// New total in seconds
        total_seconds: u32,
    },
    /// Remaining time changed while running
    Tick {
        /// Remaining seconds
        remaining_seconds: u32,
    },
    /// Countdown reached zero
    Expired,
    /// A surface became authoritative
    Attached {
        /// Surface identifier
        surface_id: SurfaceId,
    },
    /// The authoritative surface went away
    Detached {
        /// Why it was considered gone
        reason: DetachReason,
    },
    /// The countdown was reset because nothing observes it
    AutoReset {
        /// What triggered the reset
        reason: DetachReason,
    },
}

/// A heartbeat probe in flight.
#[derive(Debug)]
pub struct PendingProbe {
    /// Probed surface
    pub surface_id: SurfaceId,
    /// Completed when the surface answers
    pub ack: oneshot::Receiver<()>,
}

// ============================================================================
// TimerEngine
// ============================================================================

/// Timer engine that owns the timer state and its collaborators.
pub struct TimerEngine {
    /// Current timer state
    state: TimerState,
    /// Wall-clock source
    clock: Box<dyn Clock>,
    /// Durable copy of the state
    store: Box<dyn StateStore>,
    /// Window/notification host
    host: Box<dyn WindowHost>,
    /// Subscribed surfaces
    surfaces: SurfaceRegistry,
    /// Attachment policy
    liveness: LivenessTracker,
    /// Pending alarms
    alarms: AlarmSchedule,
    /// Event sender channel
    event_tx: mpsc::UnboundedSender<TimerEvent>,
    /// Last save failed; retry on the next tick
    persist_pending: bool,
}

impl TimerEngine {
    /// Creates an engine with an idle state of `total_seconds`.
    ///
    /// Defaults to the system clock, an in-memory store and an unconfigured
    /// command host. Use the `with_*` methods to replace them.
    pub fn new(total_seconds: u32, event_tx: mpsc::UnboundedSender<TimerEvent>) -> Self {
        Self {
            state: TimerState::new(total_seconds),
            clock: Box::new(SystemClock),
            store: Box::new(MemoryStateStore::new()),
            host: Box::new(CommandHost::default()),
            surfaces: SurfaceRegistry::new(),
            liveness: LivenessTracker::new(),
            alarms: AlarmSchedule::new(),
            event_tx,
            persist_pending: false,
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Replaces the state store.
    pub fn with_store(mut self, store: impl StateStore + 'static) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Replaces the window host.
    pub fn with_host(mut self, host: impl WindowHost + 'static) -> Self {
        self.host = Box::new(host);
        self
    }

    /// Restores the last persisted state, correcting for time spent down.
    ///
    /// A restored attachment is given `reattach_grace` for its surface to
    /// reconnect before a missing listener counts as a detach.
    pub fn restore(&mut self, reattach_grace: Duration) {
        let saved = match self.store.load() {
            Ok(Some(saved)) => saved,
            Ok(None) => {
                debug!("no persisted timer state");
                return;
            }
            Err(e) => {
                warn!("discarding unreadable timer state: {}", e);
                if let Err(e) = self.store.clear() {
                    warn!("failed to clear timer state: {}", e);
                }
                return;
            }
        };

        let now = self.clock.epoch_ms();
        let mut state = saved;
        state.total_duration_seconds = state.total_duration_seconds.max(1);
        state.remaining_seconds = state.remaining_seconds.min(state.total_duration_seconds);
        if !state.surface_attached || state.attached_surface_id.is_none() {
            state.detach();
            state.reset();
        }
        if state.running && state.started_at_epoch_ms.is_none() {
            state.reset();
        }
        if state.surface_attached {
            self.liveness = LivenessTracker::with_reattach_grace(
                now.saturating_add(reattach_grace.as_millis() as u64),
            );
        }
        self.state = state;

        info!(
            remaining = self.state.remaining_seconds,
            running = self.state.running,
            "restored timer state"
        );

        if self.state.running {
            let remaining = self.state.remaining_at(now);
            if remaining == 0 {
                self.expire();
            } else {
                self.state.remaining_seconds = remaining;
                self.schedule_expiry_alarm();
                self.persist();
            }
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Starts (or resumes) the countdown.
    ///
    /// Returns false without changing anything when no surface is attached
    /// or the timer is already running. An expired countdown restarts from
    /// the full duration.
    pub fn start(&mut self) -> bool {
        if !self.state.surface_attached {
            info!("start ignored: no surface attached");
            return false;
        }
        if self.state.running {
            return false;
        }

        self.state.start(self.clock.epoch_ms());
        self.schedule_expiry_alarm();
        self.commit();
        self.emit(TimerEvent::Started {
            remaining_seconds: self.state.remaining_seconds,
        });
        true
    }

    /// Pauses the countdown, keeping the progress made so far.
    ///
    /// Returns false if the timer was not running (or expired at this
    /// instant).
    pub fn stop(&mut self) -> bool {
        if !self.state.running {
            return false;
        }
        self.reevaluate();
        if !self.state.running {
            return false;
        }

        self.state.pause(self.clock.epoch_ms());
        self.alarms.clear(EXPIRY_ALARM);
        self.commit();
        self.emit(TimerEvent::Paused {
            remaining_seconds: self.state.remaining_seconds,
        });
        true
    }

    /// Returns to the full duration, not running.
    pub fn reset(&mut self) {
        self.state.reset();
        self.alarms.clear(EXPIRY_ALARM);
        self.commit();
        self.emit(TimerEvent::Reset);
    }

    /// Changes the countdown length.
    ///
    /// `total_time` wins over `time_left`; the engine always resets to the
    /// new total. Ignored while running or for a zero length.
    pub fn update_config(&mut self, time_left: Option<u32>, total_time: Option<u32>) -> bool {
        if self.state.running {
            info!("configuration change ignored while running");
            return false;
        }
        let Some(total) = total_time.or(time_left).filter(|t| *t > 0) else {
            debug!("configuration change without a positive duration ignored");
            return false;
        };

        self.state.configure(total);
        self.alarms.clear(EXPIRY_ALARM);
        self.commit();
        self.emit(TimerEvent::Configured {
            total_seconds: total,
        });
        true
    }

    /// Subscribes a surface and makes it the authoritative one.
    pub fn attach(&mut self, handle: SurfaceHandle) {
        let surface_id = handle.id().clone();
        self.surfaces.register(handle);
        if let Some(previous) = self.liveness.attach(&mut self.state, surface_id.clone()) {
            debug!(%previous, current = %surface_id, "authoritative surface replaced");
        }
        info!(surface = %surface_id, "surface attached");

        self.commit();
        self.emit(TimerEvent::Attached { surface_id });
    }

    /// Applies an explicit detach signal.
    pub fn detach(&mut self, surface_id: Option<&SurfaceId>) {
        if self.liveness.explicit_detach(&mut self.state, surface_id) {
            self.on_detached(DetachReason::Explicit);
        } else {
            debug!("detach for a non-authoritative surface ignored");
        }
    }

    /// Handles a closed push stream for `surface_id`.
    pub fn window_closed(&mut self, surface_id: &SurfaceId) {
        if !self.surfaces.unregister_closed(surface_id) && self.surfaces.contains(surface_id) {
            debug!(surface = %surface_id, "stale window-close event; surface re-subscribed");
            return;
        }
        if self.liveness.window_closed(&mut self.state, surface_id) {
            self.on_detached(DetachReason::WindowClosed);
        }
    }

    /// Focuses an existing surface, or asks the host for a new window.
    pub fn open_window(&mut self) -> WindowAction {
        if !self.surfaces.is_empty() {
            let target = self
                .state
                .attached_surface_id
                .clone()
                .filter(|id| self.surfaces.contains(id));
            let delivered = match target {
                Some(id) => self.surfaces.send_to(&id, PushEvent::Focus),
                None => {
                    let failed = self.surfaces.broadcast(&PushEvent::Focus);
                    self.handle_delivery_failures(failed);
                    !self.surfaces.is_empty()
                }
            };
            if delivered {
                return WindowAction::Focused;
            }
        }

        match self.host.open_window() {
            Ok(()) => WindowAction::Created,
            Err(e) => {
                warn!("cannot open a timer window: {}", e);
                WindowAction::Unavailable
            }
        }
    }

    // ------------------------------------------------------------------------
    // Periodic re-evaluation
    // ------------------------------------------------------------------------

    /// Periodic tick: recomputes remaining time and fires expiry.
    pub fn tick(&mut self) {
        if self.state.running && !self.state.surface_attached {
            warn!("countdown running without an attached surface; resetting");
            self.auto_reset(DetachReason::Sweep);
            return;
        }
        if self.state.running {
            self.reevaluate();
        }
        if self.persist_pending {
            self.persist();
        }
    }

    /// Consistency sweep: resets an orphaned countdown.
    pub fn sweep(&mut self) {
        if self.liveness.needs_sweep_reset(&self.state) {
            warn!("inconsistent timer state found by sweep; resetting");
            self.auto_reset(DetachReason::Sweep);
        }
        if self.persist_pending {
            self.persist();
        }
    }

    /// Handles a fired alarm.
    pub fn on_alarm(&mut self, name: &'static str) {
        if name != EXPIRY_ALARM || !self.alarms.take_due(name, Instant::now()) {
            return;
        }
        if !self.state.running {
            return;
        }

        self.reevaluate();
        if self.state.running {
            // Wall clock lags the timer wheel; check again when it catches up.
            self.schedule_expiry_alarm();
        }
    }

    /// Sends a heartbeat ping to the authoritative surface.
    ///
    /// Probes that cannot be delivered are applied immediately; otherwise
    /// the caller awaits the answer and reports it with
    /// [`record_probe`](Self::record_probe).
    pub fn start_probe(&mut self) -> Option<PendingProbe> {
        let surface_id = self.liveness.probe_target(&self.state)?;
        match self.surfaces.probe(&surface_id) {
            Ok(ack) => Some(PendingProbe { surface_id, ack }),
            Err(outcome) => {
                self.record_probe(&surface_id, outcome);
                None
            }
        }
    }

    /// Applies the outcome of a heartbeat probe.
    pub fn record_probe(&mut self, surface_id: &SurfaceId, outcome: ProbeOutcome) {
        let now = self.clock.epoch_ms();
        if self
            .liveness
            .record_probe(&mut self.state, surface_id, outcome, now)
        {
            info!(surface = %surface_id, ?outcome, "heartbeat failed");
            self.on_detached(DetachReason::HeartbeatMissed);
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Returns a reference to the current timer state.
    pub fn get_state(&self) -> &TimerState {
        &self.state
    }

    /// Returns a copy of the current timer state.
    pub fn snapshot(&self) -> TimerState {
        self.state.clone()
    }

    /// Returns the alarm that fires next.
    pub fn next_alarm(&self) -> Option<PendingAlarm> {
        self.alarms.next()
    }

    /// Number of subscribed surfaces.
    pub fn subscriber_count(&self) -> usize {
        self.surfaces.len()
    }

    /// Returns a mutable reference to the timer state (for testing).
    #[cfg(test)]
    pub fn get_state_mut(&mut self) -> &mut TimerState {
        &mut self.state
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Recomputes remaining time; persists and broadcasts on change.
    fn reevaluate(&mut self) {
        let remaining = self.state.remaining_at(self.clock.epoch_ms());
        if remaining == self.state.remaining_seconds {
            return;
        }
        if remaining == 0 {
            self.expire();
            return;
        }

        self.state.remaining_seconds = remaining;
        self.commit();
        self.emit(TimerEvent::Tick {
            remaining_seconds: remaining,
        });
    }

    /// Running → Expired. Callers guarantee the timer was running, so this
    /// fires once per run.
    fn expire(&mut self) {
        self.state.expire();
        self.alarms.clear(EXPIRY_ALARM);
        self.commit();
        if !self.state.surface_attached {
            // The final update found no window; the countdown was reset instead
            info!("countdown expired with no surface attached");
            return;
        }
        info!("countdown expired");

        let mut failed = self.surfaces.broadcast(&PushEvent::TimerCompleted);
        failed.extend(self.surfaces.broadcast(&PushEvent::Focus));
        if let Err(e) = self.host.notify_completed() {
            debug!("no completion notification: {}", e);
        }
        self.emit(TimerEvent::Expired);
        self.handle_delivery_failures(failed);
    }

    fn on_detached(&mut self, reason: DetachReason) {
        info!(reason = reason.as_str(), "surface detached");
        self.emit(TimerEvent::Detached { reason });
        self.auto_reset(reason);
    }

    /// Full reset after losing the observer. Applies whether or not the
    /// countdown was running, since a detached timer always sits at its
    /// full duration.
    fn auto_reset(&mut self, reason: DetachReason) {
        let was_running = self.state.running;
        if !self.state.surface_attached {
            self.state.detach();
        }
        self.state.reset();
        self.alarms.clear(EXPIRY_ALARM);
        self.commit();
        if was_running {
            info!(reason = reason.as_str(), "countdown auto-reset");
            self.emit(TimerEvent::AutoReset { reason });
        }
    }

    fn schedule_expiry_alarm(&mut self) {
        let delay = Duration::from_secs(u64::from(self.state.remaining_seconds));
        self.alarms.create(EXPIRY_ALARM, delay);
    }

    /// Persists, then pushes the new snapshot to every subscriber.
    fn commit(&mut self) {
        self.persist();
        let failed = self.surfaces.broadcast(&PushEvent::TimerUpdate {
            timer_state: self.state.clone(),
        });
        self.handle_delivery_failures(failed);
    }

    fn persist(&mut self) {
        match self.store.save(&self.state) {
            Ok(()) => self.persist_pending = false,
            Err(e) => {
                warn!("failed to persist timer state: {}", e);
                self.persist_pending = true;
            }
        }
    }

    /// A failed push means the surface's stream is gone.
    fn handle_delivery_failures(&mut self, failed: Vec<SurfaceId>) {
        for surface_id in failed {
            if self.liveness.window_closed(&mut self.state, &surface_id) {
                self.on_detached(DetachReason::WindowClosed);
            }
        }
    }

    fn emit(&self, event: TimerEvent) {
        let _ = self.event_tx.send(event);
    }
}

// ============================================================================
// Tests
// ============================================================================
