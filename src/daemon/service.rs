//! Engine service: the single task that owns the [`TimerEngine`].
//!
//! Requests from IPC connections, window-close events, heartbeat results,
//! the periodic tick, the consistency sweep and the expiry alarm are all
//! serialized through one `select!` loop, so a mutation is never observed
//! half-applied.

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::types::{SurfaceId, TimerState, WindowAction};

use super::alarm;
use super::liveness::ProbeOutcome;
use super::surfaces::{await_ack, SurfaceHandle};
use super::timer::{PendingProbe, TimerEngine};

// ============================================================================
// Timing
// ============================================================================

/// Periods of the engine's timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTiming {
    /// Tick period (remaining-time recomputation)
    pub tick: Duration,
    /// Heartbeat probe period
    pub heartbeat: Duration,
    /// How long a probe waits for an answer; shorter than `heartbeat`
    pub heartbeat_deadline: Duration,
    /// Consistency sweep period
    pub sweep: Duration,
}

impl Default for ServiceTiming {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            heartbeat: Duration::from_secs(1),
            heartbeat_deadline: Duration::from_millis(800),
            sweep: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// A request for the engine.
#[derive(Debug)]
pub enum Command {
    /// Read the current state
    GetState,
    /// Start or resume
    Start,
    /// Pause
    Stop,
    /// Return to the full duration
    Reset,
    /// Change the duration
    UpdateConfig {
        /// Remaining seconds requested by the surface
        time_left: Option<u32>,
        /// New total seconds
        total_time: Option<u32>,
    },
    /// Subscribe and attach a surface
    Attach(SurfaceHandle),
    /// Explicit detach signal
    Detach(Option<SurfaceId>),
    /// Focus or create a timer window
    OpenWindow,
}

/// The engine's answer to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// State after the command
    pub state: TimerState,
    /// False when a precondition made the command a no-op
    pub applied: bool,
    /// Outcome of [`Command::OpenWindow`]
    pub window: Option<WindowAction>,
}

/// Errors talking to the engine service.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The service task has stopped
    #[error("timer engine is not running")]
    Stopped,
}

enum EngineMessage {
    Command {
        command: Command,
        reply: oneshot::Sender<CommandReply>,
    },
    WindowClosed(SurfaceId),
    ProbeResult {
        surface_id: SurfaceId,
        outcome: ProbeOutcome,
    },
}

// ============================================================================
// EngineHandle
// ============================================================================

/// Cloneable handle used by connections to reach the engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineMessage>,
}

impl std::fmt::Debug for EngineMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineMessage::Command { command, .. } => write!(f, "Command({:?})", command),
            EngineMessage::WindowClosed(id) => write!(f, "WindowClosed({})", id),
            EngineMessage::ProbeResult { surface_id, outcome } => {
                write!(f, "ProbeResult({}, {:?})", surface_id, outcome)
            }
        }
    }
}

impl EngineHandle {
    /// Runs `command` on the engine and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the service task is gone.
    pub async fn execute(&self, command: Command) -> Result<CommandReply, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMessage::Command { command, reply })
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Reports that a surface's push stream closed.
    pub fn window_closed(&self, surface_id: SurfaceId) {
        let _ = self.tx.send(EngineMessage::WindowClosed(surface_id));
    }
}

// ============================================================================
// EngineService
// ============================================================================

/// Owns the engine and drives it from a single task.
pub struct EngineService {
    engine: TimerEngine,
    rx: mpsc::UnboundedReceiver<EngineMessage>,
    probe_tx: mpsc::WeakUnboundedSender<EngineMessage>,
    timing: ServiceTiming,
}

impl EngineService {
    /// Wraps `engine` and returns the service with its first handle.
    pub fn new(engine: TimerEngine, timing: ServiceTiming) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            engine,
            rx,
            probe_tx: tx.downgrade(),
            timing,
        };
        (service, EngineHandle { tx })
    }

    /// Runs until every [`EngineHandle`] is dropped.
    pub async fn run(mut self) -> TimerEngine {
        let mut tick = interval(self.timing.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = interval(self.timing.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep = interval(self.timing.sweep);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("timer engine started");

        loop {
            let next_alarm = self.engine.next_alarm();
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => break,
                },
                _ = tick.tick() => self.engine.tick(),
                _ = heartbeat.tick() => self.send_heartbeat(),
                _ = sweep.tick() => self.engine.sweep(),
                name = alarm::wait_for(next_alarm) => self.engine.on_alarm(name),
            }
        }

        info!("timer engine stopped");
        self.engine
    }

    fn handle_message(&mut self, message: EngineMessage) {
        debug!(?message, "engine message");
        match message {
            EngineMessage::Command { command, reply } => {
                let _ = reply.send(self.execute(command));
            }
            EngineMessage::WindowClosed(surface_id) => self.engine.window_closed(&surface_id),
            EngineMessage::ProbeResult {
                surface_id,
                outcome,
            } => self.engine.record_probe(&surface_id, outcome),
        }
    }

    fn execute(&mut self, command: Command) -> CommandReply {
        let mut window = None;
        let applied = match command {
            Command::GetState => true,
            Command::Start => self.engine.start(),
            Command::Stop => self.engine.stop(),
            Command::Reset => {
                self.engine.reset();
                true
            }
            Command::UpdateConfig {
                time_left,
                total_time,
            } => self.engine.update_config(time_left, total_time),
            Command::Attach(handle) => {
                self.engine.attach(handle);
                true
            }
            Command::Detach(surface_id) => {
                self.engine.detach(surface_id.as_ref());
                true
            }
            Command::OpenWindow => {
                let action = self.engine.open_window();
                window = Some(action);
                action != WindowAction::Unavailable
            }
        };

        CommandReply {
            state: self.engine.snapshot(),
            applied,
            window,
        }
    }

    /// Probes the authoritative surface without blocking the loop; the
    /// answer comes back as a message.
    fn send_heartbeat(&mut self) {
        let Some(PendingProbe { surface_id, ack }) = self.engine.start_probe() else {
            return;
        };
        let deadline = self.timing.heartbeat_deadline;
        let probe_tx = self.probe_tx.clone();

        tokio::spawn(async move {
            let outcome = await_ack(ack, deadline).await;
            if let Some(tx) = probe_tx.upgrade() {
                let _ = tx.send(EngineMessage::ProbeResult {
                    surface_id,
                    outcome,
                });
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
