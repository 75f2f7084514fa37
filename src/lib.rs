//! sense-of-time library
//!
//! This library provides the core functionality for the sense-of-time CLI.
//! It includes:
//! - Countdown engine with wall-clock recomputation and crash recovery
//! - Liveness tracking that resets the countdown when no window observes it
//! - IPC server/client over a Unix socket with push streams for windows
//! - CLI command parsing, display utilities and a terminal timer window
//! - Type definitions for the timer state and the wire protocol

pub mod cli;
pub mod daemon;
pub mod types;

// Re-export commonly used types for convenience
pub use types::{
    IpcRequest, IpcResponse, PushEvent, ResponseData, SurfaceAck, SurfaceId, TimerPhase,
    TimerState, WindowAction,
};

pub use daemon::{
    run_daemon, Command, CommandReply, DaemonConfig, EngineError, EngineHandle, EngineService,
    IpcServer, RequestHandler, ServiceTiming, TimerEngine, TimerEvent,
};
