//! Daemon module for the countdown timer.
//!
//! This module contains the core daemon functionality:
//! - `timer`: Timer engine with state transitions and countdown logic
//! - `service`: Single task that serializes every engine mutation
//! - `ipc`: Unix socket server, request handling and push streams
//! - `liveness`, `surfaces`: Attachment tracking and push delivery
//! - `store`, `alarm`, `clock`, `host`: Engine collaborators

pub mod alarm;
pub mod clock;
pub mod config;
pub mod host;
pub mod ipc;
pub mod liveness;
pub mod service;
pub mod store;
pub mod surfaces;
pub mod timer;

pub use config::DaemonConfig;
pub use ipc::{IpcServer, RequestHandler};
pub use service::{Command, CommandReply, EngineError, EngineHandle, EngineService, ServiceTiming};
pub use timer::{TimerEngine, TimerEvent};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use host::CommandHost;
use store::{FileStateStore, MemoryStateStore};

/// Builds the engine described by `config` and restores persisted state.
pub fn build_engine(config: &DaemonConfig, event_tx: mpsc::UnboundedSender<TimerEvent>) -> TimerEngine {
    let host = CommandHost::new(config.window_command.clone(), config.notify_command.clone());
    let engine = TimerEngine::new(config.default_total_seconds, event_tx).with_host(host);
    let mut engine = match &config.state_path {
        Some(path) => engine.with_store(FileStateStore::new(path.clone())),
        None => engine.with_store(MemoryStateStore::new()),
    };
    engine.restore(config.reattach_grace);
    engine
}

/// Runs the daemon until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the socket cannot be
/// bound.
pub async fn run_daemon(config: DaemonConfig) -> Result<()> {
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid daemon configuration")?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let engine = build_engine(&config, event_tx);
    let (service, handle) = EngineService::new(engine, config.timing);
    let server = IpcServer::new(&config.socket_path)?;

    info!(socket = %config.socket_path.display(), "daemon listening");

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            debug!(?event, "timer event");
        }
    });
    let engine_task = tokio::spawn(service.run());

    tokio::select! {
        _ = server.serve(RequestHandler::new(handle)) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("shutting down");
        }
    }

    drop(server);
    engine_task.abort();
    Ok(())
}
