//! CLI module for sense-of-time.
//!
//! This module provides the command-line interface:
//! - `commands`: Command definitions using clap derive
//! - `client`: IPC client for daemon communication
//! - `display`: Output formatting and display logic
//! - `surface`: The terminal timer window (`watch`)

pub mod client;
pub mod commands;
pub mod display;
pub mod surface;

pub use client::IpcClient;
pub use commands::{Cli, Commands, DaemonArgs, SetArgs, WatchArgs};
pub use display::Display;
pub use surface::SurfaceClient;
