//! sense-of-time - a short countdown timer kept alive by a daemon
//!
//! The daemon owns the countdown. Timer windows (`watch`) attach to it and
//! receive every change; when the last window goes away the countdown
//! resets instead of running unobserved.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser};

use sense_of_time::cli::{Cli, Commands, DaemonArgs, Display, IpcClient, SetArgs, SurfaceClient};
use sense_of_time::daemon::config::default_state_path;
use sense_of_time::daemon::{run_daemon, DaemonConfig};
use sense_of_time::types::SurfaceId;

/// Main entry point
#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_tracing(default_log_level(&cli));

    // Execute command
    if let Err(e) = execute(cli).await {
        Display::show_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

/// Log level used when `RUST_LOG` is unset.
fn default_log_level(cli: &Cli) -> &'static str {
    if cli.verbose {
        "debug"
    } else if matches!(cli.command, Some(Commands::Daemon(_))) {
        "info"
    } else {
        "warn"
    }
}

/// Initializes the tracing subscriber for logging.
fn init_tracing(default_level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Executes the CLI command.
async fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        tracing::debug!("Verbose mode enabled");
    }

    match cli.command {
        Some(Commands::Status) => {
            let client = IpcClient::from_option(cli.socket)?;
            let response = client.get_state().await?;
            Display::show_status(&response);
        }
        Some(Commands::Start) => {
            let client = IpcClient::from_option(cli.socket)?;
            let response = client.start().await?;
            Display::show_command_result(&response);
        }
        Some(Commands::Stop) => {
            let client = IpcClient::from_option(cli.socket)?;
            let response = client.stop().await?;
            Display::show_command_result(&response);
        }
        Some(Commands::Reset) => {
            let client = IpcClient::from_option(cli.socket)?;
            let response = client.reset().await?;
            Display::show_command_result(&response);
        }
        Some(Commands::Set(args)) => {
            let client = IpcClient::from_option(cli.socket)?;
            set_duration(&client, &args).await?;
        }
        Some(Commands::Open) => {
            let client = IpcClient::from_option(cli.socket)?;
            let response = client.open_window().await?;
            Display::show_window_result(&response);
        }
        Some(Commands::Watch(args)) => {
            let client = IpcClient::from_option(cli.socket)?;
            let mut stdout = std::io::stdout();
            let colour = stdout.is_terminal();
            let mut surface = SurfaceClient::new(client, args.surface_id.map(SurfaceId::new))
                .with_autostart(args.autostart)
                .with_colour(colour);
            surface
                .run(&mut stdout, wait_for_ctrl_c())
                .await?;
        }
        Some(Commands::Daemon(args)) => {
            let config = daemon_config(cli.socket, args)?;
            run_daemon(config).await?;
        }
        Some(Commands::Completions { shell }) => {
            generate_completions(shell);
        }
        None => {
            // No command provided, show help
            Cli::command().print_help()?;
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed the window keeps
/// running until it is killed.
async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Applies a duration preset the way the options page does: reset, update,
/// then bring up the timer window.
async fn set_duration(client: &IpcClient, args: &SetArgs) -> Result<()> {
    client.reset().await?;
    let response = client.update_duration(args.minutes * 60).await?;
    Display::show_command_result(&response);

    let response = client.open_window().await?;
    Display::show_window_result(&response);

    if args.start {
        let response = client.start().await?;
        Display::show_command_result(&response);
    }
    Ok(())
}

/// Builds the daemon configuration from command-line arguments.
fn daemon_config(socket: Option<PathBuf>, args: DaemonArgs) -> Result<DaemonConfig> {
    let mut config = DaemonConfig::default();
    if let Some(socket) = socket {
        config.socket_path = socket;
    }
    config.state_path = match (args.no_persist, args.state_file) {
        (true, _) => None,
        (false, Some(path)) => Some(path),
        (false, None) => Some(default_state_path()?),
    };
    if let Some(duration) = args.duration {
        config.default_total_seconds = duration;
    }
    config.window_command = args.window_command;
    config.notify_command = args.notify_command;
    Ok(config)
}

/// Generates shell completion scripts.
fn generate_completions(shell: clap_complete::Shell) {
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}

// ============================================================================
// Tests
// ============================================================================
