//! ipcam CLI
//!
//! Shared MJPEG camera service: one device, many live viewers.
//!
//! # Usage
//!
//! ```bash
//! # Run the service in the foreground
//! ipcam serve --device /dev/video0 --port 4567
//!
//! # Query and drive a running service
//! ipcam status
//! ipcam settings size 1280 720
//! ipcam watch change_state update_control
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ipcam_core::IpcamError;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// ipcam - shared MJPEG camera service
#[derive(Parser)]
#[command(name = "ipcam")]
#[command(author = "GhostKellz")]
#[command(version)]
#[command(about = "Shared MJPEG camera service: one device, many live viewers", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Control socket of the daemon (defaults to $XDG_RUNTIME_DIR/ipcam.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the camera service in the foreground
    Serve(commands::ServeArgs),

    /// Show the camera state of a running service
    Status,

    /// Open the device and start capturing
    Start,

    /// Stop capturing and close the device
    Stop,

    /// Show or change the settings of the open device
    Settings(commands::SettingsArgs),

    /// Print notifications as they happen
    Watch(commands::WatchArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("ipcam={},ipcam_core={}", level, level))
        }))
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let hint = e
            .chain()
            .find_map(|cause| cause.downcast_ref::<IpcamError>())
            .and_then(IpcamError::user_hint);
        if let Some(hint) = hint {
            eprintln!("Hint: {}", hint);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let socket = cli.socket;

    match cli.command {
        Commands::Serve(args) => commands::serve(args, socket).await?,
        Commands::Status => commands::status(socket).await?,
        Commands::Start => commands::start(socket).await?,
        Commands::Stop => commands::stop(socket).await?,
        Commands::Settings(args) => commands::settings(args, socket).await?,
        Commands::Watch(args) => commands::watch(args, socket).await?,
        Commands::Config(args) => commands::config(args).await?,
    }

    Ok(())
}
