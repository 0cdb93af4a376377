//! Serve command - run the camera service in the foreground

use anyhow::{Context, Result};
use clap::Args;
use ipcam_core::gateway::GatewayServer;
use ipcam_core::{device, http, ConfigFile, ServiceConfig, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Config file (defaults to ~/.config/ipcam/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Video device node
    #[arg(short, long)]
    device: Option<String>,

    /// Per-device settings database
    #[arg(long)]
    database: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long)]
    bind: Option<String>,

    /// HTTP listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Add X-Frame-Number and X-Timestamp to every multipart section
    #[arg(long)]
    extended_header: bool,

    /// Do not open the camera until a client asks for it
    #[arg(long)]
    no_start: bool,
}

/// Run the service until Ctrl+C or SIGTERM
pub async fn serve(args: ServeArgs, socket: Option<PathBuf>) -> Result<()> {
    let file = match &args.config {
        Some(path) => ConfigFile::load_from(path.clone())
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ConfigFile::load_or_default(),
    };

    let mut config = ServiceConfig::from_file(&file);
    if let Some(device) = args.device {
        config = config.with_device(device);
    }
    if let Some(database) = args.database {
        config = config.with_database(database);
    }
    if let Some(bind) = args.bind {
        config = config.with_bind(bind);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if args.extended_header {
        config = config.with_extended_header(true);
    }
    if let Some(socket) = socket {
        config = config.with_socket(socket);
    }

    for warning in config.validate() {
        warn!("{}", warning);
    }

    let driver = device::default_driver().context("No capture backend available")?;
    let supervisor = Arc::new(Supervisor::from_config(&config, driver));

    let mut gateway = GatewayServer::new(supervisor.clone(), config.socket_path.clone());
    gateway
        .start()
        .await
        .context("Failed to start the control gateway")?;
    let gateway_shutdown = gateway.shutdown_handle();

    let addr = config.http_addr()?;
    let listener = http::bind(addr)
        .await
        .context("Failed to start the MJPEG endpoint")?;
    let app = http::router(supervisor.clone(), config.extended_header);
    let (http_stop, http_stopped) = oneshot::channel::<()>();
    let http_task = tokio::spawn(http::serve(listener, app, async move {
        let _ = http_stopped.await;
    }));

    if !args.no_start {
        match supervisor.start().await {
            Ok(state) => info!("Camera {} is {}", config.device, state),
            Err(e) => warn!("Camera {} not started: {}", config.device, e),
        }
    }

    println!("ipcam serving {}", config.device);
    println!("  Stream:  http://{}/stream", addr);
    println!("  Control: {}", config.socket_path.display());
    println!();
    println!("Press Ctrl+C to stop...\n");

    tokio::select! {
        result = gateway.run() => {
            if let Err(e) = result {
                error!("Control gateway failed: {}", e);
            }
        }
        _ = shutdown_signal() => {
            println!("\nReceived shutdown signal...");
        }
    }

    // Stopping the camera ends every open stream, which lets the HTTP
    // server finish its graceful shutdown
    supervisor.shutdown().await;
    let _ = gateway_shutdown.send(());
    let _ = http_stop.send(());

    match http_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("MJPEG endpoint failed: {}", e),
        Err(e) => error!("MJPEG endpoint task panicked: {}", e),
    }

    gateway.cleanup();
    println!("ipcam stopped.");

    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
