//! CLI command implementations

mod camera;
mod config;
mod serve;
mod settings;
mod status;
mod watch;

pub use camera::{start, stop};
pub use config::{config, ConfigArgs};
pub use serve::{serve, ServeArgs};
pub use settings::{settings, SettingsArgs};
pub use status::status;
pub use watch::{watch, WatchArgs};

use anyhow::{Context, Result};
use ipcam_core::gateway::GatewayClient;
use ipcam_core::{ConfigFile, ServiceConfig};
use std::path::PathBuf;

/// Connect to the daemon on `socket`, or on the socket named by the config
/// file
pub(crate) async fn connect(socket: Option<PathBuf>) -> Result<GatewayClient> {
    let path = socket.unwrap_or_else(|| {
        ServiceConfig::from_file(&ConfigFile::load_or_default()).socket_path
    });
    GatewayClient::connect(&path)
        .await
        .with_context(|| format!("Failed to reach the daemon at {}", path.display()))
}
