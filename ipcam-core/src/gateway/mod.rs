//! Control gateway
//!
//! Unix socket through which control clients (the `ipcam` CLI, a web
//! backend, scripts) drive the supervisor and receive change notifications.
//! Messages are newline-delimited JSON.

mod client;
mod protocol;
mod server;

pub use client::GatewayClient;
pub use protocol::{ControlReply, ControlRequest, ServerFrame};
pub use server::GatewayServer;

use std::path::{Path, PathBuf};

/// Get the default control socket path
///
/// Uses XDG_RUNTIME_DIR if available, otherwise /tmp
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("ipcam.sock")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail.
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/ipcam-{}.sock", uid))
    }
}

/// Check whether a daemon answers on `path`
pub async fn daemon_running(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }

    match GatewayClient::connect(path).await {
        Ok(mut client) => client.hello().await.is_ok(),
        Err(_) => false,
    }
}
