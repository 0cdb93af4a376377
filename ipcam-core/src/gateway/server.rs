//! Control gateway server
//!
//! Listens on a Unix socket and runs one task per client session.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use super::protocol::{ControlReply, ControlRequest, ServerFrame};
use crate::error::{IpcamError, Result};
use crate::notify::{Notification, NotifyFilter};
use crate::supervisor::Supervisor;

const IMAGE_EVENT: &str = "update_image";

/// Gateway server that handles client sessions
pub struct GatewayServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Listener for incoming connections
    listener: Option<UnixListener>,
    /// Camera service the requests go to
    supervisor: Arc<Supervisor>,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
}

impl GatewayServer {
    /// Create a new gateway server
    pub fn new(supervisor: Arc<Supervisor>, socket_path: impl Into<PathBuf>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            socket_path: socket_path.into(),
            listener: None,
            supervisor,
            shutdown_tx,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket
    pub async fn start(&mut self) -> Result<()> {
        // Remove a stale socket left by a previous run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                IpcamError::gateway(format!("Failed to remove old socket: {}", e))
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    IpcamError::gateway(format!("Failed to create socket directory: {}", e))
                })?;
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            IpcamError::gateway(format!(
                "Failed to bind socket at {:?}: {}",
                self.socket_path, e
            ))
        })?;

        // Owner-only, like any other per-user daemon socket
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&self.socket_path, permissions).map_err(|e| {
            IpcamError::gateway(format!("Failed to set socket permissions: {}", e))
        })?;

        info!("Control gateway listening on {:?}", self.socket_path);
        self.listener = Some(listener);

        Ok(())
    }

    /// Handle that stops [`run`](Self::run) and every open session
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Accept sessions until shutdown is signalled
    pub async fn run(&self) -> Result<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcamError::gateway("Server not started"))?;
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let supervisor = self.supervisor.clone();
                        let shutdown = self.shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            Session::new(supervisor).serve(stream, shutdown).await;
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = shutdown.recv() => break,
            }
        }

        info!("Control gateway stopped");
        Ok(())
    }

    /// Clean up the socket file
    pub fn cleanup(&self) {
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!("Failed to remove socket file: {}", e);
            } else {
                debug!("Removed socket file {:?}", self.socket_path);
            }
        }
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// One connected control client
struct Session {
    supervisor: Arc<Supervisor>,
    filter: NotifyFilter,
}

impl Session {
    fn new(supervisor: Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            filter: NotifyFilter::new(),
        }
    }

    async fn serve(mut self, stream: UnixStream, mut shutdown: broadcast::Receiver<()>) {
        info!("Control client connected");

        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut events = self.supervisor.subscribe_notifications();
        let mut images = None;

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        let reply = match ControlRequest::from_bytes(trimmed.as_bytes()) {
                            Ok(request) => self.dispatch(request).await,
                            Err(e) => {
                                warn!("Invalid control message: {}", e);
                                ControlReply::error(&IpcamError::from(e))
                            }
                        };
                        self.sync_image_feed(&mut images);
                        if !send(&mut writer, &ServerFrame::Reply(reply)).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Error reading from control client: {}", e);
                        break;
                    }
                },
                event = events.recv() => match event {
                    Ok(event) => {
                        if self.filter.allows(&event)
                            && !send(&mut writer, &ServerFrame::Notify(event)).await
                        {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Control client lagging, {} notifications skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                },
                image = next_image(&mut images) => match image {
                    Ok(event) => {
                        if !send(&mut writer, &ServerFrame::Notify(event)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Control client skipped {} images", skipped);
                    }
                    Err(RecvError::Closed) => images = None,
                },
                _ = shutdown.recv() => break,
            }
        }

        info!("Control client disconnected");
    }

    /// Hold an image receiver only while the allow-list admits images
    fn sync_image_feed(&self, images: &mut Option<broadcast::Receiver<Notification>>) {
        let wanted = self.filter.admits(IMAGE_EVENT);
        if wanted && images.is_none() {
            *images = Some(self.supervisor.subscribe_images());
        } else if !wanted {
            *images = None;
        }
    }

    async fn dispatch(&mut self, request: ControlRequest) -> ControlReply {
        debug!("Control request {}", request.method());
        let supervisor = &self.supervisor;

        let result = match request {
            ControlRequest::Hello => Ok(ControlReply::Ok),
            ControlRequest::AddNotifyRequest { events } => {
                self.filter.add(&events);
                Ok(ControlReply::Ok)
            }
            ControlRequest::ClearNotifyRequest { events } => {
                self.filter.remove(&events);
                Ok(ControlReply::Ok)
            }
            ControlRequest::GetCameraInfo => {
                Ok(ControlReply::CameraInfo(supervisor.get_camera_info()))
            }
            ControlRequest::GetIdentString => supervisor
                .get_ident_string()
                .map(|ident| ControlReply::IdentString { ident }),
            ControlRequest::GetConfig => supervisor.get_config().map(ControlReply::Config),
            ControlRequest::SetImageSize { width, height } => supervisor
                .set_image_size(width, height)
                .await
                .map(|_| ControlReply::Ok),
            ControlRequest::SetFramerate { num, deno } => supervisor
                .set_framerate(num, deno)
                .await
                .map(|_| ControlReply::Ok),
            ControlRequest::SetControl { id, value } => supervisor
                .set_control(id, value)
                .await
                .map(|_| ControlReply::Ok),
            ControlRequest::SaveConfig => supervisor.save_config().await.map(|_| ControlReply::Ok),
            ControlRequest::StartCamera => supervisor
                .start_camera()
                .await
                .map(|state| ControlReply::State { state }),
            ControlRequest::StopCamera => supervisor
                .stop_camera()
                .await
                .map(|state| ControlReply::State { state }),
        };

        result.unwrap_or_else(|e| {
            debug!("Request failed: {}", e);
            ControlReply::error(&e)
        })
    }
}

/// Next image event, or never when the session has no image feed
async fn next_image(
    images: &mut Option<broadcast::Receiver<Notification>>,
) -> std::result::Result<Notification, RecvError> {
    match images {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Write one frame; false when the client is gone
async fn send(writer: &mut OwnedWriteHalf, frame: &ServerFrame) -> bool {
    match writer.write_all(&frame.to_bytes()).await {
        Ok(()) => true,
        Err(e) => {
            debug!("Failed to write to control client: {}", e);
            false
        }
    }
}
