//! Gateway client for CLI commands
//!
//! Connects to the running daemon, sends requests and receives replies.
//! Notification frames that arrive while waiting for a reply are queued and
//! handed out by [`GatewayClient::next_notification`].

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use super::protocol::{ControlReply, ControlRequest, ServerFrame};
use crate::error::{IpcamError, Result};
use crate::notify::Notification;
use crate::supervisor::CameraInfo;
use crate::types::{CameraState, ConfigEntry, ControlValue};

/// Default connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default reply timeout; reconfiguration waits for a capture restart
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the control gateway
pub struct GatewayClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pending: VecDeque<Notification>,
}

impl GatewayClient {
    /// Connect with the default timeout
    pub async fn connect(path: &Path) -> Result<Self> {
        Self::connect_with_timeout(path, CONNECT_TIMEOUT).await
    }

    /// Connect with a custom timeout
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self> {
        if !path.exists() {
            return Err(IpcamError::DaemonNotRunning);
        }

        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| IpcamError::gateway("Connection timed out"))?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => IpcamError::DaemonNotRunning,
                _ => IpcamError::gateway(format!("Failed to connect to daemon: {}", e)),
            })?;

        debug!("Connected to daemon at {:?}", path);

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
            pending: VecDeque::new(),
        })
    }

    async fn read_frame(&mut self) -> Result<Option<ServerFrame>> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| IpcamError::gateway(format!("Failed to read reply: {}", e)))?;
            if n == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(ServerFrame::from_bytes(trimmed.as_bytes())?));
            }
        }
    }

    /// Send a request and wait for its reply
    pub async fn call(&mut self, request: ControlRequest) -> Result<ControlReply> {
        self.call_with_timeout(request, IO_TIMEOUT).await
    }

    /// Send a request and wait for its reply with a custom timeout
    pub async fn call_with_timeout(
        &mut self,
        request: ControlRequest,
        timeout: Duration,
    ) -> Result<ControlReply> {
        tokio::time::timeout(timeout, self.writer.write_all(&request.to_bytes()))
            .await
            .map_err(|_| IpcamError::gateway("Write timed out"))?
            .map_err(|e| IpcamError::gateway(format!("Failed to send request: {}", e)))?;

        tokio::time::timeout(timeout, self.read_reply())
            .await
            .map_err(|_| IpcamError::gateway("Read timed out"))?
    }

    /// Read frames until a reply shows up, queueing notifications
    async fn read_reply(&mut self) -> Result<ControlReply> {
        loop {
            match self.read_frame().await? {
                Some(ServerFrame::Reply(reply)) => return Ok(reply),
                Some(ServerFrame::Notify(event)) => self.pending.push_back(event),
                None => return Err(IpcamError::gateway("Daemon closed the connection")),
            }
        }
    }

    /// Next notification the session subscribed to; `None` once the daemon
    /// hangs up
    pub async fn next_notification(&mut self) -> Result<Option<Notification>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        loop {
            match self.read_frame().await? {
                Some(ServerFrame::Notify(event)) => return Ok(Some(event)),
                Some(ServerFrame::Reply(reply)) => debug!("Unsolicited reply: {:?}", reply),
                None => return Ok(None),
            }
        }
    }

    async fn expect_ok(&mut self, request: ControlRequest) -> Result<()> {
        match self.call(request).await? {
            ControlReply::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn hello(&mut self) -> Result<()> {
        self.expect_ok(ControlRequest::Hello).await
    }

    pub async fn add_notify_request(&mut self, events: Vec<String>) -> Result<()> {
        self.expect_ok(ControlRequest::AddNotifyRequest { events })
            .await
    }

    pub async fn clear_notify_request(&mut self, events: Vec<String>) -> Result<()> {
        self.expect_ok(ControlRequest::ClearNotifyRequest { events })
            .await
    }

    pub async fn camera_info(&mut self) -> Result<CameraInfo> {
        match self.call(ControlRequest::GetCameraInfo).await? {
            ControlReply::CameraInfo(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub async fn ident_string(&mut self) -> Result<String> {
        match self.call(ControlRequest::GetIdentString).await? {
            ControlReply::IdentString { ident } => Ok(ident),
            other => Err(unexpected(other)),
        }
    }

    pub async fn config(&mut self) -> Result<ConfigEntry> {
        match self.call(ControlRequest::GetConfig).await? {
            ControlReply::Config(entry) => Ok(entry),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_image_size(&mut self, width: u32, height: u32) -> Result<()> {
        self.expect_ok(ControlRequest::SetImageSize { width, height })
            .await
    }

    pub async fn set_framerate(&mut self, num: u32, deno: u32) -> Result<()> {
        self.expect_ok(ControlRequest::SetFramerate { num, deno })
            .await
    }

    pub async fn set_control(&mut self, id: u32, value: ControlValue) -> Result<()> {
        self.expect_ok(ControlRequest::SetControl { id, value })
            .await
    }

    pub async fn save_config(&mut self) -> Result<()> {
        self.expect_ok(ControlRequest::SaveConfig).await
    }

    pub async fn start_camera(&mut self) -> Result<CameraState> {
        match self.call(ControlRequest::StartCamera).await? {
            ControlReply::State { state } => Ok(state),
            other => Err(unexpected(other)),
        }
    }

    pub async fn stop_camera(&mut self) -> Result<CameraState> {
        match self.call(ControlRequest::StopCamera).await? {
            ControlReply::State { state } => Ok(state),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(reply: ControlReply) -> IpcamError {
    match reply {
        ControlReply::Error { kind, message } => IpcamError::Remote { kind, message },
        other => IpcamError::gateway(format!("Unexpected reply: {:?}", other)),
    }
}
