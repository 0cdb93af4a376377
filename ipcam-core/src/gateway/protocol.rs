//! Control protocol definitions
//!
//! A client sends [`ControlRequest`]s; the server answers each one with
//! exactly one reply frame and interleaves notification frames the session
//! asked for.

use serde::{Deserialize, Serialize};

use crate::error::IpcamError;
use crate::notify::Notification;
use crate::supervisor::CameraInfo;
use crate::types::{CameraState, ConfigEntry, ControlValue};

/// Requests accepted by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Liveness check
    Hello,
    /// Start forwarding the named events (`"*"` for all)
    AddNotifyRequest { events: Vec<String> },
    /// Stop forwarding the named events
    ClearNotifyRequest { events: Vec<String> },
    GetCameraInfo,
    GetIdentString,
    GetConfig,
    SetImageSize { width: u32, height: u32 },
    SetFramerate { num: u32, deno: u32 },
    SetControl { id: u32, value: ControlValue },
    SaveConfig,
    StartCamera,
    StopCamera,
}

/// Replies to [`ControlRequest`]s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    /// Fixed acknowledgement
    Ok,
    CameraInfo(CameraInfo),
    IdentString { ident: String },
    Config(ConfigEntry),
    /// State after start/stop
    State { state: CameraState },
    Error { kind: String, message: String },
}

/// Everything the server writes to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ServerFrame {
    Reply(ControlReply),
    Notify(Notification),
}

impl ControlRequest {
    /// Serialize request to JSON bytes with newline terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    /// Deserialize request from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Method name, for logs
    pub fn method(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::AddNotifyRequest { .. } => "add_notify_request",
            Self::ClearNotifyRequest { .. } => "clear_notify_request",
            Self::GetCameraInfo => "get_camera_info",
            Self::GetIdentString => "get_ident_string",
            Self::GetConfig => "get_config",
            Self::SetImageSize { .. } => "set_image_size",
            Self::SetFramerate { .. } => "set_framerate",
            Self::SetControl { .. } => "set_control",
            Self::SaveConfig => "save_config",
            Self::StartCamera => "start_camera",
            Self::StopCamera => "stop_camera",
        }
    }
}

impl ControlReply {
    /// Create an error reply
    pub fn error(err: &IpcamError) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl ServerFrame {
    /// Serialize frame to JSON bytes with newline terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    /// Deserialize frame from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let msg = ControlRequest::SetImageSize {
            width: 1280,
            height: 720,
        };
        let bytes = msg.to_bytes();
        let parsed = ControlRequest::from_bytes(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_unit_request_wire_form() {
        let parsed = ControlRequest::from_bytes(br#"{"method":"hello"}"#).unwrap();
        assert_eq!(parsed, ControlRequest::Hello);
    }

    #[test]
    fn test_reply_frame_serialization() {
        let frame = ServerFrame::Reply(ControlReply::State {
            state: CameraState::Alive,
        });
        let bytes = frame.to_bytes();
        let parsed = ServerFrame::from_bytes(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(parsed, frame);
    }
}
