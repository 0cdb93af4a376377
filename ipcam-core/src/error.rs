//! Error types for ipcam

use thiserror::Error;

use crate::types::{CameraState, Handle};

/// Result type alias using IpcamError
pub type Result<T> = std::result::Result<T, IpcamError>;

/// Main error type for ipcam operations
#[derive(Debug, Error)]
pub enum IpcamError {
    /// Operation is not valid in the current camera state
    #[error("State violation: {operation} is not allowed while {state}")]
    StateViolation {
        operation: &'static str,
        state: CameraState,
    },

    /// Device does not provide the required encoding
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// Capture loop failure (moves the camera to ABORT)
    #[error("Capture failure: {0}")]
    Capture(String),

    /// Persisted device database could not be read back
    #[error("Corrupt device database: {0}")]
    ConfigCorruption(String),

    /// A single control could not be applied to the device
    #[error("Failed to apply control {id}: {message}")]
    ControlApply { id: u32, message: String },

    /// Driver reported a control kind we cannot represent
    #[error("Unsupported control: {0}")]
    UnsupportedControl(String),

    /// Low-level device error from the capability provider
    #[error("Device error: {0}")]
    Device(String),

    /// Subscriber sink is already registered
    #[error("Subscriber {0} is already attached")]
    AlreadyAttached(Handle),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Control gateway transport error
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Remote side reported a failure
    #[error("{kind}: {message}")]
    Remote { kind: String, message: String },

    /// No daemon is listening on the control socket
    #[error("ipcam daemon is not running")]
    DaemonNotRunning,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<IpcamError>,
    },
}

impl IpcamError {
    /// Create a state violation error
    pub fn state_violation(operation: &'static str, state: CameraState) -> Self {
        Self::StateViolation { operation, state }
    }

    /// Create an unsupported device error
    pub fn unsupported_device(msg: impl Into<String>) -> Self {
        Self::UnsupportedDevice(msg.into())
    }

    /// Create a capture failure
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    /// Create a device error
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a gateway error
    pub fn gateway(msg: impl Into<String>) -> Self {
        Self::Gateway(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context wrappers
    pub fn root(&self) -> &IpcamError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable machine-readable name, used on the control wire
    pub fn kind(&self) -> &'static str {
        match self.root() {
            Self::StateViolation { .. } => "state_violation",
            Self::UnsupportedDevice(_) => "unsupported_device",
            Self::Capture(_) => "capture_failure",
            Self::ConfigCorruption(_) => "config_corruption",
            Self::ControlApply { .. } => "control_apply_failure",
            Self::UnsupportedControl(_) => "unsupported_control",
            Self::Device(_) => "device_error",
            Self::AlreadyAttached(_) => "already_attached",
            Self::Config(_) => "config_error",
            Self::Gateway(_) => "gateway_error",
            Self::Remote { .. } => "remote_error",
            Self::DaemonNotRunning => "daemon_not_running",
            Self::Io(_) => "io_error",
            Self::WithContext { .. } => unreachable!("root() strips context"),
        }
    }

    /// Whether this error is reported back to the caller of a camera
    /// operation. Everything else ends up in a state transition or a log line.
    pub fn is_caller_visible(&self) -> bool {
        matches!(
            self.root(),
            Self::StateViolation { .. } | Self::UnsupportedDevice(_)
        )
    }

    /// Short hint for the operator, if there is one
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::StateViolation { .. } => {
                Some("Check the camera state with `ipcam status` before retrying")
            }
            Self::UnsupportedDevice(_) => {
                Some("The camera must offer Motion-JPEG; check `v4l2-ctl --list-formats`")
            }
            Self::Capture(_) => Some("Camera aborted; run `ipcam start` to recover"),
            Self::Device(_) => Some("Is the camera plugged in and readable by this user?"),
            Self::Config(_) => Some("Check ~/.config/ipcam/config.toml"),
            Self::DaemonNotRunning => Some("Start the service with `ipcam serve`"),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl From<serde_json::Error> for IpcamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Gateway(format!("Malformed message: {}", err))
    }
}
