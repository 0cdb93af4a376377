//! ipcam Core Library
//!
//! Shared MJPEG camera service: one capture device, many live viewers.
//!
//! This library provides:
//! - A capture supervisor owning the device on a dedicated thread
//! - Fan-out of every frame to any number of subscribers
//! - Persisted per-device settings (frame size, rate, controls)
//! - A Unix socket control gateway with change notifications
//! - An HTTP `multipart/x-mixed-replace` viewer endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐   ┌─────────────┐   ┌────────────────┐
//! │ Capture thread │──▶│ Distributor │──▶│ Frame streams  │──▶ HTTP viewers
//! │ (V4L2 device)  │   │ (tokio)     │   │ (registry)     │
//! └────────────────┘   └─────────────┘   └────────────────┘
//!         ▲                   │
//!         │                   ▼
//! ┌────────────────┐   ┌─────────────┐
//! │  Supervisor    │──▶│  Notifier   │──▶ Gateway sessions
//! └────────────────┘   └─────────────┘
//! ```

pub mod config;
pub mod device;
pub mod distributor;
pub mod error;
pub mod gateway;
pub mod http;
pub mod notify;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod types;

pub use config::{ConfigFile, ServiceConfig};
pub use device::{CaptureDevice, DeviceDriver};
pub use error::{IpcamError, Result};
pub use notify::{Notification, NotifyFilter};
pub use registry::{ClientRegistry, FrameStream};
pub use store::ConfigStore;
pub use supervisor::{CameraInfo, Supervisor};
pub use types::{
    CameraState, CapabilityDescriptor, ConfigEntry, ControlDescriptor, ControlValue,
    DeviceIdentity, Frame, Framerate, Handle,
};
