//! Device capability interface
//!
//! The supervisor never talks to a driver directly. It goes through
//! [`DeviceDriver`] to open a path and through [`CaptureDevice`] for
//! everything after that. The real backend is Video4Linux2 (behind the
//! `v4l2` feature); tests plug in a scripted implementation.

#[cfg(feature = "v4l2")]
pub mod v4l2;

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{IpcamError, Result};
use crate::types::{
    CapabilityDescriptor, ControlDescriptor, ControlValue, DeviceIdentity, Framerate,
};

/// FourCC of the only encoding the service accepts
pub const REQUIRED_ENCODING: &str = "MJPG";

/// Opens capture devices by path
pub trait DeviceDriver: Send + Sync {
    /// Open the device node at `path`
    ///
    /// Called on the capture thread; the returned device never leaves it.
    fn open(&self, path: &str) -> Result<Box<dyn CaptureDevice>>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// An open capture device
pub trait CaptureDevice {
    /// Bus location and card name
    fn identity(&self) -> DeviceIdentity;

    /// Whether the device offers the given FourCC encoding
    fn supports_encoding(&self, fourcc: &str) -> bool;

    /// Frame sizes and rates of the required encoding, in driver order
    fn enumerate_formats(&mut self) -> Result<Vec<CapabilityDescriptor>>;

    /// Controls with their driver default values
    fn enumerate_controls(&mut self) -> Result<Vec<ControlDescriptor>>;

    /// Set frame size and rate. Capture must be stopped.
    fn apply(&mut self, width: u32, height: u32, framerate: Framerate) -> Result<()>;

    /// Write a single control
    fn set_control(&mut self, id: u32, value: ControlValue) -> Result<()>;

    fn start_capture(&mut self) -> Result<()>;

    fn stop_capture(&mut self) -> Result<()>;

    fn is_capturing(&self) -> bool;

    /// Block until the next encoded frame is available
    fn capture_one_frame(&mut self) -> Result<Bytes>;

    fn close(&mut self);
}

/// Write every control of `controls` to the device
///
/// Failures do not stop the batch; they are returned so the caller can log
/// them.
pub fn apply_controls(
    device: &mut dyn CaptureDevice,
    controls: &[ControlDescriptor],
) -> Vec<IpcamError> {
    controls
        .iter()
        .filter_map(|ctl| {
            device
                .set_control(ctl.id(), ctl.value())
                .err()
                .map(|e| IpcamError::ControlApply {
                    id: ctl.id(),
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Driver used by the daemon when no other is supplied
#[cfg(feature = "v4l2")]
pub fn default_driver() -> Result<Arc<dyn DeviceDriver>> {
    Ok(Arc::new(v4l2::V4l2Driver))
}

/// Driver used by the daemon when no other is supplied
#[cfg(not(feature = "v4l2"))]
pub fn default_driver() -> Result<Arc<dyn DeviceDriver>> {
    Err(IpcamError::device(
        "no capture backend compiled in (rebuild with --features v4l2)",
    ))
}
