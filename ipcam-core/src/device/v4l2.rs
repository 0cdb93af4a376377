//! Video4Linux2 capture backend
//!
//! Opens `/dev/videoN`, reports the MJPG frame sizes and controls, and
//! streams compressed frames through memory-mapped buffers.

use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::{debug, info, trace};
use v4l::buffer::Type as BufType;
use v4l::control::{self, Control, MenuItem, Value};
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Device, Format, FourCC, Fraction};

use super::{CaptureDevice, DeviceDriver, REQUIRED_ENCODING};
use crate::error::{IpcamError, Result};
use crate::types::{
    CapabilityDescriptor, ControlDescriptor, ControlValue, DeviceIdentity, Framerate,
};

/// Number of mmap buffers requested from the driver
const BUFFER_COUNT: u32 = 4;

/// Driver for Video4Linux2 device nodes
pub struct V4l2Driver;

impl DeviceDriver for V4l2Driver {
    fn open(&self, path: &str) -> Result<Box<dyn CaptureDevice>> {
        let device = Device::with_path(path)
            .map_err(|e| IpcamError::device(format!("Failed to open {}: {}", path, e)))?;
        let caps = device
            .query_caps()
            .map_err(|e| IpcamError::device(format!("Failed to query {}: {}", path, e)))?;

        info!("Opened {} ({} on {})", path, caps.card, caps.bus);

        Ok(Box::new(V4l2Device {
            path: path.to_string(),
            identity: DeviceIdentity::new(caps.bus, caps.card),
            device: Some(device),
            stream: None,
        }))
    }

    fn name(&self) -> &'static str {
        "v4l2"
    }
}

/// An open V4L2 device node
pub struct V4l2Device {
    path: String,
    identity: DeviceIdentity,
    device: Option<Device>,
    stream: Option<Stream<'static>>,
}

impl V4l2Device {
    fn device(&self) -> Result<&Device> {
        self.device
            .as_ref()
            .ok_or_else(|| IpcamError::device(format!("{} is closed", self.path)))
    }

    fn fourcc() -> FourCC {
        FourCC::new(b"MJPG")
    }
}

fn io_err(what: &str, e: std::io::Error) -> IpcamError {
    IpcamError::device(format!("{}: {}", what, e))
}

impl CaptureDevice for V4l2Device {
    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    fn supports_encoding(&self, fourcc: &str) -> bool {
        let Ok(device) = self.device() else {
            return false;
        };
        match device.enum_formats() {
            Ok(formats) => formats
                .iter()
                .any(|f| f.fourcc.str().map(|s| s == fourcc).unwrap_or(false)),
            Err(e) => {
                debug!("enum_formats failed on {}: {}", self.path, e);
                false
            }
        }
    }

    fn enumerate_formats(&mut self) -> Result<Vec<CapabilityDescriptor>> {
        let device = self.device()?;
        let fourcc = Self::fourcc();
        let sizes = device
            .enum_framesizes(fourcc)
            .map_err(|e| io_err("enum_framesizes", e))?;

        let mut caps = Vec::new();
        for size in sizes {
            let FrameSizeEnum::Discrete(discrete) = size.size else {
                debug!("Skipping stepwise {} frame size", REQUIRED_ENCODING);
                continue;
            };

            let intervals = device
                .enum_frameintervals(fourcc, discrete.width, discrete.height)
                .map_err(|e| io_err("enum_frameintervals", e))?;

            // A frame interval is seconds per frame; invert it to get a rate
            let rate = intervals
                .into_iter()
                .filter_map(|i| match i.interval {
                    FrameIntervalEnum::Discrete(f) => {
                        Some(Framerate::new(f.denominator, f.numerator))
                    }
                    FrameIntervalEnum::Stepwise(_) => None,
                })
                .collect();

            caps.push(CapabilityDescriptor::new(discrete.width, discrete.height, rate));
        }

        Ok(caps)
    }

    fn enumerate_controls(&mut self) -> Result<Vec<ControlDescriptor>> {
        let device = self.device()?;
        let descriptions = device
            .query_controls()
            .map_err(|e| io_err("query_controls", e))?;

        let mut controls = Vec::with_capacity(descriptions.len());
        for desc in descriptions {
            let ctl = match desc.typ {
                control::Type::Integer => ControlDescriptor::Integer {
                    id: desc.id,
                    name: desc.name,
                    value: desc.default,
                    min: desc.minimum,
                    max: desc.maximum,
                    step: desc.step,
                },
                control::Type::Boolean => ControlDescriptor::Boolean {
                    id: desc.id,
                    name: desc.name,
                    value: desc.default != 0,
                },
                control::Type::Menu => {
                    let items: BTreeMap<String, i64> = desc
                        .items
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|(index, item)| match item {
                            MenuItem::Name(name) => Some((name, index as i64)),
                            MenuItem::Value(_) => None,
                        })
                        .collect();
                    ControlDescriptor::Menu {
                        id: desc.id,
                        name: desc.name,
                        value: desc.default,
                        items,
                    }
                }
                // Class headers only group the controls that follow
                control::Type::CtrlClass => continue,
                other => {
                    return Err(IpcamError::UnsupportedControl(format!(
                        "{} ({:?})",
                        desc.name, other
                    )));
                }
            };
            controls.push(ctl);
        }

        Ok(controls)
    }

    fn apply(&mut self, width: u32, height: u32, framerate: Framerate) -> Result<()> {
        let device = self.device()?;
        let format = Format::new(width, height, Self::fourcc());
        let actual = device
            .set_format(&format)
            .map_err(|e| io_err("set_format", e))?;
        if actual.width != width || actual.height != height {
            debug!(
                "Driver adjusted {}x{} to {}x{}",
                width, height, actual.width, actual.height
            );
        }

        // Parameters carry the frame interval, the inverse of the rate
        let params = Parameters::new(Fraction::new(framerate.deno, framerate.num));
        device
            .set_params(&params)
            .map_err(|e| io_err("set_params", e))?;

        Ok(())
    }

    fn set_control(&mut self, id: u32, value: ControlValue) -> Result<()> {
        let device = self.device()?;
        let value = match value {
            ControlValue::Boolean(b) => Value::Boolean(b),
            ControlValue::Integer(v) => Value::Integer(v),
        };
        device
            .set_control(Control { id, value })
            .map_err(|e| io_err("set_control", e))
    }

    fn start_capture(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let device = self.device()?;
        let stream = Stream::with_buffers(device, BufType::VideoCapture, BUFFER_COUNT)
            .map_err(|e| io_err("stream setup", e))?;
        self.stream = Some(stream);
        debug!("Capture started on {}", self.path);
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<()> {
        // Dropping the stream issues STREAMOFF and releases the buffers
        if self.stream.take().is_some() {
            debug!("Capture stopped on {}", self.path);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn capture_one_frame(&mut self) -> Result<Bytes> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| IpcamError::capture("capture is not running"))?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| IpcamError::capture(format!("dequeue failed: {}", e)))?;

        let used = (meta.bytesused as usize).min(buf.len());
        trace!("Frame {} ({} bytes)", meta.sequence, used);
        Ok(Bytes::copy_from_slice(&buf[..used]))
    }

    fn close(&mut self) {
        self.stream = None;
        if self.device.take().is_some() {
            info!("Closed {}", self.path);
        }
    }
}
