//! Mock infrastructure for testing
//!
//! A scriptable capture backend. [`MockDriver`] hands out [`MockDevice`]s
//! that follow a shared [`MockScript`] and record every call into a shared
//! log, so tests can both steer and inspect what the supervisor did.

#![allow(dead_code)]

use bytes::Bytes;
use ipcam_core::device::{CaptureDevice, DeviceDriver};
use ipcam_core::error::{IpcamError, Result};
use ipcam_core::store::ConfigStore;
use ipcam_core::types::{
    CapabilityDescriptor, ControlDescriptor, ControlValue, DeviceIdentity, Framerate,
};
use ipcam_core::Supervisor;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Device node the mock pretends to open
pub const MOCK_DEVICE: &str = "/dev/video0";

/// Control ids used by [`default_controls`]
pub const CTRL_BRIGHTNESS: u32 = 0x0098_0900;
pub const CTRL_AUTO_WB: u32 = 0x0098_090c;
pub const CTRL_POWER_LINE: u32 = 0x0098_0918;

/// Something the supervisor asked the device to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(String),
    EnumerateFormats,
    EnumerateControls,
    Apply {
        width: u32,
        height: u32,
        framerate: Framerate,
    },
    SetControl {
        id: u32,
        value: ControlValue,
    },
    StartCapture,
    StopCapture,
    Close,
}

/// Behaviour of the mock, editable while a session runs
#[derive(Debug, Clone)]
pub struct MockScript {
    pub identity: DeviceIdentity,
    pub encodings: Vec<String>,
    pub formats: Vec<CapabilityDescriptor>,
    pub controls: Vec<ControlDescriptor>,
    /// Opening the device fails
    pub fail_open: bool,
    /// `apply` fails
    pub fail_apply: bool,
    /// `set_control` fails for these ids
    pub failing_controls: Vec<u32>,
    /// Capture fails once this many frames were produced by one device
    pub fail_after: Option<u64>,
    /// Time each `capture_one_frame` takes
    pub frame_delay: Duration,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            identity: DeviceIdentity::new("usb-0000:00:14.0-1", "Mock Camera"),
            encodings: vec!["MJPG".to_string(), "YUYV".to_string()],
            formats: default_formats(),
            controls: default_controls(),
            fail_open: false,
            fail_apply: false,
            failing_controls: Vec::new(),
            fail_after: None,
            frame_delay: Duration::from_millis(5),
        }
    }
}

/// 640x480 and 1280x720, as in a typical UVC webcam
pub fn default_formats() -> Vec<CapabilityDescriptor> {
    vec![
        CapabilityDescriptor::new(640, 480, vec![Framerate::new(30, 1)]),
        CapabilityDescriptor::new(1280, 720, vec![Framerate::new(15, 1)]),
    ]
}

/// One control of each kind
pub fn default_controls() -> Vec<ControlDescriptor> {
    let mut items = BTreeMap::new();
    items.insert("Disabled".to_string(), 0);
    items.insert("50 Hz".to_string(), 1);
    items.insert("60 Hz".to_string(), 2);

    vec![
        ControlDescriptor::Integer {
            id: CTRL_BRIGHTNESS,
            name: "Brightness".to_string(),
            value: 128,
            min: 0,
            max: 255,
            step: 1,
        },
        ControlDescriptor::Boolean {
            id: CTRL_AUTO_WB,
            name: "White Balance Temperature, Auto".to_string(),
            value: true,
        },
        ControlDescriptor::Menu {
            id: CTRL_POWER_LINE,
            name: "Power Line Frequency".to_string(),
            value: 1,
            items,
        },
    ]
}

/// Scriptable driver; clones share script and call log
#[derive(Clone, Default)]
pub struct MockDriver {
    script: Arc<Mutex<MockScript>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: MockScript) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            calls: Arc::default(),
        }
    }

    /// Change the script; takes effect on the next device call
    pub fn edit(&self, f: impl FnOnce(&mut MockScript)) {
        f(&mut self.script.lock());
    }

    /// Everything recorded so far
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    /// Most recent `Apply` call
    pub fn last_apply(&self) -> Option<(u32, u32, Framerate)> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            Call::Apply {
                width,
                height,
                framerate,
            } => Some((*width, *height, *framerate)),
            _ => None,
        })
    }

    /// Boxed trait object for the supervisor
    pub fn driver(&self) -> Arc<dyn DeviceDriver> {
        Arc::new(self.clone())
    }
}

impl DeviceDriver for MockDriver {
    fn open(&self, path: &str) -> Result<Box<dyn CaptureDevice>> {
        self.calls.lock().push(Call::Open(path.to_string()));
        if self.script.lock().fail_open {
            return Err(IpcamError::device(format!("cannot open {}", path)));
        }

        Ok(Box::new(MockDevice {
            script: self.script.clone(),
            calls: self.calls.clone(),
            capturing: false,
            produced: 0,
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Device handed out by [`MockDriver`]
pub struct MockDevice {
    script: Arc<Mutex<MockScript>>,
    calls: Arc<Mutex<Vec<Call>>>,
    capturing: bool,
    produced: u64,
}

impl MockDevice {
    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl CaptureDevice for MockDevice {
    fn identity(&self) -> DeviceIdentity {
        self.script.lock().identity.clone()
    }

    fn supports_encoding(&self, fourcc: &str) -> bool {
        self.script.lock().encodings.iter().any(|e| e == fourcc)
    }

    fn enumerate_formats(&mut self) -> Result<Vec<CapabilityDescriptor>> {
        self.record(Call::EnumerateFormats);
        Ok(self.script.lock().formats.clone())
    }

    fn enumerate_controls(&mut self) -> Result<Vec<ControlDescriptor>> {
        self.record(Call::EnumerateControls);
        Ok(self.script.lock().controls.clone())
    }

    fn apply(&mut self, width: u32, height: u32, framerate: Framerate) -> Result<()> {
        self.record(Call::Apply {
            width,
            height,
            framerate,
        });
        if self.script.lock().fail_apply {
            return Err(IpcamError::device("VIDIOC_S_FMT rejected"));
        }
        Ok(())
    }

    fn set_control(&mut self, id: u32, value: ControlValue) -> Result<()> {
        self.record(Call::SetControl { id, value });
        if self.script.lock().failing_controls.contains(&id) {
            return Err(IpcamError::device(format!("control {:#x} is read-only", id)));
        }
        Ok(())
    }

    fn start_capture(&mut self) -> Result<()> {
        self.record(Call::StartCapture);
        self.capturing = true;
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<()> {
        self.record(Call::StopCapture);
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn capture_one_frame(&mut self) -> Result<Bytes> {
        let (delay, fail_after) = {
            let script = self.script.lock();
            (script.frame_delay, script.fail_after)
        };
        std::thread::sleep(delay);

        if !self.capturing {
            return Err(IpcamError::capture("capture is not running"));
        }
        if fail_after.is_some_and(|limit| self.produced >= limit) {
            return Err(IpcamError::capture("VIDIOC_DQBUF: No such device"));
        }

        self.produced += 1;
        Ok(jpeg_payload(self.produced))
    }

    fn close(&mut self) {
        self.record(Call::Close);
    }
}

/// Small fake JPEG: SOI marker, a counter, EOI marker
pub fn jpeg_payload(n: u64) -> Bytes {
    let mut data = vec![0xFF, 0xD8];
    data.extend_from_slice(format!("frame-{}", n).as_bytes());
    data.extend_from_slice(&[0xFF, 0xD9]);
    Bytes::from(data)
}

/// Supervisor over `driver` with its database in `dir`
pub fn supervisor(driver: &MockDriver, dir: &Path) -> Arc<Supervisor> {
    let store = ConfigStore::load(dir.join("devices.json"));
    Arc::new(Supervisor::new(MOCK_DEVICE, driver.driver(), store))
}

/// Poll `cond` for up to two seconds
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
