//! Core types for ipcam
//!
//! These types represent the device description, the persisted per-device
//! settings and the frames moving through the distribution pipeline.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global handle counter for unique subscriber IDs
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// MIME type of every frame the service produces
pub const MJPEG_MIME: &str = "image/jpeg";

/// Opaque handle identifying a subscriber sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Create a new unique handle
    pub fn new() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Camera lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CameraState {
    /// Device closed, ready to start
    #[default]
    Stop,
    /// Device open and producing frames
    Alive,
    /// Capture loop died; needs an explicit start
    Abort,
}

impl std::fmt::Display for CameraState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "STOP"),
            Self::Alive => write!(f, "ALIVE"),
            Self::Abort => write!(f, "ABORT"),
        }
    }
}

/// Stable key of a physical device in the settings database
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Bus location (e.g. "usb-0000:00:14.0-1")
    pub bus: String,
    /// Device (card) name
    pub name: String,
}

impl DeviceIdentity {
    pub fn new(bus: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bus: bus.into(),
            name: name.into(),
        }
    }

    /// Human-readable identifier, `name@bus`
    pub fn ident_string(&self) -> String {
        format!("{}@{}", self.name, self.bus)
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.bus)
    }
}

/// Rational framerate in frames per second
///
/// Persisted as a `[num, deno]` pair. Ordering compares the rational value,
/// so `60/2 == 30/1` for sorting purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct Framerate {
    pub num: u32,
    pub deno: u32,
}

impl Framerate {
    pub fn new(num: u32, deno: u32) -> Self {
        Self { num, deno }
    }

    /// Frames per second as a float (0 when the denominator is 0)
    pub fn fps(&self) -> f64 {
        if self.deno == 0 {
            0.0
        } else {
            self.num as f64 / self.deno as f64
        }
    }

    /// Compare rational values by cross multiplication
    pub fn cmp_value(&self, other: &Self) -> CmpOrdering {
        let lhs = self.num as u64 * other.deno as u64;
        let rhs = other.num as u64 * self.deno as u64;
        lhs.cmp(&rhs)
    }
}

impl From<(u32, u32)> for Framerate {
    fn from((num, deno): (u32, u32)) -> Self {
        Self { num, deno }
    }
}

impl From<Framerate> for (u32, u32) {
    fn from(rate: Framerate) -> Self {
        (rate.num, rate.deno)
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.deno)
    }
}

/// One supported frame size of the required encoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub width: u32,
    pub height: u32,
    /// Supported framerates, in enumeration order
    pub rate: Vec<Framerate>,
}

impl CapabilityDescriptor {
    pub fn new(width: u32, height: u32, rate: Vec<Framerate>) -> Self {
        Self {
            width,
            height,
            rate,
        }
    }

    /// Pixel count
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Slowest supported framerate
    pub fn lowest_rate(&self) -> Option<Framerate> {
        self.rate.iter().copied().min_by(|a, b| a.cmp_value(b))
    }
}

/// Value written to a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Boolean(bool),
    Integer(i64),
}

impl ControlValue {
    /// Integer view; booleans map to 0/1
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Boolean(b) => i64::from(*b),
            Self::Integer(v) => *v,
        }
    }

    /// Boolean view; any non-zero integer is true
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Integer(v) => *v != 0,
        }
    }
}

impl std::fmt::Display for ControlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Integer(v) => write!(f, "{}", v),
        }
    }
}

impl std::str::FromStr for ControlValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "true" | "on" | "yes" => Ok(Self::Boolean(true)),
            "false" | "off" | "no" => Ok(Self::Boolean(false)),
            other => other
                .parse::<i64>()
                .map(Self::Integer)
                .map_err(|_| format!("Invalid control value: {}", s)),
        }
    }
}

/// Device control with its current value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlDescriptor {
    Integer {
        id: u32,
        name: String,
        value: i64,
        min: i64,
        max: i64,
        step: u64,
    },
    Boolean {
        id: u32,
        name: String,
        value: bool,
    },
    Menu {
        id: u32,
        name: String,
        value: i64,
        /// Item name to menu index
        items: BTreeMap<String, i64>,
    },
}

impl ControlDescriptor {
    pub fn id(&self) -> u32 {
        match self {
            Self::Integer { id, .. } | Self::Boolean { id, .. } | Self::Menu { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Integer { name, .. } | Self::Boolean { name, .. } | Self::Menu { name, .. } => {
                name
            }
        }
    }

    /// Current value in its natural representation
    pub fn value(&self) -> ControlValue {
        match self {
            Self::Integer { value, .. } | Self::Menu { value, .. } => ControlValue::Integer(*value),
            Self::Boolean { value, .. } => ControlValue::Boolean(*value),
        }
    }

    /// Store a new value, coerced to this control's kind
    pub fn set_value(&mut self, new: ControlValue) {
        match self {
            Self::Integer { value, .. } | Self::Menu { value, .. } => *value = new.as_i64(),
            Self::Boolean { value, .. } => *value = new.as_bool(),
        }
    }
}

/// Persisted settings of one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub image_width: u32,
    pub image_height: u32,
    pub framerate: Framerate,
    pub capabilities: Vec<CapabilityDescriptor>,
    pub controls: Vec<ControlDescriptor>,
}

impl ConfigEntry {
    /// Look up a control by id
    pub fn control(&self, id: u32) -> Option<&ControlDescriptor> {
        self.controls.iter().find(|c| c.id() == id)
    }

    /// Look up a control by id for mutation
    pub fn control_mut(&mut self, id: u32) -> Option<&mut ControlDescriptor> {
        self.controls.iter_mut().find(|c| c.id() == id)
    }
}

/// One captured frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Sequence number within the capture session, starting at 1
    pub sequence: u64,
    /// Encoded payload
    pub data: Bytes,
    /// Wall-clock capture time in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl Frame {
    /// Stamp a freshly captured JPEG payload
    pub fn new(sequence: u64, data: Bytes) -> Self {
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            sequence,
            data,
            timestamp_ms,
        }
    }

    /// MIME type of the payload
    pub fn mime_type(&self) -> &'static str {
        MJPEG_MIME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framerate_ordering_is_rational() {
        let a = Framerate::new(30, 1);
        let b = Framerate::new(60, 2);
        let c = Framerate::new(15, 1);
        assert_eq!(a.cmp_value(&b), CmpOrdering::Equal);
        assert_eq!(c.cmp_value(&a), CmpOrdering::Less);
    }

    #[test]
    fn test_framerate_persists_as_pair() {
        let json = serde_json::to_string(&Framerate::new(30000, 1001)).unwrap();
        assert_eq!(json, "[30000,1001]");
    }

    #[test]
    fn test_control_coercion() {
        let mut ctl = ControlDescriptor::Boolean {
            id: 7,
            name: "Auto White Balance".into(),
            value: false,
        };
        ctl.set_value(ControlValue::Integer(1));
        assert_eq!(ctl.value(), ControlValue::Boolean(true));
    }

    #[test]
    fn test_control_value_parse() {
        assert_eq!("on".parse::<ControlValue>(), Ok(ControlValue::Boolean(true)));
        assert_eq!("-3".parse::<ControlValue>(), Ok(ControlValue::Integer(-3)));
        assert!("bright".parse::<ControlValue>().is_err());
    }

    #[test]
    fn test_unknown_control_kind_is_rejected() {
        let json = r#"{"type":"button","id":1,"name":"Reset"}"#;
        assert!(serde_json::from_str::<ControlDescriptor>(json).is_err());
    }
}
