//! Change notifications
//!
//! Everything observable about the camera is published as a [`Notification`].
//! Frames go out on their own broadcast channel so that a burst of images
//! never pushes state and settings events out of a slow receiver's ring.
//! Gateway sessions filter both through their own [`NotifyFilter`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{CameraState, ControlValue, Frame, Framerate, MJPEG_MIME};

/// Capacity of the state and settings channel
///
/// Receivers that fall further behind lose the oldest events.
pub const NOTIFY_CAPACITY: usize = 64;

/// Capacity of the image channel; only recent frames matter
pub const IMAGE_CAPACITY: usize = 4;

/// Event published to control clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    UpdateImage {
        #[serde(rename = "type")]
        mime: String,
        #[serde(with = "serde_base64")]
        data: Bytes,
    },
    UpdateImageSize {
        width: u32,
        height: u32,
    },
    UpdateFramerate {
        num: u32,
        deno: u32,
    },
    UpdateControl {
        id: u32,
        value: ControlValue,
    },
    ChangeState {
        state: CameraState,
    },
    SaveComplete,
}

impl Notification {
    /// Every event name, in declaration order
    pub const NAMES: [&'static str; 6] = [
        "update_image",
        "update_image_size",
        "update_framerate",
        "update_control",
        "change_state",
        "save_complete",
    ];

    /// Event name as used in allow-lists
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateImage { .. } => "update_image",
            Self::UpdateImageSize { .. } => "update_image_size",
            Self::UpdateFramerate { .. } => "update_framerate",
            Self::UpdateControl { .. } => "update_control",
            Self::ChangeState { .. } => "change_state",
            Self::SaveComplete => "save_complete",
        }
    }
}

/// Publisher side of the notification channel
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
    images: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        let (images, _) = broadcast::channel(IMAGE_CAPACITY);
        Self { tx, images }
    }

    /// New receiver for every non-image event sent from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// New receiver for `update_image` events
    pub fn subscribe_images(&self) -> broadcast::Receiver<Notification> {
        self.images.subscribe()
    }

    /// Publish an event; having no listeners is fine
    pub fn send(&self, event: Notification) {
        trace!("notify {}", event.name());
        let channel = match event {
            Notification::UpdateImage { .. } => &self.images,
            _ => &self.tx,
        };
        let _ = channel.send(event);
    }

    pub fn image(&self, frame: &Frame) {
        if self.images.receiver_count() == 0 {
            return;
        }
        self.send(Notification::UpdateImage {
            mime: MJPEG_MIME.to_string(),
            data: frame.data.clone(),
        });
    }

    pub fn image_size(&self, width: u32, height: u32) {
        self.send(Notification::UpdateImageSize { width, height });
    }

    pub fn framerate(&self, rate: Framerate) {
        self.send(Notification::UpdateFramerate {
            num: rate.num,
            deno: rate.deno,
        });
    }

    pub fn control(&self, id: u32, value: ControlValue) {
        self.send(Notification::UpdateControl { id, value });
    }

    pub fn state(&self, state: CameraState) {
        self.send(Notification::ChangeState { state });
    }

    pub fn save_complete(&self) {
        self.send(Notification::SaveComplete);
    }
}

/// Per-session allow-list of event names
///
/// Starts empty, so a fresh session receives nothing until it asks.
#[derive(Debug, Clone, Default)]
pub struct NotifyFilter {
    all: bool,
    names: BTreeSet<String>,
}

impl NotifyFilter {
    /// Wildcard that admits every event
    pub const ALL: &'static str = "*";

    pub fn new() -> Self {
        Self::default()
    }

    /// Admit the given events
    pub fn add<I, S>(&mut self, events: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for event in events {
            match event.as_ref() {
                Self::ALL => self.all = true,
                name => {
                    self.names.insert(name.to_string());
                }
            }
        }
    }

    /// Stop admitting the given events
    pub fn remove<I, S>(&mut self, events: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for event in events {
            match event.as_ref() {
                Self::ALL => {
                    self.all = false;
                    self.names.clear();
                }
                name => {
                    self.names.remove(name);
                }
            }
        }
    }

    pub fn allows(&self, event: &Notification) -> bool {
        self.admits(event.name())
    }

    /// Whether events called `name` pass
    pub fn admits(&self, name: &str) -> bool {
        self.all || self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.names.is_empty()
    }
}

mod serde_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
