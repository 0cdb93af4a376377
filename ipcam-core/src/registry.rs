//! Client registry and per-subscriber frame slots
//!
//! Each subscriber owns a depth-one slot built on `tokio::sync::watch`: a
//! newer frame replaces an unread one, so a slow reader only ever sees the
//! latest frame. The end-of-stream marker is written to the same slot and is
//! never replaced, because the registry forgets the sink right after.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{IpcamError, Result};
use crate::types::{CameraState, Frame, Handle};

/// Content of a subscriber slot
#[derive(Debug, Clone)]
enum Delivery {
    Pending,
    Frame(Arc<Frame>),
    EndOfStream,
}

/// Producer half of a subscriber slot, held by the registry
#[derive(Debug, Clone)]
pub struct FrameSink {
    id: Handle,
    tx: Arc<watch::Sender<Delivery>>,
}

impl FrameSink {
    pub fn id(&self) -> Handle {
        self.id
    }

    /// Overwrite the slot with `frame`. Returns false once the reader is gone.
    pub fn deliver(&self, frame: Arc<Frame>) -> bool {
        if self.tx.is_closed() {
            return false;
        }
        self.tx.send_replace(Delivery::Frame(frame));
        true
    }

    /// Write the end-of-stream marker
    pub fn end(&self) {
        self.tx.send_replace(Delivery::EndOfStream);
    }

    /// Whether the reader has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of a subscriber slot
#[derive(Debug)]
pub struct FrameStream {
    id: Handle,
    rx: watch::Receiver<Delivery>,
    registry: Option<ClientRegistry>,
    finished: bool,
}

impl FrameStream {
    pub fn id(&self) -> Handle {
        self.id
    }

    /// Wait for the newest frame
    ///
    /// Returns `None` once the end-of-stream marker arrives; every call after
    /// that returns `None` immediately.
    pub async fn next(&mut self) -> Option<Arc<Frame>> {
        while !self.finished {
            if self.rx.changed().await.is_err() {
                self.finish();
                break;
            }
            let delivery = self.rx.borrow_and_update().clone();
            match delivery {
                Delivery::Pending => continue,
                Delivery::Frame(frame) => return Some(frame),
                Delivery::EndOfStream => self.finish(),
            }
        }
        None
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Some(registry) = self.registry.take() {
            registry.detach(self.id);
        }
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.detach(self.id);
        }
    }
}

/// Create an unattached subscriber slot
pub fn frame_channel() -> (FrameSink, FrameStream) {
    let id = Handle::new();
    let (tx, rx) = watch::channel(Delivery::Pending);
    (
        FrameSink {
            id,
            tx: Arc::new(tx),
        },
        FrameStream {
            id,
            rx,
            registry: None,
            finished: false,
        },
    )
}

#[derive(Debug, Default)]
struct RegistryInner {
    sinks: Vec<FrameSink>,
    open: bool,
}

/// Thread-safe set of subscriber sinks
///
/// Closed until a capture session opens it; closing pushes the end-of-stream
/// marker to every sink and empties the set.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink
    pub fn attach(&self, sink: FrameSink) -> Result<Handle> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(IpcamError::state_violation("attach", CameraState::Stop));
        }
        if inner.sinks.iter().any(|s| s.id == sink.id) {
            return Err(IpcamError::AlreadyAttached(sink.id));
        }
        let id = sink.id;
        inner.sinks.push(sink);
        debug!("Subscriber {} attached ({} total)", id, inner.sinks.len());
        Ok(id)
    }

    /// Create a slot, attach its sink and hand back the stream
    ///
    /// The stream detaches itself when dropped.
    pub fn subscribe(&self) -> Result<FrameStream> {
        let (sink, mut stream) = frame_channel();
        self.attach(sink)?;
        stream.registry = Some(self.clone());
        Ok(stream)
    }

    /// Remove a sink; unknown handles are ignored
    pub fn detach(&self, id: Handle) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.sinks.len();
        inner.sinks.retain(|s| s.id != id);
        let removed = inner.sinks.len() != before;
        if removed {
            debug!("Subscriber {} detached ({} left)", id, inner.sinks.len());
        }
        removed
    }

    /// Copy of the current sinks, safe to iterate without the lock
    pub fn snapshot(&self) -> Vec<FrameSink> {
        self.inner.lock().sinks.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Start accepting subscribers
    pub fn open(&self) {
        self.inner.lock().open = true;
    }

    /// Send end-of-stream to every sink, drop them all and stop accepting
    /// new ones. Returns how many sinks were closed.
    pub fn close_all(&self) -> usize {
        let sinks = {
            let mut inner = self.inner.lock();
            inner.open = false;
            std::mem::take(&mut inner.sinks)
        };
        for sink in &sinks {
            sink.end();
        }
        if !sinks.is_empty() {
            info!("Closed {} subscriber(s)", sinks.len());
        }
        sinks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(seq: u64) -> Arc<Frame> {
        Arc::new(Frame::new(seq, Bytes::from_static(b"\xff\xd8")))
    }

    #[test]
    fn test_attach_requires_open() {
        let registry = ClientRegistry::new();
        let (sink, _stream) = frame_channel();
        let err = registry.attach(sink).unwrap_err();
        assert_eq!(err.kind(), "state_violation");
    }

    #[test]
    fn test_duplicate_attach_rejected() {
        let registry = ClientRegistry::new();
        registry.open();
        let (sink, _stream) = frame_channel();
        registry.attach(sink.clone()).unwrap();
        assert!(matches!(
            registry.attach(sink),
            Err(IpcamError::AlreadyAttached(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_detach_is_idempotent() {
        let registry = ClientRegistry::new();
        registry.open();
        let (sink, _stream) = frame_channel();
        let id = registry.attach(sink).unwrap();
        assert!(registry.detach(id));
        assert!(!registry.detach(id));
    }

    #[tokio::test]
    async fn test_slot_keeps_only_latest() {
        let registry = ClientRegistry::new();
        registry.open();
        let mut stream = registry.subscribe().unwrap();
        let sink = registry.snapshot().remove(0);

        for seq in 1..=5 {
            assert!(sink.deliver(frame(seq)));
        }
        assert_eq!(stream.next().await.unwrap().sequence, 5);

        registry.close_all();
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_stream_detaches() {
        let registry = ClientRegistry::new();
        registry.open();
        let stream = registry.subscribe().unwrap();
        assert_eq!(registry.len(), 1);
        drop(stream);
        assert!(registry.is_empty());
    }
}
