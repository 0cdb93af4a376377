//! Frame distribution loop
//!
//! Single consumer of the capture queue. Every frame is written to each
//! subscriber slot and published as `update_image`; when the queue closes,
//! every subscriber gets the end-of-stream marker.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::notify::Notifier;
use crate::registry::ClientRegistry;
use crate::types::Frame;

/// Counters for one distribution session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributionStats {
    /// Frames taken off the capture queue
    pub frames_distributed: u64,
    /// Subscribers dropped because their reader went away
    pub subscribers_pruned: u64,
    /// Subscribers that received the end-of-stream marker
    pub subscribers_closed: u64,
}

/// Drain `frames` until the capture side hangs up
pub async fn run(
    mut frames: mpsc::UnboundedReceiver<Frame>,
    registry: ClientRegistry,
    notifier: Notifier,
) -> DistributionStats {
    let mut stats = DistributionStats::default();
    let started = Instant::now();
    debug!("Distributor started");

    while let Some(frame) = frames.recv().await {
        let frame = Arc::new(frame);

        for sink in registry.snapshot() {
            if !sink.deliver(frame.clone()) && registry.detach(sink.id()) {
                stats.subscribers_pruned += 1;
            }
        }

        notifier.image(&frame);
        stats.frames_distributed += 1;
    }

    stats.subscribers_closed = registry.close_all() as u64;

    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "Distribution complete: {} frames in {:.1}s ({:.1} fps), {} pruned, {} closed",
        stats.frames_distributed,
        elapsed,
        if elapsed > 0.0 {
            stats.frames_distributed as f64 / elapsed
        } else {
            0.0
        },
        stats.subscribers_pruned,
        stats.subscribers_closed
    );

    stats
}
