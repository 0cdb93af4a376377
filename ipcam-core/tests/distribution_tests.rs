//! Integration tests for frame fan-out

mod mocks;

use ipcam_core::distributor;
use ipcam_core::notify::{Notification, Notifier};
use ipcam_core::registry::ClientRegistry;
use ipcam_core::types::Frame;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn frame(seq: u64) -> Frame {
    Frame::new(seq, mocks::jpeg_payload(seq))
}

#[tokio::test]
async fn test_every_subscriber_sees_frames() {
    let registry = ClientRegistry::new();
    registry.open();
    let notifier = Notifier::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(distributor::run(rx, registry.clone(), notifier.clone()));

    let mut a = registry.subscribe().unwrap();
    let mut b = registry.subscribe().unwrap();

    tx.send(frame(1)).unwrap();
    assert_eq!(timeout(WAIT, a.next()).await.unwrap().unwrap().sequence, 1);
    assert_eq!(timeout(WAIT, b.next()).await.unwrap().unwrap().sequence, 1);

    drop(tx);
    let stats = task.await.unwrap();
    assert_eq!(stats.frames_distributed, 1);
    assert_eq!(stats.subscribers_closed, 2);
    assert!(a.next().await.is_none());
    assert!(b.next().await.is_none());
}

#[tokio::test]
async fn test_slow_subscriber_gets_latest_only() {
    let registry = ClientRegistry::new();
    registry.open();
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(distributor::run(rx, registry.clone(), Notifier::new()));

    let mut slow = registry.subscribe().unwrap();
    for seq in 1..=5 {
        tx.send(frame(seq)).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Frames 1..4 were overwritten while nobody was reading
    assert_eq!(timeout(WAIT, slow.next()).await.unwrap().unwrap().sequence, 5);

    drop(tx);
    let stats = task.await.unwrap();
    assert_eq!(stats.frames_distributed, 5);
    assert!(slow.next().await.is_none());
}

#[tokio::test]
async fn test_gone_subscriber_is_pruned() {
    let registry = ClientRegistry::new();
    registry.open();
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(distributor::run(rx, registry.clone(), Notifier::new()));

    let kept = registry.subscribe().unwrap();
    let (sink, stream) = ipcam_core::registry::frame_channel();
    registry.attach(sink).unwrap();
    drop(stream);
    assert_eq!(registry.len(), 2);

    tx.send(frame(1)).unwrap();
    drop(tx);
    let stats = task.await.unwrap();

    assert_eq!(stats.subscribers_pruned, 1);
    assert_eq!(stats.subscribers_closed, 1);
    drop(kept);
}

#[tokio::test]
async fn test_frames_published_as_update_image() {
    let registry = ClientRegistry::new();
    registry.open();
    let notifier = Notifier::new();
    let mut events = notifier.subscribe_images();
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(distributor::run(rx, registry, notifier));

    tx.send(frame(7)).unwrap();
    drop(tx);
    task.await.unwrap();

    match events.recv().await.unwrap() {
        Notification::UpdateImage { mime, data } => {
            assert_eq!(mime, "image/jpeg");
            assert_eq!(data, mocks::jpeg_payload(7));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_attach_after_close_is_refused() {
    let registry = ClientRegistry::new();
    registry.open();
    let (tx, rx) = mpsc::unbounded_channel::<Frame>();
    let task = tokio::spawn(distributor::run(rx, registry.clone(), Notifier::new()));
    drop(tx);
    task.await.unwrap();

    let err = registry.subscribe().unwrap_err();
    assert_eq!(err.kind(), "state_violation");
    assert!(!registry.is_open());
}
