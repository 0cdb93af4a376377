//! Integration tests for the per-device settings store

mod mocks;

use ipcam_core::store::{self, ConfigStore};
use ipcam_core::types::{CapabilityDescriptor, ConfigEntry, DeviceIdentity, Framerate};

fn identity() -> DeviceIdentity {
    DeviceIdentity::new("usb-0000:00:14.0-1", "Mock Camera")
}

fn webcam_entry() -> ConfigEntry {
    store::create_entry(mocks::default_formats(), mocks::default_controls()).unwrap()
}

#[test]
fn test_default_selection_scenario() {
    let formats = vec![
        CapabilityDescriptor::new(640, 480, vec![Framerate::new(30, 1)]),
        CapabilityDescriptor::new(1280, 720, vec![Framerate::new(15, 1)]),
    ];
    let entry = store::create_entry(formats.clone(), vec![]).unwrap();

    assert_eq!((entry.image_width, entry.image_height), (640, 480));
    assert_eq!(entry.framerate, Framerate::new(30, 1));
    // Every reported format is kept for clients to choose from
    assert_eq!(entry.capabilities, formats);
}

#[test]
fn test_default_framerate_is_lowest() {
    let formats = vec![CapabilityDescriptor::new(
        640,
        480,
        vec![
            Framerate::new(30, 1),
            Framerate::new(15, 2),
            Framerate::new(15, 1),
        ],
    )];
    let entry = store::create_entry(formats, vec![]).unwrap();
    assert_eq!(entry.framerate, Framerate::new(15, 2));
}

#[test]
fn test_format_without_rates_is_unsupported() {
    let formats = vec![CapabilityDescriptor::new(640, 480, vec![])];
    let err = tokio_test::assert_err!(store::create_entry(formats, vec![]));
    assert_eq!(err.kind(), "unsupported_device");
}

#[test]
fn test_missing_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::load(dir.path().join("devices.json"));
    assert!(store.is_empty());
    assert!(store.get(&identity()).is_none());
}

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("devices.json");

    let mut store = ConfigStore::load(&path);
    assert!(store.insert_if_absent(&identity(), webcam_entry()));
    tokio_test::assert_ok!(store.save());

    let reloaded = ConfigStore::load(&path);
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.get(&identity()), Some(&webcam_entry()));
}

#[test]
fn test_persisted_layout_is_bus_then_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");

    let mut store = ConfigStore::load(&path);
    store.insert_if_absent(&identity(), webcam_entry());
    store.save().unwrap();

    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let entry = &json["usb-0000:00:14.0-1"]["Mock Camera"];
    assert_eq!(entry["image_width"], 640);
    assert_eq!(entry["framerate"], serde_json::json!([30, 1]));
    assert_eq!(entry["controls"][0]["type"], "integer");
}

#[test]
fn test_corrupt_file_is_reset_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let store = ConfigStore::load(&path);
    assert!(store.is_empty());
    assert!(!path.exists());
}

#[test]
fn test_insert_if_absent_keeps_existing() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConfigStore::load(dir.path().join("devices.json"));

    assert!(store.insert_if_absent(&identity(), webcam_entry()));
    let mut other = webcam_entry();
    other.image_width = 1280;
    assert!(!store.insert_if_absent(&identity(), other));
    assert_eq!(store.get(&identity()).unwrap().image_width, 640);
}

#[test]
fn test_get_or_create_writes_new_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("devices.json");
    let mut store = ConfigStore::load(&path);

    let (entry, created) = store.get_or_create(&identity(), || Ok(webcam_entry())).unwrap();
    assert!(created);
    entry.image_width = 1280;
    assert!(path.exists());

    // Second lookup hits the in-memory entry, including the edit
    let (entry, created) = store
        .get_or_create(&identity(), || panic!("defaults not needed"))
        .unwrap();
    assert!(!created);
    assert_eq!(entry.image_width, 1280);
}

#[test]
fn test_get_or_create_keeps_entry_when_write_fails() {
    let dir = tempfile::tempdir().unwrap();
    // The parent is a regular file, so the write cannot succeed
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let mut store = ConfigStore::load(blocker.join("devices.json"));

    let (_, created) = store.get_or_create(&identity(), || Ok(webcam_entry())).unwrap();
    assert!(created);
    assert_eq!(store.get(&identity()), Some(&webcam_entry()));
}

#[test]
fn test_same_card_on_two_buses() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConfigStore::load(dir.path().join("devices.json"));

    let left = DeviceIdentity::new("usb-1", "Mock Camera");
    let right = DeviceIdentity::new("usb-2", "Mock Camera");
    store.insert_if_absent(&left, webcam_entry());
    store.insert_if_absent(&right, webcam_entry());
    store.get_mut(&right).unwrap().image_height = 720;

    assert_eq!(store.len(), 2);
    assert_eq!(store.get(&left).unwrap().image_height, 480);
    assert_eq!(store.get(&right).unwrap().image_height, 720);
}
