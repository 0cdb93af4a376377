//! Integration tests for configuration

use ipcam_core::config::{sample_config, ConfigFile};
use ipcam_core::ServiceConfig;
use std::path::PathBuf;

#[test]
fn test_sample_config_parses() {
    let file: ConfigFile = toml::from_str(&sample_config()).expect("sample parses");
    assert_eq!(file.camera.device, "/dev/video0");
    assert_eq!(file.http.port, 4567);
    assert!(!file.http.extended_header);
}

#[test]
fn test_partial_file_uses_defaults() {
    let file: ConfigFile = toml::from_str("[http]\nport = 8080\n").unwrap();
    assert_eq!(file.http.port, 8080);
    assert_eq!(file.http.bind, "127.0.0.1");
    assert_eq!(file.camera.device, "/dev/video0");
    assert!(file.gateway.socket.is_none());
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut file = ConfigFile::default();
    file.camera.device = "/dev/video2".to_string();
    file.http.extended_header = true;
    file.gateway.socket = Some(PathBuf::from("/run/ipcam/control.sock"));
    file.save_to(path.clone()).unwrap();

    let loaded = tokio_test::assert_ok!(ConfigFile::load_from(path));
    assert_eq!(loaded.camera.device, "/dev/video2");
    assert!(loaded.http.extended_header);
    assert_eq!(
        loaded.gateway.socket,
        Some(PathBuf::from("/run/ipcam/control.sock"))
    );
}

#[test]
fn test_invalid_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[http]\nport = \"eighty\"\n").unwrap();

    let err = tokio_test::assert_err!(ConfigFile::load_from(path));
    assert_eq!(err.kind(), "config_error");
}

#[test]
fn test_service_config_from_file() {
    let mut file = ConfigFile::default();
    file.storage.database = PathBuf::from("/tmp/ipcam-test/devices.json");
    file.gateway.socket = Some(PathBuf::from("/tmp/ipcam-test.sock"));

    let config = ServiceConfig::from_file(&file).with_port(9000);
    assert_eq!(config.database, PathBuf::from("/tmp/ipcam-test/devices.json"));
    assert_eq!(config.socket_path, PathBuf::from("/tmp/ipcam-test.sock"));
    assert_eq!(config.http_addr().unwrap().to_string(), "127.0.0.1:9000");
    assert!(config.validate().is_empty());
}

#[test]
fn test_non_device_path_warns() {
    let config = ServiceConfig::default().with_device("video0");
    assert!(config.validate().iter().any(|w| w.contains("/dev")));
}
