//! Configuration file loading
//!
//! Loads user configuration from `~/.config/ipcam/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{IpcamError, Result};

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Capture device settings
    #[serde(default)]
    pub camera: CameraSettings,

    /// Device database location
    #[serde(default)]
    pub storage: StorageSettings,

    /// MJPEG viewer endpoint
    #[serde(default)]
    pub http: HttpSettings,

    /// Control socket
    #[serde(default)]
    pub gateway: GatewaySettings,
}

/// Capture device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Device node to open
    #[serde(default = "default_device")]
    pub device: String,
}

/// Device database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path of the per-device settings database
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

/// MJPEG viewer endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Add X-Frame-Number and X-Timestamp to every part
    #[serde(default)]
    pub extended_header: bool,
}

/// Control gateway settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Socket path (defaults to `$XDG_RUNTIME_DIR/ipcam.sock`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,
}

fn default_device() -> String {
    "/dev/video0".to_string()
}

fn default_database() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/var/lib"))
        .join("ipcam")
        .join("devices.json")
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4567
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: default_device(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            extended_header: false,
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("ipcam").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("ipcam")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/ipcam/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| IpcamError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| IpcamError::Config(format!("Failed to parse config file: {}", e)))?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    IpcamError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| IpcamError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| IpcamError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_path();
        if path.exists() {
            return Ok(false);
        }

        std::fs::create_dir_all(path.parent().unwrap_or(std::path::Path::new(".")))
            .map_err(|e| IpcamError::Config(format!("Failed to create config directory: {}", e)))?;
        std::fs::write(&path, sample_config())
            .map_err(|e| IpcamError::Config(format!("Failed to write config file: {}", e)))?;
        info!("Wrote sample configuration to {:?}", path);
        Ok(true)
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# ipcam configuration

[camera]
# Video4Linux2 device node. The camera must offer Motion-JPEG.
device = "/dev/video0"

[storage]
# Per-device settings (frame size, framerate, controls), keyed by bus and card name.
# Defaults to <data dir>/ipcam/devices.json
# database = "/var/lib/ipcam/devices.json"

[http]
# MJPEG viewer endpoint, served at /stream
bind = "127.0.0.1"
port = 4567

# Add X-Frame-Number and X-Timestamp headers to every multipart section
extended_header = false

[gateway]
# Control socket. Defaults to $XDG_RUNTIME_DIR/ipcam.sock
# socket = "/run/user/1000/ipcam.sock"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();
        assert_eq!(config.camera.device, "/dev/video0");
        assert_eq!(config.http.port, 4567);
        assert!(!config.http.extended_header);
        assert!(config.gateway.socket.is_none());
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = sample_config();
        let config: ConfigFile = toml::from_str(&sample).unwrap();
        assert_eq!(config.camera.device, "/dev/video0");
        assert_eq!(config.http.bind, "127.0.0.1");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ConfigFile = toml::from_str("[http]\nport = 8080\n").unwrap();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.http.bind, "127.0.0.1");
        assert_eq!(config.camera.device, "/dev/video0");
    }
}
