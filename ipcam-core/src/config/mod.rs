//! Configuration for the ipcam service
//!
//! [`ConfigFile`] is the on-disk TOML; [`ServiceConfig`] is what the daemon
//! actually runs with after command-line overrides are applied.

mod file;

pub use file::{
    sample_config, CameraSettings, ConfigFile, GatewaySettings, HttpSettings, StorageSettings,
};

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::error::{IpcamError, Result};

/// Runtime configuration of the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Device node to open
    pub device: String,
    /// Per-device settings database
    pub database: PathBuf,
    /// Listen address of the MJPEG endpoint
    pub http_bind: String,
    /// Listen port of the MJPEG endpoint
    pub http_port: u16,
    /// Emit X-Frame-Number and X-Timestamp per multipart section
    pub extended_header: bool,
    /// Control socket path
    pub socket_path: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_file(&ConfigFile::default())
    }
}

impl ServiceConfig {
    /// Build from a parsed config file
    pub fn from_file(file: &ConfigFile) -> Self {
        Self {
            device: file.camera.device.clone(),
            database: file.storage.database.clone(),
            http_bind: file.http.bind.clone(),
            http_port: file.http.port,
            extended_header: file.http.extended_header,
            socket_path: file
                .gateway
                .socket
                .clone()
                .unwrap_or_else(crate::gateway::socket_path),
        }
    }

    /// Override the device node
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    /// Override the settings database path
    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = path.into();
        self
    }

    /// Override the HTTP listen address
    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.http_bind = bind.into();
        self
    }

    /// Override the HTTP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Enable or disable the extended multipart header
    pub fn with_extended_header(mut self, enabled: bool) -> Self {
        self.extended_header = enabled;
        self
    }

    /// Override the control socket path
    pub fn with_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Socket address of the MJPEG endpoint
    pub fn http_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.http_bind.parse().map_err(|e| {
            IpcamError::config(format!("Invalid bind address {:?}: {}", self.http_bind, e))
        })?;
        Ok(SocketAddr::new(ip, self.http_port))
    }

    /// Validate the configuration and return any warnings
    ///
    /// An empty list means the configuration looks good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.device.starts_with("/dev/") {
            warnings.push(format!(
                "Device {} is not under /dev; is this really a video node?",
                self.device
            ));
        }

        if self.http_port < 1024 && self.http_port != 0 {
            warnings.push(format!(
                "Port {} is privileged and needs elevated rights to bind.",
                self.http_port
            ));
        }

        if let Ok(ip) = self.http_bind.parse::<IpAddr>() {
            if ip.is_unspecified() {
                warnings.push(
                    "HTTP endpoint is reachable from the network; the stream is unauthenticated."
                        .to_string(),
                );
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_override_file() {
        let config = ServiceConfig::default()
            .with_device("/dev/video2")
            .with_port(8080)
            .with_extended_header(true);
        assert_eq!(config.device, "/dev/video2");
        assert_eq!(config.http_addr().unwrap().port(), 8080);
        assert!(config.extended_header);
    }

    #[test]
    fn test_invalid_bind_is_rejected() {
        let config = ServiceConfig::default().with_bind("camera.local");
        assert!(config.http_addr().is_err());
    }

    #[test]
    fn test_public_bind_warns() {
        let config = ServiceConfig::default().with_bind("0.0.0.0");
        assert!(config.validate().iter().any(|w| w.contains("unauthenticated")));
    }
}
