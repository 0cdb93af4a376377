//! Persistent per-device settings
//!
//! One JSON document maps `bus -> name -> ConfigEntry`. It is read once at
//! startup, mutated in memory and written back whole on demand.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{IpcamError, Result};
use crate::types::{CapabilityDescriptor, ConfigEntry, ControlDescriptor, DeviceIdentity};

/// Frame area the default selection aims for (640x480)
pub const BASIS_AREA: u64 = 640 * 480;

/// Persisted layout: bus -> card name -> settings
pub type Database = BTreeMap<String, BTreeMap<String, ConfigEntry>>;

/// In-memory settings database backed by a file
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    db: Database,
}

impl ConfigStore {
    /// Read the database at `path`
    ///
    /// Never fails: a missing or unreadable file yields an empty store and a
    /// corrupt file is deleted.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let db = match read_database(&path) {
            Ok(db) => {
                info!("Loaded {} device bus entries from {:?}", db.len(), path);
                db
            }
            Err(e) => {
                match &e {
                    IpcamError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                        debug!("No device database at {:?}, starting empty", path);
                    }
                    _ => warn!("{}; resetting device database", e),
                }
                discard(&path);
                Database::new()
            }
        };

        Self { path, db }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: &DeviceIdentity) -> Option<&ConfigEntry> {
        self.db.get(&id.bus).and_then(|m| m.get(&id.name))
    }

    pub fn get_mut(&mut self, id: &DeviceIdentity) -> Option<&mut ConfigEntry> {
        self.db.get_mut(&id.bus).and_then(|m| m.get_mut(&id.name))
    }

    /// Store `entry` unless one already exists. Returns whether it was stored.
    pub fn insert_if_absent(&mut self, id: &DeviceIdentity, entry: ConfigEntry) -> bool {
        let by_name = self.db.entry(id.bus.clone()).or_default();
        if by_name.contains_key(&id.name) {
            return false;
        }
        by_name.insert(id.name.clone(), entry);
        true
    }

    /// Existing entry for `id`, or a new one built by `defaults` and written
    /// to disk right away. The flag tells whether the entry was created.
    ///
    /// A failed write is logged and the new entry stays in memory, so the
    /// next explicit save still covers it.
    pub fn get_or_create<F>(
        &mut self,
        id: &DeviceIdentity,
        defaults: F,
    ) -> Result<(&mut ConfigEntry, bool)>
    where
        F: FnOnce() -> Result<ConfigEntry>,
    {
        let created = if self.get(id).is_none() {
            self.insert_if_absent(id, defaults()?);
            info!("Created settings for {}", id);
            if let Err(e) = self.save() {
                warn!("Failed to persist new settings for {}: {}", id, e);
            }
            true
        } else {
            false
        };

        let entry = self
            .get_mut(id)
            .ok_or_else(|| IpcamError::config(format!("settings for {} vanished", id)))?;
        Ok((entry, created))
    }

    /// Number of known devices
    pub fn len(&self) -> usize {
        self.db.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialized form of the whole database
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.db)
            .map_err(|e| IpcamError::config(format!("Failed to serialize device database: {}", e)))
    }

    /// Write the whole database atomically
    pub fn save(&self) -> Result<()> {
        write_atomic(&self.path, &self.snapshot()?)
    }
}

fn read_database(path: &Path) -> Result<Database> {
    let blob = std::fs::read(path)?;
    serde_json::from_slice(&blob)
        .map_err(|e| IpcamError::ConfigCorruption(format!("{:?}: {}", path, e)))
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Removed unreadable device database {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {:?}: {}", path, e),
    }
}

/// Replace `path` with `bytes` in one rename
///
/// The data goes to a temporary file in the same directory first, so a
/// failed write leaves the previous file untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| IpcamError::Io(e.error))?;

    debug!("Wrote {} bytes to {:?}", bytes.len(), path);
    Ok(())
}

/// Frame size closest in area to 640x480; ties keep the earliest entry
pub fn select_capability(caps: &[CapabilityDescriptor]) -> Option<&CapabilityDescriptor> {
    caps.iter().min_by_key(|c| c.area().abs_diff(BASIS_AREA))
}

/// Build the initial settings of a device from what it reports
pub fn create_entry(
    capabilities: Vec<CapabilityDescriptor>,
    controls: Vec<ControlDescriptor>,
) -> Result<ConfigEntry> {
    let cap = select_capability(&capabilities)
        .ok_or_else(|| IpcamError::unsupported_device("no Motion-JPEG frame sizes reported"))?;
    let (image_width, image_height) = (cap.width, cap.height);
    let framerate = cap.lowest_rate().ok_or_else(|| {
        IpcamError::unsupported_device(format!(
            "{}x{} has no framerates",
            image_width, image_height
        ))
    })?;

    Ok(ConfigEntry {
        image_width,
        image_height,
        framerate,
        capabilities,
        controls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Framerate;

    fn cap(w: u32, h: u32) -> CapabilityDescriptor {
        CapabilityDescriptor::new(w, h, vec![Framerate::new(30, 1)])
    }

    #[test]
    fn test_selection_prefers_vga() {
        let caps = vec![cap(1920, 1080), cap(640, 480), cap(320, 240)];
        let picked = select_capability(&caps).unwrap();
        assert_eq!((picked.width, picked.height), (640, 480));
    }

    #[test]
    fn test_selection_tie_keeps_first() {
        // Both are 6_400 pixels away from 640x480
        let caps = vec![cap(640, 490), cap(640, 470)];
        let picked = select_capability(&caps).unwrap();
        assert_eq!(picked.height, 490);
    }

    #[test]
    fn test_create_entry_requires_formats() {
        let err = create_entry(vec![], vec![]).unwrap_err();
        assert_eq!(err.kind(), "unsupported_device");
    }
}
