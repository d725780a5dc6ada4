//! Per-camera settings storage
//!
//! The core reads `CameraSettings` through the `SettingsStore` trait and writes
//! back only the last disconnect time. Two stores are provided: an in-memory
//! one and a JSON file keyed by device address.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::camera::types::{CameraSettings, DeviceAddress};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings collaborator keyed by device address
pub trait SettingsStore: Send + Sync {
    /// Current settings for a camera (None if the store has never seen it)
    fn settings(&self, address: &DeviceAddress) -> Option<CameraSettings>;

    /// Replace the settings of a camera
    fn update_settings(&self, address: &DeviceAddress, settings: CameraSettings) -> Result<(), StoreError>;

    /// When the camera last disconnected
    fn last_disconnect(&self, address: &DeviceAddress) -> Option<DateTime<Utc>>;

    /// Write back a disconnect time
    fn record_disconnect(&self, address: &DeviceAddress, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Drop everything stored for a camera
    fn forget(&self, address: &DeviceAddress) -> Result<(), StoreError>;
}

/// Stored record for one camera
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredCamera {
    #[serde(default)]
    pub settings: CameraSettings,

    #[serde(default)]
    pub last_disconnect_at: Option<DateTime<Utc>>,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    cameras: Mutex<HashMap<DeviceAddress, StoredCamera>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut HashMap<DeviceAddress, StoredCamera>) -> R) -> R {
        let mut cameras = self.cameras.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut cameras)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn settings(&self, address: &DeviceAddress) -> Option<CameraSettings> {
        self.with(|cameras| cameras.get(address).map(|c| c.settings.clone()))
    }

    fn update_settings(&self, address: &DeviceAddress, settings: CameraSettings) -> Result<(), StoreError> {
        self.with(|cameras| cameras.entry(address.clone()).or_default().settings = settings);
        Ok(())
    }

    fn last_disconnect(&self, address: &DeviceAddress) -> Option<DateTime<Utc>> {
        self.with(|cameras| cameras.get(address).and_then(|c| c.last_disconnect_at))
    }

    fn record_disconnect(&self, address: &DeviceAddress, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with(|cameras| cameras.entry(address.clone()).or_default().last_disconnect_at = Some(at));
        Ok(())
    }

    fn forget(&self, address: &DeviceAddress) -> Result<(), StoreError> {
        self.with(|cameras| cameras.remove(address));
        Ok(())
    }
}

/// File layout of the JSON store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CameraFile {
    cameras: HashMap<DeviceAddress, StoredCamera>,
}

/// JSON file store, saved on every mutation
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    inner: MemorySettingsStore,
}

impl JsonSettingsStore {
    /// Load the store from disk; a missing or unreadable file starts empty
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let file = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CameraFile>(&content) {
                Ok(file) => {
                    debug!("Loaded camera settings from: {}", path.display());
                    file
                }
                Err(e) => {
                    warn!("Failed to parse settings file: {}", e);
                    CameraFile::default()
                }
            },
            Err(_) => {
                debug!("No existing settings file found at: {}", path.display());
                CameraFile::default()
            }
        };

        info!("Loaded {} stored cameras", file.cameras.len());
        Self {
            path,
            inner: MemorySettingsStore { cameras: Mutex::new(file.cameras) },
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.with(|cameras| cameras.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn save(&self) -> Result<(), StoreError> {
        let file = CameraFile { cameras: self.inner.with(|cameras| cameras.clone()) };
        let content = serde_json::to_string_pretty(&file)?;
        fs::write(&self.path, content)?;
        debug!("Saved camera settings to: {}", self.path.display());
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn settings(&self, address: &DeviceAddress) -> Option<CameraSettings> {
        self.inner.settings(address)
    }

    fn update_settings(&self, address: &DeviceAddress, settings: CameraSettings) -> Result<(), StoreError> {
        self.inner.update_settings(address, settings)?;
        self.save()
    }

    fn last_disconnect(&self, address: &DeviceAddress) -> Option<DateTime<Utc>> {
        self.inner.last_disconnect(address)
    }

    fn record_disconnect(&self, address: &DeviceAddress, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.inner.record_disconnect(address, at)?;
        self.save()
    }

    fn forget(&self, address: &DeviceAddress) -> Result<(), StoreError> {
        self.inner.forget(address)?;
        self.save()
    }
}
