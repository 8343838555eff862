//! JSON-file stores for settings and device rows
//!
//! Files are rewritten through a temporary sibling and renamed into place so
//! that a crash never leaves a half-written file behind.

use crate::devices::{DeviceId, DeviceRecord};
use crate::error::{PlantError, Result};
use crate::services::{DeviceStore, Settings, SettingsPatch, SettingsStore};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PlantError::storage(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(|e| {
        PlantError::storage(format!("cannot write {}: {e}", tmp.display()))
    })?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        PlantError::storage(format!("cannot replace {}: {e}", path.display()))
    })?;
    debug!(path = %path.display(), "State file written");
    Ok(())
}

/// Settings persisted to one JSON file
pub struct JsonSettingsStore {
    path: PathBuf,
    cached: Mutex<Settings>,
}

impl JsonSettingsStore {
    /// Open the file, creating it with defaults when missing
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = match read_json::<Settings>(&path).await? {
            Some(settings) => {
                if let Err(e) = settings.validate() {
                    warn!(path = %path.display(), error = %e, "Stored settings are inconsistent");
                }
                settings
            }
            None => {
                info!(path = %path.display(), "No settings file, writing defaults");
                let settings = Settings::default();
                write_json(&path, &settings).await?;
                settings
            }
        };

        Ok(Self {
            path,
            cached: Mutex::new(settings),
        })
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn get_settings(&self) -> Result<Settings> {
        Ok(self.cached.lock().await.clone())
    }

    async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let mut cached = self.cached.lock().await;
        let merged = cached.merged(&patch)?;
        write_json(&self.path, &merged).await?;
        *cached = merged.clone();
        Ok(merged)
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let mut cached = self.cached.lock().await;
        write_json(&self.path, settings).await?;
        *cached = settings.clone();
        Ok(())
    }
}

/// Device rows persisted to one JSON file keyed by wire number
pub struct JsonDeviceStore {
    path: PathBuf,
    rows: Mutex<BTreeMap<u8, DeviceRecord>>,
}

impl JsonDeviceStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records: Vec<DeviceRecord> = read_json(&path).await?.unwrap_or_default();
        let rows = records
            .into_iter()
            .map(|record| (record.id.wire_id(), record))
            .collect();
        Ok(Self {
            path,
            rows: Mutex::new(rows),
        })
    }

    pub async fn get(&self, id: DeviceId) -> Option<DeviceRecord> {
        self.rows.lock().await.get(&id.wire_id()).cloned()
    }
}

#[async_trait]
impl DeviceStore for JsonDeviceStore {
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self.rows.lock().await.values().cloned().collect())
    }

    async fn save_device(&self, record: &DeviceRecord) -> Result<()> {
        let mut rows = self.rows.lock().await;
        rows.insert(record.id.wire_id(), record.clone());
        let records: Vec<&DeviceRecord> = rows.values().collect();
        write_json(&self.path, &records).await
    }
}
