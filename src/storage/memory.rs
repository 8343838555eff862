//! In-memory stores
//!
//! Used by the `simulate` command, by tests, and for the sample history in
//! production (the history only feeds trailing averages).

use crate::devices::{DeviceId, DeviceRecord};
use crate::error::Result;
use crate::services::{
    DeviceStore, SampleField, SampleStore, SetpointSample, Settings, SettingsPatch, SettingsStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Settings held in memory
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: Arc<RwLock<Settings>>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(RwLock::new(settings)),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get_settings(&self) -> Result<Settings> {
        Ok(self.settings.read().await.clone())
    }

    async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let mut settings = self.settings.write().await;
        let merged = settings.merged(&patch)?;
        *settings = merged.clone();
        Ok(merged)
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        *self.settings.write().await = settings.clone();
        Ok(())
    }
}

/// Device rows held in memory
#[derive(Default)]
pub struct MemoryDeviceStore {
    rows: Arc<RwLock<HashMap<DeviceId, DeviceRecord>>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed rows, e.g. to simulate a restart
    pub fn with_records(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        Self {
            rows: Arc::new(RwLock::new(
                records.into_iter().map(|record| (record.id, record)).collect(),
            )),
        }
    }

    pub async fn get(&self, id: DeviceId) -> Option<DeviceRecord> {
        self.rows.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn save_device(&self, record: &DeviceRecord) -> Result<()> {
        self.rows.write().await.insert(record.id, record.clone());
        Ok(())
    }
}

/// Bounded sample history, oldest evicted first
pub struct MemorySampleStore {
    samples: Arc<RwLock<VecDeque<SetpointSample>>>,
    max_samples: usize,
}

impl MemorySampleStore {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Arc::new(RwLock::new(VecDeque::new())),
            max_samples: max_samples.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }
}

impl Default for MemorySampleStore {
    fn default() -> Self {
        Self::new(10_080)
    }
}

#[async_trait]
impl SampleStore for MemorySampleStore {
    async fn append(&self, sample: SetpointSample) -> Result<()> {
        let mut samples = self.samples.write().await;
        samples.push_back(sample);
        while samples.len() > self.max_samples {
            samples.pop_front();
        }
        Ok(())
    }

    async fn recent(&self, n: usize) -> Result<Vec<SetpointSample>> {
        Ok(self.samples.read().await.iter().rev().take(n).cloned().collect())
    }

    async fn trailing_average(
        &self,
        field: SampleField,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let window =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let since = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let samples = self.samples.read().await;
        let (sum, count) = samples
            .iter()
            .filter(|sample| sample.timestamp > since)
            .filter_map(|sample| field.value(sample))
            .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));

        debug!(field = ?field, count = count, "Trailing average");
        Ok((count > 0).then(|| sum / count as f64))
    }
}
