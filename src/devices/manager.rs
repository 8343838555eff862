//! Device manager
//!
//! The only path through which a device's state changes. Holds the seven
//! device rows behind one lock, checks the interlocks before any output is
//! energized, drives the relay board, and persists each row after it
//! changes.

use crate::clock::Clock;
use crate::control::Season;
use crate::devices::{
    BackupSnapshot, CommandTag, DeviceId, DeviceRecord, DeviceSnapshot, FieldBusBoiler,
    ManualOverride, RelayBoard, SupportsBackup, ValveSeason,
};
use crate::error::{PlantError, Result};
use crate::services::DeviceStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Device rows indexed by wire number
#[derive(Debug, Clone)]
struct DeviceTable([DeviceRecord; 7]);

impl DeviceTable {
    fn new() -> Self {
        Self(DeviceId::ALL.map(DeviceRecord::new))
    }

    fn get(&self, id: DeviceId) -> &DeviceRecord {
        &self.0[id.wire_id() as usize]
    }

    fn get_mut(&mut self, id: DeviceId) -> &mut DeviceRecord {
        &mut self.0[id.wire_id() as usize]
    }

    fn is_on(&self, id: DeviceId) -> bool {
        self.get(id).on
    }

    fn any_chiller_on(&self) -> Option<DeviceId> {
        DeviceId::chillers().find(|id| self.is_on(*id))
    }
}

/// Why energizing `id` is not allowed right now, if it isn't
fn interlock_violation(table: &DeviceTable, id: DeviceId, season: Season) -> Option<String> {
    match id {
        DeviceId::Boiler => {
            if let Some(chiller) = table.any_chiller_on() {
                return Some(format!("boiler cannot start while {chiller} is on"));
            }
            if season.is_summer_like() {
                return Some(format!("boiler cannot start in {season}"));
            }
            if table.is_on(DeviceId::SUMMER_VALVE) {
                return Some("boiler cannot start while the summer valve is open".to_string());
            }
            None
        }
        DeviceId::Chiller(_) => {
            if table.is_on(DeviceId::Boiler) {
                return Some(format!("{id} cannot start while the boiler is on"));
            }
            if season.is_winter_like() {
                return Some(format!("{id} cannot start in {season}"));
            }
            if table.is_on(DeviceId::WINTER_VALVE) {
                return Some(format!("{id} cannot start while the winter valve is open"));
            }
            None
        }
        DeviceId::Valve(valve) => {
            let wrong_season = match valve {
                ValveSeason::Summer => season.is_winter_like(),
                ValveSeason::Winter => season.is_summer_like(),
            };
            if wrong_season {
                return Some(format!("{id} cannot open in {season}"));
            }
            let other = DeviceId::Valve(valve.other());
            if table.is_on(other) {
                return Some(format!("{id} cannot open while the {other} is open"));
            }
            None
        }
    }
}

/// Owner of every device row and the hardware behind them
pub struct DeviceManager {
    table: Mutex<DeviceTable>,
    relays: RelayBoard,
    fieldbus: Option<FieldBusBoiler>,
    store: Arc<dyn DeviceStore>,
    clock: Arc<dyn Clock>,
    read_only: bool,
}

impl DeviceManager {
    pub fn new(
        relays: RelayBoard,
        fieldbus: Option<FieldBusBoiler>,
        store: Arc<dyn DeviceStore>,
        clock: Arc<dyn Clock>,
        read_only: bool,
    ) -> Self {
        Self {
            table: Mutex::new(DeviceTable::new()),
            relays,
            fieldbus,
            store,
            clock,
            read_only,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Replace the in-memory rows with the stored ones
    pub async fn load(&self) -> Result<()> {
        let stored = self.store.load_devices().await?;
        let mut table = self.table.lock().await;
        *table = DeviceTable::new();
        for record in stored {
            let id = record.id;
            *table.get_mut(id) = record;
        }
        info!(rows = table.0.len(), "Device rows loaded");
        Ok(())
    }

    pub async fn record(&self, id: DeviceId) -> DeviceRecord {
        self.table.lock().await.get(id).clone()
    }

    pub async fn snapshot(&self, id: DeviceId) -> DeviceSnapshot {
        self.table.lock().await.get(id).snapshot()
    }

    /// Every row in wire order
    pub async fn records(&self) -> Vec<DeviceRecord> {
        self.table.lock().await.0.to_vec()
    }

    /// Switch a device; returns whether an output was actually driven
    pub async fn set_state(
        &self,
        id: DeviceId,
        on: bool,
        tag: CommandTag,
        season: Season,
    ) -> Result<bool> {
        let mut table = self.table.lock().await;
        self.set_state_locked(&mut table, id, on, tag, season).await
    }

    async fn set_state_locked(
        &self,
        table: &mut DeviceTable,
        id: DeviceId,
        on: bool,
        tag: CommandTag,
        season: Season,
    ) -> Result<bool> {
        if table.is_on(id) == on {
            debug!(device = %id, on = on, "Already in requested state");
            return Ok(false);
        }
        if self.read_only {
            return Err(PlantError::read_only(format!(
                "refusing to switch {id} {}",
                on_off(on)
            )));
        }
        if on && !tag.bypasses_interlocks() {
            if let Some(reason) = interlock_violation(table, id, season) {
                warn!(device = %id, tag = ?tag, reason = %reason, "Interlock refused command");
                return Err(PlantError::interlock(reason));
            }
        }

        self.relays.write_state(id, on, tag).await?;

        let record = table.get_mut(id);
        record.on = on;
        record.switched_at = Some(self.clock.now());
        self.store.save_device(record).await?;
        Ok(true)
    }

    /// Change a device's override and drive the output to a forced state
    ///
    /// A forced state that would break an interlock leaves the override
    /// unchanged.
    pub async fn set_manual_override(
        &self,
        id: DeviceId,
        mode: ManualOverride,
        season: Season,
    ) -> Result<()> {
        let mut table = self.table.lock().await;
        if let Some(forced) = mode.forced_state() {
            self.set_state_locked(&mut table, id, forced, CommandTag::Manual, season)
                .await?;
        }

        let record = table.get_mut(id);
        record.manual_override = mode;
        self.store.save_device(record).await?;
        info!(device = %id, mode = ?mode, "Manual override set");
        Ok(())
    }

    /// Store an override without driving the output
    pub async fn park_override(&self, id: DeviceId, mode: ManualOverride) -> Result<()> {
        let mut table = self.table.lock().await;
        let record = table.get_mut(id);
        if record.manual_override != mode {
            record.manual_override = mode;
            self.store.save_device(record).await?;
        }
        Ok(())
    }

    /// Drive a device to the state its override pins it to
    pub async fn apply_override_effect(
        &self,
        id: DeviceId,
        tag: CommandTag,
        season: Season,
    ) -> Result<bool> {
        let mut table = self.table.lock().await;
        match table.get(id).manual_override.forced_state() {
            Some(forced) => self.set_state_locked(&mut table, id, forced, tag, season).await,
            None => Ok(false),
        }
    }

    /// Save the device's state until its season returns
    ///
    /// An existing snapshot is kept, so an interrupted season switch can be
    /// retried without overwriting it with the parked state.
    pub async fn backup<D: SupportsBackup>(&self, device: &D) -> Result<()> {
        let id = device.id();
        let mut table = self.table.lock().await;
        let record = table.get_mut(id);
        if record.backup.is_some() {
            debug!(device = %id, "Backup already present");
            return Ok(());
        }
        record.backup = Some(BackupSnapshot {
            on: record.on,
            manual_override: record.manual_override,
            switched_at: record.switched_at,
        });
        self.store.save_device(record).await?;
        info!(device = %id, on = record.on, mode = ?record.manual_override, "State backed up");
        Ok(())
    }

    /// Drop a snapshot without restoring it
    pub async fn discard_backup(&self, id: DeviceId) -> Result<()> {
        let mut table = self.table.lock().await;
        let record = table.get_mut(id);
        if record.backup.take().is_some() {
            self.store.save_device(record).await?;
            debug!(device = %id, "Backup discarded");
        }
        Ok(())
    }

    /// Bring back the saved state and drop the snapshot; without a snapshot
    /// the device returns to AUTO and off
    pub async fn restore<D: SupportsBackup>(&self, device: &D, season: Season) -> Result<()> {
        let id = device.id();
        let mut table = self.table.lock().await;
        let snapshot = table.get(id).backup.unwrap_or(BackupSnapshot {
            on: false,
            manual_override: ManualOverride::Auto,
            switched_at: table.get(id).switched_at,
        });

        let drive = self
            .set_state_locked(&mut table, id, snapshot.on, CommandTag::SeasonSwitch, season)
            .await;

        let record = table.get_mut(id);
        record.manual_override = snapshot.manual_override;
        if drive.is_ok() {
            record.switched_at = snapshot.switched_at;
        }
        record.backup = None;
        self.store.save_device(record).await?;
        info!(device = %id, on = snapshot.on, mode = ?snapshot.manual_override, "State restored");
        drive.map(|_| ())
    }

    /// Read every relay back; unreadable relays keep their last known state
    pub async fn refresh_states(&self) -> Vec<(DeviceId, PlantError)> {
        let mut failures = Vec::new();
        let mut table = self.table.lock().await;
        for id in DeviceId::ALL {
            match self.relays.read_state(id).await {
                Ok(actual) if actual != table.is_on(id) => {
                    warn!(device = %id, recorded = table.is_on(id), actual = actual, "Relay state drifted");
                    let record = table.get_mut(id);
                    record.on = actual;
                    if let Err(e) = self.store.save_device(record).await {
                        failures.push((id, e));
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(device = %id, error = %e, "Relay read-back failed");
                    failures.push((id, e));
                }
            }
        }
        failures
    }

    /// Drive every output off, regardless of the recorded state
    pub async fn all_off(&self) -> Vec<(DeviceId, PlantError)> {
        let mut failures = Vec::new();
        let mut table = self.table.lock().await;
        for id in DeviceId::ALL {
            if self.read_only {
                failures.push((id, PlantError::read_only(format!("cannot force {id} off"))));
                continue;
            }
            if let Err(e) = self.relays.write_state(id, false, CommandTag::Safety).await {
                warn!(device = %id, error = %e, "Emergency off failed");
                failures.push((id, e));
                continue;
            }
            let record = table.get_mut(id);
            if record.on {
                record.on = false;
                record.switched_at = Some(self.clock.now());
            }
            if let Err(e) = self.store.save_device(record).await {
                failures.push((id, e));
            }
        }
        failures
    }

    /// Field-bus boiler, when one is configured
    pub fn fieldbus(&self) -> Result<&FieldBusBoiler> {
        self.fieldbus
            .as_ref()
            .ok_or_else(|| PlantError::not_connected("field bus is disabled"))
    }

    pub fn has_fieldbus(&self) -> bool {
        self.fieldbus.is_some()
    }

    pub async fn set_boiler_setpoint(&self, fahrenheit: f64) -> Result<()> {
        if self.read_only {
            return Err(PlantError::read_only("refusing to write the boiler setpoint"));
        }
        self.fieldbus()?.set_boiler_setpoint(fahrenheit).await
    }

    pub async fn set_temperature_limits(&self, min: f64, max: f64) -> Result<()> {
        if self.read_only {
            return Err(PlantError::read_only("refusing to write boiler limits"));
        }
        self.fieldbus()?.set_temperature_limits(min, max).await
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
