//! Season changeover
//!
//! A switch first parks the departing season's devices: they are backed up,
//! forced off, and their override set to FORCE_OFF. Then the departing valve
//! closes and the destination valve opens, and the transitional season is
//! persisted together with its completion time. Completion restores the
//! arriving devices, re-applies every override, and records the switch time.
//! Both steps are persisted, so a restart picks up where the process stopped.

use crate::control::setpoint::effective_for;
use crate::control::Season;
use crate::devices::{
    Boiler, Chiller, ChillerSlot, CommandTag, DeviceId, DeviceManager, DeviceRecord,
    ManualOverride, ValveSeason,
};
use crate::error::{PlantError, Result};
use crate::services::{Settings, SettingsStore};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};

fn elapsed_since(settings: &Settings, now: DateTime<Utc>) -> Option<Duration> {
    settings
        .mode_switch_timestamp
        .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
}

/// Remaining lockout, or `None` when a switch is allowed by time
///
/// A zero lockout never unlocks; the remaining time is reported as zero.
pub fn remaining_lockout(
    settings: &Settings,
    valve_delay: Duration,
    now: DateTime<Utc>,
) -> Option<Duration> {
    let window = settings.mode_switch_lockout_time + valve_delay;
    if window <= valve_delay {
        warn!("Season switch lockout is zero; switching stays locked");
        return Some(Duration::ZERO);
    }
    match elapsed_since(settings, now) {
        Some(elapsed) if elapsed <= window => Some(window - elapsed),
        _ => None,
    }
}

/// Winter to summer: return water above the winter setpoint by more than
/// the change delta, and the lockout has passed
pub fn is_time_to_switch_to_summer(
    return_temp: f64,
    tha_setpoint: f64,
    settings: &Settings,
    valve_delay: Duration,
    now: DateTime<Utc>,
) -> bool {
    let winter_setpoint = effective_for(tha_setpoint, Season::Winter, settings);
    return_temp > winter_setpoint + settings.mode_change_delta_temp
        && remaining_lockout(settings, valve_delay, now).is_none()
}

/// Summer to winter: return water below the summer setpoint by more than
/// the change delta, and the lockout has passed
pub fn is_time_to_switch_to_winter(
    return_temp: f64,
    tha_setpoint: f64,
    settings: &Settings,
    valve_delay: Duration,
    now: DateTime<Utc>,
) -> bool {
    let summer_setpoint = effective_for(tha_setpoint, Season::Summer, settings);
    return_temp < summer_setpoint - settings.mode_change_delta_temp
        && remaining_lockout(settings, valve_delay, now).is_none()
}

fn valve_for(season: Season) -> ValveSeason {
    match season.destination() {
        Season::Winter => ValveSeason::Winter,
        _ => ValveSeason::Summer,
    }
}

fn heat_and_cool() -> impl Iterator<Item = DeviceId> {
    std::iter::once(DeviceId::Boiler).chain(DeviceId::chillers())
}

/// Park the plant and swing the valves towards `target`
///
/// Returns the time the transition is due to complete. When a step fails
/// before the transitional season is stored, the parked overrides, the
/// snapshots taken here and the valves are put back for the current season.
pub async fn begin(
    devices: &DeviceManager,
    store: &dyn SettingsStore,
    settings: &mut Settings,
    target: Season,
    now: DateTime<Utc>,
    valve_delay: Duration,
) -> Result<DateTime<Utc>> {
    if settings.season.is_transitioning() {
        return Err(PlantError::invalid_input(format!(
            "season change already in progress ({})",
            settings.season
        )));
    }
    let departing = settings.season;
    let target = target.destination();
    let transitional = Season::transitioning_to(target);
    let due = now
        + chrono::Duration::from_std(valve_delay)
            .map_err(|e| PlantError::config(format!("valve delay out of range: {e}")))?;
    info!(from = %departing, to = %target, "Season switch started");

    let mut before = Vec::new();
    for id in heat_and_cool() {
        before.push(devices.record(id).await);
    }

    let result = match park_and_swing(devices, target, transitional).await {
        Ok(()) => {
            settings.season = transitional;
            settings.pending_transition_at = Some(due);
            let saved = store.save_settings(settings).await;
            if saved.is_err() {
                settings.season = departing;
                settings.pending_transition_at = None;
            }
            saved
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        warn!(from = %departing, to = %target, error = %e, "Season switch aborted, rolling back");
        roll_back(devices, departing, &before).await;
        return Err(e);
    }
    info!(season = %transitional, due = %due, "Valves switching");
    Ok(due)
}

async fn park_and_swing(devices: &DeviceManager, target: Season, transitional: Season) -> Result<()> {
    match target {
        Season::Summer => devices.backup(&Boiler).await?,
        _ => {
            for slot in ChillerSlot::ALL {
                devices.backup(&Chiller(slot)).await?;
            }
        }
    }

    for id in heat_and_cool() {
        devices.park_override(id, ManualOverride::ForceOff).await?;
        devices
            .set_state(id, false, CommandTag::SeasonSwitch, transitional)
            .await?;
    }

    let arriving = valve_for(target);
    devices
        .set_state(
            DeviceId::Valve(arriving.other()),
            false,
            CommandTag::SeasonSwitch,
            transitional,
        )
        .await?;
    devices
        .set_state(
            DeviceId::Valve(arriving),
            true,
            CommandTag::SeasonSwitch,
            transitional,
        )
        .await?;
    Ok(())
}

/// Undo a partial switch; failures are logged, the season stays `season`
async fn roll_back(devices: &DeviceManager, season: Season, before: &[DeviceRecord]) {
    for record in before {
        let id = record.id;
        if record.backup.is_none() {
            if let Err(e) = devices.discard_backup(id).await {
                warn!(device = %id, error = %e, "Snapshot not discarded");
            }
        }
        if let Err(e) = devices.park_override(id, record.manual_override).await {
            warn!(device = %id, error = %e, "Override not rolled back");
        }
    }
    if let Err(e) = align_valves(devices, season).await {
        warn!(season = %season, error = %e, "Valves not realigned");
    }
    for record in before {
        if let Err(e) = devices
            .apply_override_effect(record.id, CommandTag::Manual, season)
            .await
        {
            warn!(device = %record.id, error = %e, "Override not re-applied");
        }
    }
}

/// Finish an in-flight transition; a terminal season is left untouched
///
/// Device failures do not stop the completion; they are returned so the
/// caller can report them.
pub async fn complete(
    devices: &DeviceManager,
    store: &dyn SettingsStore,
    settings: &mut Settings,
    now: DateTime<Utc>,
) -> Result<Vec<PlantError>> {
    if !settings.season.is_transitioning() {
        return Ok(Vec::new());
    }
    let target = settings.season.destination();
    let mut errors = Vec::new();

    match target {
        Season::Winter => {
            if let Err(e) = devices.restore(&Boiler, target).await {
                errors.push(e);
            }
        }
        _ => {
            for slot in ChillerSlot::ALL {
                if let Err(e) = devices.restore(&Chiller(slot), target).await {
                    errors.push(e);
                }
            }
        }
    }

    for id in DeviceId::ALL {
        if let Err(e) = devices
            .apply_override_effect(id, CommandTag::SeasonSwitch, target)
            .await
        {
            warn!(device = %id, error = %e, "Override not re-applied");
            errors.push(e);
        }
    }

    settings.season = target;
    settings.mode_switch_timestamp = Some(now);
    settings.pending_transition_at = None;
    store.save_settings(settings).await?;
    info!(season = %target, failures = errors.len(), "Season switch completed");
    Ok(errors)
}

/// Put the valves in the position the season calls for
pub async fn align_valves(devices: &DeviceManager, season: Season) -> Result<()> {
    let open = valve_for(season);
    devices
        .set_state(DeviceId::Valve(open.other()), false, CommandTag::SeasonSwitch, season)
        .await?;
    devices
        .set_state(DeviceId::Valve(open), true, CommandTag::SeasonSwitch, season)
        .await?;
    Ok(())
}
