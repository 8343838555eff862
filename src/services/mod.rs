//! Collaborator contracts of the control core
//!
//! Settings, device rows, history samples and the weather feed are reached
//! through the traits in this module; `crate::storage` and
//! `crate::weather` provide the stock implementations.

use crate::control::Season;
use crate::devices::DeviceRecord;
use crate::error::{PlantError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Operator-tunable control parameters and season bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub setpoint_min: f64,
    pub setpoint_max: f64,
    pub setpoint_offset_summer: f64,
    pub setpoint_offset_winter: f64,
    /// Hysteresis half-band (°F)
    pub tolerance: f64,
    /// Distance past the other season's setpoint that justifies a switch
    pub mode_change_delta_temp: f64,
    /// Minimum time between chiller switches
    #[serde(with = "humantime_serde")]
    pub cascade_dwell_time: Duration,
    /// Minimum time between season switches
    #[serde(with = "humantime_serde")]
    pub mode_switch_lockout_time: Duration,
    pub season: Season,
    pub mode_switch_timestamp: Option<DateTime<Utc>>,
    /// Completion time of an in-flight season transition
    pub pending_transition_at: Option<DateTime<Utc>>,
    /// Let the control cycle start season switches on its own
    pub auto_switch_season: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            setpoint_min: 70.0,
            setpoint_max: 110.0,
            setpoint_offset_summer: 0.0,
            setpoint_offset_winter: 0.0,
            tolerance: 2.0,
            mode_change_delta_temp: 5.0,
            cascade_dwell_time: Duration::from_secs(15 * 60),
            mode_switch_lockout_time: Duration::from_secs(60 * 60),
            season: Season::Winter,
            mode_switch_timestamp: None,
            pending_transition_at: None,
            auto_switch_season: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.setpoint_max < self.setpoint_min {
            return Err(PlantError::invalid_input(format!(
                "setpoint_max {} is below setpoint_min {}",
                self.setpoint_max, self.setpoint_min
            )));
        }
        if self.tolerance < 0.0 {
            return Err(PlantError::invalid_input("tolerance must not be negative"));
        }
        Ok(())
    }

    /// Merge the non-empty fields of `patch` into a copy of these settings
    pub fn merged(&self, patch: &SettingsPatch) -> Result<Settings> {
        let mut next = self.clone();
        if let Some(value) = patch.setpoint_min {
            next.setpoint_min = value;
        }
        if let Some(value) = patch.setpoint_max {
            next.setpoint_max = value;
        }
        if let Some(value) = patch.setpoint_offset_summer {
            next.setpoint_offset_summer = value;
        }
        if let Some(value) = patch.setpoint_offset_winter {
            next.setpoint_offset_winter = value;
        }
        if let Some(value) = patch.tolerance {
            next.tolerance = value;
        }
        if let Some(value) = patch.mode_change_delta_temp {
            next.mode_change_delta_temp = value;
        }
        if let Some(value) = patch.cascade_dwell_time {
            next.cascade_dwell_time = value;
        }
        if let Some(value) = patch.mode_switch_lockout_time {
            next.mode_switch_lockout_time = value;
        }
        if let Some(value) = patch.auto_switch_season {
            next.auto_switch_season = value;
        }
        next.validate()?;
        Ok(next)
    }

    /// Seasonal offset for the given season
    pub fn offset_for(&self, season: Season) -> f64 {
        if season.is_winter_like() {
            self.setpoint_offset_winter
        } else {
            self.setpoint_offset_summer
        }
    }
}

/// Partial settings update; the season is changed only by season switches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub setpoint_min: Option<f64>,
    pub setpoint_max: Option<f64>,
    pub setpoint_offset_summer: Option<f64>,
    pub setpoint_offset_winter: Option<f64>,
    pub tolerance: Option<f64>,
    pub mode_change_delta_temp: Option<f64>,
    #[serde(with = "humantime_serde")]
    pub cascade_dwell_time: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub mode_switch_lockout_time: Option<Duration>,
    pub auto_switch_season: Option<bool>,
}

/// One control cycle's record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetpointSample {
    pub timestamp: DateTime<Utc>,
    pub outdoor_temp: f64,
    pub wind_speed: f64,
    pub effective_setpoint: f64,
    pub boiler_on: bool,
    pub chillers_on: [bool; 4],
    pub return_temp: f64,
    pub supply_temp: Option<f64>,
    /// Quantized return-temperature direction (-1, 0, +1)
    pub trend: i8,
    pub cascade_power: Option<f64>,
}

/// Numeric sample column usable in averages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleField {
    OutdoorTemp,
    WindSpeed,
    EffectiveSetpoint,
    ReturnTemp,
    /// Boiler cascade firing rate (%); absent without field-bus telemetry
    CascadePower,
    /// Number of chillers running (0-4)
    ChillersRunning,
}

impl SampleField {
    /// Column value; `None` when the sample did not record it
    pub fn value(self, sample: &SetpointSample) -> Option<f64> {
        match self {
            SampleField::OutdoorTemp => Some(sample.outdoor_temp),
            SampleField::WindSpeed => Some(sample.wind_speed),
            SampleField::EffectiveSetpoint => Some(sample.effective_setpoint),
            SampleField::ReturnTemp => Some(sample.return_temp),
            SampleField::CascadePower => sample.cascade_power,
            SampleField::ChillersRunning => {
                Some(sample.chillers_on.iter().filter(|on| **on).count() as f64)
            }
        }
    }
}

/// Current outdoor conditions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    /// °F
    pub outdoor_temp: f64,
    pub wind_speed: f64,
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_settings(&self) -> Result<Settings>;

    /// Merge a patch; rejects `setpoint_max < setpoint_min`
    async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings>;

    /// Replace the stored settings, used for season bookkeeping
    async fn save_settings(&self, settings: &Settings) -> Result<()>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Stored rows; devices without a row start off and in AUTO
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>>;
    async fn save_device(&self, record: &DeviceRecord) -> Result<()>;
}

#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn append(&self, sample: SetpointSample) -> Result<()>;

    /// Up to `n` samples, newest first
    async fn recent(&self, n: usize) -> Result<Vec<SetpointSample>>;

    /// Mean of `field` over samples newer than `now - window` that
    /// recorded it
    async fn trailing_average(
        &self,
        field: SampleField,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<f64>>;
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self) -> Result<WeatherReading>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_merges_only_given_fields() {
        let settings = Settings::default();
        let patch = SettingsPatch {
            tolerance: Some(3.5),
            cascade_dwell_time: Some(Duration::from_secs(600)),
            ..SettingsPatch::default()
        };
        let merged = settings.merged(&patch).unwrap();
        assert_eq!(merged.tolerance, 3.5);
        assert_eq!(merged.cascade_dwell_time, Duration::from_secs(600));
        assert_eq!(merged.setpoint_min, settings.setpoint_min);
        assert_eq!(merged.season, settings.season);
    }

    #[test]
    fn test_patch_rejects_inverted_bounds() {
        let patch = SettingsPatch {
            setpoint_min: Some(120.0),
            setpoint_max: Some(100.0),
            ..SettingsPatch::default()
        };
        assert!(matches!(
            Settings::default().merged(&patch),
            Err(PlantError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_settings_json_uses_human_durations() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["cascade_dwell_time"], "15m");
        assert_eq!(json["season"], "WINTER");
    }
}
