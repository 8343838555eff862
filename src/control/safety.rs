//! Emergency check run at the top of every control cycle

use crate::control::Season;
use crate::devices::{DeviceId, DeviceRecord};
use serde::Serialize;

/// Safe return-water band (°F)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SafeBand {
    pub min_return: f64,
    pub max_return: f64,
}

impl Default for SafeBand {
    fn default() -> Self {
        Self {
            min_return: 36.0,
            max_return: 110.0,
        }
    }
}

/// Reason to shut the plant down, if any
pub fn emergency_reason(
    records: &[DeviceRecord],
    season: Season,
    return_temp: Option<f64>,
    band: SafeBand,
) -> Option<String> {
    let is_on = |id: DeviceId| records.iter().any(|r| r.id == id && r.on);

    if is_on(DeviceId::WINTER_VALVE) && is_on(DeviceId::SUMMER_VALVE) {
        return Some("both seasonal valves are open".to_string());
    }
    if season == Season::Summer && is_on(DeviceId::Boiler) {
        return Some("boiler is running in SUMMER".to_string());
    }
    if season == Season::Winter {
        if let Some(chiller) = DeviceId::chillers().find(|id| is_on(*id)) {
            return Some(format!("{chiller} is running in WINTER"));
        }
    }
    if let Some(temp) = return_temp {
        if temp < band.min_return || temp > band.max_return {
            return Some(format!(
                "return water at {temp:.1}°F is outside {:.0}-{:.0}°F",
                band.min_return, band.max_return
            ));
        }
    }
    None
}
