//! Control logic: setpoint, boiler hysteresis, chiller cascade, season
//! changeover and the emergency check, composed by [`ControlCore`].

pub mod boiler;
pub mod cascade;
pub mod controller;
pub mod safety;
pub mod season;
pub mod setpoint;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use controller::{
    ControlCore, CoreOptions, CoreParts, CycleAction, CycleReport, Efficiency, EmergencyAlarm,
    SwitchOutcome,
};
pub use setpoint::{SetpointCalculator, SetpointTable};

/// Plant operating season
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Season {
    Winter,
    Summer,
    TransitioningToWinter,
    TransitioningToSummer,
}

impl Season {
    pub fn is_winter_like(self) -> bool {
        matches!(self, Season::Winter | Season::TransitioningToWinter)
    }

    pub fn is_summer_like(self) -> bool {
        matches!(self, Season::Summer | Season::TransitioningToSummer)
    }

    pub fn is_transitioning(self) -> bool {
        matches!(
            self,
            Season::TransitioningToWinter | Season::TransitioningToSummer
        )
    }

    /// Terminal season this one is or is heading to
    pub fn destination(self) -> Season {
        match self {
            Season::Winter | Season::TransitioningToWinter => Season::Winter,
            Season::Summer | Season::TransitioningToSummer => Season::Summer,
        }
    }

    /// Transitional state on the way to a terminal season
    pub fn transitioning_to(target: Season) -> Season {
        match target.destination() {
            Season::Winter => Season::TransitioningToWinter,
            _ => Season::TransitioningToSummer,
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Season::Winter => "WINTER",
            Season::Summer => "SUMMER",
            Season::TransitioningToWinter => "TRANSITIONING_TO_WINTER",
            Season::TransitioningToSummer => "TRANSITIONING_TO_SUMMER",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Season {
    type Err = crate::error::PlantError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "winter" => Ok(Season::Winter),
            "summer" => Ok(Season::Summer),
            other => Err(crate::error::PlantError::invalid_input(format!(
                "season must be winter or summer, got {other}"
            ))),
        }
    }
}

/// Quantize a return-temperature delta to -1, 0 or +1
pub fn quantize_trend(delta: f64) -> i8 {
    if delta > 0.2 {
        1
    } else if delta < -0.2 {
        -1
    } else {
        0
    }
}
