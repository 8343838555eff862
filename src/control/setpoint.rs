//! Effective setpoint from outdoor temperature and its trailing average
//!
//! ```text
//! baseline   = 100                     if round(outdoor) < 11
//!            = table.baseline[round(outdoor)]
//! adjustment = 0                       if round(average) < 71
//!            = table.adjustment[round(average)]
//! tha        = baseline - adjustment
//! effective  = clamp(tha + seasonal offset, setpoint_min, setpoint_max)
//! ```

use crate::control::Season;
use crate::error::{PlantError, Result};
use crate::services::Settings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

const BASELINE_FLOOR: i64 = 11;
const BASELINE_BELOW_FLOOR: f64 = 100.0;
const ADJUSTMENT_FLOOR: i64 = 71;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BaselineRow {
    wind_chill: i64,
    setpoint: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct AdjustmentRow {
    average: i64,
    offset: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TableFile {
    #[serde(default)]
    baseline: Vec<BaselineRow>,
    #[serde(default)]
    adjustment: Vec<AdjustmentRow>,
}

/// Wind-chill lookup table
///
/// Stored as TOML:
///
/// ```toml
/// [[baseline]]
/// wind_chill = 20
/// setpoint = 96.0
///
/// [[adjustment]]
/// average = 75
/// offset = 1.25
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SetpointTable {
    baseline: BTreeMap<i64, f64>,
    adjustment: BTreeMap<i64, f64>,
}

impl SetpointTable {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: TableFile = toml::from_str(raw)?;
        Ok(Self {
            baseline: file
                .baseline
                .into_iter()
                .map(|row| (row.wind_chill, row.setpoint))
                .collect(),
            adjustment: file
                .adjustment
                .into_iter()
                .map(|row| (row.average, row.offset))
                .collect(),
        })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            PlantError::config(format!("cannot read setpoint table {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let file = TableFile {
            baseline: self
                .baseline
                .iter()
                .map(|(&wind_chill, &setpoint)| BaselineRow { wind_chill, setpoint })
                .collect(),
            adjustment: self
                .adjustment
                .iter()
                .map(|(&average, &offset)| AdjustmentRow { average, offset })
                .collect(),
        };
        toml::to_string(&file).map_err(|e| PlantError::internal(e.to_string()))
    }

    pub fn baseline(&self, wind_chill: i64) -> Option<f64> {
        self.baseline.get(&wind_chill).copied()
    }

    pub fn adjustment(&self, average: i64) -> Option<f64> {
        self.adjustment.get(&average).copied()
    }
}

impl Default for SetpointTable {
    /// Baseline falls 0.4 °F per degree of wind chill above 10, the
    /// adjustment grows 0.25 °F per degree of average above 70.
    fn default() -> Self {
        let baseline = (BASELINE_FLOOR..=110)
            .map(|wc| (wc, BASELINE_BELOW_FLOOR - (wc - 10) as f64 * 0.4))
            .collect();
        let adjustment = (ADJUSTMENT_FLOOR..=110)
            .map(|avg| (avg, (avg - 70) as f64 * 0.25))
            .collect();
        Self {
            baseline,
            adjustment,
        }
    }
}

/// Result of one setpoint computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SetpointResult {
    pub tha_setpoint: f64,
    pub effective_setpoint: f64,
}

/// Setpoint calculator over a lookup table
#[derive(Debug, Clone, Default)]
pub struct SetpointCalculator {
    table: SetpointTable,
}

impl SetpointCalculator {
    pub fn new(table: SetpointTable) -> Self {
        Self { table }
    }

    pub fn baseline(&self, outdoor_temp: f64) -> Result<f64> {
        let wind_chill = outdoor_temp.round() as i64;
        if wind_chill < BASELINE_FLOOR {
            return Ok(BASELINE_BELOW_FLOOR);
        }
        self.table
            .baseline(wind_chill)
            .ok_or(PlantError::LookupMiss {
                table: "baseline",
                key: wind_chill,
            })
    }

    pub fn adjustment(&self, wind_chill_average: f64) -> Result<f64> {
        let average = wind_chill_average.round() as i64;
        if average < ADJUSTMENT_FLOOR {
            return Ok(0.0);
        }
        self.table
            .adjustment(average)
            .ok_or(PlantError::LookupMiss {
                table: "adjustment",
                key: average,
            })
    }

    /// Setpoint before seasonal offset and clamping
    pub fn tha_setpoint(&self, outdoor_temp: f64, wind_chill_average: f64) -> Result<f64> {
        Ok(self.baseline(outdoor_temp)? - self.adjustment(wind_chill_average)?)
    }

    pub fn compute(
        &self,
        outdoor_temp: f64,
        wind_chill_average: f64,
        season: Season,
        settings: &Settings,
    ) -> Result<SetpointResult> {
        let tha_setpoint = self.tha_setpoint(outdoor_temp, wind_chill_average)?;
        let effective_setpoint = effective_for(tha_setpoint, season, settings);
        debug!(
            outdoor = outdoor_temp,
            average = wind_chill_average,
            tha = tha_setpoint,
            effective = effective_setpoint,
            "Setpoint computed"
        );
        Ok(SetpointResult {
            tha_setpoint,
            effective_setpoint,
        })
    }
}

/// Apply the season's offset and clamp to the configured bounds
pub fn effective_for(tha_setpoint: f64, season: Season, settings: &Settings) -> f64 {
    clamp(
        tha_setpoint + settings.offset_for(season),
        settings.setpoint_min,
        settings.setpoint_max,
    )
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn settings(min: f64, max: f64) -> Settings {
        Settings {
            setpoint_min: min,
            setpoint_max: max,
            setpoint_offset_winter: 10.0,
            setpoint_offset_summer: -5.0,
            ..Settings::default()
        }
    }

    #[rstest]
    #[case(-40.0)]
    #[case(5.0)]
    #[case(10.49)]
    fn test_cold_baseline_ignores_table(#[case] outdoor: f64) {
        let empty = SetpointCalculator::new(SetpointTable::from_toml_str("").unwrap());
        assert_eq!(empty.baseline(outdoor).unwrap(), 100.0);
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        let calc = SetpointCalculator::default();
        // 10.5 rounds to 11, which is a table row
        assert!((calc.baseline(10.5).unwrap() - 99.6).abs() < 1e-9);
        assert_eq!(calc.adjustment(70.5).unwrap(), 0.25);
        assert_eq!(calc.adjustment(70.49).unwrap(), 0.0);
    }

    #[test]
    fn test_lookup_miss() {
        let calc = SetpointCalculator::default();
        assert!(matches!(
            calc.baseline(140.0),
            Err(PlantError::LookupMiss { table: "baseline", key: 140 })
        ));
        assert!(matches!(
            calc.adjustment(111.0),
            Err(PlantError::LookupMiss { table: "adjustment", key: 111 })
        ));
    }

    #[test]
    fn test_winter_scenario() {
        let calc = SetpointCalculator::default();
        let result = calc
            .compute(5.0, 5.0, Season::Winter, &settings(90.0, 140.0))
            .unwrap();
        assert_eq!(result.tha_setpoint, 100.0);
        assert_eq!(result.effective_setpoint, 110.0);
    }

    #[rstest]
    #[case(Season::Winter, 85.0, 95.0)]
    #[case(Season::Summer, 85.0, 92.0)]
    #[case(Season::TransitioningToWinter, 83.0, 93.0)]
    #[case(Season::Summer, 40.0, 92.0)]
    fn test_effective_is_clamped(#[case] season: Season, #[case] tha: f64, #[case] expected: f64) {
        let settings = settings(92.0, 95.0);
        assert_eq!(effective_for(tha, season, &settings), expected);
    }

    #[test]
    fn test_table_toml_round_trip() {
        let raw = r#"
            [[baseline]]
            wind_chill = 20
            setpoint = 96.0

            [[adjustment]]
            average = 75
            offset = 1.25
        "#;
        let table = SetpointTable::from_toml_str(raw).unwrap();
        assert_eq!(table.baseline(20), Some(96.0));
        assert_eq!(table.adjustment(75), Some(1.25));
        assert_eq!(table.baseline(21), None);

        let reparsed = SetpointTable::from_toml_str(&table.to_toml_string().unwrap()).unwrap();
        assert_eq!(reparsed, table);
    }
}
