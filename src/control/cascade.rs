//! Chiller cascade
//!
//! Rotates chiller duty so that run time spreads across the four units. At
//! most one chiller changes per cycle, and never before the dwell time since
//! the most recent chiller switch has passed.

use crate::devices::{DeviceId, DeviceRecord, ManualOverride};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Turn-off waits this fraction of the dwell time
const TURN_OFF_DWELL_DIVISOR: f64 = 1.5;

/// Trend average above which another chiller is started
const RISING_TREND: f64 = 0.1;

/// Everything one cascade decision looks at
#[derive(Debug, Clone, Copy)]
pub struct CascadeInputs {
    pub return_temp: f64,
    /// Return temperature of the previous cycle
    pub previous_return: Option<f64>,
    pub effective_setpoint: f64,
    pub tolerance: f64,
    /// Quantized current-minus-previous return delta
    pub trend: i8,
    /// Mean of the last three quantized trends, this cycle included
    pub trend_average: f64,
    pub dwell: Duration,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CascadeAction {
    TurnOn(DeviceId),
    TurnOff(DeviceId),
}

/// Time since the newest chiller switch; `None` when no chiller ever switched
fn since_last_switch(chillers: &[DeviceRecord], now: DateTime<Utc>) -> Option<Duration> {
    chillers
        .iter()
        .filter_map(|c| c.switched_at)
        .max()
        .map(|newest| (now - newest).to_std().unwrap_or(Duration::ZERO))
}

fn gap_at_least(gap: Option<Duration>, needed: Duration) -> bool {
    gap.map_or(true, |gap| gap >= needed)
}

/// Oldest switched chiller in AUTO with the given state. Never-switched
/// chillers sort first; ties keep wire order.
fn oldest(chillers: &[DeviceRecord], on: bool) -> Option<DeviceId> {
    chillers
        .iter()
        .filter(|c| c.on == on && c.manual_override == ManualOverride::Auto)
        .min_by_key(|c| c.switched_at)
        .map(|c| c.id)
}

/// Pick this cycle's cascade step, if any
pub fn decide(chillers: &[DeviceRecord], inputs: &CascadeInputs) -> Option<CascadeAction> {
    let gap = since_last_switch(chillers, inputs.now);

    let too_warm = inputs.return_temp >= inputs.effective_setpoint + inputs.tolerance;
    if too_warm && inputs.trend_average > RISING_TREND && gap_at_least(gap, inputs.dwell) {
        let pick = oldest(chillers, false);
        debug!(candidate = ?pick, "Cascade turn-on conditions met");
        return pick.map(CascadeAction::TurnOn);
    }

    let was_cold = inputs
        .previous_return
        .is_some_and(|previous| previous < inputs.effective_setpoint - inputs.tolerance);
    let off_dwell = inputs.dwell.div_f64(TURN_OFF_DWELL_DIVISOR);
    if was_cold && inputs.trend < 0 && gap_at_least(gap, off_dwell) {
        let pick = oldest(chillers, true);
        debug!(candidate = ?pick, "Cascade turn-off conditions met");
        return pick.map(CascadeAction::TurnOff);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::ChillerSlot;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 14, 0, 0).unwrap()
    }

    fn chiller(n: u8, on: bool, minutes_ago: Option<i64>) -> DeviceRecord {
        DeviceRecord {
            on,
            switched_at: minutes_ago.map(|m| now() - chrono::Duration::minutes(m)),
            ..DeviceRecord::new(DeviceId::Chiller(ChillerSlot::new(n).unwrap()))
        }
    }

    fn id(n: u8) -> DeviceId {
        DeviceId::Chiller(ChillerSlot::new(n).unwrap())
    }

    fn warm() -> CascadeInputs {
        CascadeInputs {
            return_temp: 60.0,
            previous_return: Some(59.0),
            effective_setpoint: 55.0,
            tolerance: 2.0,
            trend: 1,
            trend_average: 1.0,
            dwell: Duration::from_secs(15 * 60),
            now: now(),
        }
    }

    fn cooling() -> CascadeInputs {
        CascadeInputs {
            return_temp: 51.0,
            previous_return: Some(52.0),
            trend: -1,
            trend_average: -0.33,
            ..warm()
        }
    }

    #[test]
    fn test_turn_on_picks_oldest_auto_chiller() {
        let mut chillers = vec![
            chiller(1, false, Some(30)),
            chiller(2, false, Some(90)),
            chiller(3, false, Some(120)),
            chiller(4, true, Some(20)),
        ];
        chillers[2].manual_override = ManualOverride::ForceOff;

        assert_eq!(decide(&chillers, &warm()), Some(CascadeAction::TurnOn(id(2))));
    }

    #[test]
    fn test_never_switched_counts_as_oldest() {
        let chillers = vec![
            chiller(1, false, Some(600)),
            chiller(2, false, None),
            chiller(3, false, None),
            chiller(4, false, Some(20)),
        ];
        assert_eq!(decide(&chillers, &warm()), Some(CascadeAction::TurnOn(id(2))));
    }

    #[test]
    fn test_turn_on_respects_dwell_and_trend() {
        let chillers = vec![chiller(1, false, Some(60)), chiller(2, true, Some(10))];
        assert_eq!(decide(&chillers, &warm()), None);

        let chillers = vec![chiller(1, false, Some(60)), chiller(2, true, Some(16))];
        let flat = CascadeInputs {
            trend_average: 0.1,
            ..warm()
        };
        assert_eq!(decide(&chillers, &flat), None);
        assert_eq!(decide(&chillers, &warm()), Some(CascadeAction::TurnOn(id(1))));
    }

    #[test]
    fn test_turn_off_uses_shorter_dwell() {
        // 10 minutes is exactly dwell / 1.5
        let chillers = vec![
            chiller(1, true, Some(40)),
            chiller(2, true, Some(10)),
            chiller(3, false, Some(5 * 60)),
        ];
        assert_eq!(decide(&chillers, &cooling()), Some(CascadeAction::TurnOff(id(1))));

        let chillers = vec![chiller(1, true, Some(40)), chiller(2, true, Some(9))];
        assert_eq!(decide(&chillers, &cooling()), None);
    }

    #[test]
    fn test_turn_off_needs_falling_trend_and_cold_previous() {
        let chillers = vec![chiller(1, true, Some(40))];
        let steady = CascadeInputs {
            trend: 0,
            ..cooling()
        };
        assert_eq!(decide(&chillers, &steady), None);

        let no_history = CascadeInputs {
            previous_return: None,
            ..cooling()
        };
        assert_eq!(decide(&chillers, &no_history), None);
    }

    #[test]
    fn test_no_eligible_chiller_is_a_no_op() {
        let mut chillers: Vec<_> = (1..=4).map(|n| chiller(n, true, Some(60))).collect();
        assert_eq!(decide(&chillers, &warm()), None);

        for c in &mut chillers {
            c.manual_override = ManualOverride::ForceOn;
        }
        assert_eq!(decide(&chillers, &cooling()), None);
    }
}
