//! Boiler hysteresis
//!
//! In AUTO the boiler starts once the return water has fallen to
//! `setpoint - tolerance` and stops once it has risen above
//! `setpoint + tolerance`. Inside the band nothing changes. A forced
//! override pins the boiler and skips the band entirely.

use crate::devices::DeviceRecord;

/// Desired boiler state, or `None` to leave it alone
pub fn decide(boiler: &DeviceRecord, return_temp: f64, setpoint: f64, tolerance: f64) -> Option<bool> {
    if let Some(forced) = boiler.manual_override.forced_state() {
        return (forced != boiler.on).then_some(forced);
    }

    if !boiler.on && return_temp <= setpoint - tolerance {
        Some(true)
    } else if boiler.on && return_temp > setpoint + tolerance {
        Some(false)
    } else {
        None
    }
}
