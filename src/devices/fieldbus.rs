//! Boiler field-bus (Modbus RTU register) channel
//!
//! Temperatures travel as tenths of a degree Celsius and are exposed in °F.
//! Every operation retries transient failures; a link that is not connected
//! fails at once.

use crate::error::{PlantError, Result};
use crate::error_recovery::{CallKind, ChannelGuard, RetryExecutor, RetryPolicy};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

const CHANNEL: &str = "fieldbus";

/// Holding register addresses
pub mod holding {
    pub const OPERATING_MODE: u16 = 0;
    pub const CASCADE_MODE: u16 = 1;
    pub const SETPOINT: u16 = 2;
    pub const MIN_SETPOINT: u16 = 3;
    pub const MAX_SETPOINT: u16 = 4;
    pub const SUPPLY_TEMP: u16 = 6;
}

/// Input register addresses
pub mod input {
    pub const ALARM: u16 = 3;
    pub const PUMP: u16 = 4;
    pub const FLAME: u16 = 5;
    pub const CASCADE_POWER: u16 = 6;
    pub const OUTLET_TEMP: u16 = 8;
    pub const INLET_TEMP: u16 = 9;
    pub const FLUE_TEMP: u16 = 10;
    pub const FIRING_RATE: u16 = 11;
}

/// Register-level access to the boiler controller
#[async_trait]
pub trait RegisterLink: Send + Sync {
    async fn is_connected(&self) -> bool;
    async fn read_holding(&self, address: u16, count: u16) -> Result<Vec<u16>>;
    async fn read_input(&self, address: u16, count: u16) -> Result<Vec<u16>>;
    async fn write_register(&self, address: u16, value: u16) -> Result<()>;
}

/// Convert a tenths-of-°C register to °F, one decimal
pub fn register_to_fahrenheit(raw: u16) -> f64 {
    let celsius = raw as i16 as f64 / 10.0;
    round_tenth(celsius * 9.0 / 5.0 + 32.0)
}

/// Convert °F to a tenths-of-°C register value
pub fn fahrenheit_to_register(fahrenheit: f64) -> u16 {
    let tenths = ((fahrenheit - 32.0) * 5.0 / 9.0 * 10.0).round();
    tenths as i16 as u16
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn operating_mode_name(mode: u16) -> String {
    let name = match mode {
        0 => "Initialization",
        1 => "Standby",
        2 => "CH Demand",
        3 => "DHW Demand",
        4 => "CH & DHW Demand",
        5 => "Manual Operation",
        6 => "Shutdown",
        7 => "Error",
        8 => "Manual Operation 2",
        9 => "Freeze Protection",
        10 => "Sensor Test",
        other => return format!("Unknown ({other})"),
    };
    name.to_string()
}

pub fn cascade_mode_name(mode: u16) -> String {
    let name = match mode {
        0 => "Single Boiler",
        1 => "Manager",
        2 => "Member",
        other => return format!("Unknown ({other})"),
    };
    name.to_string()
}

pub fn error_code_message(code: u16) -> &'static str {
    match code {
        0 => "No Error",
        1 => "Ignition Failure",
        2 => "False Flame",
        3 => "Low Water",
        4 => "Air Flow/Pressure Switch",
        5 => "High Limit",
        6 => "Stack High Limit",
        7 => "System High Limit",
        8 => "Sensor Failure",
        9 => "Fan Speed",
        10 => "Gas Pressure",
        11 => "Water Pressure",
        12 => "Condensate",
        13 => "Flow Switch",
        14 => "DHW High Limit",
        15 => "External Limit",
        16 => "Internal Error",
        17 => "Invalid Parameter",
        18 => "Flame Circuit",
        19 => "Low Power",
        20 => "High Water",
        21 => "High Gas Pressure",
        22 => "Low Gas Pressure",
        23 => "Blocked Drain",
        24 => "Rod Error",
        25 => "Missing Earth",
        26 => "Pilot Error",
        27 => "Valve Error",
        28 => "Burner Error",
        _ => "Unknown Error",
    }
}

/// Full telemetry snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoilerStats {
    pub operating_mode: u16,
    pub operating_mode_name: String,
    pub cascade_mode: u16,
    pub cascade_mode_name: String,
    pub current_setpoint: f64,
    pub min_setpoint: f64,
    pub max_setpoint: f64,
    /// `None` when the supply probe reports zero
    pub supply_temp: Option<f64>,
    pub alarm: bool,
    pub pump: bool,
    pub flame: bool,
    pub cascade_power: f64,
    pub outlet_temp: f64,
    pub inlet_temp: f64,
    pub flue_temp: f64,
    pub firing_rate: f64,
}

/// Coarse boiler condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BoilerCondition {
    Error { code: u16, message: String },
    Initializing,
    Standby,
    Running,
    Unknown,
}

/// Operating status summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatingStatus {
    pub operating_mode: u16,
    pub operating_mode_name: String,
    pub cascade_mode: u16,
    pub cascade_mode_name: String,
    pub current_setpoint: f64,
    pub condition: BoilerCondition,
}

/// Setpoint limits stored in the boiler controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemperatureLimits {
    pub min_setpoint: f64,
    pub max_setpoint: f64,
}

/// Boiler telemetry and setpoint channel
pub struct FieldBusBoiler {
    link: Arc<dyn RegisterLink>,
    guard: Arc<ChannelGuard>,
    retry: RetryExecutor,
    hard_min: f64,
    hard_max: f64,
}

impl FieldBusBoiler {
    pub fn new(
        link: Arc<dyn RegisterLink>,
        guard: Arc<ChannelGuard>,
        retry: RetryPolicy,
        hard_limits: (f64, f64),
    ) -> Self {
        Self {
            link,
            guard,
            retry: RetryExecutor::new(retry),
            hard_min: hard_limits.0,
            hard_max: hard_limits.1,
        }
    }

    async fn read_holding(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        let link = &self.link;
        self.guard
            .call_with_retry(CHANNEL, CallKind::Read, &self.retry, || async move {
                ensure_connected(link.as_ref()).await?;
                let values = link.read_holding(address, count).await?;
                expect_len(values, count, "holding", address)
            })
            .await
    }

    async fn read_input(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        let link = &self.link;
        self.guard
            .call_with_retry(CHANNEL, CallKind::Read, &self.retry, || async move {
                ensure_connected(link.as_ref()).await?;
                let values = link.read_input(address, count).await?;
                expect_len(values, count, "input", address)
            })
            .await
    }

    async fn write_registers(&self, writes: &[(u16, u16)]) -> Result<()> {
        let link = &self.link;
        self.guard
            .call_with_retry(
                CHANNEL,
                CallKind::Command { exempt: false },
                &self.retry,
                || async move {
                    ensure_connected(link.as_ref()).await?;
                    for (address, value) in writes {
                        link.write_register(*address, *value).await?;
                    }
                    Ok(())
                },
            )
            .await
    }

    /// Read every telemetry register
    pub async fn read_boiler_stats(&self) -> Result<BoilerStats> {
        let h = self.read_holding(holding::OPERATING_MODE, 7).await?;
        let i = self.read_input(input::ALARM, 9).await?;
        let at = |address: u16| i[(address - input::ALARM) as usize];

        let supply_raw = h[holding::SUPPLY_TEMP as usize];
        Ok(BoilerStats {
            operating_mode: h[0],
            operating_mode_name: operating_mode_name(h[0]),
            cascade_mode: h[1],
            cascade_mode_name: cascade_mode_name(h[1]),
            current_setpoint: register_to_fahrenheit(h[holding::SETPOINT as usize]),
            min_setpoint: register_to_fahrenheit(h[holding::MIN_SETPOINT as usize]),
            max_setpoint: register_to_fahrenheit(h[holding::MAX_SETPOINT as usize]),
            supply_temp: (supply_raw != 0).then(|| register_to_fahrenheit(supply_raw)),
            alarm: at(input::ALARM) != 0,
            pump: at(input::PUMP) != 0,
            flame: at(input::FLAME) != 0,
            cascade_power: at(input::CASCADE_POWER) as f64,
            outlet_temp: register_to_fahrenheit(at(input::OUTLET_TEMP)),
            inlet_temp: register_to_fahrenheit(at(input::INLET_TEMP)),
            flue_temp: register_to_fahrenheit(at(input::FLUE_TEMP)),
            firing_rate: at(input::FIRING_RATE) as f64,
        })
    }

    /// Operating mode, cascade mode and error state
    pub async fn read_operating_status(&self) -> Result<OperatingStatus> {
        let h = self.read_holding(holding::OPERATING_MODE, 5).await?;
        let error_code = self.read_input(input::ALARM, 1).await?[0];

        let operating_mode = h[0];
        let condition = if error_code > 0 {
            BoilerCondition::Error {
                code: error_code,
                message: error_code_message(error_code).to_string(),
            }
        } else {
            match operating_mode {
                0 => BoilerCondition::Initializing,
                1 => BoilerCondition::Standby,
                2..=4 => BoilerCondition::Running,
                _ => BoilerCondition::Unknown,
            }
        };

        Ok(OperatingStatus {
            operating_mode,
            operating_mode_name: operating_mode_name(operating_mode),
            cascade_mode: h[1],
            cascade_mode_name: cascade_mode_name(h[1]),
            current_setpoint: register_to_fahrenheit(h[holding::SETPOINT as usize]),
            condition,
        })
    }

    /// Write the boiler's target temperature
    pub async fn set_boiler_setpoint(&self, fahrenheit: f64) -> Result<()> {
        self.check_hard_limits("setpoint", fahrenheit)?;
        self.write_registers(&[(holding::SETPOINT, fahrenheit_to_register(fahrenheit))])
            .await?;
        info!(setpoint = fahrenheit, "Boiler setpoint written");
        Ok(())
    }

    pub async fn temperature_limits(&self) -> Result<TemperatureLimits> {
        let regs = self.read_holding(holding::MIN_SETPOINT, 2).await?;
        Ok(TemperatureLimits {
            min_setpoint: register_to_fahrenheit(regs[0]),
            max_setpoint: register_to_fahrenheit(regs[1]),
        })
    }

    pub async fn set_temperature_limits(&self, min: f64, max: f64) -> Result<()> {
        self.check_hard_limits("min setpoint", min)?;
        self.check_hard_limits("max setpoint", max)?;
        if min >= max {
            return Err(PlantError::invalid_input(format!(
                "min setpoint {min}°F must be below max setpoint {max}°F"
            )));
        }

        self.write_registers(&[
            (holding::MIN_SETPOINT, fahrenheit_to_register(min)),
            (holding::MAX_SETPOINT, fahrenheit_to_register(max)),
        ])
        .await?;
        info!(min = min, max = max, "Boiler temperature limits written");
        Ok(())
    }

    fn check_hard_limits(&self, what: &str, fahrenheit: f64) -> Result<()> {
        if fahrenheit < self.hard_min || fahrenheit > self.hard_max {
            warn!(value = fahrenheit, min = self.hard_min, max = self.hard_max, "Rejected {what}");
            return Err(PlantError::invalid_input(format!(
                "{what} {fahrenheit}°F outside {}..={}°F",
                self.hard_min, self.hard_max
            )));
        }
        Ok(())
    }
}

async fn ensure_connected(link: &dyn RegisterLink) -> Result<()> {
    if link.is_connected().await {
        Ok(())
    } else {
        Err(PlantError::not_connected("boiler field-bus link"))
    }
}

fn expect_len(values: Vec<u16>, count: u16, kind: &str, address: u16) -> Result<Vec<u16>> {
    if values.len() < count as usize {
        return Err(PlantError::device_comm(format!(
            "short {kind} read at {address}: wanted {count}, got {}",
            values.len()
        )));
    }
    Ok(values)
}
