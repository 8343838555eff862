//! Configuration management for the plant controller
//!
//! Defaults are layered under an optional TOML file and `PLANT__*`
//! environment variables (`PLANT__RELIABILITY__COMMAND_TIMEOUT=2s`).

use crate::error::{PlantError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Top-level controller configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PlantConfig {
    /// Relay board serial link
    pub serial: SerialConfig,

    /// Boiler field-bus link
    pub fieldbus: FieldBusConfig,

    /// Water temperature probes
    pub sensors: SensorConfig,

    /// Outdoor weather feed
    pub weather: WeatherConfig,

    /// Circuit breaker, rate limiter, retry and timeout settings
    pub reliability: ReliabilityConfig,

    /// Control loop timing and setpoint table
    pub control: ControlConfig,

    /// Persisted state location
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Refuse every hardware write
    pub read_only: bool,
}

/// Relay board serial link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,

    /// Pause between writing a command and reading the reply
    #[serde(with = "humantime_serde")]
    pub settle_time: Duration,
}

/// Serial parity for the field-bus line
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Boiler field-bus (Modbus RTU) link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldBusConfig {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub unit_id: u8,

    /// Lowest setpoint the boiler may be given (°F)
    pub hard_min_setpoint: f64,

    /// Highest setpoint the boiler may be given (°F)
    pub hard_max_setpoint: f64,
}

/// 1-Wire water temperature probes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub mount_point: PathBuf,
    pub return_sensor_id: String,
    pub supply_sensor_id: String,
}

/// Outdoor weather feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    /// JSON endpoint returning `{"outdoor_temp": .., "wind_speed": ..}`
    pub url: Option<Url>,

    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Reliability wrapper settings shared by every hardware channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReliabilityConfig {
    /// Consecutive failures before a channel's breaker opens
    pub failure_threshold: u32,

    /// Time an open breaker waits before allowing a trial call
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,

    /// Minimum spacing of state-changing commands on one channel
    #[serde(with = "humantime_serde")]
    pub min_command_interval: Duration,

    /// Deadline for a single hardware read or write
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Field-bus retries after the first attempt
    pub fieldbus_max_retries: u32,

    /// Base delay of the field-bus retry backoff
    #[serde(with = "humantime_serde")]
    pub fieldbus_retry_delay: Duration,
}

/// Control loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    #[serde(with = "humantime_serde")]
    pub cycle_interval: Duration,

    /// Time the valves need to swing during a season change
    #[serde(with = "humantime_serde")]
    pub valve_switch_delay: Duration,

    /// Trailing window of the wind-chill average
    #[serde(with = "humantime_serde")]
    pub wind_chill_window: Duration,

    /// TOML setpoint table; the built-in table is used when unset
    pub setpoint_table: Option<PathBuf>,

    /// History window of the efficiency averages
    #[serde(with = "humantime_serde")]
    pub efficiency_window: Duration,

    /// Lowest safe return-water temperature (°F)
    pub emergency_min_return: f64,

    /// Highest safe return-water temperature (°F)
    pub emergency_max_return: f64,
}

/// Persisted state location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for settings and device rows
    pub state_dir: PathBuf,

    /// Samples kept in memory
    pub max_samples: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Log to file (path)
    pub file: Option<PathBuf>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 19_200,
            settle_time: Duration::from_millis(100),
        }
    }
}

impl Default for FieldBusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9_600,
            parity: Parity::Even,
            unit_id: 1,
            hard_min_setpoint: 70.0,
            hard_max_setpoint: 190.0,
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("/sys/bus/w1/devices"),
            return_sensor_id: "28-00000677d509".to_string(),
            supply_sensor_id: "28-011927cd8e7d".to_string(),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            url: None,
            poll_interval: Duration::from_secs(600),
            timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            min_command_interval: Duration::from_secs(1),
            command_timeout: Duration::from_secs(1),
            fieldbus_max_retries: 2,
            fieldbus_retry_delay: Duration::from_millis(500),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(60),
            valve_switch_delay: Duration::from_secs(120),
            wind_chill_window: Duration::from_secs(4 * 24 * 3600),
            setpoint_table: None,
            efficiency_window: Duration::from_secs(12 * 3600),
            emergency_min_return: 36.0,
            emergency_max_return: 110.0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            max_samples: 10_080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file: None,
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("plant-control")
}

impl PlantConfig {
    /// Load defaults, then the optional file, then `PLANT__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&PlantConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(PlantError::config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PLANT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: PlantConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let reliability = &self.reliability;
        if reliability.failure_threshold == 0 {
            return Err(PlantError::config("failure_threshold must be at least 1"));
        }
        if reliability.command_timeout.is_zero() {
            return Err(PlantError::config("command_timeout must be greater than zero"));
        }

        if self.control.cycle_interval.is_zero() {
            return Err(PlantError::config("cycle_interval must be greater than zero"));
        }
        if self.control.efficiency_window.is_zero() {
            return Err(PlantError::config("efficiency_window must be greater than zero"));
        }
        if self.control.emergency_min_return >= self.control.emergency_max_return {
            return Err(PlantError::config(
                "emergency_min_return must be below emergency_max_return",
            ));
        }

        if self.fieldbus.hard_min_setpoint >= self.fieldbus.hard_max_setpoint {
            return Err(PlantError::config(
                "hard_min_setpoint must be below hard_max_setpoint",
            ));
        }

        if let Some(url) = &self.weather.url {
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(PlantError::config("weather url must use http or https"));
            }
        }

        if self.storage.max_samples == 0 {
            return Err(PlantError::config("max_samples must be at least 1"));
        }

        Ok(())
    }

    /// Settings file path under the state directory
    pub fn settings_path(&self) -> PathBuf {
        self.storage.state_dir.join("settings.json")
    }

    /// Device rows file path under the state directory
    pub fn devices_path(&self) -> PathBuf {
        self.storage.state_dir.join("devices.json")
    }
}
