//! Season-aware plant controller for one boiler, four chillers and two
//! seasonal valves.
//!
//! The crate computes the effective return-water setpoint from weather and
//! history, drives the boiler with a hysteresis band, rotates chiller duty,
//! and sequences winter/summer changeovers. Every hardware command passes the
//! device manager's interlocks and the reliability wrappers (circuit breaker,
//! rate limiter, retry with timeout).
//!
//! # Features
//!
//! - Setpoint calculation from a wind-chill lookup table and 4-day history
//! - Boiler hysteresis and chiller cascade with minimum dwell
//! - Persisted season transitions that resume after a restart
//! - Emergency shutdown with an operator-facing alarm channel
//! - Serial relay board and Modbus RTU boiler links (feature `hardware`)

// Core modules
pub mod clock;
pub mod config;
pub mod control;
pub mod devices;
pub mod error;
pub mod error_recovery;
pub mod logging;
pub mod services;
pub mod storage;
pub mod weather;

// Simulated hardware, used by the `simulate` command and by tests
pub mod mock;

// Re-export main types for convenience
pub use config::PlantConfig;
pub use control::{ControlCore, CoreOptions, CoreParts, CycleReport, Season};
pub use devices::{DeviceId, ManualOverride};
pub use error::{PlantError, Result};
