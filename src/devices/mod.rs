//! Plant devices: identifiers, records and hardware links
//!
//! The plant has a fixed set of seven relay outputs. Their wire numbers are
//! part of the contract with the relay board and never change:
//!
//! | number | device          |
//! |--------|-----------------|
//! | 0      | boiler          |
//! | 1-4    | chillers        |
//! | 5      | winter valve    |
//! | 6      | summer valve    |

pub mod fieldbus;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod manager;
pub mod relay;
pub mod sensors;

use crate::error::{PlantError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use fieldbus::{BoilerStats, FieldBusBoiler, OperatingStatus, RegisterLink, TemperatureLimits};
pub use manager::DeviceManager;
pub use relay::{RelayBoard, RelayLink};
pub use sensors::{OneWireSensors, WaterSensors};

/// One of the four chiller positions (1-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChillerSlot(u8);

impl ChillerSlot {
    pub const ALL: [ChillerSlot; 4] = [ChillerSlot(1), ChillerSlot(2), ChillerSlot(3), ChillerSlot(4)];

    pub fn new(number: u8) -> Result<Self> {
        if (1..=4).contains(&number) {
            Ok(Self(number))
        } else {
            Err(PlantError::invalid_input(format!(
                "chiller number must be 1-4, got {number}"
            )))
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }
}

/// Which season a valve serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValveSeason {
    Winter,
    Summer,
}

impl ValveSeason {
    pub fn other(self) -> Self {
        match self {
            ValveSeason::Winter => ValveSeason::Summer,
            ValveSeason::Summer => ValveSeason::Winter,
        }
    }
}

/// Device identifier with the fixed wire numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeviceId {
    Boiler,
    Chiller(ChillerSlot),
    Valve(ValveSeason),
}

impl DeviceId {
    pub const BOILER: DeviceId = DeviceId::Boiler;
    pub const WINTER_VALVE: DeviceId = DeviceId::Valve(ValveSeason::Winter);
    pub const SUMMER_VALVE: DeviceId = DeviceId::Valve(ValveSeason::Summer);

    /// Every device in wire order
    pub const ALL: [DeviceId; 7] = [
        DeviceId::Boiler,
        DeviceId::Chiller(ChillerSlot(1)),
        DeviceId::Chiller(ChillerSlot(2)),
        DeviceId::Chiller(ChillerSlot(3)),
        DeviceId::Chiller(ChillerSlot(4)),
        DeviceId::Valve(ValveSeason::Winter),
        DeviceId::Valve(ValveSeason::Summer),
    ];

    /// Number used on the relay board
    pub fn wire_id(self) -> u8 {
        match self {
            DeviceId::Boiler => 0,
            DeviceId::Chiller(slot) => slot.number(),
            DeviceId::Valve(ValveSeason::Winter) => 5,
            DeviceId::Valve(ValveSeason::Summer) => 6,
        }
    }

    pub fn chillers() -> impl Iterator<Item = DeviceId> {
        ChillerSlot::ALL.into_iter().map(DeviceId::Chiller)
    }

    pub fn is_chiller(self) -> bool {
        matches!(self, DeviceId::Chiller(_))
    }

    pub fn is_valve(self) -> bool {
        matches!(self, DeviceId::Valve(_))
    }

    /// Reliability channel name for this device's relay
    pub fn channel(self) -> String {
        format!("relay-{}", self.wire_id())
    }
}

impl TryFrom<u8> for DeviceId {
    type Error = PlantError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(DeviceId::Boiler),
            1..=4 => Ok(DeviceId::Chiller(ChillerSlot(value))),
            5 => Ok(DeviceId::WINTER_VALVE),
            6 => Ok(DeviceId::SUMMER_VALVE),
            other => Err(PlantError::not_found(format!("no device with id {other}"))),
        }
    }
}

impl From<DeviceId> for u8 {
    fn from(id: DeviceId) -> u8 {
        id.wire_id()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Boiler => write!(f, "boiler"),
            DeviceId::Chiller(slot) => write!(f, "chiller {}", slot.number()),
            DeviceId::Valve(ValveSeason::Winter) => write!(f, "winter valve"),
            DeviceId::Valve(ValveSeason::Summer) => write!(f, "summer valve"),
        }
    }
}

/// Manual override mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManualOverride {
    #[default]
    Auto,
    ForceOn,
    ForceOff,
}

impl ManualOverride {
    /// State a forced mode pins the device to
    pub fn forced_state(self) -> Option<bool> {
        match self {
            ManualOverride::Auto => None,
            ManualOverride::ForceOn => Some(true),
            ManualOverride::ForceOff => Some(false),
        }
    }
}

impl std::str::FromStr for ManualOverride {
    type Err = PlantError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "AUTO" => Ok(ManualOverride::Auto),
            "FORCE_ON" | "ON" => Ok(ManualOverride::ForceOn),
            "FORCE_OFF" | "OFF" => Ok(ManualOverride::ForceOff),
            other => Err(PlantError::invalid_input(format!(
                "unknown override mode: {other}"
            ))),
        }
    }
}

/// Why a state change is being made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    /// Hysteresis or cascade decision
    Auto,
    /// Operator override
    Manual,
    /// Part of a season change sequence
    SeasonSwitch,
    /// Emergency shutdown
    Safety,
}

impl CommandTag {
    pub fn bypasses_interlocks(self) -> bool {
        matches!(self, CommandTag::SeasonSwitch | CommandTag::Safety)
    }

    pub fn is_rate_limit_exempt(self) -> bool {
        matches!(self, CommandTag::SeasonSwitch | CommandTag::Safety)
    }
}

/// State saved while a device's season is inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub on: bool,
    pub manual_override: ManualOverride,
    pub switched_at: Option<DateTime<Utc>>,
}

/// Persisted row for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub on: bool,
    pub manual_override: ManualOverride,
    pub switched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupSnapshot>,
}

impl DeviceRecord {
    pub fn new(id: DeviceId) -> Self {
        Self {
            id,
            on: false,
            manual_override: ManualOverride::Auto,
            switched_at: None,
            backup: None,
        }
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.id,
            state: self.on,
            manual_override: self.manual_override,
            switched_at: self.switched_at,
        }
    }
}

/// Externally visible device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub state: bool,
    pub manual_override: ManualOverride,
    pub switched_at: Option<DateTime<Utc>>,
}

/// A typed handle on one plant device
pub trait PlantDevice {
    fn id(&self) -> DeviceId;
}

/// Devices whose state is saved across a season change
pub trait SupportsBackup: PlantDevice {}

#[derive(Debug, Clone, Copy)]
pub struct Boiler;

#[derive(Debug, Clone, Copy)]
pub struct Chiller(pub ChillerSlot);

#[derive(Debug, Clone, Copy)]
pub struct Valve(pub ValveSeason);

impl PlantDevice for Boiler {
    fn id(&self) -> DeviceId {
        DeviceId::Boiler
    }
}

impl PlantDevice for Chiller {
    fn id(&self) -> DeviceId {
        DeviceId::Chiller(self.0)
    }
}

impl PlantDevice for Valve {
    fn id(&self) -> DeviceId {
        DeviceId::Valve(self.0)
    }
}

impl SupportsBackup for Boiler {}
impl SupportsBackup for Chiller {}
