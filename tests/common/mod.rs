//! Shared plant harness for integration tests
//!
//! Builds a [`ControlCore`] over simulated relays, probes and in-memory
//! stores, with a clock that only moves when a test advances it.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use plant_control::clock::Clock;
use plant_control::config::ReliabilityConfig;
use plant_control::control::{ControlCore, CoreOptions, CoreParts, SetpointCalculator};
use plant_control::devices::{
    DeviceId, DeviceManager, DeviceRecord, FieldBusBoiler, ManualOverride, RelayBoard,
};
use plant_control::error_recovery::{ChannelGuard, RetryPolicy};
use plant_control::mock::{ManualClock, MockRegisterLink, MockRelayLink, MockWaterSensors};
use plant_control::services::{SampleStore, SetpointSample, Settings, WeatherReading};
use plant_control::storage::{MemoryDeviceStore, MemorySampleStore, MemorySettingsStore};
use plant_control::weather::LastKnownWeather;
use std::sync::Arc;
use std::time::Duration;

/// Reliability settings that never rate limit and fail fast
pub fn test_reliability() -> ReliabilityConfig {
    ReliabilityConfig {
        failure_threshold: 5,
        reset_timeout: Duration::from_secs(60),
        min_command_interval: Duration::ZERO,
        command_timeout: Duration::from_millis(200),
        fieldbus_max_retries: 2,
        fieldbus_retry_delay: Duration::from_millis(1),
    }
}

/// A plant wired to mocks, with handles on every mock
pub struct TestPlant {
    pub core: ControlCore,
    pub relays: Arc<MockRelayLink>,
    pub registers: Option<Arc<MockRegisterLink>>,
    pub sensors: Arc<MockWaterSensors>,
    pub settings: Arc<MemorySettingsStore>,
    pub devices: Arc<MemoryDeviceStore>,
    pub samples: Arc<MemorySampleStore>,
    pub weather: LastKnownWeather,
    pub clock: Arc<ManualClock>,
}

impl TestPlant {
    pub fn builder() -> PlantBuilder {
        PlantBuilder::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn relay(&self, id: DeviceId) -> bool {
        self.relays.relay(id)
    }

    /// Stored row, backup included
    pub async fn stored(&self, id: DeviceId) -> DeviceRecord {
        self.devices
            .get(id)
            .await
            .unwrap_or_else(|| DeviceRecord::new(id))
    }

    pub async fn season(&self) -> plant_control::Season {
        self.core.settings().await.unwrap().season
    }
}

/// Seeds the stores and mocks before the core is built
pub struct PlantBuilder {
    settings: Settings,
    records: Vec<DeviceRecord>,
    samples: Vec<SetpointSample>,
    return_temp: f64,
    weather: Option<WeatherReading>,
    fieldbus: bool,
    read_only: bool,
    options: CoreOptions,
}

impl Default for PlantBuilder {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            records: Vec::new(),
            samples: Vec::new(),
            return_temp: 80.0,
            // below the table's first wind chill: baseline 100
            weather: Some(WeatherReading {
                outdoor_temp: 5.0,
                wind_speed: 5.0,
            }),
            fieldbus: false,
            read_only: false,
            options: CoreOptions::default(),
        }
    }
}

impl PlantBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn return_temp(mut self, fahrenheit: f64) -> Self {
        self.return_temp = fahrenheit;
        self
    }

    pub fn outdoor(mut self, fahrenheit: f64) -> Self {
        self.weather = Some(WeatherReading {
            outdoor_temp: fahrenheit,
            wind_speed: 0.0,
        });
        self
    }

    pub fn no_weather(mut self) -> Self {
        self.weather = None;
        self
    }

    pub fn fieldbus(mut self) -> Self {
        self.fieldbus = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn options(mut self, options: CoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Seed a stored row; the mock relay is set to match
    pub fn device(mut self, record: DeviceRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Seed a device that is on and was switched `minutes_ago` before the
    /// harness clock's start
    pub fn running(self, id: DeviceId, minutes_ago: i64) -> Self {
        let start = start_time();
        self.device(DeviceRecord {
            on: true,
            switched_at: Some(start - chrono::Duration::minutes(minutes_ago)),
            ..DeviceRecord::new(id)
        })
    }

    pub fn overridden(self, id: DeviceId, mode: ManualOverride) -> Self {
        let on = mode.forced_state().unwrap_or(false);
        self.device(DeviceRecord {
            on,
            manual_override: mode,
            ..DeviceRecord::new(id)
        })
    }

    pub fn sample(mut self, sample: SetpointSample) -> Self {
        self.samples.push(sample);
        self
    }

    pub async fn build(self) -> TestPlant {
        let clock = Arc::new(ManualClock::default());
        let relays = Arc::new(MockRelayLink::new());
        for record in &self.records {
            relays.set_relay(record.id, record.on);
        }

        let guard = Arc::new(ChannelGuard::new(&test_reliability()));
        let registers = self.fieldbus.then(|| Arc::new(MockRegisterLink::new()));
        let fieldbus = registers.clone().map(|link| {
            FieldBusBoiler::new(
                link,
                guard.clone(),
                RetryPolicy::fieldbus(2, Duration::from_millis(1)),
                (70.0, 190.0),
            )
        });

        let devices = Arc::new(MemoryDeviceStore::with_records(self.records));
        let settings = Arc::new(MemorySettingsStore::new(self.settings));
        let samples = Arc::new(MemorySampleStore::new(1_000));
        for sample in self.samples {
            samples.append(sample).await.unwrap();
        }
        let sensors = Arc::new(MockWaterSensors::new(self.return_temp, self.return_temp + 10.0));
        let weather = LastKnownWeather::new();
        if let Some(reading) = self.weather {
            weather.set(reading).await;
        }

        let manager = DeviceManager::new(
            RelayBoard::new(relays.clone(), guard),
            fieldbus,
            devices.clone(),
            clock.clone(),
            self.read_only,
        );
        let core = ControlCore::new(
            CoreParts {
                devices: manager,
                settings: settings.clone(),
                samples: samples.clone(),
                sensors: sensors.clone(),
                weather: weather.clone(),
                calculator: SetpointCalculator::default(),
                clock: clock.clone(),
            },
            self.options,
        );

        TestPlant {
            core,
            relays,
            registers,
            sensors,
            settings,
            devices,
            samples,
            weather,
            clock,
        }
    }

    /// Build and run the startup sequence
    pub async fn start(self) -> TestPlant {
        let plant = self.build().await;
        plant.core.initialize().await.unwrap();
        plant
    }
}

/// Time the harness clock starts at
pub fn start_time() -> DateTime<Utc> {
    ManualClock::default().now()
}

/// A history sample taken `minutes_ago` before the harness clock's start
pub fn sample(minutes_ago: i64, outdoor: f64, return_temp: f64, trend: i8) -> SetpointSample {
    SetpointSample {
        timestamp: start_time() - chrono::Duration::minutes(minutes_ago),
        outdoor_temp: outdoor,
        wind_speed: 0.0,
        effective_setpoint: 55.0,
        boiler_on: false,
        chillers_on: [false; 4],
        return_temp,
        supply_temp: None,
        trend,
        cascade_power: None,
    }
}

pub fn chiller(n: u8) -> DeviceId {
    DeviceId::Chiller(plant_control::devices::ChillerSlot::new(n).unwrap())
}
