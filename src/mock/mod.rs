//! Simulated plant hardware
//!
//! Stand-ins for the relay board, the boiler's register link, the water
//! probes, the weather feed and the clock. Used by the `simulate` command
//! and by tests.

use crate::clock::Clock;
use crate::devices::fieldbus::{holding, input};
use crate::devices::{DeviceId, RegisterLink, RelayLink, WaterSensors};
use crate::error::{PlantError, Result};
use crate::services::{WeatherReading, WeatherSource};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Clock that only moves when told to
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    /// Starts at 2025-01-15 12:00 UTC
    fn default() -> Self {
        Self {
            millis: AtomicI64::new(1_736_942_400_000),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

fn relay_flags() -> [AtomicBool; 7] {
    std::array::from_fn(|_| AtomicBool::new(false))
}

/// Relay board answering the line protocol from memory
pub struct MockRelayLink {
    relays: [AtomicBool; 7],
    failing_reads: [AtomicBool; 7],
    fail_all: AtomicBool,
    delay_ms: AtomicU64,
    reads: AtomicUsize,
    writes: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl MockRelayLink {
    pub fn new() -> Self {
        Self {
            relays: relay_flags(),
            failing_reads: relay_flags(),
            fail_all: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Set an output without going through the protocol
    pub fn set_relay(&self, id: DeviceId, on: bool) {
        self.relays[id.wire_id() as usize].store(on, Ordering::SeqCst);
    }

    pub fn relay(&self, id: DeviceId) -> bool {
        self.relays[id.wire_id() as usize].load(Ordering::SeqCst)
    }

    /// Make every exchange fail with a communication error
    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    pub fn fail_reads_for(&self, id: DeviceId) {
        self.failing_reads[id.wire_id() as usize].store(true, Ordering::SeqCst);
    }

    /// Delay every reply, e.g. to exceed the command timeout
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every on/off command received, trimmed, in order
    pub async fn commands(&self) -> Vec<String> {
        self.log.lock().await.clone()
    }
}

impl Default for MockRelayLink {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_command(command: &str) -> Result<(String, DeviceId)> {
    let parts: Vec<&str> = command.split_whitespace().collect();
    match parts.as_slice() {
        ["relay", verb, number] => {
            let number: u8 = number
                .parse()
                .map_err(|_| PlantError::device_comm(format!("bad relay number {number:?}")))?;
            Ok((verb.to_string(), DeviceId::try_from(number)?))
        }
        _ => Err(PlantError::device_comm(format!(
            "unknown relay command {:?}",
            command.trim()
        ))),
    }
}

#[async_trait]
impl RelayLink for MockRelayLink {
    async fn transact(&self, command: &str) -> Result<String> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let (verb, id) = parse_command(command)?;
        let index = id.wire_id() as usize;
        match verb.as_str() {
            "read" => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                if self.fail_all.load(Ordering::SeqCst)
                    || self.failing_reads[index].load(Ordering::SeqCst)
                {
                    return Err(PlantError::device_comm(format!("no reply from relay {index}")));
                }
                let state = if self.relays[index].load(Ordering::SeqCst) {
                    "on"
                } else {
                    "off"
                };
                Ok(format!("relay read {index} \n\n\r{state}\n\r>"))
            }
            "on" | "off" => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                if self.fail_all.load(Ordering::SeqCst) {
                    return Err(PlantError::device_comm(format!("no reply from relay {index}")));
                }
                self.relays[index].store(verb == "on", Ordering::SeqCst);
                self.log.lock().await.push(command.trim().to_string());
                debug!(relay = index, verb = %verb, "Mock relay switched");
                Ok(format!("relay {verb} {index}\n\r>"))
            }
            other => Err(PlantError::device_comm(format!("unknown relay verb {other}"))),
        }
    }
}

fn registers<const N: usize>() -> [AtomicU16; N] {
    std::array::from_fn(|_| AtomicU16::new(0))
}

/// Boiler controller registers held in memory
pub struct MockRegisterLink {
    holding: [AtomicU16; 8],
    input: [AtomicU16; 12],
    connected: AtomicBool,
    failures_left: AtomicU32,
    calls: AtomicUsize,
}

impl MockRegisterLink {
    /// A running boiler at 60 °C with limits 20-80 °C
    pub fn new() -> Self {
        let link = Self {
            holding: registers(),
            input: registers(),
            connected: AtomicBool::new(true),
            failures_left: AtomicU32::new(0),
            calls: AtomicUsize::new(0),
        };
        link.set_holding(holding::OPERATING_MODE, 2);
        link.set_holding(holding::SETPOINT, 600);
        link.set_holding(holding::MIN_SETPOINT, 200);
        link.set_holding(holding::MAX_SETPOINT, 800);
        link.set_holding(holding::SUPPLY_TEMP, 620);
        link.set_input(input::PUMP, 1);
        link.set_input(input::FLAME, 1);
        link.set_input(input::CASCADE_POWER, 40);
        link.set_input(input::OUTLET_TEMP, 610);
        link.set_input(input::INLET_TEMP, 540);
        link.set_input(input::FLUE_TEMP, 700);
        link.set_input(input::FIRING_RATE, 35);
        link
    }

    pub fn set_holding(&self, address: u16, value: u16) {
        if let Some(register) = self.holding.get(address as usize) {
            register.store(value, Ordering::SeqCst);
        }
    }

    pub fn holding_value(&self, address: u16) -> Option<u16> {
        self.holding
            .get(address as usize)
            .map(|register| register.load(Ordering::SeqCst))
    }

    pub fn set_input(&self, address: u16, value: u16) {
        if let Some(register) = self.input.get(address as usize) {
            register.store(value, Ordering::SeqCst);
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Fail the next `count` register operations
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Register operations attempted, failed ones included
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PlantError::device_comm("injected register failure"));
        }
        Ok(())
    }

    fn read(bank: &[AtomicU16], address: u16, count: u16) -> Result<Vec<u16>> {
        let start = address as usize;
        let end = start + count as usize;
        bank.get(start..end)
            .map(|slice| slice.iter().map(|r| r.load(Ordering::SeqCst)).collect())
            .ok_or_else(|| PlantError::device_comm(format!("illegal address {address}+{count}")))
    }
}

impl Default for MockRegisterLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegisterLink for MockRegisterLink {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read_holding(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.begin_call()?;
        Self::read(&self.holding, address, count)
    }

    async fn read_input(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.begin_call()?;
        Self::read(&self.input, address, count)
    }

    async fn write_register(&self, address: u16, value: u16) -> Result<()> {
        self.begin_call()?;
        let register = self
            .holding
            .get(address as usize)
            .ok_or_else(|| PlantError::device_comm(format!("illegal address {address}")))?;
        register.store(value, Ordering::SeqCst);
        Ok(())
    }
}

fn store_f64(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::SeqCst);
}

fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::SeqCst))
}

/// Water probes with settable readings
pub struct MockWaterSensors {
    return_temp: AtomicU64,
    supply_temp: AtomicU64,
    failing: AtomicBool,
}

impl MockWaterSensors {
    pub fn new(return_temp: f64, supply_temp: f64) -> Self {
        Self {
            return_temp: AtomicU64::new(return_temp.to_bits()),
            supply_temp: AtomicU64::new(supply_temp.to_bits()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_return(&self, fahrenheit: f64) {
        store_f64(&self.return_temp, fahrenheit);
    }

    pub fn set_supply(&self, fahrenheit: f64) {
        store_f64(&self.supply_temp, fahrenheit);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlantError::sensor("probe CRC check failed"));
        }
        Ok(())
    }
}

#[async_trait]
impl WaterSensors for MockWaterSensors {
    async fn return_temp(&self) -> Result<f64> {
        self.check()?;
        Ok(load_f64(&self.return_temp))
    }

    async fn supply_temp(&self) -> Result<f64> {
        self.check()?;
        Ok(load_f64(&self.supply_temp))
    }
}

/// Weather feed with settable readings
pub struct MockWeather {
    outdoor_temp: AtomicU64,
    wind_speed: AtomicU64,
    failing: AtomicBool,
}

impl MockWeather {
    pub fn new(outdoor_temp: f64, wind_speed: f64) -> Self {
        Self {
            outdoor_temp: AtomicU64::new(outdoor_temp.to_bits()),
            wind_speed: AtomicU64::new(wind_speed.to_bits()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_outdoor(&self, fahrenheit: f64) {
        store_f64(&self.outdoor_temp, fahrenheit);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl WeatherSource for MockWeather {
    async fn fetch(&self) -> Result<WeatherReading> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PlantError::sensor("weather feed unavailable"));
        }
        Ok(WeatherReading {
            outdoor_temp: load_f64(&self.outdoor_temp),
            wind_speed: load_f64(&self.wind_speed),
        })
    }
}

/// Crude thermal model for the `simulate` command
///
/// Each step the return water drifts towards the outdoor temperature, gains
/// heat while the boiler fires and loses heat per running chiller.
pub struct ThermalModel {
    pub drift: f64,
    pub boiler_gain: f64,
    pub chiller_loss: f64,
}

impl Default for ThermalModel {
    fn default() -> Self {
        Self {
            drift: 0.02,
            boiler_gain: 1.5,
            chiller_loss: 0.8,
        }
    }
}

impl ThermalModel {
    pub fn step(&self, return_temp: f64, outdoor_temp: f64, relays: &MockRelayLink) -> f64 {
        let running_chillers = DeviceId::chillers().filter(|id| relays.relay(*id)).count();
        let mut next = return_temp + (outdoor_temp - return_temp) * self.drift;
        if relays.relay(DeviceId::Boiler) {
            next += self.boiler_gain;
        }
        next - running_chillers as f64 * self.chiller_loss
    }
}
