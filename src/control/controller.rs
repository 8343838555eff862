//! Control core
//!
//! Composition root of the controller. It owns the device manager and the
//! collaborator handles, and runs the read-compute-act cycle. It also
//! sequences season changes and holds the emergency latch.
//!
//! One cycle:
//!
//! 1. refuse to run while an emergency is latched
//! 2. complete a due season transition
//! 3. read relays back, read sensors and weather (with fallbacks)
//! 4. emergency check
//! 5. compute the effective setpoint and the return trend
//! 6. start an automatic season switch when enabled and due
//! 7. boiler hysteresis (WINTER) or forced chillers and cascade (SUMMER)
//! 8. append a history sample
//!
//! Device and interlock failures are collected in the [`CycleReport`]; they
//! never stop the rest of the cycle.

use crate::clock::Clock;
use crate::config::ControlConfig;
use crate::control::safety::{self, SafeBand};
use crate::control::setpoint::{SetpointCalculator, SetpointResult};
use crate::control::{boiler, cascade, quantize_trend, season, Season};
use crate::devices::{
    BoilerStats, ChillerSlot, CommandTag, DeviceId, DeviceManager, DeviceSnapshot, ManualOverride,
    OperatingStatus, TemperatureLimits,
};
use crate::error::{PlantError, Result};
use crate::log_structured_error;
use crate::services::{
    SampleField, SampleStore, SetpointSample, Settings, SettingsPatch, SettingsStore,
    WeatherReading,
};
use crate::devices::WaterSensors;
use crate::weather::LastKnownWeather;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timing and safety parameters of the core
#[derive(Debug, Clone, Copy)]
pub struct CoreOptions {
    pub valve_switch_delay: Duration,
    pub wind_chill_window: Duration,
    pub safe_band: SafeBand,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self::from_config(&ControlConfig::default())
    }
}

impl CoreOptions {
    pub fn from_config(control: &ControlConfig) -> Self {
        Self {
            valve_switch_delay: control.valve_switch_delay,
            wind_chill_window: control.wind_chill_window,
            safe_band: SafeBand {
                min_return: control.emergency_min_return,
                max_return: control.emergency_max_return,
            },
        }
    }
}

/// Collaborators the core is built from
pub struct CoreParts {
    pub devices: DeviceManager,
    pub settings: Arc<dyn SettingsStore>,
    pub samples: Arc<dyn SampleStore>,
    pub sensors: Arc<dyn WaterSensors>,
    pub weather: LastKnownWeather,
    pub calculator: SetpointCalculator,
    pub clock: Arc<dyn Clock>,
}

/// Something a cycle changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CycleAction {
    Boiler { on: bool },
    Chiller { id: DeviceId, on: bool },
    BoilerSetpoint { fahrenheit: f64 },
    SeasonSwitchStarted { target: Season },
    TransitionCompleted { season: Season },
}

/// Outcome of one control cycle
#[derive(Debug)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub season: Season,
    pub effective_setpoint: Option<f64>,
    pub return_temp: Option<f64>,
    pub trend: i8,
    pub actions: Vec<CycleAction>,
    pub errors: Vec<PlantError>,
    /// Regular control was suppressed (season transition in flight)
    pub skipped: bool,
}

impl CycleReport {
    fn new(timestamp: DateTime<Utc>, season: Season) -> Self {
        Self {
            timestamp,
            season,
            effective_setpoint: None,
            return_temp: None,
            trend: 0,
            actions: Vec::new(),
            errors: Vec::new(),
            skipped: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

/// Latched emergency condition, published to alarm subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyAlarm {
    pub reason: String,
    pub raised_at: DateTime<Utc>,
    pub season: Season,
    pub return_temp: Option<f64>,
}

/// Answer to a season switch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwitchOutcome {
    pub started: bool,
    pub locked: bool,
    #[serde(with = "humantime_serde")]
    pub remaining_lockout: Duration,
}

/// Plant performance over a trailing window of history
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Efficiency {
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Mean return temperature minus mean effective setpoint (°F)
    pub average_temperature_difference: f64,
    /// Running share of the chiller capacity (0-1)
    pub chiller_duty: f64,
    /// Mean boiler cascade firing rate (%)
    pub cascade_fire_rate_avg: f64,
}

#[derive(Debug, Default)]
struct CycleMemory {
    /// Last setpoint accepted by the field-bus boiler
    written_setpoint: Option<f64>,
}

struct CoreInner {
    devices: DeviceManager,
    settings: Arc<dyn SettingsStore>,
    samples: Arc<dyn SampleStore>,
    sensors: Arc<dyn WaterSensors>,
    weather: LastKnownWeather,
    calculator: SetpointCalculator,
    clock: Arc<dyn Clock>,
    options: CoreOptions,
    /// Serializes cycles, transition steps and operator commands
    cycle: Mutex<CycleMemory>,
    last_setpoint: RwLock<Option<f64>>,
    alarms: watch::Sender<Option<EmergencyAlarm>>,
}

/// Season-aware plant controller
pub struct ControlCore {
    inner: Arc<CoreInner>,
    completion: Mutex<Option<JoinHandle<()>>>,
}

impl ControlCore {
    pub fn new(parts: CoreParts, options: CoreOptions) -> Self {
        let (alarms, _) = watch::channel(None);
        Self {
            inner: Arc::new(CoreInner {
                devices: parts.devices,
                settings: parts.settings,
                samples: parts.samples,
                sensors: parts.sensors,
                weather: parts.weather,
                calculator: parts.calculator,
                clock: parts.clock,
                options,
                cycle: Mutex::new(CycleMemory::default()),
                last_setpoint: RwLock::new(None),
                alarms,
            }),
            completion: Mutex::new(None),
        }
    }

    /// Startup: load device rows, read the relays back, then either resume a
    /// pending season transition or put valves and overrides in place for
    /// the current season
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        inner.devices.load().await?;

        let _cycle = inner.cycle.lock().await;
        for (id, e) in inner.devices.refresh_states().await {
            warn!(device = %id, error = %e, "Relay not readable at startup");
        }

        let mut settings = inner.settings.get_settings().await?;
        let now = inner.clock.now();
        info!(season = %settings.season, read_only = inner.devices.is_read_only(), "Controller starting");

        if settings.season.is_transitioning() {
            match settings.pending_transition_at {
                Some(due) if due > now => {
                    info!(season = %settings.season, due = %due, "Resuming season transition");
                    self.schedule_completion(due).await;
                }
                _ => {
                    info!(season = %settings.season, "Completing overdue season transition");
                    let errors =
                        season::complete(&inner.devices, inner.settings.as_ref(), &mut settings, now)
                            .await?;
                    for e in errors {
                        warn!(error = %e, "Transition completion step failed");
                    }
                }
            }
            return Ok(());
        }

        inner.align_for(settings.season).await;
        Ok(())
    }

    /// Run one read-compute-act cycle
    pub async fn run_control_cycle(&self) -> Result<CycleReport> {
        let inner = &self.inner;
        let mut memory = inner.cycle.lock().await;
        // checked under the lock: a cycle queued behind a trip must not run
        if let Some(alarm) = self.active_alarm() {
            return Err(PlantError::emergency(format!(
                "control halted since {}: {}",
                alarm.raised_at, alarm.reason
            )));
        }
        let now = inner.clock.now();
        let mut settings = inner.settings.get_settings().await?;
        let mut report = CycleReport::new(now, settings.season);

        if settings.season.is_transitioning()
            && settings.pending_transition_at.map_or(true, |due| due <= now)
        {
            let errors =
                season::complete(&inner.devices, inner.settings.as_ref(), &mut settings, now)
                    .await?;
            report.errors.extend(errors);
            report.actions.push(CycleAction::TransitionCompleted {
                season: settings.season,
            });
            report.season = settings.season;
        }

        for (_, e) in inner.devices.refresh_states().await {
            report.errors.push(e);
        }

        let return_temp = inner.read_return_temp().await;
        let supply_temp = inner.sensors.supply_temp().await.ok();
        let weather = inner.current_weather().await;

        let records = inner.devices.records().await;
        if let Some(reason) = safety::emergency_reason(
            &records,
            settings.season,
            return_temp.as_ref().ok().copied(),
            inner.options.safe_band,
        ) {
            return Err(inner
                .trip(reason, settings.season, return_temp.ok())
                .await);
        }

        let return_temp = return_temp?;
        report.return_temp = Some(return_temp);

        if settings.season.is_transitioning() {
            debug!(season = %settings.season, "Transition in flight, regular control skipped");
            report.skipped = true;
            return Ok(report);
        }

        let (effective, tha) = match inner.setpoint_or_fallback(weather, &settings, now).await {
            Ok(pair) => pair,
            Err(e) => {
                report.errors.push(e);
                report.skipped = true;
                return Ok(report);
            }
        };
        report.effective_setpoint = Some(effective);

        let recent = match inner.samples.recent(2).await {
            Ok(recent) => recent,
            Err(e) => {
                report.errors.push(e);
                Vec::new()
            }
        };
        let previous_return = recent.first().map(|s| s.return_temp);
        let trend = previous_return.map_or(0, |previous| quantize_trend(return_temp - previous));
        let trend_average = (trend as f64 + recent.iter().map(|s| s.trend as f64).sum::<f64>())
            / (1 + recent.len()) as f64;
        report.trend = trend;

        if settings.auto_switch_season {
            if let Some(tha) = tha {
                if let Some(target) = inner.due_switch(return_temp, tha, &settings, now) {
                    match season::begin(
                        &inner.devices,
                        inner.settings.as_ref(),
                        &mut settings,
                        target,
                        now,
                        inner.options.valve_switch_delay,
                    )
                    .await
                    {
                        Ok(due) => {
                            report.actions.push(CycleAction::SeasonSwitchStarted { target });
                            report.season = settings.season;
                            report.skipped = true;
                            self.schedule_completion(due).await;
                            return Ok(report);
                        }
                        Err(e) => report.errors.push(e),
                    }
                }
            }
        }

        match settings.season {
            Season::Winter => {
                inner
                    .winter_step(&mut memory, effective, return_temp, &settings, &mut report)
                    .await
            }
            Season::Summer => {
                let inputs = cascade::CascadeInputs {
                    return_temp,
                    previous_return,
                    effective_setpoint: effective,
                    tolerance: settings.tolerance,
                    trend,
                    trend_average,
                    dwell: settings.cascade_dwell_time,
                    now,
                };
                inner.summer_step(&inputs, &mut report).await
            }
            _ => {}
        }

        if let Some(weather) = weather {
            inner
                .record_sample(now, weather, effective, return_temp, supply_temp, trend, &mut report)
                .await;
        }

        info!(
            season = %report.season,
            setpoint = effective,
            return_temp = return_temp,
            trend = trend,
            actions = report.actions.len(),
            errors = report.errors.len(),
            "Control cycle complete"
        );
        Ok(report)
    }

    /// Setpoint of the latest cycle, or a fresh computation before the first
    pub async fn effective_setpoint(&self) -> Result<f64> {
        if let Some(setpoint) = *self.inner.last_setpoint.read().await {
            return Ok(setpoint);
        }
        let settings = self.inner.settings.get_settings().await?;
        let weather = self.inner.current_weather().await;
        let now = self.inner.clock.now();
        self.inner
            .setpoint_or_fallback(weather, &settings, now)
            .await
            .map(|(effective, _)| effective)
    }

    pub async fn device_state(&self, id: DeviceId) -> DeviceSnapshot {
        self.inner.devices.snapshot(id).await
    }

    pub async fn device_states(&self) -> Vec<DeviceSnapshot> {
        self.inner
            .devices
            .records()
            .await
            .iter()
            .map(|r| r.snapshot())
            .collect()
    }

    /// Set a device's override; forced modes switch the output at once and
    /// pass the interlocks first
    pub async fn set_manual_override(&self, id: DeviceId, mode: ManualOverride) -> Result<()> {
        let _cycle = self.inner.cycle.lock().await;
        let settings = self.inner.settings.get_settings().await?;
        if settings.season.is_transitioning() && !id.is_valve() {
            return Err(PlantError::invalid_input(format!(
                "cannot change {id} override during {}",
                settings.season
            )));
        }
        self.inner
            .devices
            .set_manual_override(id, mode, settings.season)
            .await
    }

    /// Start a switch to `target` unless the lockout is still running
    pub async fn request_season_switch(&self, target: Season) -> Result<SwitchOutcome> {
        if target.is_transitioning() {
            return Err(PlantError::invalid_input(format!(
                "cannot request {target}; ask for WINTER or SUMMER"
            )));
        }
        let inner = &self.inner;
        let _cycle = inner.cycle.lock().await;
        if let Some(alarm) = self.active_alarm() {
            return Err(PlantError::emergency(alarm.reason));
        }
        let mut settings = inner.settings.get_settings().await?;
        if settings.season.is_transitioning() {
            return Err(PlantError::invalid_input(format!(
                "season change already in progress ({})",
                settings.season
            )));
        }
        if settings.season == target {
            debug!(season = %target, "Already in requested season");
            return Ok(SwitchOutcome {
                started: false,
                locked: false,
                remaining_lockout: Duration::ZERO,
            });
        }

        let now = inner.clock.now();
        let valve_delay = inner.options.valve_switch_delay;
        if let Some(remaining) = season::remaining_lockout(&settings, valve_delay, now) {
            info!(target = %target, remaining_secs = remaining.as_secs(), "Season switch locked out");
            return Ok(SwitchOutcome {
                started: false,
                locked: true,
                remaining_lockout: remaining,
            });
        }

        let due = season::begin(
            &inner.devices,
            inner.settings.as_ref(),
            &mut settings,
            target,
            now,
            valve_delay,
        )
        .await?;
        self.schedule_completion(due).await;
        Ok(SwitchOutcome {
            started: true,
            locked: false,
            remaining_lockout: Duration::ZERO,
        })
    }

    /// Merge a settings patch; the season itself only changes by switching
    ///
    /// Waits for a running cycle, which may store the season bookkeeping.
    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let _cycle = self.inner.cycle.lock().await;
        let settings = self.inner.settings.update_settings(patch).await?;
        info!(min = settings.setpoint_min, max = settings.setpoint_max, "Settings updated");
        Ok(settings)
    }

    pub async fn settings(&self) -> Result<Settings> {
        self.inner.settings.get_settings().await
    }

    /// History averages over the trailing `window`; zero where no sample
    /// recorded a value
    pub async fn efficiency(&self, window: Duration) -> Result<Efficiency> {
        let samples = &self.inner.samples;
        let now = self.inner.clock.now();
        let return_avg = samples
            .trailing_average(SampleField::ReturnTemp, window, now)
            .await?;
        let setpoint_avg = samples
            .trailing_average(SampleField::EffectiveSetpoint, window, now)
            .await?;
        let running = samples
            .trailing_average(SampleField::ChillersRunning, window, now)
            .await?;
        let fire_rate = samples
            .trailing_average(SampleField::CascadePower, window, now)
            .await?;

        let average_temperature_difference = match (return_avg, setpoint_avg) {
            (Some(ret), Some(setpoint)) => ret - setpoint,
            _ => 0.0,
        };
        Ok(Efficiency {
            window,
            average_temperature_difference,
            chiller_duty: running.unwrap_or(0.0) / ChillerSlot::ALL.len() as f64,
            cascade_fire_rate_avg: fire_rate.unwrap_or(0.0),
        })
    }

    pub async fn boiler_stats(&self) -> Result<BoilerStats> {
        self.inner.devices.fieldbus()?.read_boiler_stats().await
    }

    pub async fn boiler_status(&self) -> Result<OperatingStatus> {
        self.inner.devices.fieldbus()?.read_operating_status().await
    }

    pub async fn set_boiler_setpoint(&self, fahrenheit: f64) -> Result<()> {
        self.inner.devices.set_boiler_setpoint(fahrenheit).await
    }

    pub async fn temperature_limits(&self) -> Result<TemperatureLimits> {
        self.inner.devices.fieldbus()?.temperature_limits().await
    }

    pub async fn set_temperature_limits(&self, min: f64, max: f64) -> Result<()> {
        self.inner.devices.set_temperature_limits(min, max).await
    }

    /// Receive every change of the emergency latch
    pub fn subscribe_alarms(&self) -> watch::Receiver<Option<EmergencyAlarm>> {
        self.inner.alarms.subscribe()
    }

    pub fn active_alarm(&self) -> Option<EmergencyAlarm> {
        self.inner.alarms.borrow().clone()
    }

    /// Clear the emergency latch so cycles run again
    ///
    /// The shutdown left every output off; valves and forced overrides are
    /// put back for the stored season, and a pending transition is
    /// rescheduled.
    pub async fn reset_emergency(&self) -> Result<()> {
        let inner = &self.inner;
        let _cycle = inner.cycle.lock().await;
        if inner.alarms.borrow().is_none() {
            return Ok(());
        }
        let settings = inner.settings.get_settings().await?;

        if let Some(alarm) = inner.alarms.send_replace(None) {
            info!(reason = %alarm.reason, season = %settings.season, "Emergency latch reset by operator");
        }
        inner.align_for(settings.season).await;
        if let (true, Some(due)) = (
            settings.season.is_transitioning(),
            settings.pending_transition_at,
        ) {
            self.schedule_completion(due).await;
        }
        Ok(())
    }

    /// Wait for a committed season transition to finish
    pub async fn shutdown(&self) {
        let handle = self.completion.lock().await.take();
        if let Some(handle) = handle {
            if !handle.is_finished() {
                info!("Waiting for the season transition to complete");
            }
            if let Err(e) = handle.await {
                error!(error = %e, "Season transition task failed");
            }
        }
        info!("Controller stopped");
    }

    async fn schedule_completion(&self, due: DateTime<Utc>) {
        let inner = Arc::clone(&self.inner);
        let delay = (due - inner.clock.now()).to_std().unwrap_or(Duration::ZERO);
        debug!(delay_secs = delay.as_secs(), "Season transition completion scheduled");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.complete_pending().await;
        });
        *self.completion.lock().await = Some(handle);
    }
}

impl CoreInner {
    /// Valves and forced overrides as `season` calls for them
    async fn align_for(&self, season: Season) {
        if let Err(e) = season::align_valves(&self.devices, season).await {
            log_structured_error!(e, "control", "align_valves");
        }
        for id in DeviceId::ALL {
            if let Err(e) = self
                .devices
                .apply_override_effect(id, CommandTag::Manual, season)
                .await
            {
                warn!(device = %id, error = %e, season = %season, "Override not applied");
            }
        }
    }

    async fn complete_pending(&self) {
        let _cycle = self.cycle.lock().await;
        let latched = self.alarms.borrow().clone();
        if let Some(alarm) = latched {
            warn!(reason = %alarm.reason, "Emergency latched, season transition left pending");
            return;
        }
        let mut settings = match self.settings.get_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                log_structured_error!(e, "control", "complete_transition");
                return;
            }
        };
        match season::complete(&self.devices, self.settings.as_ref(), &mut settings, self.clock.now())
            .await
        {
            Ok(errors) => {
                for e in errors {
                    warn!(error = %e, "Transition completion step failed");
                }
            }
            Err(e) => log_structured_error!(e, "control", "complete_transition"),
        }
    }

    /// Return temperature from the probe, else the latest sample
    async fn read_return_temp(&self) -> Result<f64> {
        match self.sensors.return_temp().await {
            Ok(temp) => Ok(temp),
            Err(e) => {
                let last = self.samples.recent(1).await?;
                match last.first() {
                    Some(sample) => {
                        warn!(error = %e, fallback = sample.return_temp, "Return probe failed, using last sample");
                        Ok(sample.return_temp)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Latest weather, else the conditions of the latest sample
    async fn current_weather(&self) -> Option<WeatherReading> {
        if let Some(reading) = self.weather.get().await {
            return Some(reading);
        }
        let last = self.samples.recent(1).await.ok()?;
        last.first().map(|sample| {
            debug!("No weather yet, using last sample");
            WeatherReading {
                outdoor_temp: sample.outdoor_temp,
                wind_speed: sample.wind_speed,
            }
        })
    }

    async fn compute_setpoint(
        &self,
        weather: Option<WeatherReading>,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<SetpointResult> {
        let outdoor = weather
            .ok_or_else(|| PlantError::sensor("no outdoor temperature available"))?
            .outdoor_temp;
        let average = self
            .samples
            .trailing_average(SampleField::OutdoorTemp, self.options.wind_chill_window, now)
            .await?
            .unwrap_or(outdoor);
        self.calculator
            .compute(outdoor, average, settings.season, settings)
    }

    /// Effective setpoint and, when freshly computed, the THA setpoint;
    /// failures fall back to the last known effective setpoint
    async fn setpoint_or_fallback(
        &self,
        weather: Option<WeatherReading>,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<(f64, Option<f64>)> {
        match self.compute_setpoint(weather, settings, now).await {
            Ok(result) => {
                *self.last_setpoint.write().await = Some(result.effective_setpoint);
                Ok((result.effective_setpoint, Some(result.tha_setpoint)))
            }
            Err(e) => {
                let cached = *self.last_setpoint.read().await;
                let fallback = match cached {
                    Some(setpoint) => Some(setpoint),
                    None => self
                        .samples
                        .recent(1)
                        .await?
                        .first()
                        .map(|s| s.effective_setpoint),
                };
                match fallback {
                    Some(setpoint) => {
                        warn!(error = %e, fallback = setpoint, "Setpoint not computed, reusing last value");
                        Ok((setpoint, None))
                    }
                    None => Err(e),
                }
            }
        }
    }

    fn due_switch(
        &self,
        return_temp: f64,
        tha: f64,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Option<Season> {
        let delay = self.options.valve_switch_delay;
        match settings.season {
            Season::Winter
                if season::is_time_to_switch_to_summer(return_temp, tha, settings, delay, now) =>
            {
                Some(Season::Summer)
            }
            Season::Summer
                if season::is_time_to_switch_to_winter(return_temp, tha, settings, delay, now) =>
            {
                Some(Season::Winter)
            }
            _ => None,
        }
    }

    async fn winter_step(
        &self,
        memory: &mut CycleMemory,
        effective: f64,
        return_temp: f64,
        settings: &Settings,
        report: &mut CycleReport,
    ) {
        let record = self.devices.record(DeviceId::Boiler).await;
        if let Some(on) = boiler::decide(&record, return_temp, effective, settings.tolerance) {
            let tag = match record.manual_override {
                ManualOverride::Auto => CommandTag::Auto,
                _ => CommandTag::Manual,
            };
            match self
                .devices
                .set_state(DeviceId::Boiler, on, tag, Season::Winter)
                .await
            {
                Ok(true) => report.actions.push(CycleAction::Boiler { on }),
                Ok(false) => {}
                Err(e) => report.errors.push(e),
            }
        }

        if self.devices.has_fieldbus()
            && !self.devices.is_read_only()
            && memory.written_setpoint != Some(effective)
        {
            match self.devices.set_boiler_setpoint(effective).await {
                Ok(()) => {
                    memory.written_setpoint = Some(effective);
                    report
                        .actions
                        .push(CycleAction::BoilerSetpoint { fahrenheit: effective });
                }
                Err(e) => report.errors.push(e),
            }
        }
    }

    async fn summer_step(&self, inputs: &cascade::CascadeInputs, report: &mut CycleReport) {
        for id in DeviceId::chillers() {
            let record = self.devices.record(id).await;
            let Some(forced) = record.manual_override.forced_state() else {
                continue;
            };
            if forced == record.on {
                continue;
            }
            match self
                .devices
                .set_state(id, forced, CommandTag::Manual, Season::Summer)
                .await
            {
                Ok(_) => report.actions.push(CycleAction::Chiller { id, on: forced }),
                Err(e) => report.errors.push(e),
            }
        }

        let chillers: Vec<_> = self
            .devices
            .records()
            .await
            .into_iter()
            .filter(|r| r.id.is_chiller())
            .collect();
        let (id, on) = match cascade::decide(&chillers, inputs) {
            Some(cascade::CascadeAction::TurnOn(id)) => (id, true),
            Some(cascade::CascadeAction::TurnOff(id)) => (id, false),
            None => return,
        };
        match self
            .devices
            .set_state(id, on, CommandTag::Auto, Season::Summer)
            .await
        {
            Ok(_) => report.actions.push(CycleAction::Chiller { id, on }),
            Err(e) => report.errors.push(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_sample(
        &self,
        now: DateTime<Utc>,
        weather: WeatherReading,
        effective: f64,
        return_temp: f64,
        supply_temp: Option<f64>,
        trend: i8,
        report: &mut CycleReport,
    ) {
        let stats = match self.devices.fieldbus() {
            Ok(fieldbus) => match fieldbus.read_boiler_stats().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    debug!(error = %e, "Boiler telemetry unavailable");
                    None
                }
            },
            Err(_) => None,
        };

        let records = self.devices.records().await;
        let mut chillers_on = [false; 4];
        for record in records.iter().filter(|r| r.id.is_chiller()) {
            chillers_on[record.id.wire_id() as usize - 1] = record.on;
        }

        let sample = SetpointSample {
            timestamp: now,
            outdoor_temp: weather.outdoor_temp,
            wind_speed: weather.wind_speed,
            effective_setpoint: effective,
            boiler_on: records.iter().any(|r| r.id == DeviceId::Boiler && r.on),
            chillers_on,
            return_temp,
            supply_temp: supply_temp.or_else(|| stats.as_ref().and_then(|s| s.supply_temp)),
            trend,
            cascade_power: stats.as_ref().map(|s| s.cascade_power),
        };
        if let Err(e) = self.samples.append(sample).await {
            report.errors.push(e);
        }
    }

    async fn trip(
        &self,
        reason: String,
        season: Season,
        return_temp: Option<f64>,
    ) -> PlantError {
        let err = PlantError::emergency(reason.clone());
        log_structured_error!(err, "control", "emergency_check");

        for (id, e) in self.devices.all_off().await {
            error!(device = %id, error = %e, "Device not confirmed off");
        }
        self.alarms.send_replace(Some(EmergencyAlarm {
            reason,
            raised_at: self.clock.now(),
            season,
            return_temp,
        }));
        err
    }
}
