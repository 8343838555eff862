//! plant-control - season-aware boiler/chiller plant controller
//!
//! Subcommands:
//! - `run`: drive the plant hardware (serial relay board, Modbus boiler)
//! - `simulate`: drive a simulated plant in accelerated time
//! - `check-config`: load, validate and print the configuration

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use plant_control::{
    clock::{Clock, SystemClock},
    config::PlantConfig,
    control::{
        controller::{CoreOptions, CoreParts},
        ControlCore, CycleReport, Season, SetpointCalculator, SetpointTable,
    },
    devices::{
        DeviceManager, FieldBusBoiler, OneWireSensors, RegisterLink, RelayBoard, RelayLink,
        WaterSensors,
    },
    error_recovery::{ChannelGuard, RetryPolicy},
    logging::{init_logging, LogConfig},
    log_structured_error,
    mock::{ManualClock, MockRegisterLink, MockRelayLink, MockWaterSensors, MockWeather, ThermalModel},
    services::{DeviceStore, SampleStore, Settings, SettingsStore},
    storage::{JsonDeviceStore, JsonSettingsStore, MemoryDeviceStore, MemorySampleStore, MemorySettingsStore},
    weather::{spawn_poller, HttpWeatherSource, LastKnownWeather},
    PlantError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "plant-control")]
#[command(about = "Season-aware boiler/chiller plant controller")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML)
    #[arg(long, short, global = true, env = "PLANT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the controller against the plant hardware
    Run {
        /// Refuse every hardware write
        #[arg(long, env = "PLANT_READ_ONLY")]
        read_only: bool,
    },
    /// Run the controller against a simulated plant
    Simulate {
        /// Outdoor temperature (°F)
        #[arg(long, default_value_t = 40.0)]
        outdoor: f64,

        /// Initial return-water temperature (°F)
        #[arg(long, default_value_t = 95.0)]
        return_temp: f64,

        /// Starting season (winter or summer)
        #[arg(long, default_value = "winter")]
        season: Season,

        /// Let the controller switch seasons on its own
        #[arg(long)]
        auto_switch: bool,

        /// Number of cycles to run
        #[arg(long, default_value_t = 120)]
        cycles: u32,

        /// Wall-clock pause between simulated cycles, in milliseconds
        #[arg(long, default_value_t = 50)]
        tick_ms: u64,
    },
    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PlantConfig::load(cli.config.as_deref())?;

    let mut log_config = LogConfig::from_config(&config.logging);
    if cli.debug {
        log_config.level = Level::DEBUG;
    }
    init_logging(log_config).map_err(|e| anyhow!("cannot initialize logging: {e}"))?;

    match cli.command {
        Command::Run { read_only } => run(config, read_only).await,
        Command::Simulate {
            outdoor,
            return_temp,
            season,
            auto_switch,
            cycles,
            tick_ms,
        } => {
            simulate(
                config,
                SimulationArgs {
                    outdoor,
                    return_temp,
                    season,
                    auto_switch,
                    cycles,
                    tick: Duration::from_millis(tick_ms),
                },
            )
            .await
        }
        Command::CheckConfig => check_config(&config).await,
    }
}

async fn check_config(config: &PlantConfig) -> anyhow::Result<()> {
    load_calculator(config).await?;
    let rendered = toml::to_string_pretty(config).context("cannot render configuration")?;
    println!("{rendered}");
    info!("Configuration is valid");
    Ok(())
}

async fn load_calculator(config: &PlantConfig) -> plant_control::Result<SetpointCalculator> {
    let table = match &config.control.setpoint_table {
        Some(path) => {
            info!(path = %path.display(), "Loading setpoint table");
            SetpointTable::load(path).await?
        }
        None => SetpointTable::default(),
    };
    Ok(SetpointCalculator::new(table))
}

/// Hardware-independent pieces the core is assembled from
struct Wiring {
    relay: Arc<dyn RelayLink>,
    registers: Option<Arc<dyn RegisterLink>>,
    sensors: Arc<dyn WaterSensors>,
    settings: Arc<dyn SettingsStore>,
    devices: Arc<dyn DeviceStore>,
    samples: Arc<dyn SampleStore>,
    weather: LastKnownWeather,
    clock: Arc<dyn Clock>,
    read_only: bool,
}

async fn build_core(config: &PlantConfig, wiring: Wiring) -> plant_control::Result<ControlCore> {
    let guard = Arc::new(ChannelGuard::new(&config.reliability));
    let relays = RelayBoard::new(wiring.relay, guard.clone());
    let fieldbus = wiring.registers.map(|link| {
        FieldBusBoiler::new(
            link,
            guard.clone(),
            RetryPolicy::fieldbus(
                config.reliability.fieldbus_max_retries,
                config.reliability.fieldbus_retry_delay,
            ),
            (
                config.fieldbus.hard_min_setpoint,
                config.fieldbus.hard_max_setpoint,
            ),
        )
    });

    let devices = DeviceManager::new(
        relays,
        fieldbus,
        wiring.devices,
        wiring.clock.clone(),
        wiring.read_only,
    );
    let parts = CoreParts {
        devices,
        settings: wiring.settings,
        samples: wiring.samples,
        sensors: wiring.sensors,
        weather: wiring.weather,
        calculator: load_calculator(config).await?,
        clock: wiring.clock,
    };
    Ok(ControlCore::new(parts, CoreOptions::from_config(&config.control)))
}

#[cfg(feature = "hardware")]
fn hardware_links(
    config: &PlantConfig,
) -> plant_control::Result<(Arc<dyn RelayLink>, Option<Arc<dyn RegisterLink>>)> {
    use plant_control::devices::hardware::{ModbusRegisterLink, SerialRelayLink};

    let relay: Arc<dyn RelayLink> = Arc::new(SerialRelayLink::open(&config.serial)?);
    let registers = if config.fieldbus.enabled {
        Some(Arc::new(ModbusRegisterLink::new(config.fieldbus.clone())) as Arc<dyn RegisterLink>)
    } else {
        info!("Field bus disabled");
        None
    };
    Ok((relay, registers))
}

#[cfg(not(feature = "hardware"))]
fn hardware_links(
    _config: &PlantConfig,
) -> plant_control::Result<(Arc<dyn RelayLink>, Option<Arc<dyn RegisterLink>>)> {
    Err(PlantError::config(
        "built without the `hardware` feature; use `simulate`",
    ))
}

async fn run(config: PlantConfig, read_only: bool) -> anyhow::Result<()> {
    let read_only = read_only || config.read_only;
    let (relay, registers) = hardware_links(&config)?;

    let cancel = CancellationToken::new();
    let weather = LastKnownWeather::new();
    let poller = match HttpWeatherSource::new(&config.weather) {
        Ok(source) => Some(spawn_poller(
            Arc::new(source),
            weather.clone(),
            &config.weather,
            cancel.clone(),
        )),
        Err(e) => {
            warn!(error = %e, "No weather feed; setpoints fall back to stored history");
            None
        }
    };

    let wiring = Wiring {
        relay,
        registers,
        sensors: Arc::new(OneWireSensors::new(&config.sensors)),
        settings: Arc::new(JsonSettingsStore::open(config.settings_path()).await?),
        devices: Arc::new(JsonDeviceStore::open(config.devices_path()).await?),
        samples: Arc::new(MemorySampleStore::new(config.storage.max_samples)),
        weather,
        clock: Arc::new(SystemClock),
        read_only,
    };
    let core = Arc::new(build_core(&config, wiring).await?);
    core.initialize().await?;

    spawn_alarm_watch(&core, cancel.clone());
    spawn_ctrl_c(cancel.clone());

    info!(interval_secs = config.control.cycle_interval.as_secs(), "Control loop started");
    drive(&core, config.control.cycle_interval, &cancel, None, |_| {}).await;

    cancel.cancel();
    if let Some(poller) = poller {
        let _ = poller.await;
    }
    core.shutdown().await;
    Ok(())
}

struct SimulationArgs {
    outdoor: f64,
    return_temp: f64,
    season: Season,
    auto_switch: bool,
    cycles: u32,
    tick: Duration,
}

async fn simulate(config: PlantConfig, args: SimulationArgs) -> anyhow::Result<()> {
    let relay = Arc::new(MockRelayLink::new());
    let sensors = Arc::new(MockWaterSensors::new(args.return_temp, args.return_temp + 5.0));
    let feed = MockWeather::new(args.outdoor, 5.0);
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let weather = LastKnownWeather::new();
    weather.refresh(&feed).await?;

    let settings = Settings {
        season: args.season,
        auto_switch_season: args.auto_switch,
        ..Settings::default()
    };
    let wiring = Wiring {
        relay: relay.clone(),
        registers: config
            .fieldbus
            .enabled
            .then(|| Arc::new(MockRegisterLink::new()) as Arc<dyn RegisterLink>),
        sensors: sensors.clone(),
        settings: Arc::new(MemorySettingsStore::new(settings)),
        devices: Arc::new(MemoryDeviceStore::new()),
        samples: Arc::new(MemorySampleStore::new(config.storage.max_samples)),
        weather,
        clock: clock.clone(),
        read_only: false,
    };
    let core = Arc::new(build_core(&config, wiring).await?);
    core.initialize().await?;

    let cancel = CancellationToken::new();
    spawn_alarm_watch(&core, cancel.clone());
    spawn_ctrl_c(cancel.clone());

    let model = ThermalModel::default();
    let cycle = config.control.cycle_interval;
    let mut return_temp = args.return_temp;
    info!(cycles = args.cycles, season = %args.season, "Simulation started");

    drive(&core, args.tick, &cancel, Some(args.cycles), |report| {
        return_temp = model.step(return_temp, args.outdoor, &relay);
        sensors.set_return(return_temp);
        clock.advance(cycle);
        info!(
            season = %report.season,
            setpoint = ?report.effective_setpoint,
            return_temp = ?report.return_temp,
            actions = ?report.actions,
            "Simulated cycle"
        );
    })
    .await;

    cancel.cancel();
    let states = core.device_states().await;
    println!("{}", serde_json::to_string_pretty(&states)?);
    let efficiency = core.efficiency(config.control.efficiency_window).await?;
    println!("{}", serde_json::to_string_pretty(&efficiency)?);
    Ok(())
}

/// Run cycles every `period` until cancelled or `max_cycles` is reached
async fn drive<F>(
    core: &ControlCore,
    period: Duration,
    cancel: &CancellationToken,
    max_cycles: Option<u32>,
    mut after_cycle: F,
) where
    F: FnMut(&CycleReport),
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut completed = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match core.run_control_cycle().await {
                    Ok(report) => {
                        for e in &report.errors {
                            warn!(error = %e, "Cycle step failed");
                        }
                        after_cycle(&report);
                    }
                    Err(PlantError::EmergencyShutdown(reason)) => {
                        error!(reason = %reason, "Plant halted, waiting for operator reset");
                    }
                    Err(e) => log_structured_error!(e, "main", "run_control_cycle"),
                }
                completed += 1;
                if max_cycles.is_some_and(|max| completed >= max) {
                    break;
                }
            }
        }
    }
}

/// Surface emergency alarms on the log until cancelled
fn spawn_alarm_watch(core: &Arc<ControlCore>, cancel: CancellationToken) {
    let mut alarms = core.subscribe_alarms();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = alarms.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let alarm = alarms.borrow_and_update().clone();
                    match alarm {
                        Some(alarm) => error!(
                            reason = %alarm.reason,
                            season = %alarm.season,
                            return_temp = ?alarm.return_temp,
                            "EMERGENCY SHUTDOWN"
                        ),
                        None => info!("Emergency cleared"),
                    }
                }
            }
        }
    });
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        cancel.cancel();
    });
}
