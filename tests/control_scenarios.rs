//! End-to-end control cycles over the simulated plant

mod common;

use common::{chiller, sample, start_time, TestPlant};
use plant_control::control::{CycleAction, SwitchOutcome};
use plant_control::devices::fieldbus::{fahrenheit_to_register, holding};
use plant_control::devices::{BackupSnapshot, DeviceId, DeviceRecord, ManualOverride};
use plant_control::services::{SampleStore, Settings, SettingsPatch};
use plant_control::{PlantError, Season};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn winter() -> Settings {
    Settings {
        season: Season::Winter,
        ..Settings::default()
    }
}

fn summer() -> Settings {
    Settings {
        season: Season::Summer,
        setpoint_min: 55.0,
        setpoint_max: 55.0,
        tolerance: 2.0,
        cascade_dwell_time: Duration::from_secs(15 * 60),
        ..Settings::default()
    }
}

fn cold_morning() -> Settings {
    Settings {
        setpoint_min: 90.0,
        setpoint_max: 140.0,
        tolerance: 2.0,
        setpoint_offset_winter: 10.0,
        ..winter()
    }
}

#[tokio::test]
async fn test_winter_cycle_starts_boiler_below_band() {
    let plant = TestPlant::builder()
        .settings(cold_morning())
        .outdoor(5.0)
        .return_temp(90.0)
        .start()
        .await;

    let report = plant.core.run_control_cycle().await.unwrap();

    // baseline 100 below wind chill 11, no adjustment, +10 winter offset
    assert_eq!(report.effective_setpoint, Some(110.0));
    assert_eq!(report.actions, vec![CycleAction::Boiler { on: true }]);
    assert!(report.is_clean(), "{:?}", report.error_messages());
    assert!(plant.relay(DeviceId::Boiler));
    assert!(plant.relay(DeviceId::WINTER_VALVE));
    assert_eq!(plant.samples.len().await, 1);
    assert_eq!(plant.core.effective_setpoint().await.unwrap(), 110.0);
}

#[tokio::test]
async fn test_winter_cycle_stops_boiler_above_band() {
    let settings = Settings {
        setpoint_min: 60.0,
        setpoint_max: 80.0,
        ..winter()
    };
    let plant = TestPlant::builder()
        .settings(settings)
        .outdoor(5.0)
        .return_temp(83.0)
        .running(DeviceId::Boiler, 30)
        .start()
        .await;

    let report = plant.core.run_control_cycle().await.unwrap();

    assert_eq!(report.effective_setpoint, Some(80.0));
    assert_eq!(report.actions, vec![CycleAction::Boiler { on: false }]);
    assert!(!plant.relay(DeviceId::Boiler));
}

#[tokio::test]
async fn test_boiler_holds_inside_band() {
    let plant = TestPlant::builder()
        .settings(winter())
        .return_temp(99.0)
        .running(DeviceId::Boiler, 30)
        .start()
        .await;

    let report = plant.core.run_control_cycle().await.unwrap();
    assert_eq!(report.effective_setpoint, Some(100.0));
    assert!(report.actions.is_empty());
    assert!(plant.relay(DeviceId::Boiler));
}

#[tokio::test]
async fn test_both_valves_open_trips_emergency() {
    let plant = TestPlant::builder()
        .settings(winter())
        .running(DeviceId::Boiler, 30)
        .start()
        .await;
    let mut alarms = plant.core.subscribe_alarms();

    // hardware fault: the summer valve comes on behind the controller's back
    plant.relays.set_relay(DeviceId::SUMMER_VALVE, true);

    let err = plant.core.run_control_cycle().await.unwrap_err();
    assert!(matches!(err, PlantError::EmergencyShutdown(_)));
    for id in DeviceId::ALL {
        assert!(!plant.relay(id), "{id} still on");
    }

    alarms.changed().await.unwrap();
    let alarm = alarms.borrow().clone().unwrap();
    assert!(alarm.reason.contains("both seasonal valves"));
    assert_eq!(alarm.season, Season::Winter);

    // latched until an operator resets it
    assert!(matches!(
        plant.core.run_control_cycle().await,
        Err(PlantError::EmergencyShutdown(_))
    ));
    assert!(matches!(
        plant.core.request_season_switch(Season::Summer).await,
        Err(PlantError::EmergencyShutdown(_))
    ));

    plant.core.reset_emergency().await.unwrap();
    assert!(plant.core.active_alarm().is_none());
    // the winter valve is open again before the boiler may fire
    assert!(plant.relay(DeviceId::WINTER_VALVE));
    assert!(!plant.relay(DeviceId::SUMMER_VALVE));

    let report = plant.core.run_control_cycle().await.unwrap();
    assert_eq!(report.actions, vec![CycleAction::Boiler { on: true }]);
    assert!(plant.relay(DeviceId::WINTER_VALVE));
}

#[tokio::test]
async fn test_return_outside_safe_band_trips() {
    let plant = TestPlant::builder()
        .settings(winter())
        .return_temp(111.0)
        .start()
        .await;

    let err = plant.core.run_control_cycle().await.unwrap_err();
    assert!(matches!(err, PlantError::EmergencyShutdown(_)));
    let alarm = plant.core.active_alarm().unwrap();
    assert_eq!(alarm.return_temp, Some(111.0));
    assert!(!plant.relay(DeviceId::WINTER_VALVE));
}

#[tokio::test]
async fn test_summer_cascade_turns_off_oldest_running_chiller() {
    let plant = TestPlant::builder()
        .settings(summer())
        .outdoor(85.0)
        .return_temp(51.0)
        .running(chiller(1), 60)
        .running(chiller(2), 30)
        .running(chiller(3), 20)
        .running(DeviceId::SUMMER_VALVE, 600)
        .sample(sample(1, 85.0, 52.0, -1))
        .start()
        .await;
    let before = plant.stored(chiller(2)).await;

    let report = plant.core.run_control_cycle().await.unwrap();

    assert_eq!(report.effective_setpoint, Some(55.0));
    assert_eq!(report.trend, -1);
    assert_eq!(
        report.actions,
        vec![CycleAction::Chiller {
            id: chiller(1),
            on: false
        }]
    );
    assert!(!plant.relay(chiller(1)));
    assert!(plant.relay(chiller(2)));
    assert!(plant.relay(chiller(3)));
    assert!(!plant.relay(chiller(4)));
    assert_eq!(plant.stored(chiller(2)).await, before);
}

#[tokio::test]
async fn test_summer_cascade_starts_chiller_when_warming() {
    let plant = TestPlant::builder()
        .settings(summer())
        .outdoor(85.0)
        .return_temp(60.0)
        .sample(sample(1, 85.0, 58.0, 1))
        .start()
        .await;

    let report = plant.core.run_control_cycle().await.unwrap();

    // nothing ever switched: wire order breaks the tie
    assert_eq!(
        report.actions,
        vec![CycleAction::Chiller {
            id: chiller(1),
            on: true
        }]
    );
    assert_eq!(
        plant.core.device_state(chiller(1)).await.switched_at,
        Some(plant.now())
    );

    // dwell time not yet passed
    plant.clock.advance(Duration::from_secs(60));
    let report = plant.core.run_control_cycle().await.unwrap();
    assert!(report.actions.is_empty());
}

#[tokio::test]
async fn test_forced_chiller_is_driven_in_summer() {
    let plant = TestPlant::builder()
        .settings(summer())
        .outdoor(85.0)
        .return_temp(55.0)
        .running(DeviceId::SUMMER_VALVE, 600)
        .device(DeviceRecord {
            manual_override: ManualOverride::ForceOn,
            ..DeviceRecord::new(chiller(3))
        })
        .build()
        .await;
    plant.core.initialize().await.unwrap();

    // startup applies the stored override
    assert!(plant.relay(chiller(3)));
}

#[tokio::test]
async fn test_interlocks_refuse_wrong_season_overrides() {
    let plant = TestPlant::builder().settings(winter()).start().await;

    let err = plant
        .core
        .set_manual_override(chiller(1), ManualOverride::ForceOn)
        .await
        .unwrap_err();
    assert!(matches!(err, PlantError::InterlockViolation(_)));
    let state = plant.core.device_state(chiller(1)).await;
    assert_eq!(state.manual_override, ManualOverride::Auto);
    assert!(!state.state);

    let err = plant
        .core
        .set_manual_override(DeviceId::SUMMER_VALVE, ManualOverride::ForceOn)
        .await
        .unwrap_err();
    assert!(matches!(err, PlantError::InterlockViolation(_)));
    assert!(!plant.relay(DeviceId::SUMMER_VALVE));
}

#[tokio::test]
async fn test_boiler_refused_in_summer() {
    let plant = TestPlant::builder()
        .settings(summer())
        .outdoor(85.0)
        .return_temp(55.0)
        .start()
        .await;

    let err = plant
        .core
        .set_manual_override(DeviceId::Boiler, ManualOverride::ForceOn)
        .await
        .unwrap_err();
    assert!(matches!(err, PlantError::InterlockViolation(_)));
    assert!(!plant.relay(DeviceId::Boiler));
}

#[tokio::test]
async fn test_force_off_pins_boiler() {
    let plant = TestPlant::builder()
        .settings(winter())
        .return_temp(70.0)
        .running(DeviceId::Boiler, 30)
        .start()
        .await;

    plant
        .core
        .set_manual_override(DeviceId::Boiler, ManualOverride::ForceOff)
        .await
        .unwrap();
    assert!(!plant.relay(DeviceId::Boiler));

    // far below the band, still off
    let report = plant.core.run_control_cycle().await.unwrap();
    assert!(report.actions.is_empty());
    assert!(!plant.relay(DeviceId::Boiler));

    plant
        .core
        .set_manual_override(DeviceId::Boiler, ManualOverride::Auto)
        .await
        .unwrap();
    plant.clock.advance(Duration::from_secs(60));
    let report = plant.core.run_control_cycle().await.unwrap();
    assert_eq!(report.actions, vec![CycleAction::Boiler { on: true }]);
}

#[tokio::test]
async fn test_season_switch_parks_plant_and_completes() {
    let plant = TestPlant::builder()
        .settings(winter())
        .running(DeviceId::Boiler, 45)
        .start()
        .await;
    let boiler_before = plant.stored(DeviceId::Boiler).await;

    let outcome = plant
        .core
        .request_season_switch(Season::Summer)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SwitchOutcome {
            started: true,
            locked: false,
            remaining_lockout: Duration::ZERO,
        }
    );

    assert_eq!(plant.season().await, Season::TransitioningToSummer);
    assert!(!plant.relay(DeviceId::Boiler));
    assert!(!plant.relay(DeviceId::WINTER_VALVE));
    assert!(plant.relay(DeviceId::SUMMER_VALVE));
    let commands = plant.relays.commands().await;
    assert_eq!(
        commands[commands.len() - 3..].to_vec(),
        vec!["relay off 0", "relay off 5", "relay on 6"]
    );

    let boiler = plant.stored(DeviceId::Boiler).await;
    assert_eq!(boiler.manual_override, ManualOverride::ForceOff);
    assert_eq!(
        boiler.backup,
        Some(BackupSnapshot {
            on: true,
            manual_override: ManualOverride::Auto,
            switched_at: boiler_before.switched_at,
        })
    );

    // valves still swinging
    let report = plant.core.run_control_cycle().await.unwrap();
    assert!(report.skipped);
    assert!(report.actions.is_empty());
    assert!(matches!(
        plant
            .core
            .set_manual_override(DeviceId::Boiler, ManualOverride::Auto)
            .await,
        Err(PlantError::InvalidInput(_))
    ));
    assert!(matches!(
        plant.core.request_season_switch(Season::Winter).await,
        Err(PlantError::InvalidInput(_))
    ));

    plant.clock.advance(Duration::from_secs(121));
    let report = plant.core.run_control_cycle().await.unwrap();
    assert_eq!(
        report.actions.first(),
        Some(&CycleAction::TransitionCompleted {
            season: Season::Summer
        })
    );

    let settings = plant.core.settings().await.unwrap();
    assert_eq!(settings.season, Season::Summer);
    assert_eq!(settings.mode_switch_timestamp, Some(plant.now()));
    assert_eq!(settings.pending_transition_at, None);
    // boiler stays parked until winter returns
    assert!(plant.stored(DeviceId::Boiler).await.backup.is_some());

    let outcome = plant
        .core
        .request_season_switch(Season::Winter)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SwitchOutcome {
            started: false,
            locked: true,
            remaining_lockout: Duration::from_secs(3600 + 120),
        }
    );
}

#[tokio::test]
async fn test_switch_to_current_season_is_a_no_op() {
    let plant = TestPlant::builder().settings(winter()).start().await;

    let outcome = plant
        .core
        .request_season_switch(Season::Winter)
        .await
        .unwrap();
    assert!(!outcome.started);
    assert!(!outcome.locked);

    assert!(matches!(
        plant
            .core
            .request_season_switch(Season::TransitioningToSummer)
            .await,
        Err(PlantError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_automatic_switch_when_return_runs_hot() {
    let settings = Settings {
        auto_switch_season: true,
        ..winter()
    };
    // winter setpoint 100, change delta 5
    let plant = TestPlant::builder()
        .settings(settings)
        .return_temp(106.0)
        .start()
        .await;

    let report = plant.core.run_control_cycle().await.unwrap();
    assert_eq!(
        report.actions,
        vec![CycleAction::SeasonSwitchStarted {
            target: Season::Summer
        }]
    );
    assert_eq!(report.season, Season::TransitioningToSummer);
    assert!(plant.relay(DeviceId::SUMMER_VALVE));
}

fn parked_boiler(switched_at: chrono::DateTime<chrono::Utc>) -> DeviceRecord {
    DeviceRecord {
        on: false,
        manual_override: ManualOverride::ForceOff,
        switched_at: Some(switched_at),
        backup: Some(BackupSnapshot {
            on: true,
            manual_override: ManualOverride::Auto,
            switched_at: Some(switched_at),
        }),
        ..DeviceRecord::new(DeviceId::Boiler)
    }
}

#[tokio::test]
async fn test_restart_completes_overdue_transition() {
    let start = start_time();
    let switched_at = start - chrono::Duration::days(120);
    let settings = Settings {
        season: Season::TransitioningToWinter,
        pending_transition_at: Some(start - chrono::Duration::minutes(1)),
        ..Settings::default()
    };

    let plant = TestPlant::builder()
        .settings(settings)
        .device(parked_boiler(switched_at))
        .overridden(chiller(2), ManualOverride::ForceOff)
        .running(DeviceId::WINTER_VALVE, 3)
        .start()
        .await;

    let settings = plant.core.settings().await.unwrap();
    assert_eq!(settings.season, Season::Winter);
    assert_eq!(settings.pending_transition_at, None);

    let boiler = plant.stored(DeviceId::Boiler).await;
    assert!(plant.relay(DeviceId::Boiler));
    assert_eq!(boiler.manual_override, ManualOverride::Auto);
    assert_eq!(boiler.switched_at, Some(switched_at));
    assert_eq!(boiler.backup, None);
    assert_eq!(
        plant.core.device_state(chiller(2)).await.manual_override,
        ManualOverride::ForceOff
    );
}

#[tokio::test(start_paused = true)]
async fn test_restart_resumes_pending_transition() {
    let start = start_time();
    let settings = Settings {
        season: Season::TransitioningToWinter,
        pending_transition_at: Some(start + chrono::Duration::seconds(60)),
        ..Settings::default()
    };

    let plant = TestPlant::builder()
        .settings(settings)
        .device(parked_boiler(start - chrono::Duration::days(120)))
        .running(DeviceId::WINTER_VALVE, 1)
        .start()
        .await;
    assert_eq!(plant.season().await, Season::TransitioningToWinter);
    assert!(!plant.relay(DeviceId::Boiler));

    // shutdown waits out the committed transition
    plant.core.shutdown().await;

    assert_eq!(plant.season().await, Season::Winter);
    assert!(plant.relay(DeviceId::Boiler));
}

#[tokio::test]
async fn test_read_only_refuses_writes() {
    let plant = TestPlant::builder()
        .settings(winter())
        .return_temp(70.0)
        .read_only()
        .start()
        .await;
    let writes = plant.relays.write_count();

    let report = plant.core.run_control_cycle().await.unwrap();
    assert!(report
        .errors
        .iter()
        .any(|e| matches!(e, PlantError::ReadOnly(_))));
    assert!(!plant.relay(DeviceId::Boiler));

    assert!(matches!(
        plant
            .core
            .set_manual_override(DeviceId::Boiler, ManualOverride::ForceOn)
            .await,
        Err(PlantError::ReadOnly(_))
    ));
    assert_eq!(plant.relays.write_count(), writes);
}

#[tokio::test]
async fn test_return_sensor_failure_falls_back_to_last_sample() {
    let plant = TestPlant::builder()
        .settings(winter())
        .return_temp(99.0)
        .start()
        .await;
    plant.core.run_control_cycle().await.unwrap();

    plant.sensors.set_failing(true);
    plant.clock.advance(Duration::from_secs(60));
    let report = plant.core.run_control_cycle().await.unwrap();
    assert_eq!(report.return_temp, Some(99.0));
}

#[tokio::test]
async fn test_return_sensor_failure_without_history_fails_cycle() {
    let plant = TestPlant::builder().settings(winter()).start().await;
    plant.sensors.set_failing(true);

    let err = plant.core.run_control_cycle().await.unwrap_err();
    assert!(matches!(err, PlantError::Sensor(_)));
    assert!(plant.core.active_alarm().is_none());
}

#[tokio::test]
async fn test_missing_weather_skips_control() {
    let plant = TestPlant::builder()
        .settings(winter())
        .no_weather()
        .return_temp(70.0)
        .start()
        .await;

    let report = plant.core.run_control_cycle().await.unwrap();
    assert!(report.skipped);
    assert_eq!(report.effective_setpoint, None);
    assert!(!report.is_clean());
    assert!(!plant.relay(DeviceId::Boiler));
}

#[tokio::test]
async fn test_fieldbus_setpoint_written_once_per_change() {
    let plant = TestPlant::builder()
        .settings(cold_morning())
        .outdoor(5.0)
        .return_temp(109.0)
        .fieldbus()
        .start()
        .await;
    let registers = plant.registers.clone().unwrap();

    let report = plant.core.run_control_cycle().await.unwrap();
    assert!(report
        .actions
        .contains(&CycleAction::BoilerSetpoint { fahrenheit: 110.0 }));
    assert_eq!(
        registers.holding_value(holding::SETPOINT),
        Some(fahrenheit_to_register(110.0))
    );

    let latest = plant.samples.recent(1).await.unwrap();
    assert_eq!(latest[0].cascade_power, Some(40.0));
    assert_eq!(latest[0].supply_temp, Some(119.0));

    plant.clock.advance(Duration::from_secs(60));
    let report = plant.core.run_control_cycle().await.unwrap();
    assert!(!report
        .actions
        .iter()
        .any(|a| matches!(a, CycleAction::BoilerSetpoint { .. })));

    let stats = plant.core.boiler_stats().await.unwrap();
    // register resolution is a tenth of a degree Celsius
    assert!((stats.current_setpoint - 110.0).abs() < 0.2);
    assert!(stats.flame);
}

#[tokio::test]
async fn test_boiler_queries_without_fieldbus() {
    let plant = TestPlant::builder().settings(winter()).start().await;
    assert!(matches!(
        plant.core.boiler_stats().await,
        Err(PlantError::NotConnected(_))
    ));
    assert!(matches!(
        plant.core.set_boiler_setpoint(120.0).await,
        Err(PlantError::NotConnected(_))
    ));
}

/// A chiller parked for the winter that was running when summer ended
fn wintering_chiller(n: u8) -> DeviceRecord {
    let switched_at = start_time() - chrono::Duration::days(100);
    DeviceRecord {
        on: false,
        manual_override: ManualOverride::ForceOff,
        switched_at: Some(switched_at),
        backup: Some(BackupSnapshot {
            on: true,
            manual_override: ManualOverride::Auto,
            switched_at: Some(switched_at),
        }),
        ..DeviceRecord::new(chiller(n))
    }
}

#[tokio::test(start_paused = true)]
async fn test_emergency_holds_pending_transition_until_reset() {
    let plant = TestPlant::builder()
        .settings(winter())
        .device(wintering_chiller(1))
        .start()
        .await;
    plant
        .core
        .request_season_switch(Season::Summer)
        .await
        .unwrap();

    plant.sensors.set_return(120.0);
    let err = plant.core.run_control_cycle().await.unwrap_err();
    assert!(matches!(err, PlantError::EmergencyShutdown(_)));

    // the deferred completion comes due while the alarm is latched
    plant.core.shutdown().await;
    assert_eq!(plant.season().await, Season::TransitioningToSummer);
    assert!(!plant.relay(chiller(1)));
    assert!(plant.stored(chiller(1)).await.backup.is_some());

    plant.sensors.set_return(50.0);
    plant.core.reset_emergency().await.unwrap();
    assert!(plant.relay(DeviceId::SUMMER_VALVE));
    assert!(!plant.relay(DeviceId::WINTER_VALVE));
    assert!(!plant.relay(chiller(1)));

    plant.core.shutdown().await;
    assert_eq!(plant.season().await, Season::Summer);
    assert!(plant.relay(chiller(1)));
    assert!(plant.core.active_alarm().is_none());
}

#[tokio::test]
async fn test_reset_without_alarm_changes_nothing() {
    let plant = TestPlant::builder().settings(winter()).start().await;
    let writes = plant.relays.write_count();

    plant.core.reset_emergency().await.unwrap();
    assert_eq!(plant.relays.write_count(), writes);
}

#[tokio::test]
async fn test_failed_switch_rolls_back_parked_plant() {
    let plant = TestPlant::builder().settings(winter()).start().await;
    assert!(plant.relay(DeviceId::WINTER_VALVE));

    plant.relays.set_failing(true);
    let result = plant.core.request_season_switch(Season::Summer).await;
    assert!(matches!(result, Err(PlantError::DeviceComm(_))));

    let settings = plant.core.settings().await.unwrap();
    assert_eq!(settings.season, Season::Winter);
    assert_eq!(settings.pending_transition_at, None);
    for id in std::iter::once(DeviceId::Boiler).chain((1..=4).map(chiller)) {
        let stored = plant.stored(id).await;
        assert_eq!(stored.manual_override, ManualOverride::Auto, "{id}");
        assert_eq!(stored.backup, None, "{id}");
    }

    // heating carries on once the relays answer again
    plant.relays.set_failing(false);
    let report = plant.core.run_control_cycle().await.unwrap();
    assert_eq!(report.actions, vec![CycleAction::Boiler { on: true }]);
    assert!(plant.relay(DeviceId::WINTER_VALVE));
}

#[tokio::test]
async fn test_settings_update_waits_for_transition_completion() {
    let plant = TestPlant::builder()
        .settings(winter())
        .device(wintering_chiller(1))
        .start()
        .await;
    plant
        .core
        .request_season_switch(Season::Summer)
        .await
        .unwrap();
    plant.clock.advance(Duration::from_secs(121));

    // slow relays keep the completion in flight while the patch arrives
    plant.relays.set_delay(Duration::from_millis(50));
    let patch = SettingsPatch {
        tolerance: Some(7.0),
        ..SettingsPatch::default()
    };
    let (report, updated) = tokio::join!(
        plant.core.run_control_cycle(),
        plant.core.update_settings(patch)
    );

    assert!(report.unwrap().actions.contains(&CycleAction::TransitionCompleted {
        season: Season::Summer
    }));
    assert_eq!(updated.unwrap().tolerance, 7.0);
    let stored = plant.core.settings().await.unwrap();
    assert_eq!(stored.season, Season::Summer);
    assert_eq!(stored.tolerance, 7.0);
    assert!(plant.relay(chiller(1)));
}

#[tokio::test]
async fn test_efficiency_averages_recent_history() {
    let mut cooling = sample(30, 85.0, 60.0, 1);
    cooling.chillers_on = [true, true, false, false];
    let mut firing = sample(10, 85.0, 58.0, -1);
    firing.chillers_on = [true, false, false, false];
    firing.cascade_power = Some(40.0);
    // outside the window
    let mut stale = sample(13 * 60, 85.0, 200.0, 0);
    stale.chillers_on = [true; 4];
    stale.cascade_power = Some(100.0);

    let plant = TestPlant::builder()
        .settings(summer())
        .sample(stale)
        .sample(cooling)
        .sample(firing)
        .build()
        .await;

    let efficiency = plant
        .core
        .efficiency(Duration::from_secs(12 * 3600))
        .await
        .unwrap();
    // returns average 59 against a 55 setpoint
    assert_eq!(efficiency.average_temperature_difference, 4.0);
    assert_eq!(efficiency.chiller_duty, 0.375);
    assert_eq!(efficiency.cascade_fire_rate_avg, 40.0);

    let empty = TestPlant::builder().build().await;
    let efficiency = empty
        .core
        .efficiency(Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(efficiency.average_temperature_difference, 0.0);
    assert_eq!(efficiency.chiller_duty, 0.0);
    assert_eq!(efficiency.cascade_fire_rate_avg, 0.0);
}
