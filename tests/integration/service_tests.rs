//! Integration tests for the RTC → controller → motor pipeline.
//!
//! Each test drives a complete [`ThermostatService`] one second at a time
//! against the mock valve, the software clock and the host NVS store.

use hr20::app::commands::AppCommand;
use hr20::app::events::AppEvent;
use hr20::app::ports::{ClockPort, ConfigPort, WallTime};
use hr20::config::ThermostatConfig;
use hr20::control::ModeChange;
use hr20::error::ErrorFlag;
use hr20::events::Task;
use hr20::motor::{CalibrationStep, MountReading};

use crate::mock_hw::Rig;

/// Monday noon.
const MONDAY_NOON: WallTime = WallTime {
    year: 24,
    month: 1,
    day: 1,
    hour: 12,
    minute: 0,
    second: 0,
};

fn rig() -> Rig {
    Rig::new(ThermostatConfig::default(), MONDAY_NOON)
}

// ── Tick sequencing ───────────────────────────────────────────

#[test]
fn rtc_requests_a_measurement_while_the_motor_stands() {
    let mut rig = rig();
    assert_eq!(rig.dispatch(Task::Rtc), Some(Task::Adc));
    assert_eq!(rig.dispatch(Task::Adc), None);
    assert_eq!(rig.valve.measurements, 1);
    assert_eq!(rig.svc.inputs().battery_mv, 2900);
    assert_eq!(rig.clock.now().second, 1);
    assert_eq!(rig.svc.tick_count(), 1);
}

#[test]
fn calibration_starts_six_ticks_after_the_battery_is_known() {
    let mut rig = rig();

    // No battery reading yet: the motor is left alone.
    rig.second();
    assert_eq!(rig.svc.motor().step(), CalibrationStep::Uncalibrated);

    rig.seconds(5);
    assert_eq!(rig.svc.motor().step(), CalibrationStep::Pending);
    assert!(!rig.valve.motor_running());

    rig.second();
    assert_eq!(rig.svc.motor().step(), CalibrationStep::DrivingOpen);
    assert!(rig.valve.motor_running());
    assert!(rig.valve.gear.eye);

    // A moving motor suppresses the follow-up measurement.
    assert_eq!(rig.dispatch(Task::Rtc), None);

    let steps: Vec<_> = rig
        .sink
        .events
        .iter()
        .filter_map(|e| match e {
            AppEvent::CalibrationChanged { step, .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec![CalibrationStep::Pending, CalibrationStep::DrivingOpen]);
}

#[test]
fn first_pid_run_follows_the_startup_delay() {
    let mut rig = rig();
    rig.seconds(16);
    assert_eq!(rig.sink.count(|e| matches!(e, AppEvent::ValveCommanded { .. })), 0);

    rig.second();
    let commanded = rig
        .sink
        .events
        .iter()
        .find_map(|e| match e {
            AppEvent::ValveCommanded { setpoint, .. } => Some(*setpoint),
            _ => None,
        });
    // Monday noon falls into the 9:00 program, preset 1.
    assert_eq!(commanded, Some(34));
    assert_eq!(rig.svc.controller().wanted(), 34);
}

// ── Configuration persistence ─────────────────────────────────

#[test]
fn mode_change_is_saved_after_five_quiet_ticks() {
    let mut rig = rig();
    rig.second();
    rig.command(AppCommand::ChangeMode(ModeChange::Set(false)));
    assert!(rig.svc.is_config_dirty());

    rig.seconds(4);
    assert!(!rig.sink.contains(&AppEvent::ConfigSaved));

    rig.second();
    assert!(rig.sink.contains(&AppEvent::ConfigSaved));
    assert!(!rig.svc.is_config_dirty());

    let stored = rig.nvs.load().expect("saved config loads");
    assert_eq!(&stored, rig.svc.config());
    assert_eq!(stored.manual_temperature(), 34);
}

#[test]
fn reload_keeps_the_radio_address() {
    let mut config = ThermostatConfig::default();
    config.rfm_devaddr = 5;
    let mut rig = Rig::new(config, MONDAY_NOON);

    let mut next = ThermostatConfig::default();
    next.rfm_devaddr = 9;
    next.valve_max = 70;
    rig.command(AppCommand::ReloadConfig(next));

    assert_eq!(rig.svc.config().rfm_devaddr, 5);
    assert_eq!(rig.svc.config().valve_max, 70);
    assert!(rig.svc.is_config_dirty());
}

#[test]
fn reload_sanitizes_out_of_range_fields() {
    let mut rig = rig();
    let mut next = ThermostatConfig::default();
    next.motor_speed_ctl_gain = 0;
    rig.command(AppCommand::ReloadConfig(next));
    assert_eq!(
        rig.svc.config().motor_speed_ctl_gain,
        ThermostatConfig::default().motor_speed_ctl_gain
    );
}

// ── Faults ────────────────────────────────────────────────────

#[test]
fn unmounting_raises_the_mounting_fault_once() {
    let mut rig = rig();
    rig.seconds(3);
    rig.valve.mount = MountReading::Unmounted;
    rig.seconds(4);

    assert!(rig.svc.faults().contains(ErrorFlag::Mounting));
    assert_eq!(rig.sink.count(|e| *e == AppEvent::FaultRaised(ErrorFlag::Mounting)), 1);
    assert_eq!(rig.svc.motor().step(), CalibrationStep::Uncalibrated);

    rig.valve.mount = MountReading::Mounted;
    rig.second();
    assert!(!rig.svc.faults().contains(ErrorFlag::Mounting));
    assert!(rig.sink.contains(&AppEvent::FaultCleared(ErrorFlag::Mounting)));
}

#[test]
fn weak_battery_raises_warning_then_low() {
    let mut rig = rig();
    rig.valve.battery_mv = 2300;
    rig.seconds(2);
    assert!(rig.svc.faults().contains(ErrorFlag::BatteryWarning));
    assert!(!rig.svc.faults().contains(ErrorFlag::BatteryLow));

    rig.valve.battery_mv = 1900;
    rig.seconds(2);
    assert!(rig.svc.faults().contains(ErrorFlag::BatteryLow));

    // Reversible by default.
    rig.valve.battery_mv = 2900;
    rig.seconds(2);
    assert!(!rig.svc.faults().any());
}

// ── Weekly valve protection ───────────────────────────────────

fn protection_rig(day: u8) -> Rig {
    Rig::new(
        ThermostatConfig::default(),
        WallTime {
            year: 24,
            month: 1,
            day,
            hour: 9,
            minute: 59,
            second: 50,
        },
    )
}

#[test]
fn saturday_ten_oclock_recalibrates() {
    let mut rig = protection_rig(6);
    rig.seconds(7);
    assert_eq!(rig.svc.motor().step(), CalibrationStep::DrivingOpen);

    // 10:00:00 on the tenth tick.
    rig.seconds(3);
    assert_eq!(rig.clock.now().minute_of_day(), 600);
    assert_eq!(rig.svc.motor().step(), CalibrationStep::Pending);
    assert!(!rig.valve.motor_running());
}

#[test]
fn friday_ten_oclock_leaves_the_motor_alone() {
    let mut rig = protection_rig(5);
    rig.seconds(10);
    assert_eq!(rig.svc.motor().step(), CalibrationStep::DrivingOpen);
    assert!(rig.valve.motor_running());
}

#[test]
fn recalibrate_command_restarts_calibration() {
    let mut rig = rig();
    rig.seconds(7);
    assert_eq!(rig.svc.motor().step(), CalibrationStep::DrivingOpen);

    rig.command(AppCommand::Recalibrate);
    assert_eq!(rig.svc.motor().step(), CalibrationStep::Uncalibrated);
    assert!(!rig.valve.motor_running());
}
