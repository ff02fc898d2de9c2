//! Calibration and positioning against the simulated gear train.

use hr20::config::ThermostatConfig;
use hr20::error::ErrorFlag;
use hr20::faults::FaultRegister;
use hr20::motor::{CalibrationStep, Direction, ManualCalibration, MotorEngine, MotorTuning, MountReading};

use crate::mock_hw::{GearTrain, MotorCall, leak_shared};

fn engine(manual: ManualCalibration) -> MotorEngine {
    MotorEngine::new(leak_shared(), MotorTuning::from(&ThermostatConfig::default()), manual)
}

/// Mount the valve and wait out the settle delay; the sixth tick starts
/// the opening drive.
fn mount(m: &mut MotorEngine, gear: &mut GearTrain, f: &mut FaultRegister, reading: MountReading) {
    m.update_calibration(reading, gear, f);
    for _ in 0..5 {
        m.update_calibration(MountReading::Mounted, gear, f);
    }
    assert_eq!(m.step(), CalibrationStep::DrivingOpen);
}

#[test]
fn auto_calibration_measures_full_travel() {
    let mut m = engine(ManualCalibration::Auto);
    let mut gear = GearTrain::new(200, 80);
    let mut f = FaultRegister::new();

    mount(&mut m, &mut gear, &mut f, MountReading::Mounted);
    gear.run_engine(&mut m, &mut f);

    assert_eq!(m.step(), CalibrationStep::Calibrated);
    assert_eq!(m.pos_max(), 200);
    assert_eq!(m.position(), 0);
    assert_eq!(gear.physical, 0, "ends on the closed endstop");
    assert_eq!(m.position_percent(), Some(0));
    assert!(!f.any());

    // Opened first, then closed.
    let drives: Vec<_> = gear
        .calls
        .iter()
        .filter_map(|c| match c {
            MotorCall::Drive(d, _) => Some(*d),
            _ => None,
        })
        .collect();
    assert_eq!(drives, vec![Direction::Open, Direction::Close]);
    assert_eq!(gear.calls.last(), Some(&MotorCall::Eye(false)));
}

#[test]
fn goto_reaches_requested_opening() {
    let mut m = engine(ManualCalibration::Auto);
    let mut gear = GearTrain::new(200, 80);
    let mut f = FaultRegister::new();
    mount(&mut m, &mut gear, &mut f, MountReading::Mounted);
    gear.run_engine(&mut m, &mut f);

    m.goto(50, &mut gear);
    assert_eq!(gear.dir, Some(Direction::Open));
    gear.run_engine(&mut m, &mut f);

    assert_eq!(m.position(), 100);
    assert_eq!(gear.physical, 100);
    assert_eq!(m.position_percent(), Some(50));
    assert_eq!(m.step(), CalibrationStep::Calibrated);

    m.goto(25, &mut gear);
    assert_eq!(gear.dir, Some(Direction::Close));
    gear.run_engine(&mut m, &mut f);
    assert_eq!(m.position(), 50);
    assert_eq!(m.position_percent(), Some(25));
    assert!(!f.any());
}

#[test]
fn full_open_and_back_to_closed() {
    let mut m = engine(ManualCalibration::Auto);
    let mut gear = GearTrain::new(200, 80);
    let mut f = FaultRegister::new();
    mount(&mut m, &mut gear, &mut f, MountReading::Mounted);
    gear.run_engine(&mut m, &mut f);

    m.goto(100, &mut gear);
    assert_eq!(gear.dir, Some(Direction::Open));
    gear.run_engine(&mut m, &mut f);
    assert_eq!(m.position(), 200);
    assert_eq!(gear.physical, 200);
    assert_eq!(m.position_percent(), Some(100));

    m.goto(0, &mut gear);
    assert_eq!(gear.dir, Some(Direction::Close));
    gear.run_engine(&mut m, &mut f);
    assert_eq!(m.position(), 0);
    assert_eq!(gear.physical, 0);
    assert_eq!(m.position_percent(), Some(0));

    assert_eq!(m.step(), CalibrationStep::Calibrated);
    assert_eq!(m.pos_max(), 200);
    assert!(!f.any());
}

#[test]
fn goto_at_target_does_not_move() {
    let mut m = engine(ManualCalibration::Auto);
    let mut gear = GearTrain::new(200, 80);
    let mut f = FaultRegister::new();
    mount(&mut m, &mut gear, &mut f, MountReading::Mounted);
    gear.run_engine(&mut m, &mut f);
    let calls = gear.calls.len();

    m.goto(0, &mut gear);
    assert_eq!(gear.calls.len(), calls);
    assert_eq!(m.direction(), Direction::Stop);
}

#[test]
fn stored_travel_skips_the_closing_drive() {
    let mut m = engine(ManualCalibration::Stored(150));
    let mut gear = GearTrain::new(200, 80);
    let mut f = FaultRegister::new();
    mount(&mut m, &mut gear, &mut f, MountReading::Mounted);
    gear.run_engine(&mut m, &mut f);

    assert_eq!(m.step(), CalibrationStep::Calibrated);
    assert_eq!(m.pos_max(), 150);
    assert_eq!(gear.physical, 200, "stays at the open endstop");
    assert!(
        !gear
            .calls
            .iter()
            .any(|c| matches!(c, MotorCall::Drive(Direction::Close, _)))
    );
}

#[test]
fn key_c_measures_and_stores_travel() {
    let mut m = engine(ManualCalibration::Auto);
    let mut gear = GearTrain::new(180, 0);
    let mut f = FaultRegister::new();
    mount(&mut m, &mut gear, &mut f, MountReading::MountedKeyC);
    gear.run_engine(&mut m, &mut f);

    assert_eq!(m.step(), CalibrationStep::Calibrated);
    assert_eq!(m.pos_max(), 180);
    assert_eq!(m.take_manual_change(), Some(ManualCalibration::Stored(180)));
    assert_eq!(m.take_manual_change(), None);
}

#[test]
fn key_prog_restores_automatic_calibration() {
    let mut m = engine(ManualCalibration::Stored(150));
    let mut gear = GearTrain::new(200, 80);
    let mut f = FaultRegister::new();
    mount(&mut m, &mut gear, &mut f, MountReading::MountedKeyProg);
    assert_eq!(m.take_manual_change(), Some(ManualCalibration::Auto));

    gear.run_engine(&mut m, &mut f);
    assert_eq!(m.pos_max(), 200);
}

#[test]
fn short_travel_is_a_motor_error() {
    let mut m = engine(ManualCalibration::Auto);
    let mut gear = GearTrain::new(60, 0);
    let mut f = FaultRegister::new();
    mount(&mut m, &mut gear, &mut f, MountReading::Mounted);
    gear.run_engine(&mut m, &mut f);

    assert_eq!(m.step(), CalibrationStep::Error);
    assert!(f.contains(ErrorFlag::Motor));

    // Unmounting clears the error and starts over.
    assert!(m.update_calibration(MountReading::Unmounted, &mut gear, &mut f));
    assert_eq!(m.step(), CalibrationStep::Uncalibrated);
    assert!(!f.contains(ErrorFlag::Motor));
}

#[test]
fn speed_regulation_runs_on_pulses() {
    let mut m = engine(ManualCalibration::Auto);
    let mut gear = GearTrain::new(200, 80);
    let mut f = FaultRegister::new();
    mount(&mut m, &mut gear, &mut f, MountReading::Mounted);
    gear.run_engine(&mut m, &mut f);

    // A 400-tick period is faster than the configured speed: the duty
    // steps down by at most 10 per pulse, after the first two pulses.
    let steps: Vec<u8> = gear
        .calls
        .iter()
        .filter_map(|c| match c {
            MotorCall::SetPwm(p) => Some(*p),
            _ => None,
        })
        .take(3)
        .collect();
    assert_eq!(steps, vec![240, 230, 220]);
    assert_eq!(m.pwm(), 32, "settles at the minimum duty");
}
