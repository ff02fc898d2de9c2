//! Valve motor drive and self-calibration.
//!
//! The valve stem is driven by a DC motor through an H-bridge.  A photo
//! eye on the gear train is the only position sensor; endstops are found
//! by stalling against them.
//!
//! Task-context logic lives in [`MotorEngine`]; everything touched by the
//! eye and timer interrupts lives in [`MotorShared`](eye::MotorShared).

pub mod calibration;
pub mod eye;

pub use calibration::{CalibrationStep, ManualCalibration, MountReading};
pub use eye::{EyeThresholds, MotorShared, MotorSnapshot};

use log::{error, info};

use crate::app::ports::MotorBridge;
use crate::config::ThermostatConfig;
use crate::error::ErrorFlag;
use crate::faults::FaultRegister;

/// Eye and stall counters of the board's valve motor.
pub static MOTOR_SHARED: MotorShared = MotorShared::new();

/// Calibration target beyond any physical travel.
pub const MAX_IMPULSES: i16 = 1000;
/// Shortest travel accepted as a real valve.
pub const MIN_IMPULSES: i16 = 100;
/// Pulses skipped by speed regulation after a direction change.
pub const IGNORE_IMPULSES: u8 = 2;
/// Control ticks between mounting and the first calibration drive.
pub const CALIBRATION_SETTLE_TICKS: u8 = 5;

/// H-bridge drive direction.  The discriminant is the counting sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum Direction {
    Close = -1,
    Stop = 0,
    Open = 1,
}

/// Motor tunables, copied out of the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorTuning {
    pub pwm_min: u8,
    pub pwm_max: u8,
    pub eye_low: u8,
    pub eye_high: u8,
    pub close_eye_timeout: u8,
    pub end_detect_cal: u8,
    pub end_detect_run: u8,
    pub speed: u8,
    pub speed_ctl_gain: u8,
    pub pwm_max_step: u8,
}

impl From<&ThermostatConfig> for MotorTuning {
    fn from(c: &ThermostatConfig) -> Self {
        Self {
            pwm_min: c.motor_pwm_min,
            pwm_max: c.motor_pwm_max,
            eye_low: c.motor_eye_low,
            eye_high: c.motor_eye_high,
            close_eye_timeout: c.motor_close_eye_timeout,
            end_detect_cal: c.motor_end_detect_cal,
            end_detect_run: c.motor_end_detect_run,
            speed: c.motor_speed,
            speed_ctl_gain: c.motor_speed_ctl_gain,
            pwm_max_step: c.motor_pwm_max_step,
        }
    }
}

impl MotorTuning {
    fn thresholds(&self) -> EyeThresholds {
        EyeThresholds {
            eye_low: self.eye_low,
            eye_high: self.eye_high,
            close_eye_timeout: self.close_eye_timeout,
        }
    }
}

/// Task-context half of the motor.
pub struct MotorEngine {
    shared: &'static MotorShared,
    tuning: MotorTuning,
    dir: Direction,
    pos_max: i16,
    step: CalibrationStep,
    settle: u8,
    diag_ignore: u8,
    pwm: u8,
    manual: ManualCalibration,
    manual_changed: bool,
}

impl MotorEngine {
    pub fn new(shared: &'static MotorShared, tuning: MotorTuning, manual: ManualCalibration) -> Self {
        Self {
            shared,
            tuning,
            dir: Direction::Stop,
            pos_max: 0,
            step: CalibrationStep::Uncalibrated,
            settle: CALIBRATION_SETTLE_TICKS,
            diag_ignore: IGNORE_IMPULSES,
            pwm: tuning.pwm_max,
            manual,
            manual_changed: false,
        }
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn step(&self) -> CalibrationStep {
        self.step
    }

    pub fn is_calibrated(&self) -> bool {
        self.step == CalibrationStep::Calibrated
    }

    /// Full travel in pulses; 0 until calibrated.
    pub fn pos_max(&self) -> i16 {
        self.pos_max
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    pub fn pwm(&self) -> u8 {
        self.pwm
    }

    pub fn position(&self) -> i16 {
        self.shared.position()
    }

    pub fn shared(&self) -> &'static MotorShared {
        self.shared
    }

    pub fn manual_calibration(&self) -> ManualCalibration {
        self.manual
    }

    /// Calibration hint changed since the last call and must be persisted.
    pub fn take_manual_change(&mut self) -> Option<ManualCalibration> {
        core::mem::take(&mut self.manual_changed).then_some(self.manual)
    }

    /// Valve opening in percent, `None` until calibrated.
    pub fn position_percent(&self) -> Option<u8> {
        if !self.is_calibrated() {
            return None;
        }
        let pos = i32::from(self.shared.position());
        let pct = pos * 10 / (i32::from(self.pos_max) / 10);
        Some(pct.clamp(0, 100) as u8)
    }

    /// Wire form of [`position_percent`](Self::position_percent): 255 when
    /// uncalibrated.
    pub fn wire_position_percent(&self) -> u8 {
        self.position_percent().unwrap_or(255)
    }

    pub fn set_tuning(&mut self, tuning: MotorTuning) {
        self.tuning = tuning;
    }

    // ── Commands ──────────────────────────────────────────────

    /// Move toward `percent` open.  Ignored until calibrated and while the
    /// eye is still powered from the previous move.
    pub fn goto<B: MotorBridge + ?Sized>(&mut self, percent: u8, bridge: &mut B) {
        if !self.is_calibrated() || self.shared.eye_active() {
            return;
        }
        let stop = match percent.min(100) {
            100 => self.pos_max,
            0 => 0,
            p => (i32::from(p) * i32::from(self.pos_max >> 2) / 25) as i16,
        };
        self.shared.set_stop(stop);

        let snap = self.shared.snapshot();
        let (pos, tolerance) = (i32::from(snap.position), i32::from(snap.overshoot));
        if pos > i32::from(stop) + tolerance {
            self.control(Direction::Close, bridge);
        } else if pos < i32::from(stop) - tolerance {
            self.control(Direction::Open, bridge);
        }
    }

    /// Advance calibration by one control tick.
    ///
    /// Returns `true` when the valve was found unmounted; the controller
    /// must then block and re-credit its integrator.
    pub fn update_calibration<B: MotorBridge + ?Sized>(
        &mut self,
        mount: MountReading,
        bridge: &mut B,
        faults: &mut FaultRegister,
    ) -> bool {
        if mount == MountReading::Unmounted {
            self.control(Direction::Stop, bridge);
            self.shared.reset_position();
            self.pos_max = 0;
            if self.step != CalibrationStep::Uncalibrated {
                info!("motor: valve unmounted, calibration reset");
            }
            self.step = CalibrationStep::Uncalibrated;
            self.settle = CALIBRATION_SETTLE_TICKS;
            faults.clear(ErrorFlag::Motor);
            return true;
        }

        if self.settle != 0 {
            self.settle -= 1;
        } else if self.step == CalibrationStep::Pending {
            self.step = CalibrationStep::DrivingOpen;
            self.shared.set_stop(MAX_IMPULSES);
            self.control(Direction::Open, bridge);
            info!("motor: calibration drive to open endstop");
        }

        if self.step == CalibrationStep::Uncalibrated {
            match mount {
                MountReading::MountedKeyProg => self.set_manual(ManualCalibration::Auto, true),
                // One-shot request; only the measured result is stored.
                MountReading::MountedKeyC => self.set_manual(ManualCalibration::Measure, false),
                _ => {}
            }
            self.step = CalibrationStep::Pending;
        }
        false
    }

    /// Closed-loop speed regulation, once per accepted eye pulse.
    pub fn timer_pulse<B: MotorBridge + ?Sized>(&mut self, bridge: &mut B) {
        if self.diag_ignore != 0 {
            self.diag_ignore -= 1;
            return;
        }
        let period = (i32::from(self.shared.diag()) + 4) >> 3;
        let step = i32::from(self.tuning.pwm_max_step);
        let chg = ((period - i32::from(self.tuning.speed)) * i32::from(self.tuning.speed_ctl_gain) / 100)
            .clamp(-step, step);
        self.set_pwm(i32::from(self.pwm) + chg, bridge);
    }

    /// The bridge was cut by an ISR: decide what the stop means.
    pub fn timer_stop<B: MotorBridge + ?Sized>(&mut self, bridge: &mut B, faults: &mut FaultRegister) {
        let d = self.dir;
        self.control(Direction::Stop, bridge);
        let snap = self.shared.snapshot();

        if snap.timer > 0 {
            // Target reached.
            if self.step != CalibrationStep::Calibrated {
                self.fail("stopped on target during calibration", faults);
            }
        } else if d == Direction::Open {
            let a = snap.position;
            if self.step == CalibrationStep::DrivingOpen {
                self.pos_max = a;
                match self.manual {
                    ManualCalibration::Measure => {
                        if a >= MIN_IMPULSES {
                            self.set_manual(ManualCalibration::Stored(a as u16), true);
                            self.finish_calibration();
                        } else {
                            self.fail("measured travel too short", faults);
                        }
                    }
                    ManualCalibration::Stored(n) => {
                        self.pos_max = i16::try_from(n).unwrap_or(i16::MAX);
                        self.finish_calibration();
                    }
                    ManualCalibration::Auto => {
                        self.shared.set_stop(a - MAX_IMPULSES);
                        self.control(Direction::Close, bridge);
                        self.step = CalibrationStep::DrivingClose;
                    }
                }
            } else {
                self.shared.set_position(self.pos_max);
            }
        } else if d == Direction::Close {
            if self.step == CalibrationStep::DrivingClose {
                self.pos_max -= snap.position;
                self.finish_calibration();
            } else if snap.position > MIN_IMPULSES {
                self.fail("closed endstop far from zero", faults);
            }
            self.shared.set_position(0);
        }

        if self.step == CalibrationStep::Calibrated && self.pos_max < MIN_IMPULSES {
            self.fail("travel below minimum", faults);
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn control<B: MotorBridge + ?Sized>(&mut self, dir: Direction, bridge: &mut B) {
        if dir == Direction::Stop {
            bridge.stop();
            self.shared.halt();
            self.dir = Direction::Stop;
            return;
        }
        if self.dir == dir {
            return;
        }
        self.dir = dir;
        self.diag_ignore = IGNORE_IMPULSES;
        let end_detect = if self.is_calibrated() {
            self.tuning.end_detect_run
        } else {
            self.tuning.end_detect_cal
        };
        let budget = (u16::from(self.tuning.speed) * u16::from(end_detect) / 100) << 3;
        self.shared.arm(dir, budget, self.tuning.thresholds());
        bridge.eye_power(true);
        self.pwm = self.tuning.pwm_max.max(self.tuning.pwm_min);
        bridge.drive(dir, self.pwm);
    }

    fn set_pwm<B: MotorBridge + ?Sized>(&mut self, pwm: i32, bridge: &mut B) {
        let lo = i32::from(self.tuning.pwm_min);
        let hi = i32::from(self.tuning.pwm_max);
        self.pwm = pwm.min(hi).max(lo) as u8;
        bridge.set_pwm(self.pwm);
    }

    fn set_manual(&mut self, manual: ManualCalibration, persist: bool) {
        if self.manual != manual {
            self.manual = manual;
            self.manual_changed |= persist;
        }
    }

    fn finish_calibration(&mut self) {
        self.step = CalibrationStep::Calibrated;
        info!("motor: calibrated, travel {} pulses", self.pos_max);
    }

    fn fail(&mut self, why: &str, faults: &mut FaultRegister) {
        error!("motor: calibration error ({why})");
        self.step = CalibrationStep::Error;
        faults.set(ErrorFlag::Motor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TaskQueue;

    #[derive(Default)]
    struct Bridge {
        dir: Option<Direction>,
        pwm: u8,
        eye: bool,
    }

    impl MotorBridge for Bridge {
        fn drive(&mut self, dir: Direction, pwm: u8) {
            self.dir = Some(dir);
            self.pwm = pwm;
        }
        fn set_pwm(&mut self, pwm: u8) {
            self.pwm = pwm;
        }
        fn stop(&mut self) {
            self.dir = None;
        }
        fn eye_power(&mut self, on: bool) {
            self.eye = on;
        }
    }

    fn engine(manual: ManualCalibration) -> MotorEngine {
        let shared: &'static MotorShared = Box::leak(Box::new(MotorShared::new()));
        MotorEngine::new(shared, MotorTuning::from(&ThermostatConfig::default()), manual)
    }

    /// Let the stall timer expire and the eye power down.
    fn stall(m: &MotorEngine, b: &mut Bridge, q: &TaskQueue) {
        for _ in 0..40_000 {
            m.shared().on_timer_tick(b, q);
        }
    }

    fn mounted_ticks(m: &mut MotorEngine, b: &mut Bridge, f: &mut FaultRegister, n: usize) {
        for _ in 0..n {
            m.update_calibration(MountReading::Mounted, b, f);
        }
    }

    #[test]
    fn starts_uncalibrated_with_sentinel_percent() {
        let m = engine(ManualCalibration::Auto);
        assert_eq!(m.step(), CalibrationStep::Uncalibrated);
        assert_eq!(m.position_percent(), None);
        assert_eq!(m.wire_position_percent(), 255);
    }

    #[test]
    fn calibration_drives_open_after_settle_delay() {
        let mut m = engine(ManualCalibration::Auto);
        let mut b = Bridge::default();
        let mut f = FaultRegister::new();

        mounted_ticks(&mut m, &mut b, &mut f, 1);
        assert_eq!(m.step(), CalibrationStep::Pending);
        mounted_ticks(&mut m, &mut b, &mut f, 4);
        assert_eq!(m.step(), CalibrationStep::Pending);
        assert_eq!(b.dir, None);
        mounted_ticks(&mut m, &mut b, &mut f, 1);
        assert_eq!(m.step(), CalibrationStep::DrivingOpen);
        assert_eq!(b.dir, Some(Direction::Open));
        assert_eq!(b.pwm, 250);
        assert!(b.eye);
    }

    #[test]
    fn stored_travel_is_adopted_at_open_endstop() {
        let mut m = engine(ManualCalibration::Stored(420));
        let mut b = Bridge::default();
        let mut f = FaultRegister::new();
        let q = TaskQueue::new();
        mounted_ticks(&mut m, &mut b, &mut f, 6);

        stall(&m, &mut b, &q);
        m.timer_stop(&mut b, &mut f);

        assert_eq!(m.step(), CalibrationStep::Calibrated);
        assert_eq!(m.pos_max(), 420);
        assert!(!f.any());
    }

    #[test]
    fn short_measured_travel_is_an_error() {
        let mut m = engine(ManualCalibration::Auto);
        let mut b = Bridge::default();
        let mut f = FaultRegister::new();
        let q = TaskQueue::new();
        m.update_calibration(MountReading::MountedKeyC, &mut b, &mut f);
        assert_eq!(m.manual_calibration(), ManualCalibration::Measure);
        assert_eq!(m.take_manual_change(), None);
        mounted_ticks(&mut m, &mut b, &mut f, 5);

        // No pulses at all: stalls at position 0.
        stall(&m, &mut b, &q);
        m.timer_stop(&mut b, &mut f);

        assert_eq!(m.step(), CalibrationStep::Error);
        assert!(f.contains(ErrorFlag::Motor));
    }

    #[test]
    fn unmount_resets_and_requests_controller_reset() {
        let mut m = engine(ManualCalibration::Stored(420));
        let mut b = Bridge::default();
        let mut f = FaultRegister::new();
        f.set(ErrorFlag::Motor);
        mounted_ticks(&mut m, &mut b, &mut f, 6);

        assert!(m.update_calibration(MountReading::Unmounted, &mut b, &mut f));
        assert_eq!(m.step(), CalibrationStep::Uncalibrated);
        assert_eq!(m.pos_max(), 0);
        assert_eq!(m.direction(), Direction::Stop);
        assert!(!f.contains(ErrorFlag::Motor));
    }

    #[test]
    fn goto_is_ignored_until_calibrated() {
        let mut m = engine(ManualCalibration::Auto);
        let mut b = Bridge::default();
        m.goto(50, &mut b);
        assert_eq!(b.dir, None);
    }

    #[test]
    fn speed_regulation_skips_first_pulses_and_clamps_step() {
        let mut m = engine(ManualCalibration::Auto);
        let mut b = Bridge::default();
        let mut f = FaultRegister::new();
        mounted_ticks(&mut m, &mut b, &mut f, 6);
        let start = m.pwm();

        m.timer_pulse(&mut b);
        m.timer_pulse(&mut b);
        assert_eq!(m.pwm(), start);

        // diag = 0 means a very fast motor: slow down by the max step.
        m.timer_pulse(&mut b);
        assert_eq!(m.pwm(), start - 10);
        assert_eq!(b.pwm, start - 10);
    }
}
