//! Setpoint selection and valve scheduling.
//!
//! Runs once per second from the RTC task.  The controller decides *when*
//! the PID law runs and *which* setpoint it sees; [`ValvePid`] decides the
//! opening.
//!
//! ```text
//!   schedule type ──┐                     ┌── window open ──▶ frost
//!   manual temp  ───┴──▶ wanted ──────────┤
//!                                         └── > TEMP_MAX  ──▶ valve_max
//!                                                  │
//!   force countdown / poll interval ──▶ ValvePid ──┴──▶ valve_wanted
//! ```

use log::{debug, info};

use super::pid::{BoostPolicy, PidGains, PidInput, ValvePid};
use super::window::{Detector, WindowDetector, WindowInput};
use super::{calc_temp, VALVE_HISTORY_LEN};
use crate::config::{ThermostatConfig, TEMP_MAX, TEMP_MIN};
use crate::error::ErrorFlag;
use crate::faults::FaultRegister;
use crate::sensors::AVERAGE_LEN;

/// First PID run and first forced update happen this many ticks after
/// start, once the temperature ring has filled.
const STARTUP_DELAY: u8 = AVERAGE_LEN as u8 + 1;
/// Ticks between a manual change and the resulting PID run.
const MANUAL_CHANGE_DELAY: u8 = 9;
/// Ticks between a remote setpoint and the resulting PID run.
const REMOTE_CHANGE_DELAY: u8 = 10;

/// Mode change request from the keys or a remote command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChange {
    /// Flip auto/manual, remembering the schedule type for `Revoke`.
    Toggle,
    /// Undo the last `Toggle`.
    Revoke,
    /// Force auto (`true`) or manual (`false`).
    Set(bool),
    /// Keep the mode, close the window, update now.
    CloseWindow,
}

/// Per-tick sensor readings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlInputs {
    /// Averaged room temperature, 1/100 °C.
    pub temperature: i16,
    /// Averaged battery voltage, mV; 0 while unknown.
    pub battery_mv: u16,
    pub contact_open: bool,
}

/// Result of one controller tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    /// The PID law ran and produced this opening.
    pub valve: Option<u8>,
    /// The window state changed.
    pub window_changed: bool,
}

pub struct ValveController {
    wanted: u8,
    wanted_last: Option<u8>,
    auto_type: Option<u8>,
    revoke_type: Option<u8>,
    auto_mode: bool,
    window: u8,
    update_timeout: u16,
    /// Ticks until a forced PID run; `None` when nothing is forced.
    force_update: Option<u8>,
    valve_history: [u8; VALVE_HISTORY_LEN],
    pid: ValvePid,
    detector: Detector,
}

impl ValveController {
    /// A manual setpoint persisted in `timer_mode` starts in manual mode.
    pub fn new(config: &ThermostatConfig) -> Self {
        let manual = config.manual_temperature();
        Self {
            wanted: manual,
            wanted_last: None,
            auto_type: None,
            revoke_type: None,
            auto_mode: manual == 0,
            window: 0,
            update_timeout: u16::from(STARTUP_DELAY),
            force_update: Some(STARTUP_DELAY),
            valve_history: [0; VALVE_HISTORY_LEN],
            pid: ValvePid::new(),
            detector: Detector::for_strategy(config.window_strategy),
        }
    }

    // ── Accessors ─────────────────────────────────────────────

    /// Setpoint currently requested, half °C.
    pub fn wanted(&self) -> u8 {
        self.wanted
    }

    /// Setpoint the PID last ran with, half °C.
    pub fn wanted_last(&self) -> Option<u8> {
        self.wanted_last
    }

    pub fn valve_wanted(&self) -> u8 {
        self.valve_history[0]
    }

    pub fn is_auto(&self) -> bool {
        self.auto_mode
    }

    pub fn auto_type(&self) -> Option<u8> {
        self.auto_type
    }

    pub fn window_open(&self) -> bool {
        self.window != 0
    }

    pub fn pid(&self) -> &ValvePid {
        &self.pid
    }

    /// Auto mode and the requested setpoint is the scheduled one.
    pub fn on_schedule(&self, config: &ThermostatConfig) -> bool {
        self.auto_mode
            && self
                .auto_type
                .and_then(|t| config.temperature_table.get(usize::from(t)))
                .is_some_and(|&t| t == self.wanted)
    }

    // ── 1 Hz tick ─────────────────────────────────────────────

    /// One controller tick.
    ///
    /// `schedule` yields the active preset index (0..4) and is only
    /// consulted on a minute change or while no valid type is known.
    pub fn update(
        &mut self,
        minute_changed: bool,
        inputs: &ControlInputs,
        schedule: impl FnOnce() -> Option<u8>,
        config: &ThermostatConfig,
        faults: &mut FaultRegister,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if minute_changed || self.auto_type.is_none() {
            if let Some(t) = schedule().filter(|&t| usize::from(t) < config.temperature_table.len()) {
                self.auto_type = Some(t);
                if self.auto_mode {
                    self.wanted = config.temperature_table[usize::from(t)];
                    if self.force_update.is_none() && Some(self.wanted) != self.wanted_last {
                        self.force_update = Some(0);
                    }
                }
            }
        }

        if minute_changed && self.pid.tick_boost_minute() {
            debug!("CTL | boost ended");
            self.force_update = Some(0);
        }

        if minute_changed && self.window != 0 && matches!(self.detector, Detector::Thermal(_)) {
            self.window -= 1;
            if self.window == 0 {
                info!("CTL | window open timeout, closing");
                self.force_update = Some(0);
                outcome.window_changed = true;
            }
        }

        let input = WindowInput {
            temperature: inputs.temperature,
            contact_open: inputs.contact_open,
            state: self.window,
        };
        if let Some(state) = self.detector.detect(&input, config) {
            info!("CTL | window {}", if state != 0 { "open" } else { "closed" });
            self.window = state;
            self.force_update = Some(0);
            outcome.window_changed = true;
        }

        if self.update_timeout > 0 {
            self.update_timeout -= 1;
        }
        match self.force_update {
            Some(n) if n > 0 => self.force_update = Some(n - 1),
            force if self.update_timeout == 0 || force == Some(0) => {
                outcome.valve = self.run_pid(inputs.temperature, config);
                self.force_update = None;
            }
            _ => {}
        }

        faults.evaluate_battery(
            inputs.battery_mv,
            config.bat_warning_thld,
            config.bat_low_thld,
            config.reversible_battery_errors,
        );
        outcome
    }

    fn run_pid(&mut self, temperature: i16, config: &ThermostatConfig) -> Option<u8> {
        let temp = if self.wanted < TEMP_MIN || self.window != 0 {
            TEMP_MIN
        } else {
            self.wanted
        };
        let update_now = Some(temp) != self.wanted_last;
        if !update_now && self.update_timeout != 0 {
            return None;
        }
        self.update_timeout = u16::from(config.pid_interval) * 5;

        let valve = if temp > TEMP_MAX {
            config.valve_max
        } else {
            let input = PidInput {
                setpoint: calc_temp(temp),
                previous_setpoint: self.wanted_last.map(calc_temp),
                process_value: temperature,
                old_valve: self.valve_history[0],
                update_now,
            };
            self.pid
                .compute(&input, &PidGains::from(config), &BoostPolicy::from(config))
        };
        self.wanted_last = Some(temp);
        self.valve_history.copy_within(..VALVE_HISTORY_LEN - 1, 1);
        self.valve_history[0] = valve;
        debug!(
            "CTL | pid setpoint={temp} pv={temperature} valve={valve} sum={} credit={}",
            self.pid.sum_error(),
            self.pid.credit()
        );
        Some(valve)
    }

    // ── User and remote requests ──────────────────────────────

    /// Nudge the setpoint by `delta` half degrees.
    ///
    /// Clamps to one step beyond the valid range ("off" / "on"), closes
    /// the window and schedules a PID run.  Returns `true` when
    /// `config.timer_mode` changed and must be persisted.
    pub fn temp_change_inc(&mut self, delta: i8, config: &mut ThermostatConfig) -> bool {
        let t = (i16::from(self.wanted) + i16::from(delta)).clamp(i16::from(TEMP_MIN - 1), i16::from(TEMP_MAX + 1));
        self.wanted = t as u8;
        self.window = 0;
        self.force_update = Some(MANUAL_CHANGE_DELAY);
        if self.auto_mode {
            return false;
        }
        config.set_manual_temperature(self.wanted);
        true
    }

    /// Setpoint from a remote command.  Returns `true` when
    /// `config.timer_mode` changed.
    pub fn set_wanted(&mut self, temp: u8, config: &mut ThermostatConfig) -> bool {
        self.wanted = temp.clamp(TEMP_MIN - 1, TEMP_MAX + 1);
        self.force_update = Some(REMOTE_CHANGE_DELAY);
        if self.auto_mode {
            return false;
        }
        config.set_manual_temperature(self.wanted);
        true
    }

    /// Apply a mode change.  `schedule` is the current preset index.
    /// `config.timer_mode` is always rewritten and must be persisted.
    pub fn change_mode(&mut self, change: ModeChange, schedule: Option<u8>, config: &mut ThermostatConfig) {
        match change {
            ModeChange::Toggle => {
                self.revoke_type = self.auto_type;
                self.pid.cancel_boost();
                self.auto_mode = !self.auto_mode;
                self.force_update = Some(MANUAL_CHANGE_DELAY);
            }
            ModeChange::Revoke => {
                self.auto_type = self.revoke_type;
                self.auto_mode = !self.auto_mode;
                self.force_update = Some(MANUAL_CHANGE_DELAY);
            }
            ModeChange::Set(auto) => {
                self.auto_mode = auto;
                self.force_update = Some(0);
            }
            ModeChange::CloseWindow => self.force_update = Some(0),
        }

        if self.auto_mode && change != ModeChange::Revoke {
            self.auto_type = schedule.filter(|&t| usize::from(t) < config.temperature_table.len());
            self.wanted = self.auto_type.map_or(0, |t| config.temperature_table[usize::from(t)]);
            config.clear_manual_temperature();
        } else {
            config.set_manual_temperature(self.wanted);
        }
        self.window = 0;
        info!(
            "CTL | mode {} wanted={}",
            if self.auto_mode { "auto" } else { "manual" },
            self.wanted
        );
    }

    // ── Valve body ────────────────────────────────────────────

    /// The motor lost its calibration (valve removed): hold the
    /// integrator and refill its credit.
    pub fn on_motor_reset(&mut self, config: &ThermostatConfig) {
        self.pid.block_integrator(config.i_max_credit);
    }

    /// Track the mounting contact.  An unmounted valve also loses its
    /// accumulated integrator.
    pub fn on_mount(&mut self, mounted: bool, faults: &mut FaultRegister) {
        if mounted {
            faults.clear(ErrorFlag::Mounting);
        } else if faults.set(ErrorFlag::Mounting) {
            self.pid.reset_integrator();
        }
    }

    /// A fresh 15 s temperature average for window detection.
    pub fn push_window_sample(&mut self, average: i16) {
        self.detector.push_sample(average);
    }

    /// Swap the window detector after a config change.
    pub fn set_window_strategy(&mut self, config: &ThermostatConfig) {
        if self.detector.strategy() != config.window_strategy {
            self.detector = Detector::for_strategy(config.window_strategy);
            self.window = 0;
        }
    }
}
