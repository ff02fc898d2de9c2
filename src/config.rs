//! Thermostat configuration parameters.
//!
//! All tunables for the valve controller, motor engine and radio link.
//! Values are loaded from NVS on boot through the
//! [`ConfigPort`](crate::app::ports::ConfigPort); any field outside its
//! declared bounds is silently replaced by the compiled-in default
//! ([`ThermostatConfig::sanitize`]).
//!
//! Units follow the valve's conventions: temperatures in half degrees,
//! temperature differences in 1/100 °C, battery thresholds in 20 mV steps,
//! PID interval in 5 s steps.

use serde::{Deserialize, Serialize};

/// Version byte stored in front of the persisted config blob.  A stored
/// blob with a different version is a fail-stop condition.
pub const LAYOUT_VERSION: u8 = 0x15;

/// Setpoint lower bound (5.0 °C) in half degrees.  One below is "off".
pub const TEMP_MIN: u8 = 10;
/// Setpoint upper bound (30.0 °C) in half degrees.  One above is "on".
pub const TEMP_MAX: u8 = 60;

/// Source used to decide whether the window is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowStrategy {
    /// Infer from the trend of 15 s temperature averages.
    ThermalTrend,
    /// Dedicated reed contact on the window frame.
    ReedSwitch,
}

/// Core thermostat configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermostatConfig {
    // --- Presets ---
    /// Frost, eco, comfort and supercomfort setpoints (half °C).
    pub temperature_table: [u8; 4],
    /// Bit 0: weekday programs enabled.  Bits 7..1: manual setpoint.
    pub timer_mode: u8,

    // --- PID ---
    pub p3_factor: u8,
    pub p_factor: u8,
    pub i_factor: u8,
    /// Derivative gain; 0 disables the D term.
    pub d_factor: u8,
    /// Integrator credit restored on setpoint change / sign flip.
    pub i_max_credit: u8,
    /// Credit lifetime in PID intervals.
    pub i_credit_expiration: u8,
    /// Polling interval in 5 s units.
    pub pid_interval: u8,

    // --- Valve ---
    pub valve_min: u8,
    pub valve_center: u8,
    pub valve_max: u8,
    /// Output rounding hysteresis in 1/256 %.
    pub valve_hysteresis: u8,

    // --- Motor ---
    pub motor_pwm_min: u8,
    pub motor_pwm_max: u8,
    pub motor_eye_low: u8,
    pub motor_eye_high: u8,
    /// Time from last eye pulse to eye power-down, in 256-tick units.
    pub motor_close_eye_timeout: u8,
    /// Stall threshold during calibration, % of nominal pulse period.
    pub motor_end_detect_cal: u8,
    /// Stall threshold during normal runs, % of nominal pulse period.
    pub motor_end_detect_run: u8,
    /// Nominal pulse period target, in 8-tick units.
    pub motor_speed: u8,
    pub motor_speed_ctl_gain: u8,
    pub motor_pwm_max_step: u8,

    // --- Battery ---
    pub bat_warning_thld: u8,
    pub bat_low_thld: u8,
    pub reversible_battery_errors: bool,

    // --- Window detection ---
    pub window_strategy: WindowStrategy,
    pub window_detection_enabled: bool,
    /// Reed contact debounce before trusting "open" (seconds).
    pub window_open_delay: u8,
    /// Reed contact debounce before trusting "closed" (seconds).
    pub window_close_delay: u8,
    pub window_open_diff: u8,
    pub window_close_diff: u8,
    /// Trailing window length in 15 s samples.
    pub window_open_time: u8,
    pub window_close_time: u8,
    /// Minutes the open state is held at most.
    pub window_open_timeout: u8,

    // --- Boost ---
    pub boost_enabled: bool,
    pub boost_setpoint_diff: u8,
    pub boost_hysteresis: u8,
    pub boost_error: u8,
    /// Temperature change (0.1 °C) expected per `boost_time_*` minutes.
    pub boost_tempchange: u8,
    pub boost_time_cool: u8,
    pub boost_time_heat: u8,

    // --- Radio ---
    /// Own address; 0 disables the radio.
    pub rfm_devaddr: u8,
    pub security_key: [u8; 8],
    /// Signed frequency trim added to the frequency word.
    pub rfm_freq_adjust: i8,
}

impl Default for ThermostatConfig {
    fn default() -> Self {
        Self {
            temperature_table: [10, 34, 42, 48],
            timer_mode: 0,

            p3_factor: 33,
            p_factor: 8,
            i_factor: 32,
            d_factor: 0,
            i_max_credit: 40,
            i_credit_expiration: 30,
            pid_interval: 240 / 5,

            valve_min: 30,
            valve_center: 45,
            valve_max: 80,
            valve_hysteresis: 64,

            motor_pwm_min: 32,
            motor_pwm_max: 250,
            motor_eye_low: 100,
            motor_eye_high: 25,
            motor_close_eye_timeout: 78,
            motor_end_detect_cal: 130,
            motor_end_detect_run: 150,
            motor_speed: 184,
            motor_speed_ctl_gain: 50,
            motor_pwm_max_step: 10,

            bat_warning_thld: 120,
            bat_low_thld: 100,
            reversible_battery_errors: true,

            window_strategy: WindowStrategy::ThermalTrend,
            window_detection_enabled: true,
            window_open_delay: 5,
            window_close_delay: 5,
            window_open_diff: 50,
            window_close_diff: 50,
            window_open_time: 8,
            window_close_time: 8,
            window_open_timeout: 90,

            boost_enabled: false,
            boost_setpoint_diff: 50,
            boost_hysteresis: 10,
            boost_error: 30,
            boost_tempchange: 5,
            boost_time_cool: 64,
            boost_time_heat: 15,

            rfm_devaddr: 0,
            security_key: [0; 8],
            rfm_freq_adjust: 0,
        }
    }
}

/// Inclusive validity range of one byte-sized field.
#[derive(Debug, Clone, Copy)]
struct Bound {
    min: u8,
    max: u8,
}

const fn b(min: u8, max: u8) -> Bound {
    Bound { min, max }
}

/// Replace `field` with `default` if it falls outside `bound`.
fn fix(field: &mut u8, default: u8, bound: Bound, name: &str, replaced: &mut usize) {
    if !(bound.min..=bound.max).contains(field) {
        log::warn!(
            "config: {name}={} outside {}..={}, using default {default}",
            *field,
            bound.min,
            bound.max
        );
        *field = default;
        *replaced += 1;
    }
}

impl ThermostatConfig {
    /// Replace every out-of-range field with its default.
    ///
    /// Returns the number of fields that were replaced.
    pub fn sanitize(&mut self) -> usize {
        let d = Self::default();
        let mut n = 0;

        for (i, t) in self.temperature_table.iter_mut().enumerate() {
            fix(t, d.temperature_table[i], b(TEMP_MIN, TEMP_MAX), "temperature", &mut n);
        }
        fix(&mut self.timer_mode, d.timer_mode, b(0, ((TEMP_MAX + 1) << 1) + 1), "timer_mode", &mut n);

        fix(&mut self.i_max_credit, d.i_max_credit, b(0, 127), "i_max_credit", &mut n);
        fix(&mut self.pid_interval, d.pid_interval, b(20 / 5, 255), "pid_interval", &mut n);

        fix(&mut self.valve_min, d.valve_min, b(0, 100), "valve_min", &mut n);
        fix(&mut self.valve_center, d.valve_center, b(0, 100), "valve_center", &mut n);
        fix(&mut self.valve_max, d.valve_max, b(0, 100), "valve_max", &mut n);
        fix(&mut self.valve_hysteresis, d.valve_hysteresis, b(0, 127), "valve_hysteresis", &mut n);

        fix(&mut self.motor_pwm_min, d.motor_pwm_min, b(32, 255), "motor_pwm_min", &mut n);
        fix(&mut self.motor_pwm_max, d.motor_pwm_max, b(50, 255), "motor_pwm_max", &mut n);
        fix(&mut self.motor_eye_low, d.motor_eye_low, b(1, 255), "motor_eye_low", &mut n);
        fix(&mut self.motor_eye_high, d.motor_eye_high, b(1, 255), "motor_eye_high", &mut n);
        fix(&mut self.motor_close_eye_timeout, d.motor_close_eye_timeout, b(5, 255), "motor_close_eye_timeout", &mut n);
        fix(&mut self.motor_end_detect_cal, d.motor_end_detect_cal, b(110, 250), "motor_end_detect_cal", &mut n);
        fix(&mut self.motor_end_detect_run, d.motor_end_detect_run, b(110, 250), "motor_end_detect_run", &mut n);
        fix(&mut self.motor_speed, d.motor_speed, b(10, 255), "motor_speed", &mut n);
        fix(&mut self.motor_speed_ctl_gain, d.motor_speed_ctl_gain, b(10, 200), "motor_speed_ctl_gain", &mut n);
        fix(&mut self.motor_pwm_max_step, d.motor_pwm_max_step, b(1, 64), "motor_pwm_max_step", &mut n);

        fix(&mut self.bat_warning_thld, d.bat_warning_thld, b(80, 160), "bat_warning_thld", &mut n);
        fix(&mut self.bat_low_thld, d.bat_low_thld, b(80, 160), "bat_low_thld", &mut n);

        fix(&mut self.window_open_delay, d.window_open_delay, b(0, 240), "window_open_delay", &mut n);
        fix(&mut self.window_close_delay, d.window_close_delay, b(0, 240), "window_close_delay", &mut n);
        fix(&mut self.window_open_diff, d.window_open_diff, b(7, 255), "window_open_diff", &mut n);
        fix(&mut self.window_close_diff, d.window_close_diff, b(7, 255), "window_close_diff", &mut n);
        fix(&mut self.window_open_time, d.window_open_time, b(1, 32), "window_open_time", &mut n);
        fix(&mut self.window_close_time, d.window_close_time, b(1, 32), "window_close_time", &mut n);
        fix(&mut self.window_open_timeout, d.window_open_timeout, b(2, 255), "window_open_timeout", &mut n);

        fix(&mut self.boost_tempchange, d.boost_tempchange, b(1, 255), "boost_tempchange", &mut n);

        fix(&mut self.rfm_devaddr, d.rfm_devaddr, b(0, 29), "rfm_devaddr", &mut n);

        // Cross-field: an inverted valve range would make every output
        // clamp contradictory.
        if self.valve_min > self.valve_max {
            log::warn!("config: valve_min > valve_max, restoring valve defaults");
            self.valve_min = d.valve_min;
            self.valve_max = d.valve_max;
            n += 1;
        }
        if self.motor_pwm_min > self.motor_pwm_max {
            log::warn!("config: motor_pwm_min > motor_pwm_max, restoring PWM defaults");
            self.motor_pwm_min = d.motor_pwm_min;
            self.motor_pwm_max = d.motor_pwm_max;
            n += 1;
        }
        n
    }

    /// Manual setpoint stored in `timer_mode` (half °C).
    pub fn manual_temperature(&self) -> u8 {
        self.timer_mode >> 1
    }

    /// Store a manual setpoint, keeping the weekday-program bit.
    pub fn set_manual_temperature(&mut self, temp: u8) {
        self.timer_mode = (temp << 1) | (self.timer_mode & 0x01);
    }

    /// Clear the manual setpoint, keeping the weekday-program bit.
    pub fn clear_manual_temperature(&mut self) {
        self.timer_mode &= 0x01;
    }
}
