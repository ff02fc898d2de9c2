//! Non-linear PI(D) law for the valve opening.
//!
//! Integer only.  Error and process value are in 1/100 °C, the output is a
//! valve opening in percent.  The integrator is guarded three ways:
//!
//! ```text
//!   setpoint change ──▶ block (6 polls) ──▶ credit ──▶ expired / spent
//!         │                                   │              │
//!         └── snapshot sum ◀── rollback ◀─────┴──────────────┘
//!                              (error did not shrink enough)
//! ```
//!
//! * **Block**: after a setpoint change the integrator is frozen while
//!   the proportional part does the big move.
//! * **Credit**: integration costs credit in proportion to the error; it
//!   is refilled on an error sign flip or when the error sits still near
//!   zero, and drains to 0 once `i_credit_expiration` polls pass.
//! * **Rollback**: when credit runs out and the error has not dropped
//!   below 3/4 of its size at the last setpoint change, the integrator is
//!   restored to the snapshot taken at that change.

use crate::config::ThermostatConfig;

/// Polls the integrator stays frozen after a setpoint change.
pub const INTEGRATOR_BLOCK: u8 = 6;
/// Error magnitude (1/100 °C) treated as "at setpoint" for credit refill.
pub const ERROR_TOLERANCE_AROUND_ZERO: u16 = 15;
/// Error units per credit point spent.
pub const ERROR_WEIGHT: u16 = 25;

/// Error clamp, 1/100 °C.
const ERROR_LIMIT: i32 = 1200;

/// Gains and output limits, taken from the config at every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidGains {
    pub p3: u8,
    pub p: u8,
    pub i: u8,
    pub d: u8,
    pub i_max_credit: u8,
    pub i_credit_expiration: u8,
    pub valve_min: u8,
    pub valve_center: u8,
    pub valve_max: u8,
    pub valve_hysteresis: u8,
}

impl From<&ThermostatConfig> for PidGains {
    fn from(c: &ThermostatConfig) -> Self {
        Self {
            p3: c.p3_factor,
            p: c.p_factor,
            i: c.i_factor,
            d: c.d_factor,
            i_max_credit: c.i_max_credit,
            i_credit_expiration: c.i_credit_expiration,
            valve_min: c.valve_min,
            valve_center: c.valve_center,
            valve_max: c.valve_max,
            valve_hysteresis: c.valve_hysteresis,
        }
    }
}

/// Open-loop boost after a large setpoint step.
///
/// While boosting the valve is driven to an end stop instead of running
/// the control law, for a time estimated from the error size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoostPolicy {
    pub enabled: bool,
    /// Minimum setpoint step, 1/100 °C.
    pub setpoint_diff: u8,
    pub hysteresis: u8,
    /// Minimum error, 1/100 °C.
    pub error: u8,
    /// Temperature change (0.1 °C) per `time_*` minutes.
    pub tempchange: u8,
    pub time_cool: u8,
    pub time_heat: u8,
}

impl From<&ThermostatConfig> for BoostPolicy {
    fn from(c: &ThermostatConfig) -> Self {
        Self {
            enabled: c.boost_enabled,
            setpoint_diff: c.boost_setpoint_diff,
            hysteresis: c.boost_hysteresis,
            error: c.boost_error,
            tempchange: c.boost_tempchange,
            time_cool: c.boost_time_cool,
            time_heat: c.boost_time_heat,
        }
    }
}

impl BoostPolicy {
    /// Boost length in minutes for a fresh setpoint step, or 0.
    fn minutes(&self, setpoint: i16, previous: Option<i16>, error: i32, abs_error: u16) -> u8 {
        let Some(previous) = previous else {
            return 0;
        };
        if !self.enabled
            || (i32::from(setpoint) - i32::from(previous)).unsigned_abs() < u32::from(self.setpoint_diff)
            || abs_error < u16::from(self.error)
        {
            return 0;
        }
        let per_step = u32::from(if error >= 0 { self.time_heat } else { self.time_cool });
        let minutes = u32::from(abs_error / 10) * per_step / u32::from(self.tempchange.max(1));
        minutes.min(255) as u8
    }
}

/// Inputs of one controller poll.
#[derive(Debug, Clone, Copy)]
pub struct PidInput {
    /// Scaled setpoint, 1/100 °C.
    pub setpoint: i16,
    /// Scaled setpoint of the previous update, if any.
    pub previous_setpoint: Option<i16>,
    /// Averaged room temperature, 1/100 °C.
    pub process_value: i16,
    /// Last valve output.
    pub old_valve: u8,
    /// The setpoint changed since the last poll.
    pub update_now: bool,
}

/// Controller state carried between polls.
#[derive(Debug, Clone, Default)]
pub struct ValvePid {
    sum_error: i32,
    credit: i8,
    credit_expiration: u8,
    integrator_block: u8,
    last_error_negative: bool,
    last_abs_error: u16,
    last2_abs_error: u16,
    /// Error magnitude and integrator at the last setpoint change; `None`
    /// once the rollback check has consumed it.
    change_snapshot: Option<(u16, i32)>,
    last_process_value: Option<i16>,
    boost_minutes: u8,
}

impl ValvePid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sum_error(&self) -> i32 {
        self.sum_error
    }

    pub fn credit(&self) -> i8 {
        self.credit
    }

    pub fn integrator_block(&self) -> u8 {
        self.integrator_block
    }

    pub fn boost_minutes(&self) -> u8 {
        self.boost_minutes
    }

    /// One minute of boost elapsed.  Returns `true` when boost just ended.
    pub fn tick_boost_minute(&mut self) -> bool {
        if self.boost_minutes == 0 {
            return false;
        }
        self.boost_minutes -= 1;
        self.boost_minutes == 0
    }

    pub fn cancel_boost(&mut self) {
        self.boost_minutes = 0;
    }

    /// Freeze the integrator and refill its credit (valve reseated or
    /// motor recalibrated).
    pub fn block_integrator(&mut self, max_credit: u8) {
        self.integrator_block = INTEGRATOR_BLOCK;
        self.credit = credit_from(max_credit);
    }

    pub fn reset_integrator(&mut self) {
        self.sum_error = 0;
        self.change_snapshot = None;
    }

    /// Restore the integrator if the error at this point is still at
    /// least 3/4 of the error at the last setpoint change.  Single use.
    fn revert_integrator(&mut self, abs_error: u16) {
        if let Some((change_abs, change_sum)) = self.change_snapshot.take() {
            if u32::from(abs_error) >= u32::from(change_abs) * 3 / 4
                && abs_error > ERROR_TOLERANCE_AROUND_ZERO * 2
            {
                self.sum_error = change_sum;
            }
        }
    }

    fn integrate(&mut self, error: i32) {
        self.sum_error = self.sum_error.saturating_add(error * 8);
    }

    /// Run the control law once and return the new valve opening.
    pub fn compute(&mut self, input: &PidInput, gains: &PidGains, boost: &BoostPolicy) -> u8 {
        let error = (i32::from(input.setpoint) - i32::from(input.process_value)).clamp(-ERROR_LIMIT, ERROR_LIMIT);
        let abs_error = error.unsigned_abs() as u16;
        let old = input.old_valve;

        if input.update_now {
            self.credit = credit_from(gains.i_max_credit);
            self.credit_expiration = gains.i_credit_expiration;
            self.integrator_block = INTEGRATOR_BLOCK;
            self.revert_integrator(self.last_abs_error);
            self.change_snapshot = Some((abs_error, self.sum_error));
            self.boost_minutes = boost.minutes(input.setpoint, input.previous_setpoint, error, abs_error);
        } else {
            if self.integrator_block == 0 {
                if self.credit_expiration > 0 {
                    self.credit_expiration -= 1;
                } else {
                    self.credit = 0;
                }
                let headroom = if error >= 0 { old < gains.valve_max } else { old > gains.valve_min };
                if headroom {
                    let sign_flip = self.last_error_negative != (error < 0);
                    let settled = abs_error == self.last2_abs_error && abs_error <= ERROR_TOLERANCE_AROUND_ZERO;
                    if sign_flip || settled {
                        self.credit = credit_from(gains.i_max_credit);
                        self.credit_expiration = gains.i_credit_expiration;
                        self.integrate(error);
                    } else if self.credit > 0 && abs_error >= self.last2_abs_error {
                        let cost = (abs_error / ERROR_WEIGHT + 1).min(i8::MAX as u16) as i8;
                        self.credit = self.credit.saturating_sub(cost);
                        self.integrate(error);
                    }
                }
                if self.credit <= 0 {
                    self.revert_integrator(abs_error);
                }
            } else {
                self.integrator_block -= 1;
            }
            self.last2_abs_error = self.last_abs_error;
            self.last_abs_error = abs_error;
            self.last_error_negative = error < 0;
        }

        let last_pv = self.last_process_value.replace(input.process_value);

        if self.boost_minutes > 0 {
            if abs_error <= u16::from(boost.error.saturating_sub(boost.hysteresis)) {
                self.boost_minutes = 0;
            } else {
                self.integrator_block = INTEGRATOR_BLOCK;
                return if error > 0 { gains.valve_max } else { gains.valve_min };
            }
        }

        if gains.i > 0 {
            let limit = (256 * 256 * 50) / i32::from(gains.i);
            self.sum_error = self.sum_error.clamp(-limit, limit);
        }

        let e = i64::from(error);
        let mut pi = ((e * e * i64::from(gains.p3)) >> 8) + (i64::from(gains.p) << 8);
        pi *= e;
        pi += i64::from(gains.i) * i64::from(self.sum_error);
        if gains.d > 0 {
            if let Some(last) = last_pv {
                let d = i64::from(last) - i64::from(input.process_value);
                pi += (d * d.abs() / 256 * i64::from(gains.d)) << 8;
            }
        }
        pi += i64::from(gains.valve_center) * 65536;
        pi >>= 8;

        if pi > i64::from(gains.valve_max) * 256 {
            return gains.valve_max;
        }
        if pi < 0 {
            return gains.valve_min;
        }

        // 0 ..= valve_max * 256 here.
        let mut scaled = pi as u32;
        let rising = (scaled >> 8) >= u32::from(old);
        scaled += 128;
        let hysteresis = u32::from(gains.valve_hysteresis);
        scaled = if rising { scaled.saturating_sub(hysteresis) } else { scaled + hysteresis };
        let out = ((scaled >> 8) as u8).min(gains.valve_max);
        out.max(gains.valve_min)
    }
}

fn credit_from(max_credit: u8) -> i8 {
    i8::try_from(max_credit).unwrap_or(i8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains() -> PidGains {
        PidGains::from(&ThermostatConfig::default())
    }

    fn no_boost() -> BoostPolicy {
        BoostPolicy::from(&ThermostatConfig::default())
    }

    fn input(setpoint: i16, pv: i16, old: u8, update_now: bool) -> PidInput {
        PidInput {
            setpoint,
            previous_setpoint: None,
            process_value: pv,
            old_valve: old,
            update_now,
        }
    }

    #[test]
    fn zero_error_settles_at_center() {
        let mut pid = ValvePid::new();
        let v = pid.compute(&input(2100, 2100, 45, true), &gains(), &no_boost());
        // center*256 + 128 - hysteresis, >> 8
        assert_eq!(v, 45);
        assert_eq!(pid.sum_error(), 0);
    }

    #[test]
    fn cold_room_opens_up_to_max() {
        let mut pid = ValvePid::new();
        let v = pid.compute(&input(2100, 1600, 45, true), &gains(), &no_boost());
        assert_eq!(v, 80);
        let v = pid.compute(&input(2100, 2600, 80, false), &gains(), &no_boost());
        assert_eq!(v, 30);
    }

    #[test]
    fn output_hysteresis_depends_on_direction() {
        let g = PidGains {
            p3: 0,
            p: 1,
            i: 0,
            valve_hysteresis: 100,
            ..gains()
        };
        // Error 100 scales to 45*256 + 100.
        let mut pid = ValvePid::new();
        let rising = pid.compute(&input(2200, 2100, 40, true), &g, &no_boost());
        let mut pid = ValvePid::new();
        let falling = pid.compute(&input(2200, 2100, 50, true), &g, &no_boost());
        assert_eq!(rising, 45);
        assert_eq!(falling, 46);
    }

    #[test]
    fn integrator_is_blocked_after_setpoint_change() {
        let mut pid = ValvePid::new();
        let g = gains();
        pid.compute(&input(2100, 2000, 45, true), &g, &no_boost());
        for _ in 0..INTEGRATOR_BLOCK {
            pid.compute(&input(2100, 2000, 50, false), &g, &no_boost());
            assert_eq!(pid.sum_error(), 0);
        }
        assert_eq!(pid.integrator_block(), 0);
        // First unblocked poll: sign unchanged, credit available and
        // error not shrinking.
        pid.compute(&input(2100, 2000, 50, false), &g, &no_boost());
        assert_eq!(pid.sum_error(), 800);
        assert_eq!(pid.credit(), 40 - (100 / 25 + 1) as i8);
    }

    #[test]
    fn no_integration_without_headroom() {
        let mut pid = ValvePid::new();
        let g = gains();
        pid.compute(&input(2100, 2000, 45, true), &g, &no_boost());
        for _ in 0..INTEGRATOR_BLOCK + 3 {
            pid.compute(&input(2100, 2000, g.valve_max, false), &g, &no_boost());
        }
        assert_eq!(pid.sum_error(), 0);
    }

    #[test]
    fn integrator_rolls_back_when_error_does_not_shrink() {
        let g = PidGains {
            i_max_credit: 12,
            i_credit_expiration: 50,
            ..gains()
        };
        let mut pid = ValvePid::new();
        pid.sum_error = 1000;
        pid.compute(&input(2100, 2000, 45, true), &g, &no_boost());
        for _ in 0..INTEGRATOR_BLOCK {
            pid.compute(&input(2100, 2000, 50, false), &g, &no_boost());
        }
        let snapshot = pid.sum_error();
        assert_eq!(snapshot, 1000);

        // Each poll costs 100/25 + 1 = 5 credit: 12 → 7 → 2 → -3.
        for _ in 0..3 {
            pid.compute(&input(2100, 2000, 50, false), &g, &no_boost());
        }
        assert!(pid.credit() <= 0);
        assert_eq!(pid.sum_error(), snapshot);
    }

    #[test]
    fn no_rollback_when_error_shrank() {
        let g = PidGains {
            i_max_credit: 6,
            i_credit_expiration: 50,
            ..gains()
        };
        let mut pid = ValvePid::new();
        pid.compute(&input(2100, 2000, 45, true), &g, &no_boost());
        for _ in 0..INTEGRATOR_BLOCK {
            pid.compute(&input(2100, 2000, 50, false), &g, &no_boost());
        }
        pid.compute(&input(2100, 2000, 50, false), &g, &no_boost());
        let integrated = pid.sum_error();
        assert!(integrated > 0);
        // Error halves: improving, so nothing is integrated.
        pid.compute(&input(2100, 2050, 50, false), &g, &no_boost());
        assert_eq!(pid.sum_error(), integrated);
        // Once the error holds steady the last credit is spent.  50 is
        // below 3/4 of the error at the change, so the sum is kept.
        for _ in 0..60 {
            pid.compute(&input(2100, 2050, 50, false), &g, &no_boost());
        }
        assert!(pid.credit() <= 0);
        assert_eq!(pid.sum_error(), integrated + 50 * 8);
    }

    #[test]
    fn sign_flip_refills_credit() {
        let g = gains();
        let mut pid = ValvePid::new();
        pid.compute(&input(2100, 2100, 45, true), &g, &no_boost());
        for _ in 0..INTEGRATOR_BLOCK {
            pid.compute(&input(2100, 2060, 45, false), &g, &no_boost());
        }
        pid.compute(&input(2100, 2140, 45, false), &g, &no_boost());
        assert_eq!(pid.credit(), 40);
        assert_eq!(pid.sum_error(), -40 * 8);
    }

    #[test]
    fn integrator_is_clamped() {
        let g = PidGains { i: 200, ..gains() };
        let mut pid = ValvePid::new();
        pid.sum_error = i32::MAX / 2;
        pid.compute(&input(2100, 2100, 45, false), &g, &no_boost());
        assert_eq!(pid.sum_error(), 256 * 256 * 50 / 200);
    }

    #[test]
    fn boost_drives_to_endstop_until_error_closes() {
        let boost = BoostPolicy {
            enabled: true,
            ..no_boost()
        };
        let g = gains();
        let mut pid = ValvePid::new();
        let step = PidInput {
            setpoint: 2400,
            previous_setpoint: Some(1700),
            process_value: 1900,
            old_valve: 45,
            update_now: true,
        };
        assert_eq!(pid.compute(&step, &g, &boost), g.valve_max);
        // 500/10 * 15 / 5
        assert_eq!(pid.boost_minutes(), 150);
        assert_eq!(pid.compute(&input(2400, 2300, 80, false), &g, &boost), g.valve_max);
        assert_eq!(pid.integrator_block(), INTEGRATOR_BLOCK);

        // Within boost_error - hysteresis: control law resumes.
        pid.compute(&input(2400, 2385, 80, false), &g, &boost);
        assert_eq!(pid.boost_minutes(), 0);
    }

    #[test]
    fn boost_needs_a_large_setpoint_step() {
        let boost = BoostPolicy {
            enabled: true,
            ..no_boost()
        };
        let mut pid = ValvePid::new();
        let step = PidInput {
            setpoint: 2100,
            previous_setpoint: Some(2080),
            process_value: 1900,
            old_valve: 45,
            update_now: true,
        };
        pid.compute(&step, &gains(), &boost);
        assert_eq!(pid.boost_minutes(), 0);
    }

    #[test]
    fn boost_minute_countdown_reports_expiry() {
        let mut pid = ValvePid::new();
        pid.boost_minutes = 2;
        assert!(!pid.tick_boost_minute());
        assert!(pid.tick_boost_minute());
        assert!(!pid.tick_boost_minute());
    }

    #[test]
    fn derivative_term_opposes_rising_temperature() {
        let g = PidGains { d: 50, ..gains() };
        let mut plain = ValvePid::new();
        let mut damped = ValvePid::new();
        for pid in [&mut plain, &mut damped] {
            pid.compute(&input(2100, 2000, 45, true), &g, &no_boost());
        }
        let without = plain.compute(&input(2100, 2064, 60, false), &PidGains { d: 0, ..g }, &no_boost());
        let with = damped.compute(&input(2100, 2064, 60, false), &g, &no_boost());
        assert!(with < without, "{with} !< {without}");
    }
}
