//! Temperature / valve control.
//!
//! - [`controller`]: setpoint selection, PID scheduling, window and
//!   battery supervision
//! - [`pid`]: the non-linear PI(D) law with integrator credit
//! - [`window`]: open-window detection strategies

pub mod controller;
pub mod pid;
pub mod window;

pub use controller::{ControlInputs, ModeChange, TickOutcome, ValveController};
pub use pid::{BoostPolicy, PidGains, ValvePid};
pub use window::{Detector, ReedSwitchDetector, ThermalTrendDetector, WindowDetector};

use crate::config::{TEMP_MAX, TEMP_MIN};

/// Depth of the applied-valve history.
pub const VALVE_HISTORY_LEN: usize = 1;

/// Half degrees to 1/100 °C.
pub const fn calc_temp(half_degrees: u8) -> i16 {
    half_degrees as i16 * 50
}

/// How a raw setpoint byte reads on the display and the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setpoint {
    /// Below `TEMP_MIN`: frost protection only.
    Off,
    /// Above `TEMP_MAX`: valve fully open.
    On,
    /// Regular setpoint in half degrees.
    Degrees(u8),
}

impl Setpoint {
    pub const fn from_raw(raw: u8) -> Self {
        if raw < TEMP_MIN {
            Self::Off
        } else if raw > TEMP_MAX {
            Self::On
        } else {
            Self::Degrees(raw)
        }
    }

    pub const fn as_raw(self) -> u8 {
        match self {
            Self::Off => TEMP_MIN - 1,
            Self::On => TEMP_MAX + 1,
            Self::Degrees(t) => t,
        }
    }
}

impl core::fmt::Display for Setpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
            Self::Degrees(t) => write!(f, "{}.{}°C", t / 2, if t % 2 == 1 { 5 } else { 0 }),
        }
    }
}
