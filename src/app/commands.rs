//! Inbound commands to the application service.
//!
//! These represent actions requested by the outside world (valve keys,
//! the radio master, a config reload) that the
//! [`ThermostatService`](super::service::ThermostatService) interprets and
//! acts upon.

use crate::config::ThermostatConfig;
use crate::control::ModeChange;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone)]
pub enum AppCommand {
    /// Switch between auto and manual mode, or close the window.
    ChangeMode(ModeChange),

    /// Nudge the setpoint by this many half degrees (wheel / keys).
    TempChangeInc(i8),

    /// Absolute setpoint in half °C (remote `'A'`).
    SetTemperature(u8),

    /// Drop the motor calibration and run a fresh one (valve protection).
    Recalibrate,

    /// Replace the live configuration; sanitized before use.
    ReloadConfig(ThermostatConfig),
}
