//! Latched fault register.
//!
//! Every subsystem reports failure by setting a bit here rather than
//! returning an error.  The register is read by the display layer, the
//! status broadcast and the log sink.
//!
//! ## Fault lifecycle
//!
//! 1. A condition triggers a fault (battery sag, stalled motor, valve
//!    body removed, no radio sync).
//! 2. The owning subsystem calls [`FaultRegister::set`].
//! 3. The bit stays latched until the same subsystem clears it.  Battery
//!    bits only clear when the config enables reversible battery errors.
//!
//! Set/clear edges are logged once; re-setting a latched bit is silent.

use crate::error::ErrorFlag;
use log::{error, info};

/// Latched fault bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultRegister {
    bits: u8,
}

impl FaultRegister {
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    /// Raw bitmask as carried in the status frame.
    pub fn bits(&self) -> u8 {
        self.bits
    }

    /// True if **any** fault is active.
    pub fn any(&self) -> bool {
        self.bits != 0
    }

    pub fn contains(&self, flag: ErrorFlag) -> bool {
        self.bits & flag.mask() != 0
    }

    /// Latch `flag`.  Returns `true` on a rising edge.
    pub fn set(&mut self, flag: ErrorFlag) -> bool {
        if self.contains(flag) {
            return false;
        }
        error!("FAULT SET: {flag}");
        self.bits |= flag.mask();
        true
    }

    /// Clear `flag`.  Returns `true` on a falling edge.
    pub fn clear(&mut self, flag: ErrorFlag) -> bool {
        if !self.contains(flag) {
            return false;
        }
        info!("FAULT CLEARED: {flag}");
        self.bits &= !flag.mask();
        true
    }

    /// Set or clear a fault bit based on a boolean condition.
    pub fn assign(&mut self, flag: ErrorFlag, condition: bool) -> bool {
        if condition {
            self.set(flag)
        } else {
            self.clear(flag)
        }
    }

    /// Classify the averaged battery voltage.
    ///
    /// Thresholds are in units of 20 mV (0.01 V per cell on two cells).
    /// A reading of 0 means "no sample yet" and is ignored.
    pub fn evaluate_battery(
        &mut self,
        battery_mv: u16,
        warning_thld: u8,
        low_thld: u8,
        reversible: bool,
    ) {
        if battery_mv == 0 {
            return;
        }
        let low = 20 * u16::from(low_thld);
        let warning = 20 * u16::from(warning_thld);

        if battery_mv < low {
            self.set(ErrorFlag::BatteryLow);
            self.set(ErrorFlag::BatteryWarning);
        } else if battery_mv < warning {
            self.set(ErrorFlag::BatteryWarning);
            if reversible {
                self.clear(ErrorFlag::BatteryLow);
            }
        } else if reversible {
            self.clear(ErrorFlag::BatteryWarning);
            self.clear(ErrorFlag::BatteryLow);
        }
    }
}
