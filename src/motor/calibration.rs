//! Calibration phases and the inputs that drive them.
//!
//! ```text
//!   Uncalibrated ──(mounted, settle)──▶ Pending ──▶ DrivingOpen
//!        ▲                                              │ open endstop
//!        │ unmounted                  ┌─────────────────┼──────────────┐
//!        │                       stored travel     measure now      auto
//!        │                            │                 │              │
//!        │                            ▼                 ▼              ▼
//!   any step ◀─────────────── Calibrated ◀───────── DrivingClose ◀─────┘
//!                                     │  inconsistent travel
//!                                     ▼
//!                                   Error
//! ```

use serde::{Deserialize, Serialize};

/// Calibration state machine step.  `as_raw` gives the wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStep {
    Uncalibrated,
    Error,
    Calibrated,
    Pending,
    DrivingOpen,
    DrivingClose,
}

impl CalibrationStep {
    pub const fn as_raw(self) -> i8 {
        match self {
            Self::Uncalibrated => -2,
            Self::Error => -1,
            Self::Calibrated => 0,
            Self::Pending => 1,
            Self::DrivingOpen => 2,
            Self::DrivingClose => 3,
        }
    }

    /// A calibration drive is in progress.
    pub const fn is_driving(self) -> bool {
        matches!(self, Self::DrivingOpen | Self::DrivingClose)
    }
}

/// Mounting contact reading.  The contact shares wiring with two keys, so
/// a mounted reading also reports which key is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountReading {
    Unmounted,
    Mounted,
    /// Mounted with the "C" key held: measure full travel once.
    MountedKeyC,
    /// Mounted with the "PROG" key held: back to automatic calibration.
    MountedKeyProg,
}

impl MountReading {
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Unmounted,
            2 => Self::MountedKeyC,
            3 => Self::MountedKeyProg,
            _ => Self::Mounted,
        }
    }

    pub const fn is_mounted(self) -> bool {
        !matches!(self, Self::Unmounted)
    }
}

/// Persisted hint telling the next calibration what to do at the open
/// endstop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ManualCalibration {
    /// Drive back to the closed endstop and measure every time.
    #[default]
    Auto,
    /// Take the current open-endstop position as full travel and store it.
    Measure,
    /// Reuse a stored full travel.
    Stored(u16),
}

impl ManualCalibration {
    /// Signed form used by the serial/radio protocols (-1 auto, 0 measure).
    pub fn as_raw(self) -> i16 {
        match self {
            Self::Auto => -1,
            Self::Measure => 0,
            Self::Stored(n) => i16::try_from(n).unwrap_or(i16::MAX),
        }
    }

    pub fn from_raw(raw: i16) -> Self {
        match raw {
            0 => Self::Measure,
            n if n > 0 => Self::Stored(n as u16),
            _ => Self::Auto,
        }
    }
}
