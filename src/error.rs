//! Unified error types for the HR20 firmware.
//!
//! Two families live here:
//!
//! - [`Error`]: returned by the few fallible operations (boot-time
//!   peripheral init, config load, storage, radio frame assembly).  All
//!   variants are `Copy` so they travel through the task loop without
//!   allocation.
//! - [`ErrorFlag`]: the controller's latched fault bits.  They are never
//!   propagated as `Err`; the control path sets a bit and carries on, and
//!   the bits are serialised verbatim into the radio status frame.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
    /// Persistent storage failed.
    Storage(&'static str),
    /// A radio frame could not be assembled or was rejected.
    Radio(RadioError),
    /// Peripheral initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Storage(msg) => write!(f, "storage: {msg}"),
            Self::Radio(e) => write!(f, "radio: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Radio errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// Payload does not fit into one frame.
    PayloadTooLong,
    /// The link is busy transmitting or receiving into the frame buffer.
    Busy,
    /// Declared length byte is outside the accepted range.
    BadLength,
    /// Authentication tag did not match.
    BadMac,
    /// Frame did not come from the master.
    Foreign,
    /// Radio is disabled (device address 0).
    Disabled,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLong => write!(f, "payload too long"),
            Self::Busy => write!(f, "link busy"),
            Self::BadLength => write!(f, "bad length byte"),
            Self::BadMac => write!(f, "MAC mismatch"),
            Self::Foreign => write!(f, "sender is not the master"),
            Self::Disabled => write!(f, "radio disabled"),
        }
    }
}

impl From<RadioError> for Error {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

// ---------------------------------------------------------------------------
// Controller fault bits
// ---------------------------------------------------------------------------

/// Latched controller faults.  The discriminants are the on-wire bit
/// positions of the status frame's error byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorFlag {
    /// Battery below the low threshold.
    BatteryLow = 0b1000_0000,
    /// Battery below the warning threshold.
    BatteryWarning = 0b0100_0000,
    /// No valid radio time sync within the timeout window.
    RadioSync = 0b0001_0000,
    /// Motor stalled or calibration impossible.
    Motor = 0b0000_1000,
    /// Valve body not seated on the radiator.
    Mounting = 0b0000_0100,
}

impl ErrorFlag {
    pub const ALL: [Self; 5] = [
        Self::BatteryLow,
        Self::BatteryWarning,
        Self::RadioSync,
        Self::Motor,
        Self::Mounting,
    ];

    /// Return the bitmask for this flag.
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ErrorFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BatteryLow => write!(f, "battery low"),
            Self::BatteryWarning => write!(f, "battery warning"),
            Self::RadioSync => write!(f, "radio sync lost"),
            Self::Motor => write!(f, "motor fault"),
            Self::Mounting => write!(f, "valve not mounted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
