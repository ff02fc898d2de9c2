//! Port traits: the hexagonal boundary between the thermostat core and
//! the valve hardware.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ThermostatService (domain)
//! ```
//!
//! Driven adapters (ADC front end, mounting contact, H-bridge, clock,
//! NVS, frame authenticator, event sinks) implement these traits.  The
//! [`ThermostatService`](super::service::ThermostatService) consumes them
//! via generics, so the domain core never touches hardware directly.
//!
//! ## Persistence notes
//!
//! - **ConfigPort** implementations sanitize on load; out-of-range bytes
//!   are replaced, never rejected.
//! - A stored layout version that differs from
//!   [`LAYOUT_VERSION`](crate::config::LAYOUT_VERSION) is the one
//!   unrecoverable condition ([`ConfigError::LayoutMismatch`]).

use crate::config::ThermostatConfig;
use crate::motor::{Direction, ManualCalibration, MountReading};
use crate::sensors::SensorSample;

// ───────────────────────────────────────────────────────────────
// Sensor ports (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Averaged temperature and battery voltage.
pub trait TemperatureSource {
    /// Run one measurement cycle.  `None` when the ADC did not settle.
    fn measure(&mut self) -> Option<SensorSample>;
}

/// Mounting contact on the valve body.
pub trait MountSensor {
    /// Poll the contact.  The same wiring also reports the C and PROG
    /// keys while mounted.
    fn mount_reading(&mut self) -> MountReading;
}

/// Optional reed contact on the window frame.
pub trait WindowContact {
    fn window_contact_open(&mut self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Motor port (driven adapter: domain → H-bridge)
// ───────────────────────────────────────────────────────────────

/// H-bridge and photo-eye supply.
///
/// `stop` must be callable from interrupt context: the eye and timer
/// ISRs cut the bridge themselves.
pub trait MotorBridge {
    /// Energise the bridge in `dir` at `pwm` (0..=255).
    fn drive(&mut self, dir: Direction, pwm: u8);

    /// Change the duty of a running drive.
    fn set_pwm(&mut self, pwm: u8);

    /// Cut both half bridges.
    fn stop(&mut self);

    /// Switch the photo-eye LED and its interrupt.
    fn eye_power(&mut self, on: bool);
}

// ───────────────────────────────────────────────────────────────
// Clock and schedule ports
// ───────────────────────────────────────────────────────────────

/// Local wall-clock time as kept by the valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WallTime {
    /// Years since 2000.
    pub year: u8,
    /// 1..=12
    pub month: u8,
    /// 1..=31
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl WallTime {
    /// Day of week, 0 = Monday.
    pub fn weekday(&self) -> u8 {
        const T: [u32; 12] = [0, 3, 2, 5, 0, 3, 5, 1, 4, 6, 2, 4];
        let month = self.month.clamp(1, 12);
        let mut y = 2000 + u32::from(self.year);
        if month < 3 {
            y -= 1;
        }
        let sunday0 = (y + y / 4 - y / 100 + y / 400 + T[usize::from(month - 1)] + u32::from(self.day)) % 7;
        ((sunday0 + 6) % 7) as u8
    }

    /// Minutes since midnight.
    pub fn minute_of_day(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

/// Wall clock advanced by the 1 Hz tick and set by radio time sync.
pub trait ClockPort {
    fn now(&self) -> WallTime;

    /// Advance by one second (RTC task).
    fn add_second(&mut self);

    /// Replace the current time (radio sync).
    fn set_time(&mut self, time: WallTime);
}

/// Weekly timetable lookup.
pub trait ScheduleSource {
    /// Preset index (0..=3) active at `now`, or `None` when the
    /// timetable has no valid entry.
    fn temperature_type(&self, now: &WallTime) -> Option<u8>;
}

// ───────────────────────────────────────────────────────────────
// Frame authenticator port (driven adapter: domain ↔ crypto)
// ───────────────────────────────────────────────────────────────

/// 4-byte frame authentication tag.
pub trait FrameAuthenticator {
    fn tag(&self, data: &[u8]) -> [u8; 4];

    /// Compare `mac` against the tag of `data`.
    fn verify(&self, data: &[u8], mac: &[u8]) -> bool {
        let expected = self.tag(data);
        mac.len() == expected.len()
            && mac
                .iter()
                .zip(expected.iter())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the thermostat configuration.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`ThermostatConfig::default()`] if no stored config exists.
    /// The returned value is already sanitized.
    fn load(&self) -> Result<ThermostatConfig, ConfigError>;

    /// Persist configuration behind the layout version byte.
    fn save(&self, config: &ThermostatConfig) -> Result<(), ConfigError>;
}

/// Persisted motor calibration hint.
pub trait CalibrationStore {
    fn load_calibration(&self) -> ManualCalibration;

    fn save_calibration(&mut self, cal: ManualCalibration) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// Keys are namespaced to prevent collisions between subsystems.  Write
/// operations must be atomic; ESP-IDF NVS guarantees this natively.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Stored blob failed to decode.
    Corrupted,
    /// Stored blob was written by an incompatible firmware.
    LayoutMismatch { stored: u8, expected: u8 },
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Value does not fit the caller's buffer.
    BufferTooSmall,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::LayoutMismatch { stored, expected } => {
                write!(f, "layout version {stored:#04x}, firmware expects {expected:#04x}")
            }
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Full => Self::StorageFull,
            StorageError::BufferTooSmall => Self::Corrupted,
            StorageError::NotFound | StorageError::IoError => Self::IoError,
        }
    }
}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Corrupted => Self::Config("stored config corrupted"),
            ConfigError::LayoutMismatch { .. } => Self::Config("layout version mismatch"),
            ConfigError::StorageFull => Self::Storage("full"),
            ConfigError::IoError => Self::Storage("I/O error"),
        }
    }
}
