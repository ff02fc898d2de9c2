//! Outbound application events.
//!
//! The [`ThermostatService`](super::service::ThermostatService) emits these
//! through the [`EventSink`](super::ports::EventSink) port.  Adapters on
//! the other side decide what to do with them; the shipped one renders
//! them as log lines.

use crate::app::ports::WallTime;
use crate::error::{ErrorFlag, RadioError};
use crate::motor::CalibrationStep;
use crate::rfm::wireless::PacketKind;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The service has started.
    Started { devaddr: u8, auto_mode: bool },

    /// The PID law produced a new valve opening.
    ValveCommanded { valve: u8, setpoint: u8 },

    /// A user or remote request changed the setpoint or mode.
    SetpointApplied { wanted: u8, auto_mode: bool },

    /// The window detector changed state.
    WindowChanged { open: bool },

    /// The motor calibration moved to a new step.
    CalibrationChanged { step: CalibrationStep, travel: i16 },

    /// A fault bit went from clear to set.
    FaultRaised(ErrorFlag),

    /// A fault bit went from set to clear.
    FaultCleared(ErrorFlag),

    /// The wall clock was set from a radio sync frame.
    TimeSynced(WallTime),

    /// A frame was handed to the transmitter.
    FrameSent { len: usize, kind: PacketKind },

    /// A received frame was dropped.
    FrameRejected(RadioError),

    /// The stored configuration was written.
    ConfigSaved,
}
