//! Application core: pure domain logic, zero I/O.
//!
//! Wires the valve controller, the motor calibration engine and the
//! wireless layer together.  All interaction with hardware happens through
//! **port traits** defined in [`ports`], keeping this layer fully testable
//! without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
