//! HR20 radiator valve firmware library.
//!
//! Exposes the valve controller, motor calibration engine and RFM12 radio
//! stack for integration testing.  All ESP-IDF-specific code is guarded
//! by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod faults;
pub mod motor;
pub mod rfm;
pub mod sensors;

pub mod adapters;
pub mod drivers;
pub mod pins;
