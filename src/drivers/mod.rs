//! Board drivers: peripheral init, timers, pins, motor bridge, watchdog.

pub mod gpio;
pub mod h_bridge;
pub mod hw_init;
pub mod hw_timer;
pub mod watchdog;
