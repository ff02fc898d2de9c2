//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (UART in production).  One line per event, with the
//! subsystem as prefix.

use log::{error, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::control::Setpoint;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started { devaddr, auto_mode } => {
                info!(
                    "START | addr={} mode={}",
                    devaddr,
                    if *auto_mode { "auto" } else { "manual" }
                );
            }
            AppEvent::ValveCommanded { valve, setpoint } => {
                info!("CTL | valve={}% setpoint={}", valve, Setpoint::from_raw(*setpoint));
            }
            AppEvent::SetpointApplied { wanted, auto_mode } => {
                info!(
                    "CTL | wanted={} mode={}",
                    Setpoint::from_raw(*wanted),
                    if *auto_mode { "auto" } else { "manual" }
                );
            }
            AppEvent::WindowChanged { open } => {
                info!("CTL | window {}", if *open { "open" } else { "closed" });
            }
            AppEvent::CalibrationChanged { step, travel } => {
                info!("MOTOR | calibration {:?} travel={}", step, travel);
            }
            AppEvent::FaultRaised(flag) => error!("FAULT | raised: {}", flag),
            AppEvent::FaultCleared(flag) => info!("FAULT | cleared: {}", flag),
            AppEvent::TimeSynced(t) => {
                info!(
                    "RFM | clock 20{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
                    t.year, t.month, t.day, t.hour, t.minute, t.second
                );
            }
            AppEvent::FrameSent { len, kind } => info!("RFM | sent {:?} ({} bytes)", kind, len),
            AppEvent::FrameRejected(e) => warn!("RFM | frame rejected: {}", e),
            AppEvent::ConfigSaved => info!("NVS | config saved"),
        }
    }
}
