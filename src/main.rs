//! HR20 firmware: main entry point
//!
//! Hexagonal architecture driven by ISR-posted task flags.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  HardwareAdapter      LogEventSink   NvsAdapter    SoftClock   │
//! │  (Sensors+Motor)      (EventSink)    (Config+Cal)  (Clock)     │
//! │  DeviceRfm (radio)    HmacFrameMac (FrameAuthenticator)        │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │           ThermostatService (pure logic)               │    │
//! │  │  Controller · Motor calibration · Wireless             │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  ISRs: eye edge, RFM SDO edge · esp_timer: RTC 1 Hz, motor     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use log::{error, info, warn};

use hr20::adapters::clock::{SoftClock, Timetable};
use hr20::adapters::frame_mac::HmacFrameMac;
use hr20::adapters::hardware::HardwareAdapter;
use hr20::adapters::log_sink::LogEventSink;
use hr20::adapters::nvs::NvsAdapter;
use hr20::app::ports::{CalibrationStore, ConfigError, ConfigPort, WallTime};
use hr20::app::service::ThermostatService;
use hr20::config::ThermostatConfig;
use hr20::drivers::gpio::{device_radio, DeviceRfm};
use hr20::drivers::h_bridge::HBridge;
use hr20::drivers::{hw_init, hw_timer, watchdog::TaskWatchdog};
use hr20::events::{Task, TASKS};
use hr20::motor::MOTOR_SHARED;
use hr20::sensors::SensorFrontEnd;

/// Clock value until the first radio sync.
const BOOT_TIME: WallTime = WallTime {
    year: 24,
    month: 1,
    day: 1,
    hour: 12,
    minute: 0,
    second: 0,
};

/// Fail-stop: the watchdog is not yet subscribed, so this parks forever.
fn halt() -> ! {
    #[allow(clippy::empty_loop)]
    loop {}
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  HR20 v{}                          ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Peripherals ────────────────────────────────────────
    if let Err(e) = hw_init::init_peripherals() {
        error!("HAL init failed: {}, halting", e);
        halt();
    }

    // ── 3. Config and calibration hint ────────────────────────
    let mut nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            error!("NVS init failed: {}, halting", e);
            halt();
        }
    };
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e @ ConfigError::LayoutMismatch { .. }) => {
            error!("NVS | {}, halting", e);
            halt();
        }
        Err(e) => {
            warn!("NVS | config load failed ({}), using defaults", e);
            ThermostatConfig::default()
        }
    };
    let manual = nvs.load_calibration();

    // ── 4. Radio and interrupts ───────────────────────────────
    let radio: &'static DeviceRfm = Box::leak(Box::new(device_radio().into_shared()));
    if let Err(e) = hw_init::init_isr_service(radio) {
        error!("ISR service init failed: {}, halting", e);
        halt();
    }

    // ── 5. Adapters and service ───────────────────────────────
    let mut hw = HardwareAdapter::new(SensorFrontEnd::default(), HBridge::new());
    let mut clock = SoftClock::new(BOOT_TIME, Timetable::default());
    clock.set_weekday_programs(config.timer_mode & 0x01 != 0);
    let mac = HmacFrameMac::from(&config);
    let mut sink = LogEventSink::new();

    let mut service = ThermostatService::new(config, manual, &MOTOR_SHARED);
    service.start(radio, &mut sink);

    hw_timer::start_timers();
    let mut watchdog = TaskWatchdog::subscribe();
    TASKS.post(Task::Adc);

    info!("System ready. Entering task loop.");

    // ── 6. Task loop ──────────────────────────────────────────
    loop {
        TASKS.drain(|task| {
            watchdog.record(task);
            if let Some(next) = service.dispatch(task, &mut hw, &mut clock, radio, &mac, &mut nvs, &mut sink) {
                TASKS.post(next);
            }
        });

        watchdog.end_batch();

        if TASKS.is_idle() {
            esp_idf_svc::hal::delay::FreeRtos::delay_ms(1);
        }
    }
}
