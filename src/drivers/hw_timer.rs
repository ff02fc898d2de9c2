//! Hardware timers using ESP-IDF's esp_timer API.
//!
//! - RTC timer, 1 Hz: posts [`Task::Rtc`].
//! - Motor timer, 64 µs: drives the eye/stall counters through
//!   [`MotorShared::on_timer_tick`](crate::motor::MotorShared::on_timer_tick).
//!
//! The RTC callback runs in the esp_timer task and only posts a flag.
//! The motor callback is dispatched straight from the esp_timer
//! interrupt (`CONFIG_ESP_TIMER_SUPPORTS_ISR_DISPATCH_METHOD`), so the
//! stall cutoff hits the bridge on time and no tick is skipped.  That
//! interrupt is not IRAM-resident (`CONFIG_ESP_TIMER_IN_IRAM=n`) and is
//! held off while the flash cache is disabled.
//! On simulation targets nothing is started and tests post tasks directly.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::{error, info};

#[cfg(target_os = "espidf")]
use crate::events::{Task, TASKS};

#[cfg(target_os = "espidf")]
static mut RTC_TIMER: esp_timer_handle_t = core::ptr::null_mut();
#[cfg(target_os = "espidf")]
static mut MOTOR_TIMER: esp_timer_handle_t = core::ptr::null_mut();

#[cfg(target_os = "espidf")]
unsafe extern "C" fn rtc_tick_cb(_arg: *mut core::ffi::c_void) {
    TASKS.post(Task::Rtc);
}

/// Interrupt context: one short critical section, no logging.
#[cfg(target_os = "espidf")]
unsafe extern "C" fn motor_tick_cb(_arg: *mut core::ffi::c_void) {
    crate::motor::MOTOR_SHARED.on_timer_tick(&mut crate::drivers::h_bridge::HBridge, &TASKS);
}

/// Create and start one periodic timer.
///
/// Missed periods are delivered late rather than dropped.
///
/// SAFETY: `handle` must be one of the timer statics; called from the
/// main task before any callback can fire.
#[cfg(target_os = "espidf")]
unsafe fn start_periodic(
    handle: *mut esp_timer_handle_t,
    callback: unsafe extern "C" fn(*mut core::ffi::c_void),
    dispatch: esp_timer_dispatch_t,
    name: &'static [u8],
    period_us: u64,
) -> bool {
    let args = esp_timer_create_args_t {
        callback: Some(callback),
        arg: core::ptr::null_mut(),
        dispatch_method: dispatch,
        name: name.as_ptr() as *const _,
        skip_unhandled_events: false,
    };
    let ret = unsafe { esp_timer_create(&args, handle) };
    if ret != ESP_OK {
        error!("hw_timer: create failed (rc={})", ret);
        return false;
    }
    let ret = unsafe { esp_timer_start_periodic(*handle, period_us) };
    if ret != ESP_OK {
        error!("hw_timer: start failed (rc={})", ret);
        return false;
    }
    true
}

/// Start the RTC and motor timers.
#[cfg(target_os = "espidf")]
pub fn start_timers() {
    // SAFETY: the statics are written here once at boot from the main task
    // before any timer callback fires.
    unsafe {
        if !start_periodic(
            &raw mut RTC_TIMER,
            rtc_tick_cb,
            esp_timer_dispatch_t_ESP_TIMER_TASK,
            b"rtc\0",
            crate::pins::RTC_TICK_US,
        ) {
            return;
        }
        if !start_periodic(
            &raw mut MOTOR_TIMER,
            motor_tick_cb,
            esp_timer_dispatch_t_ESP_TIMER_ISR,
            b"motor\0",
            crate::pins::MOTOR_TICK_US,
        ) {
            return;
        }
    }
    info!("hw_timer: rtc@1Hz + motor@{}us started", crate::pins::MOTOR_TICK_US);
}

#[cfg(not(target_os = "espidf"))]
pub fn start_timers() {
    log::info!("hw_timer(sim): timers not started (tasks posted by the caller)");
}

/// Stop both timers (before a restart).
#[cfg(target_os = "espidf")]
pub fn stop_timers() {
    // SAFETY: handles are valid if start_timers() succeeded; the null check
    // covers a failed start.
    unsafe {
        let rtc = RTC_TIMER;
        if !rtc.is_null() {
            esp_timer_stop(rtc);
        }
        let motor = MOTOR_TIMER;
        if !motor.is_null() {
            esp_timer_stop(motor);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn stop_timers() {}
