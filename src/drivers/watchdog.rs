//! Task watchdog fed from the task loop.
//!
//! A drained batch only counts as progress when the 1 Hz RTC task ran
//! in it.  A wedged loop (say, a radio handshake that never completes)
//! and a dead RTC timer both starve the feed, and the valve resets
//! after [`WATCHDOG_TIMEOUT_MS`].

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use crate::events::Task;

/// Five missed RTC ticks.
pub const WATCHDOG_TIMEOUT_MS: u32 = 5_000;

/// Progress seen since the last feed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    rtc_ran: bool,
}

impl Heartbeat {
    pub fn record(&mut self, task: Task) {
        self.rtc_ran |= task == Task::Rtc;
    }

    /// `true` once per batch that contained an RTC task.
    pub fn take(&mut self) -> bool {
        core::mem::take(&mut self.rtc_ran)
    }
}

pub struct TaskWatchdog {
    heartbeat: Heartbeat,
    #[cfg(target_os = "espidf")]
    subscribed: bool,
}

impl TaskWatchdog {
    /// Subscribe the calling task with panic-on-timeout.
    #[cfg(target_os = "espidf")]
    pub fn subscribe() -> Self {
        let cfg = esp_task_wdt_config_t {
            timeout_ms: WATCHDOG_TIMEOUT_MS,
            idle_core_mask: 0,
            trigger_panic: true,
        };
        // SAFETY: called once from the main task after boot.
        let (reconf, add) = unsafe { (esp_task_wdt_reconfigure(&cfg), esp_task_wdt_add(core::ptr::null_mut())) };
        if reconf != ESP_OK {
            log::warn!("WDT | reconfigure returned {reconf}");
        }
        let subscribed = add == ESP_OK;
        if subscribed {
            log::info!("WDT | main task subscribed ({WATCHDOG_TIMEOUT_MS} ms)");
        } else {
            log::warn!("WDT | subscribe failed ({add}), running unguarded");
        }
        Self {
            heartbeat: Heartbeat::default(),
            subscribed,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn subscribe() -> Self {
        Self {
            heartbeat: Heartbeat::default(),
        }
    }

    /// Note a task handled in the current batch.
    pub fn record(&mut self, task: Task) {
        self.heartbeat.record(task);
    }

    /// End of a drained batch: feed if it carried an RTC tick.
    pub fn end_batch(&mut self) {
        if !self.heartbeat.take() {
            return;
        }
        #[cfg(target_os = "espidf")]
        if self.subscribed {
            // SAFETY: the calling task is subscribed.
            unsafe {
                esp_task_wdt_reset();
            }
        }
    }
}
