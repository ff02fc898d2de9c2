//! Interrupt-driven task flags.
//!
//! Tasks are posted by:
//! - the RFM12 ready-edge ISR (frame byte moved, frame complete)
//! - the photo-eye ISR (accepted pulse, target reached)
//! - the motor timer ISR (stall detected)
//! - the 1 Hz RTC timer (control tick)
//! - the ADC conversion callback (fresh temperature/battery sample)
//!
//! They are consumed by the main loop, which runs one task to completion,
//! then immediately re-checks the flags.  It only idles when nothing is
//! pending.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ RFM ISR     │────▶│              │     │              │
//! │ Eye ISR     │────▶│  Task flags  │────▶│  Main Loop   │
//! │ Timer ISRs  │────▶│  (AtomicU8)  │     │  (consumer)  │
//! │ ADC done    │────▶│              │     │              │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! A flag is a bit, not a queue entry: posting a task that is already
//! pending coalesces with it.

use core::sync::atomic::{AtomicU8, Ordering};

/// Pending task kinds.  The discriminant is the flag bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Task {
    /// Radio frame byte signalled or TX finished.
    Rfm = 0b0000_0001,
    /// New averaged ADC sample available.
    Adc = 0b0000_0010,
    /// Motor stopped (target reached or stall).
    MotorStop = 0b0000_0100,
    /// 1 Hz clock tick.
    Rtc = 0b0000_1000,
    /// Accepted photo-eye pulse; run PWM regulation.
    MotorPulse = 0b0001_0000,
}

/// Service order when several tasks are pending.
const PRIORITY: [Task; 5] = [
    Task::Rfm,
    Task::Adc,
    Task::MotorStop,
    Task::Rtc,
    Task::MotorPulse,
];

impl Task {
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

/// Lock-free pending-task bitmask shared between ISRs and the main loop.
pub struct TaskQueue {
    pending: AtomicU8,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU8::new(0),
        }
    }

    /// Mark `task` pending.  Safe to call from ISR context.
    pub fn post(&self, task: Task) {
        self.pending.fetch_or(task.mask(), Ordering::Release);
    }

    /// Withdraw a pending task (e.g. the eye was powered down before
    /// the pulse task ran).
    pub fn cancel(&self, task: Task) {
        self.pending.fetch_and(!task.mask(), Ordering::AcqRel);
    }

    /// Take the highest-priority pending task, clearing its flag.
    pub fn take_next(&self) -> Option<Task> {
        let snapshot = self.pending.load(Ordering::Acquire);
        let task = PRIORITY.into_iter().find(|t| snapshot & t.mask() != 0)?;
        self.pending.fetch_and(!task.mask(), Ordering::AcqRel);
        Some(task)
    }

    /// Run `handler` for every pending task, re-looping until no flag is
    /// set.  Tasks posted by the handler itself are picked up too.
    pub fn drain(&self, mut handler: impl FnMut(Task)) {
        while let Some(task) = self.take_next() {
            handler(task);
        }
    }

    pub fn is_pending(&self, task: Task) -> bool {
        self.pending.load(Ordering::Acquire) & task.mask() != 0
    }

    /// True when the loop may idle.
    pub fn is_idle(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }
}

/// The board's task flags, posted by the timer and GPIO handlers.
pub static TASKS: TaskQueue = TaskQueue::new();
