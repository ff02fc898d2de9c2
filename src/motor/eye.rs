//! Photo-eye pulse counting and stall detection.
//!
//! This state is written from two interrupts and read from task context:
//!
//! ```text
//!   eye edge ISR ──▶ ┌──────────────┐ ◀── motor timer ISR (15.6 kHz)
//!                    │  EyeState    │
//!                    │  (CS mutex)  │
//!   MotorEngine  ──▶ └──────────────┘
//! ```
//!
//! Every access, ISR or task side, goes through one short critical
//! section.  Both ISRs cut the H-bridge themselves before posting a task;
//! a jammed gear train must not wait for the main loop.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

use super::Direction;
use crate::app::ports::MotorBridge;
use crate::events::{Task, TaskQueue};

/// Eye filter thresholds and timeouts captured when a move starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EyeThresholds {
    /// Minimum low phase, in 2-tick units.
    pub eye_low: u8,
    /// Minimum time since the last edge, in 2-tick units.
    pub eye_high: u8,
    /// Eye power-down delay after the last pulse, in 256-tick units.
    pub close_eye_timeout: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct EyeState {
    pos: i16,
    stop: i16,
    counting: i8,
    cnt: u16,
    last_change: u16,
    longest_low: u16,
    diag: u16,
    timer: u16,
    budget: u16,
    running: bool,
    eye_enabled: bool,
    overshoot: u8,
    eye_low: u8,
    eye_high: u8,
    close_eye_timeout: u8,
}

/// Consistent copy of the ISR-shared fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorSnapshot {
    pub position: i16,
    pub stop: i16,
    pub overshoot: u8,
    /// Stall timer left when the bridge stopped; 0 means timeout.
    pub timer: u16,
    /// Ticks between the last two accepted pulses.
    pub diag: u16,
    pub running: bool,
    pub eye_active: bool,
}

/// ISR-shared motor state.  Lives in a `static` on the device.
pub struct MotorShared {
    state: CriticalSectionMutex<RefCell<EyeState>>,
}

impl Default for MotorShared {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorShared {
    pub const fn new() -> Self {
        Self {
            state: CriticalSectionMutex::new(RefCell::new(EyeState {
                pos: 0,
                stop: 0,
                counting: 0,
                cnt: 0,
                last_change: 0,
                longest_low: 0,
                diag: 0,
                timer: 0,
                budget: 0,
                running: false,
                eye_enabled: false,
                overshoot: 0,
                eye_low: 0,
                eye_high: 0,
                close_eye_timeout: 0,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut EyeState) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    // ── ISR side ──────────────────────────────────────────────

    /// Eye input changed; `level_low` is the level after the edge.
    ///
    /// A pulse counts on the falling edge when the previous high phase and
    /// the longest low phase both exceed their noise thresholds.
    pub fn on_eye_edge<B>(&self, level_low: bool, bridge: &mut B, tasks: &TaskQueue)
    where
        B: MotorBridge + ?Sized,
    {
        self.with(|s| {
            if !s.eye_enabled {
                return;
            }
            let dur = s.cnt.wrapping_sub(s.last_change);
            s.last_change = s.cnt;

            if !level_low {
                s.longest_low = s.longest_low.max(dur);
                return;
            }
            if dur <= u16::from(s.eye_high) << 1 || s.longest_low <= u16::from(s.eye_low) << 1 {
                return;
            }

            s.pos = s.pos.wrapping_add(i16::from(s.counting));
            if !s.running {
                s.overshoot = s.overshoot.saturating_add(1);
            }
            s.diag = s.cnt;
            s.longest_low = 0;
            s.cnt = 0;
            s.last_change = 0;
            tasks.post(Task::MotorPulse);

            if s.pos == s.stop {
                s.overshoot = 0;
                s.running = false;
                bridge.stop();
                tasks.post(Task::MotorStop);
            } else {
                s.timer = s.budget;
            }
        });
    }

    /// Motor timer overflow.
    pub fn on_timer_tick<B>(&self, bridge: &mut B, tasks: &TaskQueue)
    where
        B: MotorBridge + ?Sized,
    {
        self.with(|s| {
            if !s.eye_enabled {
                return;
            }
            s.cnt = s.cnt.wrapping_add(1);
            if (s.cnt >> 8) as u8 >= s.close_eye_timeout {
                s.eye_enabled = false;
                tasks.cancel(Task::MotorPulse);
                bridge.stop();
                bridge.eye_power(false);
                if s.running {
                    // Still driving: report it as a stall.
                    s.running = false;
                    s.diag = s.cnt;
                    s.timer = 0;
                    tasks.post(Task::MotorStop);
                }
            } else if s.timer > 0 {
                s.timer -= 1;
            } else if s.running {
                s.diag = s.cnt;
                s.running = false;
                tasks.post(Task::MotorStop);
                bridge.stop();
            }
        });
    }

    // ── Task side ─────────────────────────────────────────────

    /// Arm counting for a new move in `dir`.
    ///
    /// `budget` is the per-pulse stall allowance; the first pulse gets
    /// four times as much for motor start-up.
    pub fn arm(&self, dir: Direction, budget: u16, thresholds: EyeThresholds) {
        self.with(|s| {
            s.cnt = 0;
            s.last_change = 0;
            s.longest_low = 0;
            s.counting = dir as i8;
            s.budget = budget;
            s.timer = budget << 2;
            s.eye_low = thresholds.eye_low;
            s.eye_high = thresholds.eye_high;
            s.close_eye_timeout = thresholds.close_eye_timeout;
            s.eye_enabled = true;
            s.running = true;
        });
    }

    /// Bridge stopped from task context.
    pub fn halt(&self) {
        self.with(|s| s.running = false);
    }

    pub fn set_stop(&self, stop: i16) {
        self.with(|s| s.stop = stop);
    }

    pub fn set_position(&self, pos: i16) {
        self.with(|s| s.pos = pos);
    }

    /// Zero position and target (valve removed).
    pub fn reset_position(&self) {
        self.with(|s| {
            s.pos = 0;
            s.stop = 0;
            s.overshoot = 0;
        });
    }

    pub fn position(&self) -> i16 {
        self.with(|s| s.pos)
    }

    pub fn diag(&self) -> u16 {
        self.with(|s| s.diag)
    }

    /// Eye powered: a move is running or has not yet settled.
    pub fn eye_active(&self) -> bool {
        self.with(|s| s.eye_enabled)
    }

    pub fn snapshot(&self) -> MotorSnapshot {
        self.with(|s| MotorSnapshot {
            position: s.pos,
            stop: s.stop,
            overshoot: s.overshoot,
            timer: s.timer,
            diag: s.diag,
            running: s.running,
            eye_active: s.eye_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Bridge {
        stops: usize,
        eye_on: bool,
    }

    impl MotorBridge for Bridge {
        fn drive(&mut self, _dir: Direction, _pwm: u8) {}
        fn set_pwm(&mut self, _pwm: u8) {}
        fn stop(&mut self) {
            self.stops += 1;
        }
        fn eye_power(&mut self, on: bool) {
            self.eye_on = on;
        }
    }

    const TH: EyeThresholds = EyeThresholds {
        eye_low: 10,
        eye_high: 5,
        close_eye_timeout: 4,
    };

    fn ticks(m: &MotorShared, b: &mut Bridge, q: &TaskQueue, n: usize) {
        for _ in 0..n {
            m.on_timer_tick(b, q);
        }
    }

    /// One clean pulse: high for `high` ticks, low for `low` ticks.
    fn pulse(m: &MotorShared, b: &mut Bridge, q: &TaskQueue, high: usize, low: usize) {
        ticks(m, b, q, low);
        m.on_eye_edge(false, b, q);
        ticks(m, b, q, high);
        m.on_eye_edge(true, b, q);
    }

    #[test]
    fn clean_pulses_move_position_in_counting_direction() {
        let m = MotorShared::new();
        let q = TaskQueue::new();
        let mut b = Bridge::default();
        m.set_stop(100);
        m.arm(Direction::Open, 500, TH);

        for _ in 0..3 {
            pulse(&m, &mut b, &q, 30, 30);
        }
        let s = m.snapshot();
        assert_eq!(s.position, 3);
        assert!(s.running);
        assert_eq!(s.timer, 500);
        assert!(q.is_pending(Task::MotorPulse));
    }

    #[test]
    fn short_glitches_are_rejected() {
        let m = MotorShared::new();
        let q = TaskQueue::new();
        let mut b = Bridge::default();
        m.set_stop(100);
        m.arm(Direction::Close, 500, TH);

        // Low phase too short.
        pulse(&m, &mut b, &q, 30, 3);
        assert_eq!(m.position(), 0);
        // High phase too short after a good low phase.
        pulse(&m, &mut b, &q, 4, 30);
        assert_eq!(m.position(), 0);
        pulse(&m, &mut b, &q, 30, 30);
        assert_eq!(m.position(), -1);
    }

    #[test]
    fn reaching_stop_cuts_bridge_from_isr() {
        let m = MotorShared::new();
        let q = TaskQueue::new();
        let mut b = Bridge::default();
        m.set_stop(2);
        m.arm(Direction::Open, 500, TH);

        pulse(&m, &mut b, &q, 30, 30);
        pulse(&m, &mut b, &q, 30, 30);

        let s = m.snapshot();
        assert_eq!(s.position, 2);
        assert!(!s.running);
        assert!(s.timer > 0);
        assert_eq!(b.stops, 1);
        assert!(q.is_pending(Task::MotorStop));
    }

    #[test]
    fn stall_timer_expiry_stops_with_zero_timer() {
        let m = MotorShared::new();
        let q = TaskQueue::new();
        let mut b = Bridge::default();
        m.set_stop(100);
        m.arm(Direction::Open, 10, TH);

        // Start-up allowance is 4x the budget.
        ticks(&m, &mut b, &q, 40);
        assert!(m.snapshot().running);
        ticks(&m, &mut b, &q, 1);

        let s = m.snapshot();
        assert!(!s.running);
        assert_eq!(s.timer, 0);
        assert_eq!(s.diag, 41);
        assert_eq!(b.stops, 1);
        assert!(q.is_pending(Task::MotorStop));
    }

    #[test]
    fn pulses_after_cutoff_count_as_overshoot() {
        let m = MotorShared::new();
        let q = TaskQueue::new();
        let mut b = Bridge::default();
        m.set_stop(1);
        m.arm(Direction::Open, 500, TH);
        pulse(&m, &mut b, &q, 30, 30);
        // Gear train coasts on.
        pulse(&m, &mut b, &q, 30, 30);
        pulse(&m, &mut b, &q, 30, 30);
        let s = m.snapshot();
        assert_eq!(s.position, 3);
        assert_eq!(s.overshoot, 2);
    }

    #[test]
    fn eye_powers_down_after_quiet_period() {
        let m = MotorShared::new();
        let q = TaskQueue::new();
        let mut b = Bridge {
            eye_on: true,
            ..Bridge::default()
        };
        m.set_stop(100);
        m.arm(Direction::Open, 5000, TH);
        q.post(Task::MotorPulse);

        ticks(&m, &mut b, &q, 4 * 256);

        assert!(!m.eye_active());
        assert!(!b.eye_on);
        assert!(!q.is_pending(Task::MotorPulse));
        // Edges are ignored once the eye is off.
        m.on_eye_edge(true, &mut b, &q);
        assert_eq!(m.position(), 0);
    }

    #[test]
    fn eye_timeout_while_driving_reports_a_stall() {
        let m = MotorShared::new();
        let q = TaskQueue::new();
        let mut b = Bridge::default();
        m.set_stop(100);
        // Stall allowance longer than the eye timeout.
        m.arm(Direction::Close, 5000, TH);

        ticks(&m, &mut b, &q, 4 * 256);

        let s = m.snapshot();
        assert!(!s.running);
        assert!(!s.eye_active);
        assert_eq!(s.timer, 0);
        assert_eq!(s.diag, 4 * 256);
        assert_eq!(b.stops, 1);
        assert!(q.is_pending(Task::MotorStop));
    }

    #[test]
    fn eye_timeout_after_a_normal_stop_posts_nothing() {
        let m = MotorShared::new();
        let q = TaskQueue::new();
        let mut b = Bridge::default();
        m.set_stop(1);
        m.arm(Direction::Open, 500, TH);
        pulse(&m, &mut b, &q, 30, 30);
        assert_eq!(q.take_next(), Some(Task::MotorStop));
        q.cancel(Task::MotorPulse);

        ticks(&m, &mut b, &q, 4 * 256);

        assert!(!m.eye_active());
        assert_eq!(q.take_next(), None);
    }
}
