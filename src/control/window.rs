//! Open-window detection.
//!
//! Two sources, selected by [`WindowStrategy`]:
//!
//! - [`ThermalTrendDetector`]: a sudden drop of the 15 s temperature
//!   average below the recent maximum means the window was opened; a rise
//!   above the recent minimum means it was closed again.
//! - [`ReedSwitchDetector`]: a debounced contact on the window frame.
//!
//! The window state itself is a countdown byte owned by the controller:
//! 0 is closed, anything else is open.  The thermal detector loads the
//! open timeout into it; the reed detector uses a plain 1.

use crate::config::{ThermostatConfig, WindowStrategy};

/// Capacity of the 15 s average ring.
pub const WINDOW_RING_LEN: usize = 32;

/// Reed debounce before the first reading is trusted, in ticks.
const REED_INITIAL_DELAY: u8 = 16;

/// Inputs of one detection step.
#[derive(Debug, Clone, Copy)]
pub struct WindowInput {
    /// Current averaged temperature, 1/100 °C.
    pub temperature: i16,
    /// Reed contact reads "open".
    pub contact_open: bool,
    /// Current window countdown; 0 is closed.
    pub state: u8,
}

/// A window-state source.
pub trait WindowDetector {
    /// Run one detection step.  Returns the new window countdown when the
    /// state changed; the caller then forces a PID update.
    fn detect(&mut self, input: &WindowInput, config: &ThermostatConfig) -> Option<u8>;

    /// A fresh 15 s average became available.
    fn push_sample(&mut self, _average: i16) {}
}

/// Temperature trend over the last few 15 s averages.
#[derive(Debug, Clone)]
pub struct ThermalTrendDetector {
    ring: [i16; WINDOW_RING_LEN],
    /// Next slot to write.
    pos: usize,
}

impl Default for ThermalTrendDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ThermalTrendDetector {
    pub const fn new() -> Self {
        Self {
            ring: [0; WINDOW_RING_LEN],
            pos: 0,
        }
    }

    /// Min and max over the most recent `len` samples plus the slot at
    /// the write position, skipping empty slots.
    ///
    /// The write slot holds the oldest sample once the ring has wrapped.
    fn extremes(&self, len: usize) -> Option<(i16, i16)> {
        let len = len.min(WINDOW_RING_LEN);
        (0..=len)
            .map(|back| self.ring[(self.pos + WINDOW_RING_LEN - back) % WINDOW_RING_LEN])
            .filter(|&t| t != 0)
            .fold(None, |acc, t| match acc {
                None => Some((t, t)),
                Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
            })
    }
}

impl WindowDetector for ThermalTrendDetector {
    fn detect(&mut self, input: &WindowInput, config: &ThermostatConfig) -> Option<u8> {
        let open = input.state != 0;
        let len = if open { config.window_close_time } else { config.window_open_time };
        let (min, max) = self.extremes(usize::from(len))?;
        let temp = i32::from(input.temperature);

        if temp - i32::from(min) > i32::from(config.window_close_diff) {
            return open.then_some(0);
        }
        if !open && config.window_detection_enabled && i32::from(max) - temp > i32::from(config.window_open_diff) {
            return Some(config.window_open_timeout);
        }
        None
    }

    fn push_sample(&mut self, average: i16) {
        self.ring[self.pos] = average;
        self.pos = (self.pos + 1) % WINDOW_RING_LEN;
    }
}

/// Debounced window contact.
#[derive(Debug, Clone)]
pub struct ReedSwitchDetector {
    timer: u8,
}

impl Default for ReedSwitchDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ReedSwitchDetector {
    pub const fn new() -> Self {
        Self {
            timer: REED_INITIAL_DELAY,
        }
    }
}

impl WindowDetector for ReedSwitchDetector {
    fn detect(&mut self, input: &WindowInput, config: &ThermostatConfig) -> Option<u8> {
        let wanted = input.contact_open && config.window_detection_enabled;
        let mut changed = None;
        if wanted != (input.state != 0) {
            if self.timer != 0 {
                self.timer -= 1;
                return None;
            }
            changed = Some(u8::from(wanted));
        }
        self.timer = if wanted { config.window_close_delay } else { config.window_open_delay };
        changed
    }
}

/// The configured detector.
#[derive(Debug, Clone)]
pub enum Detector {
    Thermal(ThermalTrendDetector),
    Reed(ReedSwitchDetector),
}

impl Detector {
    pub fn for_strategy(strategy: WindowStrategy) -> Self {
        match strategy {
            WindowStrategy::ThermalTrend => Self::Thermal(ThermalTrendDetector::new()),
            WindowStrategy::ReedSwitch => Self::Reed(ReedSwitchDetector::new()),
        }
    }

    pub fn strategy(&self) -> WindowStrategy {
        match self {
            Self::Thermal(_) => WindowStrategy::ThermalTrend,
            Self::Reed(_) => WindowStrategy::ReedSwitch,
        }
    }
}

impl WindowDetector for Detector {
    fn detect(&mut self, input: &WindowInput, config: &ThermostatConfig) -> Option<u8> {
        match self {
            Self::Thermal(d) => d.detect(input, config),
            Self::Reed(d) => d.detect(input, config),
        }
    }

    fn push_sample(&mut self, average: i16) {
        match self {
            Self::Thermal(d) => d.push_sample(average),
            Self::Reed(d) => d.push_sample(average),
        }
    }
}
