//! 15-sample moving averages of temperature and battery voltage.
//!
//! Both rings advance together, one slot per measurement cycle.  Until
//! the ring has filled, the average is taken over the slots used so far.
//! Every time the write cursor wraps the current temperature average is
//! handed out as a window-detection sample.

use super::AVERAGE_LEN;

#[derive(Debug, Clone)]
struct Ring {
    buf: [i16; AVERAGE_LEN],
    sum: i32,
    average: i16,
}

impl Ring {
    const fn new() -> Self {
        Self {
            buf: [0; AVERAGE_LEN],
            sum: 0,
            average: 0,
        }
    }

    fn put(&mut self, pos: usize, used: usize, value: i16) {
        self.sum += i32::from(value) - i32::from(self.buf[pos]);
        self.buf[pos] = value;
        self.average = (self.sum / used as i32) as i16;
    }
}

/// Paired temperature / battery averages.
#[derive(Debug, Clone)]
pub struct RingAverage {
    temperature: Ring,
    battery: Ring,
    pos: usize,
    used: usize,
}

impl Default for RingAverage {
    fn default() -> Self {
        Self::new()
    }
}

impl RingAverage {
    pub const fn new() -> Self {
        Self {
            temperature: Ring::new(),
            battery: Ring::new(),
            pos: 0,
            used: 1,
        }
    }

    pub fn push_battery(&mut self, millivolts: i16) {
        self.battery.put(self.pos, self.used, millivolts);
    }

    pub fn push_temperature(&mut self, centi_celsius: i16) {
        self.temperature.put(self.pos, self.used, centi_celsius);
    }

    /// Close the cycle.  Returns the temperature average when the ring
    /// wrapped.
    pub fn shift(&mut self) -> Option<i16> {
        self.pos = (self.pos + 1) % AVERAGE_LEN;
        if self.used < AVERAGE_LEN {
            self.used += 1;
        }
        (self.pos == 0).then_some(self.temperature.average)
    }

    /// Averaged temperature, 1/100 °C.
    pub fn temperature(&self) -> i16 {
        self.temperature.average
    }

    /// Averaged battery voltage, mV.
    pub fn battery(&self) -> i16 {
        self.battery.average
    }
}
