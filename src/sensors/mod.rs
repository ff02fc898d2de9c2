//! Temperature and battery measurement.
//!
//! One measurement cycle per second: battery divider first, then the NTC
//! divider.  Each channel is converted twice; the first conversion after
//! switching the mux is a throw-away, and a second reading that strays
//! more than [`ADC_TOLERANCE`] from the first one is repeated.
//!
//! ```text
//!   ADC ──▶ settle/compare ──▶ convert ──▶ RingAverage (15) ──▶ averages
//!                                               │ wrap (every 15 s)
//!                                               ▼
//!                                        window sample
//! ```
//!
//! ## Dual-target design
//!
//! The front end takes the raw channel reader as a closure.  On ESP-IDF
//! the hardware adapter passes the oneshot ADC read; on the host tests pass
//! canned values.

pub mod average;
pub mod thermistor;

pub use average::RingAverage;
pub use thermistor::{battery_millivolts, ThermistorCurve};

use log::warn;

/// Samples in the moving average (one per second).
pub const AVERAGE_LEN: usize = 15;
/// Maximum spread between two consecutive conversions, ADC counts.
pub const ADC_TOLERANCE: u16 = 3;
/// Conversions tried per channel before the cycle is dropped.
const MAX_REPEATS: u8 = 8;

/// Analog inputs of the valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcChannel {
    /// Bandgap against the battery rail.
    Battery,
    /// NTC divider (powered only during the conversion).
    Thermistor,
}

/// Result of one completed measurement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSample {
    /// Averaged temperature, 1/100 °C.
    pub temperature: i16,
    /// Averaged battery voltage, mV.
    pub battery_mv: u16,
    /// Fresh 15 s average for window detection.
    pub window_sample: Option<i16>,
}

/// ADC post-processing shared by every target.
#[derive(Debug, Clone, Default)]
pub struct SensorFrontEnd {
    rings: RingAverage,
    curve: ThermistorCurve,
    valid: bool,
}

impl SensorFrontEnd {
    pub fn new(curve: ThermistorCurve) -> Self {
        Self {
            rings: RingAverage::new(),
            curve,
            valid: false,
        }
    }

    /// Two matching conversions on `ch`, or `None` when the channel never
    /// settled.
    fn settled(ch: AdcChannel, read: &mut impl FnMut(AdcChannel) -> u16) -> Option<u16> {
        let mut previous = read(ch);
        for _ in 0..MAX_REPEATS {
            let ad = read(ch);
            if ad.abs_diff(previous) <= ADC_TOLERANCE {
                return Some(ad);
            }
            previous = ad;
        }
        warn!("ADC | {ch:?} did not settle, cycle dropped");
        None
    }

    /// Run one measurement cycle.
    pub fn measure(&mut self, mut read: impl FnMut(AdcChannel) -> u16) -> Option<SensorSample> {
        let bat = Self::settled(AdcChannel::Battery, &mut read)?;
        let ntc = Self::settled(AdcChannel::Thermistor, &mut read)?;

        let mv = battery_millivolts(bat).min(i16::MAX as u16) as i16;
        self.rings.push_battery(mv);
        self.rings.push_temperature(self.curve.to_centi_celsius(ntc));
        let window_sample = self.rings.shift();
        self.valid = true;

        Some(self.sample(window_sample))
    }

    fn sample(&self, window_sample: Option<i16>) -> SensorSample {
        SensorSample {
            temperature: self.rings.temperature(),
            battery_mv: self.rings.battery().max(0) as u16,
            window_sample,
        }
    }

    /// Latest averages; `None` before the first completed cycle.
    pub fn latest(&self) -> Option<SensorSample> {
        self.valid.then(|| self.sample(None))
    }
}
