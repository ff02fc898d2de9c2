//! NTC divider and battery divider conversions.
//!
//! The thermistor curve is a piecewise-linear table of ADC readings, one
//! point every 5 °C from 35 °C down to 5 °C.  Readings outside the table
//! are extrapolated from the nearest segment.

/// Spacing of the calibration points, 1/100 °C.
pub const CAL_STEP: i16 = 500;
/// Number of calibration points.
pub const CAL_POINTS: usize = 7;

/// ADC reading at 35, 30, 25, 20, 15, 10 and 5 °C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermistorCurve {
    pub points: [u16; CAL_POINTS],
}

impl Default for ThermistorCurve {
    fn default() -> Self {
        Self {
            points: [295, 340, 397, 472, 549, 614, 675],
        }
    }
}

impl ThermistorCurve {
    /// Convert a raw 10-bit reading to 1/100 °C.
    pub fn to_centi_celsius(&self, adc: u16) -> i16 {
        let adc = i32::from(adc);
        let mut seg = 1;
        let mut kx = i32::from(self.points[0]);
        while seg < CAL_POINTS - 1 {
            let next = i32::from(self.points[seg]);
            if adc < next {
                break;
            }
            kx = next;
            seg += 1;
        }
        let width = (i32::from(self.points[seg]) - i32::from(self.points[seg - 1])).max(1);
        let step = i32::from(CAL_STEP);
        let t = (adc - kx) * -step / width + CAL_POINTS as i32 * step - (seg as i32 - 1) * step;
        t.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
    }
}

/// Battery voltage from the 1.1 V bandgap reading.
pub fn battery_millivolts(adc: u16) -> u16 {
    if adc == 0 {
        return 0;
    }
    (1_126_400 / u32::from(adc)).min(u32::from(u16::MAX)) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_points_map_to_their_temperature() {
        let c = ThermistorCurve::default();
        let expected = [3500, 3000, 2500, 2000, 1500, 1000];
        for (i, t) in expected.iter().enumerate() {
            assert_eq!(c.to_centi_celsius(c.points[i]), *t, "point {i}");
        }
    }

    #[test]
    fn interpolates_between_points() {
        let c = ThermistorCurve::default();
        // Halfway between 20 °C (472) and 15 °C (549).
        let t = c.to_centi_celsius(510);
        assert!((1740..=1760).contains(&t), "{t}");
    }

    #[test]
    fn extrapolates_beyond_table() {
        let c = ThermistorCurve::default();
        assert_eq!(c.to_centi_celsius(675), 500);
        assert!(c.to_centi_celsius(700) < 500);
        assert!(c.to_centi_celsius(250) > 3500);
    }

    #[test]
    fn battery_conversion() {
        assert_eq!(battery_millivolts(400), 2816);
        assert_eq!(battery_millivolts(0), 0);
    }
}
