//! Valve motor H-bridge (DRV8871-style, one PWM input per direction).
//!
//! Open drives LEDC ch0 with the duty and holds ch1 low; close is the
//! mirror image.  Both low is coast.
//!
//! ## ISR contract
//!
//! The eye and motor-timer handlers cut the bridge on their own.  The
//! active direction therefore lives in an atomic rather than in the
//! struct: after an ISR stop, a late `set_pwm` from task context must not
//! re-energise the motor.
//!
//! ## Dual-target design
//!
//! On ESP-IDF the LEDC and GPIO helpers hit real registers; on the host
//! they are no-ops and only the direction bookkeeping is observable.

use core::sync::atomic::{AtomicI8, Ordering};

use crate::app::ports::MotorBridge;
use crate::drivers::hw_init;
use crate::motor::Direction;
use crate::pins;

/// Direction currently energised; 0 when coasting.
static ACTIVE_DIR: AtomicI8 = AtomicI8::new(0);

/// Zero-sized handle; every instance drives the same bridge.
#[derive(Debug, Default, Clone, Copy)]
pub struct HBridge;

impl HBridge {
    pub fn new() -> Self {
        Self
    }

    /// Direction currently energised.
    pub fn active(&self) -> Direction {
        match ACTIVE_DIR.load(Ordering::Acquire) {
            1 => Direction::Open,
            -1 => Direction::Close,
            _ => Direction::Stop,
        }
    }

    fn channel(dir: Direction) -> Option<u32> {
        match dir {
            Direction::Open => Some(hw_init::LEDC_CH_MOTOR_OPEN),
            Direction::Close => Some(hw_init::LEDC_CH_MOTOR_CLOSE),
            Direction::Stop => None,
        }
    }
}

impl MotorBridge for HBridge {
    fn drive(&mut self, dir: Direction, pwm: u8) {
        let Some(on) = Self::channel(dir) else {
            self.stop();
            return;
        };
        let off = if dir == Direction::Open {
            hw_init::LEDC_CH_MOTOR_CLOSE
        } else {
            hw_init::LEDC_CH_MOTOR_OPEN
        };
        hw_init::ledc_set(off, 0);
        ACTIVE_DIR.store(dir as i8, Ordering::Release);
        hw_init::ledc_set(on, pwm);
    }

    fn set_pwm(&mut self, pwm: u8) {
        if let Some(ch) = Self::channel(self.active()) {
            hw_init::ledc_set(ch, pwm);
        }
    }

    fn stop(&mut self) {
        ACTIVE_DIR.store(0, Ordering::Release);
        hw_init::ledc_set(hw_init::LEDC_CH_MOTOR_OPEN, 0);
        hw_init::ledc_set(hw_init::LEDC_CH_MOTOR_CLOSE, 0);
    }

    fn eye_power(&mut self, on: bool) {
        hw_init::gpio_write(pins::EYE_LED_GPIO, on);
        hw_init::gpio_intr(pins::EYE_SENSE_GPIO, on);
    }
}
