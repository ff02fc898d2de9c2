//! Hardware adapter: bridges the valve peripherals to the domain ports.
//!
//! Owns the ADC front end and the H-bridge, exposing them through
//! [`TemperatureSource`], [`MountSensor`], [`WindowContact`] and
//! [`MotorBridge`].  On non-espidf targets the analog and contact inputs
//! come from `sim_*` setters instead of the pins.

use crate::app::ports::{MotorBridge, MountSensor, TemperatureSource, WindowContact};
use crate::drivers::h_bridge::HBridge;
use crate::motor::{Direction, MountReading};
use crate::sensors::{AdcChannel, SensorFrontEnd, SensorSample};

#[cfg(target_os = "espidf")]
use crate::drivers::hw_init;
#[cfg(target_os = "espidf")]
use crate::pins;

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, Copy)]
struct SimInputs {
    battery_raw: u16,
    ntc_raw: u16,
    mount: MountReading,
    window_open: bool,
}

/// Concrete adapter combining the valve hardware behind the port traits.
pub struct HardwareAdapter {
    front_end: SensorFrontEnd,
    bridge: HBridge,
    #[cfg(not(target_os = "espidf"))]
    sim: SimInputs,
}

impl HardwareAdapter {
    pub fn new(front_end: SensorFrontEnd, bridge: HBridge) -> Self {
        Self {
            front_end,
            bridge,
            #[cfg(not(target_os = "espidf"))]
            sim: SimInputs {
                battery_raw: 0,
                ntc_raw: 0,
                mount: MountReading::Unmounted,
                window_open: false,
            },
        }
    }

    /// Latest averages without running a conversion.
    pub fn latest(&self) -> Option<SensorSample> {
        self.front_end.latest()
    }

    #[cfg(target_os = "espidf")]
    fn read_channel(&mut self, ch: AdcChannel) -> u16 {
        match ch {
            AdcChannel::Battery => hw_init::adc1_read(pins::BATTERY_ADC_CHANNEL),
            AdcChannel::Thermistor => {
                // The divider is powered only for the conversion.
                hw_init::gpio_write(pins::NTC_POWER_GPIO, true);
                let raw = hw_init::adc1_read(pins::NTC_ADC_CHANNEL);
                hw_init::gpio_write(pins::NTC_POWER_GPIO, false);
                raw
            }
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_channel(&mut self, ch: AdcChannel) -> u16 {
        match ch {
            AdcChannel::Battery => self.sim.battery_raw,
            AdcChannel::Thermistor => self.sim.ntc_raw,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_adc(&mut self, ch: AdcChannel, raw: u16) {
        match ch {
            AdcChannel::Battery => self.sim.battery_raw = raw,
            AdcChannel::Thermistor => self.sim.ntc_raw = raw,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_mount(&mut self, reading: MountReading) {
        self.sim.mount = reading;
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_set_window(&mut self, open: bool) {
        self.sim.window_open = open;
    }
}

// ── Sensor ports ──────────────────────────────────────────────

impl TemperatureSource for HardwareAdapter {
    fn measure(&mut self) -> Option<SensorSample> {
        let mut front_end = core::mem::take(&mut self.front_end);
        let sample = front_end.measure(|ch| self.read_channel(ch));
        self.front_end = front_end;
        sample
    }
}

impl MountSensor for HardwareAdapter {
    /// The contact and both keys pull to ground when closed.
    #[cfg(target_os = "espidf")]
    fn mount_reading(&mut self) -> MountReading {
        if hw_init::gpio_read(pins::MOUNT_CONTACT_GPIO) {
            MountReading::Unmounted
        } else if !hw_init::gpio_read(pins::KEY_PROG_GPIO) {
            MountReading::MountedKeyProg
        } else if !hw_init::gpio_read(pins::KEY_C_GPIO) {
            MountReading::MountedKeyC
        } else {
            MountReading::Mounted
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn mount_reading(&mut self) -> MountReading {
        self.sim.mount
    }
}

impl WindowContact for HardwareAdapter {
    /// Reed closed (pin low) while the window is shut.
    #[cfg(target_os = "espidf")]
    fn window_contact_open(&mut self) -> bool {
        hw_init::gpio_read(pins::WINDOW_CONTACT_GPIO)
    }

    #[cfg(not(target_os = "espidf"))]
    fn window_contact_open(&mut self) -> bool {
        self.sim.window_open
    }
}

// ── Motor port ────────────────────────────────────────────────

impl MotorBridge for HardwareAdapter {
    fn drive(&mut self, dir: Direction, pwm: u8) {
        self.bridge.drive(dir, pwm);
    }

    fn set_pwm(&mut self, pwm: u8) {
        self.bridge.set_pwm(pwm);
    }

    fn stop(&mut self) {
        self.bridge.stop();
    }

    fn eye_power(&mut self, on: bool) {
        self.bridge.eye_power(on);
    }
}
