//! Plain GPIO pins behind the embedded-hal digital traits.
//!
//! The RFM12 bus is bit-banged over four of these; the SDO ready edge is
//! masked and unmasked through [`EdgeIrq`].

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::drivers::hw_init;
use crate::pins;
use crate::rfm::{BitBangBus, IrqLine, RfmDriver, SharedRfm};

/// One configured GPIO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysPin {
    pin: i32,
}

impl SysPin {
    pub const fn new(pin: i32) -> Self {
        Self { pin }
    }

    pub const fn number(&self) -> i32 {
        self.pin
    }
}

impl ErrorType for SysPin {
    type Error = Infallible;
}

impl OutputPin for SysPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        hw_init::gpio_write(self.pin, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        hw_init::gpio_write(self.pin, true);
        Ok(())
    }
}

impl InputPin for SysPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(hw_init::gpio_read(self.pin))
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!hw_init::gpio_read(self.pin))
    }
}

/// Interrupt mask of one edge-triggered input.
#[derive(Debug)]
pub struct EdgeIrq {
    pin: i32,
    enabled: bool,
}

impl EdgeIrq {
    pub const fn new(pin: i32) -> Self {
        Self { pin, enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl IrqLine for EdgeIrq {
    fn enable(&mut self) {
        self.enabled = true;
        hw_init::gpio_intr(self.pin, true);
    }

    fn disable(&mut self) {
        self.enabled = false;
        hw_init::gpio_intr(self.pin, false);
    }
}

pub type DeviceBus = BitBangBus<SysPin, SysPin, SysPin, SysPin>;
/// The board's radio as shared with the SDO edge ISR.
pub type DeviceRfm = SharedRfm<DeviceBus, EdgeIrq>;

/// Driver on the board's RFM12 pins.
pub fn device_radio() -> RfmDriver<DeviceBus, EdgeIrq> {
    let bus = BitBangBus::new(
        SysPin::new(pins::RFM_SCK_GPIO),
        SysPin::new(pins::RFM_SDI_GPIO),
        SysPin::new(pins::RFM_NSEL_GPIO),
        SysPin::new(pins::RFM_SDO_GPIO),
    );
    RfmDriver::new(bus, EdgeIrq::new(pins::RFM_SDO_GPIO))
}
