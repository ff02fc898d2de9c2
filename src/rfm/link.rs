//! Bit-banged serial bus to the RFM12 transceiver.
//!
//! The chip is programmed with 16-bit command words.  Each word is clocked
//! out MSB first while the chip's response is clocked in on SDO:
//!
//! ```text
//!   nSEL ‾‾\_______________________________/‾\_____   (re-selected)
//!   SCK   ____/‾\_/‾\_/‾\_ ... _/‾\_/‾\____________
//!   SDI   <b15><b14><b13>  ...  <b1 ><b0 >
//!   SDO   <r15><r14><r13>  ...  <r1 ><r0 >
//! ```
//!
//! Select is asserted again right after the deselect pulse so that, between
//! commands, SDO reflects the chip's FIFO/TX-register ready flag.  The frame
//! state machine polls that level through [`Rfm12Link::sdo_high`].

use core::convert::Infallible;

use embedded_hal::digital::{InputPin, OutputPin};
use log::debug;

use super::regs::{self, RadioSettings};

/// Capability to exchange command words with the transceiver.
///
/// The production implementation toggles GPIOs; tests substitute a
/// recording double.
pub trait Rfm12Link {
    /// Shift `word` out while shifting the chip's response in.
    fn transfer16(&mut self, word: u16) -> u16;

    /// Level of the chip's SDO line while selected (ready flag).
    fn sdo_high(&mut self) -> bool;

    /// Load one byte into the TX register.
    fn write_byte(&mut self, byte: u8) {
        self.transfer16(regs::write(byte));
    }

    /// Pop one byte from the RX FIFO.
    fn read_fifo(&mut self) -> u8 {
        (self.transfer16(regs::READ_FIFO) & 0x00FF) as u8
    }
}

/// Issue the power-up register sequence in order.
pub fn initialize<L: Rfm12Link + ?Sized>(link: &mut L, settings: &RadioSettings) {
    let seq = regs::init_sequence(settings);
    for &word in &seq {
        link.transfer16(word);
    }
    debug!("rfm: {} init words issued ({:?})", seq.len(), settings.band);
}

/// Unwrap a pin result whose error type is uninhabited.
fn infallible<T>(r: Result<T, Infallible>) -> T {
    match r {
        Ok(v) => v,
        Err(e) => match e {},
    }
}

// ── GPIO implementation ───────────────────────────────────────

/// RFM12 bus over four GPIOs.
///
/// `SDI` is the chip's data input (our output), `SDO` the chip's data
/// output (our input).
pub struct BitBangBus<SCK, SDI, SEL, SDO> {
    sck: SCK,
    sdi: SDI,
    sel: SEL,
    sdo: SDO,
}

impl<SCK, SDI, SEL, SDO> BitBangBus<SCK, SDI, SEL, SDO>
where
    SCK: OutputPin<Error = Infallible>,
    SDI: OutputPin<Error = Infallible>,
    SEL: OutputPin<Error = Infallible>,
    SDO: InputPin<Error = Infallible>,
{
    /// Take the pins, drive the clock low and select the chip.
    pub fn new(mut sck: SCK, sdi: SDI, mut sel: SEL, sdo: SDO) -> Self {
        infallible(sck.set_low());
        infallible(sel.set_low());
        Self { sck, sdi, sel, sdo }
    }

    /// Give the pins back.
    pub fn release(self) -> (SCK, SDI, SEL, SDO) {
        (self.sck, self.sdi, self.sel, self.sdo)
    }
}

impl<SCK, SDI, SEL, SDO> Rfm12Link for BitBangBus<SCK, SDI, SEL, SDO>
where
    SCK: OutputPin<Error = Infallible>,
    SDI: OutputPin<Error = Infallible>,
    SEL: OutputPin<Error = Infallible>,
    SDO: InputPin<Error = Infallible>,
{
    fn transfer16(&mut self, word: u16) -> u16 {
        let mut out = word;
        let mut ret: u16 = 0;

        infallible(self.sel.set_low());
        for _ in 0..16 {
            infallible(self.sdi.set_state((out & 0x8000 != 0).into()));
            out <<= 1;
            infallible(self.sck.set_high());
            ret = (ret << 1) | u16::from(infallible(self.sdo.is_high()));
            infallible(self.sck.set_low());
        }
        infallible(self.sel.set_high());
        infallible(self.sel.set_low());
        ret
    }

    fn sdo_high(&mut self) -> bool {
        infallible(self.sdo.is_high())
    }
}
