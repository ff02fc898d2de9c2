//! RFM12 sub-GHz radio: register access, frame transfer and the
//! wireless protocol on top.
//!
//! ```text
//!   wireless.rs  frame build / accept, time sync, TX slot
//!        │
//!   frame.rs     ISR byte shuffling, Stop/StartTx/Tx/TxDone/Rx/RxOverflow
//!        │
//!   link.rs      16-bit bit-banged command words
//!        │
//!   regs.rs      command constants, power-up sequence
//! ```

pub mod frame;
pub mod link;
pub mod regs;
pub mod wireless;

pub use frame::{EdgeStep, FrameMachine, IrqLine, RfmMode, RFM_FRAME_MAX};
pub use link::{BitBangBus, Rfm12Link};
pub use regs::{Band, RadioSettings};

use core::cell::RefCell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

use crate::error::RadioError;

/// Driver shared between the SDO edge ISR and the RFM task.
pub type SharedRfm<L, I> = CriticalSectionMutex<RefCell<RfmDriver<L, I>>>;

/// Run `f` on the driver inside one critical section.
pub fn with_radio<L, I, R>(shared: &SharedRfm<L, I>, f: impl FnOnce(&mut RfmDriver<L, I>) -> R) -> R {
    shared.lock(|cell| f(&mut cell.borrow_mut()))
}

/// Ready-edge ISR body.  Returns `true` when the RFM task must run.
///
/// Each byte is moved under its own critical section, so the eye and
/// motor-timer interrupts get in between the bytes of a burst.
pub fn service_ready_edge<L: Rfm12Link, I: IrqLine>(shared: &SharedRfm<L, I>) -> bool {
    let mut signal = false;
    loop {
        match with_radio(shared, RfmDriver::step_byte) {
            EdgeStep::Idle => return signal,
            EdgeStep::Moved { signal: s } => signal |= s,
            EdgeStep::TxDone => return true,
        }
    }
}

/// Link, edge interrupt and frame state owned together.
///
/// The edge ISR and the RFM task reach it through [`SharedRfm`]; every
/// access is one short critical section.
pub struct RfmDriver<L, I> {
    link: L,
    irq: I,
    frame: FrameMachine,
}

impl<L: Rfm12Link, I: IrqLine> RfmDriver<L, I> {
    pub fn new(link: L, irq: I) -> Self {
        Self {
            link,
            irq,
            frame: FrameMachine::new(),
        }
    }

    /// Program the chip and leave it powered down.
    pub fn init(&mut self, settings: &RadioSettings) {
        link::initialize(&mut self.link, settings);
        self.frame.power_off(&mut self.link, &mut self.irq);
    }

    pub fn mode(&self) -> RfmMode {
        self.frame.mode()
    }

    pub fn frame(&self) -> &FrameMachine {
        &self.frame
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn irq(&self) -> &I {
        &self.irq
    }

    /// Drain the ready edge in one go.  Returns `true` when the RFM task
    /// must run.
    pub fn on_ready_edge(&mut self) -> bool {
        self.frame.on_ready_edge(&mut self.link, &mut self.irq)
    }

    /// Move one byte on the ready edge.
    pub fn step_byte(&mut self) -> EdgeStep {
        self.frame.step_byte(&mut self.link, &mut self.irq)
    }

    pub fn start_rx(&mut self) {
        self.frame.start_rx(&mut self.link, &mut self.irq);
    }

    pub fn start_tx(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        self.frame.start_tx(&mut self.link, &mut self.irq, frame)
    }

    pub fn finish_tx(&mut self) {
        self.frame.finish_tx(&mut self.link, &mut self.irq);
    }

    pub fn reset_rx(&mut self) {
        self.frame.reset_rx(&mut self.link, &mut self.irq);
    }

    pub fn power_off(&mut self) {
        self.frame.power_off(&mut self.link, &mut self.irq);
    }

    pub(crate) fn frame_mut(&mut self) -> &mut FrameMachine {
        &mut self.frame
    }

    /// Wrap the driver for sharing with the edge ISR.
    pub fn into_shared(self) -> SharedRfm<L, I> {
        CriticalSectionMutex::new(RefCell::new(self))
    }
}
