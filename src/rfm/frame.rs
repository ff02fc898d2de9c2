//! Interrupt-driven frame transfer.
//!
//! ```text
//!          start_rx / finish_tx / reset_rx
//!   ┌──────┐ ───────────────────────────────▶ ┌──────┐  pos == CAP  ┌───────────┐
//!   │ Stop │                                  │  Rx  │ ───────────▶ │ RxOverflow│
//!   └──────┘ ◀─────────────── power_off ───── └──────┘ ◀─ reset_rx ─ └───────────┘
//!      │  start_tx                               ▲
//!      ▼                                         │ finish_tx
//!   ┌─────────┐  TX_ON   ┌──────┐ pos == size ┌────────┐
//!   │ StartTx │ ───────▶ │  Tx  │ ──────────▶ │ TxDone │
//!   └─────────┘          └──────┘             └────────┘
//! ```
//!
//! The buffer belongs to the ready-edge handler while the mode is `Tx`,
//! `Rx` or `RxOverflow`.  Task context only touches it with the edge
//! interrupt disabled, after a signal, or in `Stop`/`TxDone`.

use super::link::Rfm12Link;
use super::regs;
use crate::error::RadioError;

/// Hard ceiling of the frame buffer.
pub const RFM_FRAME_MAX: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfmMode {
    Stop,
    StartTx,
    Tx,
    TxDone,
    Rx,
    RxOverflow,
}

/// Result of one ready-edge byte transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStep {
    /// SDO low or nothing to move.
    Idle,
    /// One byte moved; `signal` asks for the RFM task.
    Moved { signal: bool },
    /// The last TX byte went out.
    TxDone,
}

/// The MCU's edge interrupt on the chip's SDO line.
pub trait IrqLine {
    fn enable(&mut self);
    fn disable(&mut self);
}

/// Frame buffer plus transfer cursor.
pub struct FrameMachine {
    mode: RfmMode,
    buf: [u8; RFM_FRAME_MAX],
    size: usize,
    pos: usize,
}

impl Default for FrameMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameMachine {
    pub const fn new() -> Self {
        Self {
            mode: RfmMode::Stop,
            buf: [0; RFM_FRAME_MAX],
            size: 0,
            pos: 0,
        }
    }

    pub fn mode(&self) -> RfmMode {
        self.mode
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes received so far (or queued, during TX).
    pub fn received(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    // ── ISR side ──────────────────────────────────────────────

    /// Move at most one byte on the ready edge.
    ///
    /// Masks the edge interrupt around the transfer.  After the last TX
    /// byte it stays masked; task context re-arms it in
    /// [`finish_tx`](Self::finish_tx).
    pub fn step_byte<L, I>(&mut self, link: &mut L, irq: &mut I) -> EdgeStep
    where
        L: Rfm12Link + ?Sized,
        I: IrqLine + ?Sized,
    {
        if !link.sdo_high() {
            return EdgeStep::Idle;
        }
        irq.disable();
        let step = match self.mode {
            RfmMode::Tx => {
                link.write_byte(self.buf[self.pos]);
                self.pos += 1;
                if self.pos >= self.size {
                    self.mode = RfmMode::TxDone;
                    return EdgeStep::TxDone;
                }
                EdgeStep::Moved { signal: false }
            }
            RfmMode::Rx => {
                self.buf[self.pos] = link.read_fifo();
                self.pos += 1;
                if self.pos >= RFM_FRAME_MAX {
                    self.mode = RfmMode::RxOverflow;
                }
                EdgeStep::Moved { signal: true }
            }
            RfmMode::RxOverflow => {
                let _ = link.read_fifo();
                EdgeStep::Moved { signal: true }
            }
            RfmMode::Stop | RfmMode::StartTx | RfmMode::TxDone => EdgeStep::Idle,
        };
        irq.enable();
        step
    }

    /// Service the ready edge until SDO drops.  Returns `true` when task
    /// context must run.
    pub fn on_ready_edge<L, I>(&mut self, link: &mut L, irq: &mut I) -> bool
    where
        L: Rfm12Link + ?Sized,
        I: IrqLine + ?Sized,
    {
        let mut signal = false;
        loop {
            match self.step_byte(link, irq) {
                EdgeStep::Idle => return signal,
                EdgeStep::Moved { signal: s } => signal |= s,
                EdgeStep::TxDone => return true,
            }
        }
    }

    // ── Task side ─────────────────────────────────────────────

    /// Power the receiver up and listen from an empty buffer.
    pub fn start_rx<L, I>(&mut self, link: &mut L, irq: &mut I)
    where
        L: Rfm12Link + ?Sized,
        I: IrqLine + ?Sized,
    {
        irq.disable();
        self.pos = 0;
        link.transfer16(regs::FIFO_OFF);
        link.transfer16(regs::FIFO_ON);
        link.transfer16(regs::RX_ON);
        self.mode = RfmMode::Rx;
        irq.enable();
    }

    /// Load `frame` and start clocking it out.
    ///
    /// Fails with `Busy` while a transmission is in flight.
    pub fn start_tx<L, I>(&mut self, link: &mut L, irq: &mut I, frame: &[u8]) -> Result<(), RadioError>
    where
        L: Rfm12Link + ?Sized,
        I: IrqLine + ?Sized,
    {
        if frame.is_empty() || frame.len() > RFM_FRAME_MAX {
            return Err(RadioError::PayloadTooLong);
        }
        if matches!(self.mode, RfmMode::Tx | RfmMode::StartTx) {
            return Err(RadioError::Busy);
        }
        irq.disable();
        self.mode = RfmMode::StartTx;
        link.transfer16(regs::TX_ON_PRE);
        self.buf[..frame.len()].copy_from_slice(frame);
        self.size = frame.len();
        self.pos = 0;
        self.mode = RfmMode::Tx;
        link.transfer16(regs::TX_ON);
        irq.enable();
        Ok(())
    }

    /// Tear down the transmitter after `TxDone` and go back to listening.
    pub fn finish_tx<L, I>(&mut self, link: &mut L, irq: &mut I)
    where
        L: Rfm12Link + ?Sized,
        I: IrqLine + ?Sized,
    {
        irq.disable();
        self.mode = RfmMode::Stop;
        self.start_rx(link, irq);
    }

    /// Drop the current frame (or overflow) and resynchronise on the next
    /// sync word.
    pub fn reset_rx<L, I>(&mut self, link: &mut L, irq: &mut I)
    where
        L: Rfm12Link + ?Sized,
        I: IrqLine + ?Sized,
    {
        irq.disable();
        self.pos = 0;
        self.mode = RfmMode::Rx;
        link.transfer16(regs::FIFO_OFF);
        link.transfer16(regs::FIFO_ON);
        irq.enable();
    }

    /// Forget a partial frame without touching the chip.
    pub fn discard_partial(&mut self) {
        self.pos = 0;
    }

    /// Truncate the received bytes to the declared frame length.
    pub fn truncate(&mut self, len: usize) {
        self.pos = self.pos.min(len);
    }

    /// Everything off; the edge interrupt stays masked.
    pub fn power_off<L, I>(&mut self, link: &mut L, irq: &mut I)
    where
        L: Rfm12Link + ?Sized,
        I: IrqLine + ?Sized,
    {
        irq.disable();
        link.transfer16(regs::OFF);
        self.mode = RfmMode::Stop;
    }
}
