//! Fuzz target: the receive path of the valve radio.
//!
//! Shifts arbitrary bytes through the ready-edge handler in chunks whose
//! size comes from the first input byte, evaluating the buffer after each
//! chunk.  The receiver must never panic and must always end up listening
//! again.  Command payloads are also run through the command parser.
//!
//! cargo fuzz run fuzz_rx_frame

#![no_main]

use std::collections::VecDeque;

use hr20::adapters::frame_mac::HmacFrameMac;
use hr20::faults::FaultRegister;
use hr20::rfm::regs;
use hr20::rfm::wireless::{self, RxOutcome, Wireless};
use hr20::rfm::{IrqLine, Rfm12Link, RfmDriver, RfmMode};
use libfuzzer_sys::fuzz_target;

#[derive(Default)]
struct Air {
    rx: VecDeque<u8>,
}

impl Rfm12Link for Air {
    fn transfer16(&mut self, word: u16) -> u16 {
        if word == regs::READ_FIFO {
            return u16::from(self.rx.pop_front().unwrap_or(0));
        }
        0
    }

    fn sdo_high(&mut self) -> bool {
        !self.rx.is_empty()
    }
}

struct NoIrq;

impl IrqLine for NoIrq {
    fn enable(&mut self) {}
    fn disable(&mut self) {}
}

fuzz_target!(|data: &[u8]| {
    let Some((&chunk, rest)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(chunk).max(1);

    let mac = HmacFrameMac::new([0; 8]);
    let mut drv = RfmDriver::new(Air::default(), NoIrq);
    let mut link = Wireless::new();
    let mut faults = FaultRegister::new();
    link.start(&mut drv);

    for part in rest.chunks(chunk) {
        drv.link_mut().rx.extend(part.iter().copied());
        drv.on_ready_edge();
        match link.on_rx(&mut drv, &mac, &mut faults) {
            RxOutcome::Command(payload) => {
                let _ = wireless::parse_commands(&payload).count();
                drv.start_rx();
            }
            RxOutcome::TimeSync(_) | RxOutcome::Empty => drv.start_rx(),
            _ => {}
        }
        assert!(matches!(drv.mode(), RfmMode::Rx | RfmMode::RxOverflow));
    }

    let _ = wireless::parse_commands(rest).count();
});
