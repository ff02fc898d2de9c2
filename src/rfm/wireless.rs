//! Wireless protocol between the valves and the master.
//!
//! ```text
//!   on air:   AA AA 2D D4 │ len │ addr │ payload … │ MAC[4] │ AA AA
//!   rx buf:               │  0  │  1   │ 2 ..len-4 │len-4.. │
//! ```
//!
//! The chip strips preamble and sync word, so a received frame starts
//! with the length byte.  The MAC covers `addr` and the payload.
//!
//! Sync frames from the master have bit 7 of the length byte set and
//! carry four packed time bytes instead of an address:
//!
//! ```text
//!   b1 year │ b2 month<<4 | day>>3 │ b3 (day&7)<<5 | hour │ b4 minute<<1 | half
//! ```
//!
//! Every valve transmits only in the second equal to its address.  After a
//! transmission the receiver stays on for one tick so the master can
//! answer with commands.

use heapless::Vec;
use log::{debug, info, warn};

use super::frame::{RfmMode, RFM_FRAME_MAX};
use super::link::Rfm12Link;
use super::{IrqLine, RfmDriver};
use crate::app::ports::{FrameAuthenticator, WallTime};
use crate::control::ModeChange;
use crate::error::{ErrorFlag, RadioError};
use crate::faults::FaultRegister;

/// Device family in the low bits of the payload flags byte.
pub const DEVICE_TYPE: u8 = 0x14;
/// Preamble and FIFO sync pattern.
pub const SYNC_WORD: [u8; 4] = [0xAA, 0xAA, 0x2D, 0xD4];
/// Largest payload that still fits one frame.
pub const PAYLOAD_MAX: usize = RFM_FRAME_MAX - SYNC_WORD.len() - 2 - MAC_LEN - DUMMY_LEN;
/// Legacy length byte of a time-sync broadcast.
pub const LEGACY_SYNC: u8 = 0xC9;

const MAC_LEN: usize = 4;
const DUMMY_LEN: usize = 2;
/// Length byte + address + MAC.
const MIN_FRAME_LEN: usize = 2 + MAC_LEN;
/// Sync frame with the four time bytes.
const SYNC_FRAME_LEN: usize = 1 + 4 + MAC_LEN;
/// Minutes a received time sync stays valid.
const SYNC_TIMEOUT_MINUTES: i8 = 20;
/// Ticks the receiver stays on after a transmission or at a sync slot.
const RX_WINDOW_TICKS: u8 = 1;

pub type Payload = Vec<u8, PAYLOAD_MAX>;
pub type Frame = Vec<u8, RFM_FRAME_MAX>;

// ── Packet kinds ──────────────────────────────────────────────

/// Top two bits of the payload flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    /// Status push from a valve.
    Broadcast = 0x00,
    /// Request to a valve.
    Command = 0x40,
    /// Answer from a valve.
    Reply = 0x80,
    Special = 0xC0,
}

impl PacketKind {
    /// Flags byte for a packet of this kind from this device family.
    pub const fn flags(self) -> u8 {
        self as u8 | DEVICE_TYPE
    }

    pub const fn from_flags(flags: u8) -> Self {
        match flags & 0xC0 {
            0x00 => Self::Broadcast,
            0x40 => Self::Command,
            0x80 => Self::Reply,
            _ => Self::Special,
        }
    }
}

/// Assemble a complete on-air frame from `addr`.
pub fn build_frame(
    addr: u8,
    payload: &[u8],
    auth: &(impl FrameAuthenticator + ?Sized),
) -> Result<Frame, RadioError> {
    if payload.len() > PAYLOAD_MAX {
        return Err(RadioError::PayloadTooLong);
    }
    let mut frame = Frame::new();
    frame.extend_from_slice(&SYNC_WORD).map_err(overflow)?;
    frame.push((payload.len() + MIN_FRAME_LEN) as u8).map_err(overflow)?;
    frame.push(addr).map_err(overflow)?;
    frame.extend_from_slice(payload).map_err(overflow)?;
    let mac = auth.tag(&frame[SYNC_WORD.len() + 1..]);
    frame.extend_from_slice(&mac).map_err(overflow)?;
    // Trailing dummies keep the transmitter on until the MAC is out.
    frame.extend_from_slice(&[0xAA; DUMMY_LEN]).map_err(overflow)?;
    Ok(frame)
}

fn overflow<T>(_: T) -> RadioError {
    RadioError::PayloadTooLong
}

// ── Status report ─────────────────────────────────────────────

/// Snapshot carried by `'D'` broadcasts and replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusReport {
    pub minute: u8,
    pub second: u8,
    /// Auto mode and the setpoint is the scheduled one.
    pub on_schedule: bool,
    pub auto_mode: bool,
    pub window_open: bool,
    pub errors: u8,
    /// 1/100 °C
    pub temperature: i16,
    pub battery_mv: u16,
    /// Half °C
    pub wanted: u8,
    pub valve: u8,
}

impl StatusReport {
    pub const LEN: usize = 9;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let [t_hi, t_lo] = self.temperature.to_be_bytes();
        let [b_hi, b_lo] = self.battery_mv.to_be_bytes();
        [
            self.minute | if self.on_schedule { 0x40 } else { 0 } | if self.auto_mode { 0x80 } else { 0 },
            self.second | if self.window_open { 0x40 } else { 0 },
            self.errors,
            t_hi,
            t_lo,
            b_hi,
            b_lo,
            self.wanted,
            self.valve,
        ]
    }

    /// Broadcast payload: flags, `'D'`, report.
    pub fn broadcast_payload(&self) -> Payload {
        let mut p = Payload::new();
        // 11 bytes always fit.
        let _ = p.push(PacketKind::Broadcast.flags());
        let _ = p.push(b'D');
        let _ = p.extend_from_slice(&self.encode());
        p
    }
}

/// Unpack the four time bytes of a sync frame.
pub fn decode_sync_time(b: &[u8; 4]) -> WallTime {
    WallTime {
        year: b[0],
        month: b[1] >> 4,
        day: (b[2] >> 5) + ((b[1] << 3) & 0x18),
        hour: b[2] & 0x1F,
        minute: b[3] >> 1,
        second: if b[3] & 1 != 0 { 30 } else { 0 },
    }
}

/// Inverse of [`decode_sync_time`], for the master side and tests.
pub fn encode_sync_time(t: &WallTime) -> [u8; 4] {
    [
        t.year,
        (t.month << 4) | ((t.day >> 3) & 0x03),
        ((t.day & 0x07) << 5) | (t.hour & 0x1F),
        (t.minute << 1) | u8::from(t.second >= 30),
    ]
}

// ── Remote commands ───────────────────────────────────────────

/// One command out of a master's command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    /// `'D'`: status report.
    Status,
    /// `'V'`: firmware version.
    Version,
    /// `'A' t`: setpoint in half °C; `None` when outside the accepted range.
    SetTemperature(Option<u8>),
    /// `'M' m`: mode change.
    Mode(ModeChange),
    /// Anything else, or a command missing its argument.
    Unknown(u8),
}

impl RemoteCommand {
    /// Command byte echoed (with bit 7 set) in the reply.
    pub fn code(&self) -> u8 {
        match self {
            Self::Status => b'D',
            Self::Version => b'V',
            Self::SetTemperature(_) => b'A',
            Self::Mode(_) => b'M',
            Self::Unknown(c) => *c,
        }
    }
}

/// Mode argument of `'M'`, a signed byte.
pub fn mode_from_byte(m: u8) -> ModeChange {
    match m as i8 {
        -1 => ModeChange::Toggle,
        -2 => ModeChange::Revoke,
        0 => ModeChange::Set(false),
        1 => ModeChange::Set(true),
        n if n < 0 => ModeChange::CloseWindow,
        // Positive values other than 1 mean auto.
        _ => ModeChange::Set(true),
    }
}

/// Iterator over the commands of a command payload.
pub struct CommandIter<'a> {
    bytes: &'a [u8],
}

impl Iterator for CommandIter<'_> {
    type Item = RemoteCommand;

    fn next(&mut self) -> Option<RemoteCommand> {
        let (&c, rest) = self.bytes.split_first()?;
        self.bytes = rest;
        let mut arg = || {
            let (&a, rest) = self.bytes.split_first()?;
            self.bytes = rest;
            Some(a)
        };
        let cmd = match c {
            b'D' => RemoteCommand::Status,
            b'V' => RemoteCommand::Version,
            b'A' => match arg() {
                Some(t) => RemoteCommand::SetTemperature(
                    (crate::config::TEMP_MIN - 1..=crate::config::TEMP_MAX + 1)
                        .contains(&t)
                        .then_some(t),
                ),
                None => RemoteCommand::Unknown(c),
            },
            b'M' => match arg() {
                Some(m) => RemoteCommand::Mode(mode_from_byte(m)),
                None => RemoteCommand::Unknown(c),
            },
            other => RemoteCommand::Unknown(other),
        };
        Some(cmd)
    }
}

pub fn parse_commands(bytes: &[u8]) -> CommandIter<'_> {
    CommandIter { bytes }
}

// ── Receive / transmit state ──────────────────────────────────

/// What the RFM task made of the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxOutcome {
    /// Frame still incomplete.
    Pending,
    /// Length byte rejected; listening again.
    Noise,
    /// Complete frame dropped; listening again.
    Rejected(RadioError),
    /// Valid time sync.  The radio is off until the next slot.
    TimeSync(WallTime),
    /// Valid empty frame from the master; nothing to answer.
    Empty,
    /// Valid command frame from the master; the payload holds the raw
    /// command bytes and a reply is expected.
    Command(Payload),
}

/// Valve-side link supervision.
#[derive(Debug, Clone, Default)]
pub struct Wireless {
    sync_tmo: i8,
    rx_window: u8,
    pending: Option<Payload>,
}

impl Wireless {
    pub const fn new() -> Self {
        Self {
            sync_tmo: 0,
            rx_window: 0,
            pending: None,
        }
    }

    /// Minutes left on the current time sync (≤ 0 once expired).
    pub fn sync_timeout(&self) -> i8 {
        self.sync_tmo
    }

    pub fn is_synced(&self) -> bool {
        self.sync_tmo > 1
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Queue a payload for the next own slot, replacing an unsent one.
    pub fn queue(&mut self, payload: Payload) {
        self.pending = Some(payload);
    }

    /// Listen continuously until the first sync arrives.
    pub fn start<L: Rfm12Link, I: IrqLine>(&mut self, drv: &mut RfmDriver<L, I>) {
        self.sync_tmo = 0;
        drv.start_rx();
        info!("RFM | listening for time sync");
    }

    /// Examine the receive buffer after the edge ISR signalled.
    pub fn on_rx<L, I, A>(
        &mut self,
        drv: &mut RfmDriver<L, I>,
        auth: &A,
        faults: &mut FaultRegister,
    ) -> RxOutcome
    where
        L: Rfm12Link,
        I: IrqLine,
        A: FrameAuthenticator + ?Sized,
    {
        let (len, sync, pos) = {
            let frame = drv.frame();
            let Some(&first) = frame.received().first() else {
                return RxOutcome::Pending;
            };
            if first == LEGACY_SYNC {
                (SYNC_FRAME_LEN, true, frame.pos())
            } else {
                (usize::from(first & 0x7F), first & 0x80 != 0, frame.pos())
            }
        };

        if len >= RFM_FRAME_MAX || len < MIN_FRAME_LEN || pos >= RFM_FRAME_MAX {
            if drv.mode() == RfmMode::RxOverflow {
                drv.reset_rx();
            } else {
                drv.frame_mut().discard_partial();
            }
            return RxOutcome::Noise;
        }
        if pos < len {
            return RxOutcome::Pending;
        }
        drv.frame_mut().truncate(len);

        let outcome = {
            let buf = drv.frame().received();
            let (body, mac) = buf[1..].split_at(len - 1 - MAC_LEN);
            if !auth.verify(body, mac) {
                RxOutcome::Rejected(RadioError::BadMac)
            } else if sync {
                match <&[u8; 4]>::try_from(&body[..body.len().min(4)]) {
                    Ok(time) => RxOutcome::TimeSync(decode_sync_time(time)),
                    Err(_) => RxOutcome::Rejected(RadioError::BadLength),
                }
            } else if body[0] != 0 {
                RxOutcome::Rejected(RadioError::Foreign)
            } else if body.len() == 1 {
                RxOutcome::Empty
            } else {
                match Payload::from_slice(&body[1..]) {
                    Ok(p) => RxOutcome::Command(p),
                    Err(()) => RxOutcome::Rejected(RadioError::PayloadTooLong),
                }
            }
        };

        match &outcome {
            RxOutcome::TimeSync(t) => {
                drv.power_off();
                self.rx_window = 0;
                self.sync_tmo = SYNC_TIMEOUT_MINUTES;
                faults.clear(ErrorFlag::RadioSync);
                info!(
                    "RFM | time sync {:02}-{:02}-{:02} {:02}:{:02}:{:02}",
                    t.year, t.month, t.day, t.hour, t.minute, t.second
                );
            }
            RxOutcome::Empty => {
                drv.power_off();
                self.rx_window = 0;
            }
            RxOutcome::Command(_) => self.rx_window = 0,
            RxOutcome::Rejected(e) => {
                debug!("RFM | frame dropped: {e}");
                drv.reset_rx();
            }
            RxOutcome::Pending | RxOutcome::Noise => {}
        }
        outcome
    }

    /// Transmitter drained: back to listening for the master's answer.
    pub fn on_tx_done<L: Rfm12Link, I: IrqLine>(&mut self, drv: &mut RfmDriver<L, I>) {
        drv.finish_tx();
        self.rx_window = RX_WINDOW_TICKS;
    }

    /// Once per minute: age the time sync.
    pub fn time_sync_check<L: Rfm12Link, I: IrqLine>(
        &mut self,
        drv: &mut RfmDriver<L, I>,
        faults: &mut FaultRegister,
    ) {
        self.sync_tmo = self.sync_tmo.saturating_sub(1);
        if self.sync_tmo > 0 {
            return;
        }
        if self.sync_tmo == 0 || self.sync_tmo < -30 {
            self.sync_tmo = 0;
            self.rx_window = 0;
            drv.start_rx();
            debug!("RFM | sync expired, receiver on");
        } else if self.sync_tmo < -4 {
            drv.power_off();
            if faults.set(ErrorFlag::RadioSync) {
                warn!("RFM | no time sync, radio off");
            }
        }
    }

    /// Once per second, after the controller ran.
    ///
    /// Closes an expired receive window, opens the sync window at seconds
    /// 29 and 59, and sends the queued payload in the own slot.  Returns
    /// the length of a frame handed to the transmitter.
    pub fn tick_second<L, I, A>(
        &mut self,
        second: u8,
        devaddr: u8,
        drv: &mut RfmDriver<L, I>,
        auth: &A,
    ) -> Result<Option<usize>, RadioError>
    where
        L: Rfm12Link,
        I: IrqLine,
        A: FrameAuthenticator + ?Sized,
    {
        if self.rx_window > 0 {
            self.rx_window -= 1;
            if self.rx_window == 0
                && self.sync_tmo > 0
                && matches!(drv.mode(), RfmMode::Rx | RfmMode::RxOverflow)
            {
                drv.power_off();
            }
        }
        if devaddr == 0 || !self.is_synced() {
            return Ok(None);
        }
        if second == 29 || second == 59 {
            drv.start_rx();
            self.rx_window = RX_WINDOW_TICKS;
            return Ok(None);
        }
        if !tx_slot_due(second, devaddr) {
            return Ok(None);
        }
        let Some(payload) = self.pending.take() else {
            return Ok(None);
        };
        self.transmit(devaddr, &payload, drv, auth).map(Some)
    }

    /// Answer a command frame immediately.
    pub fn send_reply<L, I, A>(
        &mut self,
        devaddr: u8,
        reply: &[u8],
        drv: &mut RfmDriver<L, I>,
        auth: &A,
    ) -> Result<usize, RadioError>
    where
        L: Rfm12Link,
        I: IrqLine,
        A: FrameAuthenticator + ?Sized,
    {
        if devaddr == 0 {
            return Err(RadioError::Disabled);
        }
        self.transmit(devaddr, reply, drv, auth)
    }

    fn transmit<L, I, A>(
        &mut self,
        devaddr: u8,
        payload: &[u8],
        drv: &mut RfmDriver<L, I>,
        auth: &A,
    ) -> Result<usize, RadioError>
    where
        L: Rfm12Link,
        I: IrqLine,
        A: FrameAuthenticator + ?Sized,
    {
        let frame = build_frame(devaddr, payload, auth)?;
        drv.start_tx(&frame)?;
        self.rx_window = 0;
        debug!("RFM | tx {} bytes ({:?})", frame.len(), payload.first().map(|&f| PacketKind::from_flags(f)));
        Ok(frame.len())
    }
}

/// Collision avoidance: each valve sends only in its own second.
pub const fn tx_slot_due(second: u8, devaddr: u8) -> bool {
    devaddr != 0 && second == devaddr
}
