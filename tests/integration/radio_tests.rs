//! Integration tests for the radio path: ready-edge handler, RFM task,
//! time sync, slot broadcasts and command replies.

use hr20::adapters::frame_mac::HmacFrameMac;
use hr20::app::events::AppEvent;
use hr20::app::ports::{ClockPort, WallTime};
use hr20::config::ThermostatConfig;
use hr20::error::{ErrorFlag, RadioError};
use hr20::events::Task;
use hr20::rfm::RfmMode;
use hr20::rfm::wireless::{self, PacketKind, StatusReport, SYNC_WORD};

use crate::mock_hw::{Rig, drain_tx, feed, master_frame};

const DEVADDR: u8 = 5;
const KEY: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];

const BOOT: WallTime = WallTime {
    year: 24,
    month: 1,
    day: 1,
    hour: 12,
    minute: 0,
    second: 0,
};

const SYNC_TIME: WallTime = WallTime {
    year: 24,
    month: 3,
    day: 15,
    hour: 8,
    minute: 30,
    second: 0,
};

fn rig() -> Rig {
    let mut config = ThermostatConfig::default();
    config.rfm_devaddr = DEVADDR;
    config.security_key = KEY;
    Rig::new(config, BOOT)
}

fn sync(rig: &mut Rig) {
    let frame = master_frame(true, &wireless::encode_sync_time(&SYNC_TIME), &rig.mac);
    assert!(feed(&rig.radio, &frame));
    rig.dispatch(Task::Rfm);
}

#[test]
fn start_listens_for_the_first_sync() {
    let rig = rig();
    assert_eq!(rig.radio_mode(), RfmMode::Rx);
    assert!(!rig.svc.wireless().is_synced());
    assert!(rig.sink.contains(&AppEvent::Started {
        devaddr: DEVADDR,
        auto_mode: true
    }));
}

#[test]
fn sync_frame_sets_the_clock_and_powers_down() {
    let mut rig = rig();
    sync(&mut rig);

    assert_eq!(rig.clock.now(), SYNC_TIME);
    assert!(rig.sink.contains(&AppEvent::TimeSynced(SYNC_TIME)));
    assert!(rig.svc.wireless().is_synced());
    assert_eq!(rig.radio_mode(), RfmMode::Stop);
}

#[test]
fn partial_frame_waits_for_more_bytes() {
    let mut rig = rig();
    let frame = master_frame(true, &wireless::encode_sync_time(&SYNC_TIME), &rig.mac);
    let (head, tail) = frame.split_at(4);

    feed(&rig.radio, head);
    rig.dispatch(Task::Rfm);
    assert_eq!(rig.clock.now(), BOOT);
    assert_eq!(rig.radio_mode(), RfmMode::Rx);

    feed(&rig.radio, tail);
    rig.dispatch(Task::Rfm);
    assert_eq!(rig.clock.now(), SYNC_TIME);
}

#[test]
fn frame_with_wrong_key_is_rejected() {
    let mut rig = rig();
    let forged = HmacFrameMac::new([0; 8]);
    let frame = master_frame(true, &wireless::encode_sync_time(&SYNC_TIME), &forged);
    feed(&rig.radio, &frame);
    rig.dispatch(Task::Rfm);

    assert!(rig.sink.contains(&AppEvent::FrameRejected(RadioError::BadMac)));
    assert_eq!(rig.clock.now(), BOOT);
    assert_eq!(rig.radio_mode(), RfmMode::Rx, "keeps listening");
}

#[test]
fn status_is_broadcast_in_the_own_second() {
    let mut rig = rig();
    sync(&mut rig);

    let mut sent_at = None;
    for _ in 0..120 {
        rig.second();
        let broadcast = AppEvent::FrameSent {
            len: SYNC_WORD.len() + 2 + 11 + 4 + 2,
            kind: PacketKind::Broadcast,
        };
        if rig.sink.contains(&broadcast) {
            sent_at = Some(rig.clock.now());
            break;
        }
    }
    let sent_at = sent_at.expect("status broadcast within two minutes");
    assert_eq!(sent_at.second, DEVADDR);
    assert!(!rig.svc.wireless().has_pending());

    // Clock the frame out and check the header.
    assert!(drain_tx(&rig.radio, 64));
    let sent = hr20::rfm::with_radio(&rig.radio, |drv| drv.link().sent.clone());
    assert_eq!(&sent[..4], &SYNC_WORD);
    assert_eq!(sent[4], 17, "length byte");
    assert_eq!(sent[5], DEVADDR);
    assert_eq!(sent[6], PacketKind::Broadcast.flags());
    assert_eq!(sent[7], b'D');

    // TX done: listen for the master's answer.
    rig.dispatch(Task::Rfm);
    assert_eq!(rig.radio_mode(), RfmMode::Rx);
}

#[test]
fn status_command_is_answered_immediately() {
    let mut rig = rig();
    rig.seconds(2);
    let frame = master_frame(false, &[0x00, b'D'], &rig.mac);
    feed(&rig.radio, &frame);
    rig.dispatch(Task::Rfm);

    assert!(rig.sink.contains(&AppEvent::FrameSent {
        len: SYNC_WORD.len() + 2 + 2 + StatusReport::LEN + 4 + 2,
        kind: PacketKind::Reply,
    }));
    assert_eq!(rig.radio_mode(), RfmMode::Tx);

    assert!(drain_tx(&rig.radio, 64));
    let sent = hr20::rfm::with_radio(&rig.radio, |drv| drv.link().sent.clone());
    assert_eq!(sent[5], DEVADDR);
    assert_eq!(sent[6], PacketKind::Reply.flags());
    assert_eq!(sent[7], b'D' | 0x80);
    // Minute and second of the status report.
    assert_eq!(sent[8] & 0x3F, 0);
    assert_eq!(sent[9] & 0x3F, 2);
}

#[test]
fn setpoint_command_switches_the_wanted_temperature() {
    let mut rig = rig();
    rig.second();
    let frame = master_frame(false, &[0x00, b'A', 44], &rig.mac);
    feed(&rig.radio, &frame);
    rig.dispatch(Task::Rfm);

    assert_eq!(rig.svc.controller().wanted(), 44);
    assert!(rig.sink.contains(&AppEvent::SetpointApplied {
        wanted: 44,
        auto_mode: true
    }));
}

#[test]
fn frame_from_another_valve_is_ignored() {
    let mut rig = rig();
    let frame = master_frame(false, &[0x07, b'D'], &rig.mac);
    feed(&rig.radio, &frame);
    rig.dispatch(Task::Rfm);
    assert!(rig.sink.contains(&AppEvent::FrameRejected(RadioError::Foreign)));
    assert_eq!(rig.radio_mode(), RfmMode::Rx);
}

#[test]
fn missing_sync_turns_the_radio_off_and_flags_it() {
    let mut rig = rig();
    sync(&mut rig);

    // 20 minutes of sync credit, then five more without a frame.
    rig.seconds(26 * 60);
    assert!(rig.svc.faults().contains(ErrorFlag::RadioSync));
    assert!(rig.sink.contains(&AppEvent::FaultRaised(ErrorFlag::RadioSync)));
    assert!(!rig.svc.wireless().is_synced());
}

#[test]
fn radio_stays_off_without_an_address() {
    let mut rig = Rig::new(ThermostatConfig::default(), BOOT);
    rig.seconds(70);
    assert_eq!(rig.radio_mode(), RfmMode::Stop);
    assert_eq!(rig.svc.wireless().sync_timeout(), 0);
    assert!(!rig.sink.events.iter().any(|e| matches!(e, AppEvent::FrameSent { .. })));
}
