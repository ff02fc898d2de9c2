//! Mock valve hardware for integration tests.
//!
//! [`GearTrain`] simulates the motor, gear train and photo eye closely
//! enough for the interrupt-side counters to see real pulse timing and
//! real endstop stalls.  [`MockValve`] wraps it together with the
//! analog inputs and contacts so the whole service runs on the host.

use std::collections::VecDeque;

use hr20::adapters::clock::{SoftClock, Timetable};
use hr20::adapters::frame_mac::HmacFrameMac;
use hr20::adapters::nvs::NvsAdapter;
use hr20::app::commands::AppCommand;
use hr20::app::events::AppEvent;
use hr20::app::ports::{
    EventSink, FrameAuthenticator, MotorBridge, MountSensor, TemperatureSource, WallTime, WindowContact,
};
use hr20::app::service::ThermostatService;
use hr20::config::ThermostatConfig;
use hr20::events::{Task, TaskQueue};
use hr20::faults::FaultRegister;
use hr20::motor::{Direction, ManualCalibration, MotorEngine, MotorShared, MountReading};
use hr20::rfm::regs;
use hr20::rfm::{IrqLine, Rfm12Link, RfmDriver, RfmMode, SharedRfm, with_radio};
use hr20::sensors::SensorSample;

// ── Gear train ────────────────────────────────────────────────

/// Motor timer ticks per eye period.
pub const PULSE_PERIOD: u32 = 400;
/// The eye reads low for the first part of each period.
pub const LOW_TICKS: u32 = 250;
/// Upper bound on simulated timer ticks for one move.
const MAX_TICKS: u32 = 2_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorCall {
    Drive(Direction, u8),
    SetPwm(u8),
    Stop,
    Eye(bool),
}

/// Motor and gear train between two hard endstops.
///
/// Physical position is counted in eye periods from the closed endstop.
pub struct GearTrain {
    pub travel: i32,
    pub physical: i32,
    pub dir: Option<Direction>,
    pub eye: bool,
    pub calls: Vec<MotorCall>,
    phase: u32,
}

#[allow(dead_code)]
impl GearTrain {
    pub fn new(travel: i32, physical: i32) -> Self {
        Self {
            travel,
            physical,
            dir: None,
            eye: false,
            calls: Vec::new(),
            phase: 0,
        }
    }

    fn at_endstop(&self, dir: Direction) -> bool {
        match dir {
            Direction::Open => self.physical >= self.travel,
            Direction::Close => self.physical <= 0,
            Direction::Stop => true,
        }
    }

    /// One motor timer period: timer ISR first, then the eye.
    pub fn tick(&mut self, shared: &MotorShared, tasks: &TaskQueue) {
        shared.on_timer_tick(self, tasks);
        let Some(dir) = self.dir else {
            return;
        };
        if self.at_endstop(dir) {
            return;
        }
        self.phase += 1;
        if self.phase == LOW_TICKS {
            if self.eye {
                shared.on_eye_edge(false, self, tasks);
            }
        } else if self.phase == PULSE_PERIOD {
            self.phase = 0;
            self.physical += i32::from(dir as i8);
            if self.eye {
                shared.on_eye_edge(true, self, tasks);
            }
        }
    }

    /// Drive the engine until the bridge is off and the eye powered down.
    /// Returns the number of simulated timer ticks.
    pub fn run_engine(&mut self, engine: &mut MotorEngine, faults: &mut FaultRegister) -> u32 {
        let tasks = TaskQueue::new();
        let shared = engine.shared();
        for n in 0..MAX_TICKS {
            self.tick(shared, &tasks);
            tasks.drain(|task| match task {
                Task::MotorPulse => engine.timer_pulse(self),
                Task::MotorStop => engine.timer_stop(self, faults),
                _ => {}
            });
            if !shared.eye_active() && engine.direction() == Direction::Stop {
                return n;
            }
        }
        panic!("motor still running after {MAX_TICKS} ticks");
    }
}

impl MotorBridge for GearTrain {
    fn drive(&mut self, dir: Direction, pwm: u8) {
        if self.dir != Some(dir) {
            self.phase = 0;
        }
        self.dir = match dir {
            Direction::Stop => None,
            d => Some(d),
        };
        self.calls.push(MotorCall::Drive(dir, pwm));
    }

    fn set_pwm(&mut self, pwm: u8) {
        self.calls.push(MotorCall::SetPwm(pwm));
    }

    fn stop(&mut self) {
        self.dir = None;
        self.calls.push(MotorCall::Stop);
    }

    fn eye_power(&mut self, on: bool) {
        self.eye = on;
        self.calls.push(MotorCall::Eye(on));
    }
}

/// A fresh ISR-shared block per test.
pub fn leak_shared() -> &'static MotorShared {
    Box::leak(Box::new(MotorShared::new()))
}

// ── Valve body ────────────────────────────────────────────────

/// Sensors, contacts and gear train of one valve.
pub struct MockValve {
    pub gear: GearTrain,
    pub mount: MountReading,
    pub window_open: bool,
    pub temperature: i16,
    pub battery_mv: u16,
    pub measurements: usize,
}

#[allow(dead_code)]
impl MockValve {
    pub fn new() -> Self {
        Self {
            gear: GearTrain::new(200, 80),
            mount: MountReading::Mounted,
            window_open: false,
            temperature: 2000,
            battery_mv: 2900,
            measurements: 0,
        }
    }

    pub fn motor_running(&self) -> bool {
        self.gear.dir.is_some()
    }
}

impl Default for MockValve {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureSource for MockValve {
    fn measure(&mut self) -> Option<SensorSample> {
        self.measurements += 1;
        Some(SensorSample {
            temperature: self.temperature,
            battery_mv: self.battery_mv,
            window_sample: None,
        })
    }
}

impl MountSensor for MockValve {
    fn mount_reading(&mut self) -> MountReading {
        self.mount
    }
}

impl WindowContact for MockValve {
    fn window_contact_open(&mut self) -> bool {
        self.window_open
    }
}

impl MotorBridge for MockValve {
    fn drive(&mut self, dir: Direction, pwm: u8) {
        self.gear.drive(dir, pwm);
    }

    fn set_pwm(&mut self, pwm: u8) {
        self.gear.set_pwm(pwm);
    }

    fn stop(&mut self) {
        self.gear.stop();
    }

    fn eye_power(&mut self, on: bool) {
        self.gear.eye_power(on);
    }
}

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, event: &AppEvent) -> bool {
        self.events.contains(event)
    }

    pub fn count(&self, pred: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}

// ── Radio ─────────────────────────────────────────────────────

/// Transceiver double.  SDO reads high while RX bytes are queued or
/// TX-register slots remain.
#[derive(Default)]
pub struct MockRadio {
    pub words: Vec<u16>,
    pub rx: VecDeque<u8>,
    pub tx_ready: usize,
    pub sent: Vec<u8>,
}

impl Rfm12Link for MockRadio {
    fn transfer16(&mut self, word: u16) -> u16 {
        if word & 0xFF00 == regs::WRITE {
            self.sent.push(word as u8);
            self.tx_ready = self.tx_ready.saturating_sub(1);
            return 0;
        }
        if word == regs::READ_FIFO {
            return u16::from(self.rx.pop_front().unwrap_or(0));
        }
        self.words.push(word);
        0
    }

    fn sdo_high(&mut self) -> bool {
        !self.rx.is_empty() || self.tx_ready > 0
    }
}

#[derive(Default)]
pub struct MockIrq {
    pub enabled: bool,
}

impl IrqLine for MockIrq {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }
}

pub type TestRadio = SharedRfm<MockRadio, MockIrq>;

pub fn radio() -> TestRadio {
    RfmDriver::new(MockRadio::default(), MockIrq::default()).into_shared()
}

/// Shift `bytes` in through the ready-edge handler.  Returns whether the
/// handler asked for the RFM task.
pub fn feed(radio: &TestRadio, bytes: &[u8]) -> bool {
    with_radio(radio, |drv| {
        drv.link_mut().rx.extend(bytes.iter().copied());
        drv.on_ready_edge()
    })
}

/// Let the transmitter drain `slots` bytes.
#[allow(dead_code)]
pub fn drain_tx(radio: &TestRadio, slots: usize) -> bool {
    with_radio(radio, |drv| {
        drv.link_mut().tx_ready = slots;
        drv.on_ready_edge()
    })
}

/// Master-side frame as it arrives after the sync word: length byte,
/// body, MAC over the body.
pub fn master_frame(sync: bool, body: &[u8], mac: &HmacFrameMac) -> Vec<u8> {
    let len = 1 + body.len() + 4;
    let mut frame = vec![len as u8 | if sync { 0x80 } else { 0 }];
    frame.extend_from_slice(body);
    frame.extend_from_slice(&mac.tag(body));
    frame
}

// ── Service rig ───────────────────────────────────────────────

/// A running service with every adapter it talks to.
pub struct Rig {
    pub svc: ThermostatService,
    pub valve: MockValve,
    pub clock: SoftClock,
    pub radio: TestRadio,
    pub mac: HmacFrameMac,
    pub nvs: NvsAdapter,
    pub sink: RecordingSink,
}

#[allow(dead_code)]
impl Rig {
    pub fn new(config: ThermostatConfig, start: WallTime) -> Self {
        let nvs = NvsAdapter::new().expect("host NVS");
        let mac = HmacFrameMac::from(&config);
        let mut rig = Self {
            svc: ThermostatService::new(config, ManualCalibration::Auto, leak_shared()),
            valve: MockValve::new(),
            clock: SoftClock::new(start, Timetable::default()),
            radio: radio(),
            mac,
            nvs,
            sink: RecordingSink::new(),
        };
        rig.svc.start(&rig.radio, &mut rig.sink);
        rig
    }

    pub fn dispatch(&mut self, task: Task) -> Option<Task> {
        self.svc.dispatch(
            task,
            &mut self.valve,
            &mut self.clock,
            &self.radio,
            &self.mac,
            &mut self.nvs,
            &mut self.sink,
        )
    }

    /// One RTC tick plus the measurement it requests.
    pub fn second(&mut self) {
        if let Some(next) = self.dispatch(Task::Rtc) {
            self.dispatch(next);
        }
    }

    pub fn seconds(&mut self, n: usize) {
        for _ in 0..n {
            self.second();
        }
    }

    pub fn command(&mut self, cmd: AppCommand) {
        self.svc.handle_command(cmd, &mut self.valve, &self.clock, &mut self.sink);
    }

    pub fn radio_mode(&self) -> RfmMode {
        with_radio(&self.radio, |drv| drv.mode())
    }
}
