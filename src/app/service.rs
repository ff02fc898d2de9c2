//! Application service: the hexagonal core.
//!
//! [`ThermostatService`] owns the valve controller, the motor engine, the
//! wireless link state, the fault register and the live configuration.
//! All I/O flows through port traits injected at call sites, so the whole
//! service runs against mock adapters on the host.
//!
//! ```text
//!  TemperatureSource ──▶ ┌───────────────────────────┐ ──▶ EventSink
//!  MountSensor       ──▶ │     ThermostatService      │
//!  ClockPort         ──▶ │  Controller · Motor · RFM  │ ──▶ ConfigPort
//!  MotorBridge       ◀── └───────────────────────────┘ ◀──▶ SharedRfm
//! ```
//!
//! One [`Task`] is handled per [`dispatch`](ThermostatService::dispatch)
//! call.  The RTC task runs in a fixed order: controller update, mount
//! poll and calibration, motor goto, then the radio (time-sync check on
//! a minute change, queued status in the own slot).

use log::{debug, info, warn};

use crate::config::ThermostatConfig;
use crate::control::{ControlInputs, ModeChange, ValveController};
use crate::error::{ErrorFlag, RadioError};
use crate::events::Task;
use crate::faults::FaultRegister;
use crate::motor::{CalibrationStep, Direction, ManualCalibration, MotorEngine, MotorShared, MotorTuning, MountReading};
use crate::rfm::wireless::{self, PacketKind, Payload, RemoteCommand, RxOutcome, StatusReport, Wireless};
use crate::rfm::{with_radio, IrqLine, RadioSettings, Rfm12Link, RfmMode, SharedRfm};

use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::{
    CalibrationStore, ClockPort, ConfigPort, EventSink, FrameAuthenticator, MotorBridge, MountSensor,
    ScheduleSource, TemperatureSource, WallTime, WindowContact,
};

/// Seconds between the last config change and the automatic save.
const AUTO_SAVE_DELAY_TICKS: u32 = 5;
/// Saturday, 0 = Monday.
const VALVE_PROTECTION_WEEKDAY: u8 = 5;
const VALVE_PROTECTION_HOUR: u8 = 10;
/// Answer to a `'V'` command.
const VERSION: &str = concat!("HR20 ", env!("CARGO_PKG_VERSION"));

// ───────────────────────────────────────────────────────────────
// ThermostatService
// ───────────────────────────────────────────────────────────────

pub struct ThermostatService {
    config: ThermostatConfig,
    controller: ValveController,
    motor: MotorEngine,
    wireless: Wireless,
    faults: FaultRegister,
    /// Fault bits already reported through the sink.
    reported_faults: u8,
    last_step: CalibrationStep,
    inputs: ControlInputs,
    last_minute: Option<u8>,
    tick_count: u32,
    config_dirty: bool,
    dirty_since_tick: u32,
}

impl ThermostatService {
    /// Construct the service.  `manual` is the persisted calibration hint.
    ///
    /// Does **not** touch the radio; call [`start`](Self::start) next.
    pub fn new(mut config: ThermostatConfig, manual: ManualCalibration, shared: &'static MotorShared) -> Self {
        let replaced = config.sanitize();
        if replaced > 0 {
            warn!("CTL | {replaced} config fields out of range, defaults used");
        }
        let motor = MotorEngine::new(shared, MotorTuning::from(&config), manual);
        Self {
            controller: ValveController::new(&config),
            motor,
            wireless: Wireless::new(),
            faults: FaultRegister::new(),
            reported_faults: 0,
            last_step: CalibrationStep::Uncalibrated,
            inputs: ControlInputs::default(),
            last_minute: None,
            tick_count: 0,
            config_dirty: false,
            dirty_since_tick: 0,
            config,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Program the radio and, when an address is configured, listen for
    /// the first time sync.
    pub fn start<L: Rfm12Link, I: IrqLine>(&mut self, radio: &SharedRfm<L, I>, sink: &mut impl EventSink) {
        let settings = RadioSettings::from(&self.config);
        let devaddr = self.config.rfm_devaddr;
        let wireless = &mut self.wireless;
        with_radio(radio, |drv| {
            drv.init(&settings);
            if devaddr != 0 {
                wireless.start(drv);
            }
        });
        let auto_mode = self.controller.is_auto();
        sink.emit(&AppEvent::Started { devaddr, auto_mode });
        info!("CTL | service started, address {devaddr}, {}", if auto_mode { "auto" } else { "manual" });
    }

    // ── Task dispatch ─────────────────────────────────────────

    /// Run one task taken from the [`TaskQueue`](crate::events::TaskQueue).
    ///
    /// Returns a follow-up task for the caller to post: after the RTC task
    /// a measurement is requested while the motor stands still.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch<L, I>(
        &mut self,
        task: Task,
        hw: &mut (impl TemperatureSource + MountSensor + WindowContact + MotorBridge),
        clock: &mut (impl ClockPort + ScheduleSource),
        radio: &SharedRfm<L, I>,
        auth: &(impl FrameAuthenticator + ?Sized),
        storage: &mut (impl ConfigPort + CalibrationStore),
        sink: &mut impl EventSink,
    ) -> Option<Task>
    where
        L: Rfm12Link,
        I: IrqLine,
    {
        let mut next = None;
        match task {
            Task::Rfm => self.on_rfm(radio, auth, clock, sink),
            Task::Adc => self.on_adc(hw),
            Task::MotorStop => self.on_motor_stop(hw, sink),
            Task::MotorPulse => self.on_motor_pulse(hw, sink),
            Task::Rtc => {
                clock.add_second();
                let second = clock.now().second;
                let minute_changed = self.tick(hw, &*clock, sink);
                self.radio_tick(minute_changed, second, radio, auth, sink);
                if self.auto_save_if_needed(&*storage) {
                    sink.emit(&AppEvent::ConfigSaved);
                }
                if self.motor.direction() == Direction::Stop {
                    next = Some(Task::Adc);
                }
            }
        }
        self.persist_calibration(storage);
        next
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// One 1 Hz control tick, without the radio part.
    ///
    /// Returns `true` when the wall-clock minute rolled over since the
    /// previous tick.
    pub fn tick(
        &mut self,
        hw: &mut (impl MountSensor + WindowContact + MotorBridge),
        clock: &(impl ClockPort + ScheduleSource),
        sink: &mut impl EventSink,
    ) -> bool {
        self.tick_count = self.tick_count.wrapping_add(1);
        let now = clock.now();
        let minute_changed = self.last_minute.is_some_and(|m| m != now.minute);
        self.last_minute = Some(now.minute);

        // 1. Controller
        self.inputs.contact_open = hw.window_contact_open();
        let outcome = self.controller.update(
            minute_changed,
            &self.inputs,
            || clock.temperature_type(&now),
            &self.config,
            &mut self.faults,
        );
        if outcome.window_changed {
            sink.emit(&AppEvent::WindowChanged {
                open: self.controller.window_open(),
            });
        }
        if let Some(valve) = outcome.valve {
            sink.emit(&AppEvent::ValveCommanded {
                valve,
                setpoint: self.controller.wanted_last().unwrap_or(0),
            });
            if self.config.rfm_devaddr != 0 {
                let status = self.status_report(&now).broadcast_payload();
                self.wireless.queue(status);
            }
        }

        // 2. Weekly valve protection run
        if minute_changed && self.valve_protection_due(&now) {
            info!("MOTOR | weekly valve protection recalibration");
            self.recalibrate(hw);
        }

        // 3. Motor, once the battery is known
        if self.inputs.battery_mv > 0 {
            let reading = hw.mount_reading();
            self.poll_mount(reading, hw);
            self.motor.goto(self.controller.valve_wanted(), hw);
        }

        self.publish_calibration(sink);
        self.publish_faults(sink);
        minute_changed
    }

    /// Radio part of the RTC task.
    pub fn radio_tick<L, I>(
        &mut self,
        minute_changed: bool,
        second: u8,
        radio: &SharedRfm<L, I>,
        auth: &(impl FrameAuthenticator + ?Sized),
        sink: &mut impl EventSink,
    ) where
        L: Rfm12Link,
        I: IrqLine,
    {
        let devaddr = self.config.rfm_devaddr;
        if devaddr == 0 {
            return;
        }
        let wireless = &mut self.wireless;
        let faults = &mut self.faults;
        let sent = with_radio(radio, |drv| {
            if minute_changed {
                wireless.time_sync_check(drv, faults);
            }
            wireless.tick_second(second, devaddr, drv, auth)
        });
        self.report_sent(sent.map(|len| len.map(|l| (l, PacketKind::Broadcast))), sink);
        self.publish_faults(sink);
    }

    /// RFM task: the edge ISR finished a transmission or moved a byte.
    pub fn on_rfm<L, I>(
        &mut self,
        radio: &SharedRfm<L, I>,
        auth: &(impl FrameAuthenticator + ?Sized),
        clock: &mut (impl ClockPort + ScheduleSource),
        sink: &mut impl EventSink,
    ) where
        L: Rfm12Link,
        I: IrqLine,
    {
        if self.config.rfm_devaddr == 0 {
            return;
        }
        let wireless = &mut self.wireless;
        let faults = &mut self.faults;
        let outcome = with_radio(radio, |drv| match drv.mode() {
            RfmMode::TxDone => {
                wireless.on_tx_done(drv);
                None
            }
            RfmMode::Rx | RfmMode::RxOverflow => Some(wireless.on_rx(drv, auth, faults)),
            _ => None,
        });

        match outcome {
            Some(RxOutcome::TimeSync(time)) => {
                clock.set_time(time);
                sink.emit(&AppEvent::TimeSynced(time));
            }
            Some(RxOutcome::Rejected(e)) => sink.emit(&AppEvent::FrameRejected(e)),
            Some(RxOutcome::Command(payload)) => {
                let reply = self.execute_remote(&payload, &*clock, sink);
                let devaddr = self.config.rfm_devaddr;
                let wireless = &mut self.wireless;
                let sent = with_radio(radio, |drv| wireless.send_reply(devaddr, &reply, drv, auth));
                self.report_sent(sent.map(|l| Some((l, PacketKind::Reply))), sink);
            }
            Some(RxOutcome::Pending | RxOutcome::Noise | RxOutcome::Empty) | None => {}
        }
        self.publish_faults(sink);
    }

    /// ADC task: take a fresh averaged sample.
    pub fn on_adc(&mut self, hw: &mut impl TemperatureSource) {
        let Some(sample) = hw.measure() else {
            return;
        };
        self.inputs.temperature = sample.temperature;
        self.inputs.battery_mv = sample.battery_mv;
        if let Some(avg) = sample.window_sample {
            self.controller.push_window_sample(avg);
        }
    }

    /// Motor-pulse task: calibration progress and speed regulation.
    pub fn on_motor_pulse(&mut self, hw: &mut (impl MountSensor + MotorBridge), sink: &mut impl EventSink) {
        let reading = hw.mount_reading();
        self.poll_mount(reading, hw);
        self.motor.timer_pulse(hw);
        self.publish_calibration(sink);
        self.publish_faults(sink);
    }

    /// Motor-stop task: an ISR cut the bridge.
    pub fn on_motor_stop(&mut self, hw: &mut impl MotorBridge, sink: &mut impl EventSink) {
        self.motor.timer_stop(hw, &mut self.faults);
        self.publish_calibration(sink);
        self.publish_faults(sink);
    }

    // ── Command handling ──────────────────────────────────────

    /// Process a request from the keys or another local adapter.
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        hw: &mut impl MotorBridge,
        clock: &(impl ClockPort + ScheduleSource),
        sink: &mut impl EventSink,
    ) {
        match cmd {
            AppCommand::ChangeMode(change) => self.change_mode(change, clock, sink),
            AppCommand::TempChangeInc(delta) => {
                if self.controller.temp_change_inc(delta, &mut self.config) {
                    self.mark_config_dirty();
                }
                self.emit_setpoint(sink);
            }
            AppCommand::SetTemperature(temp) => self.set_temperature(temp, sink),
            AppCommand::Recalibrate => {
                self.recalibrate(hw);
                self.publish_calibration(sink);
            }
            AppCommand::ReloadConfig(mut config) => {
                config.sanitize();
                if config.rfm_devaddr != self.config.rfm_devaddr {
                    info!("RFM | address change takes effect after restart");
                    config.rfm_devaddr = self.config.rfm_devaddr;
                }
                self.config = config;
                self.controller.set_window_strategy(&self.config);
                self.motor.set_tuning(MotorTuning::from(&self.config));
                self.mark_config_dirty();
                info!("CTL | configuration reloaded");
            }
        }
        self.publish_faults(sink);
    }

    fn change_mode(&mut self, change: ModeChange, clock: &(impl ClockPort + ScheduleSource), sink: &mut impl EventSink) {
        let schedule = clock.temperature_type(&clock.now());
        self.controller.change_mode(change, schedule, &mut self.config);
        self.mark_config_dirty();
        self.emit_setpoint(sink);
    }

    fn set_temperature(&mut self, temp: u8, sink: &mut impl EventSink) {
        if self.controller.set_wanted(temp, &mut self.config) {
            self.mark_config_dirty();
        }
        self.emit_setpoint(sink);
    }

    fn emit_setpoint(&self, sink: &mut impl EventSink) {
        sink.emit(&AppEvent::SetpointApplied {
            wanted: self.controller.wanted(),
            auto_mode: self.controller.is_auto(),
        });
    }

    /// Apply a master's command frame and build the reply payload.
    ///
    /// Every command is echoed with bit 7 set.  Status, mode and setpoint
    /// commands append a status report, `'V'` the version string.  Output
    /// that no longer fits the frame is dropped.
    fn execute_remote(
        &mut self,
        commands: &[u8],
        clock: &(impl ClockPort + ScheduleSource),
        sink: &mut impl EventSink,
    ) -> Payload {
        let mut reply = Payload::new();
        let _ = reply.push(PacketKind::Reply.flags());
        for cmd in wireless::parse_commands(commands) {
            debug!("RFM | command {cmd:?}");
            match cmd {
                RemoteCommand::SetTemperature(Some(t)) => self.set_temperature(t, sink),
                RemoteCommand::Mode(change) => self.change_mode(change, clock, sink),
                _ => {}
            }
            let status = self.status_report(&clock.now()).encode();
            let body: &[u8] = match cmd {
                RemoteCommand::Version => VERSION.as_bytes(),
                RemoteCommand::Status | RemoteCommand::Mode(_) | RemoteCommand::SetTemperature(Some(_)) => &status,
                RemoteCommand::SetTemperature(None) | RemoteCommand::Unknown(_) => &[],
            };
            if reply.push(cmd.code() | 0x80).is_err() || reply.extend_from_slice(body).is_err() {
                warn!("RFM | reply full, remaining commands dropped");
                break;
            }
        }
        reply
    }

    // ── Valve body and motor ──────────────────────────────────

    fn poll_mount(&mut self, reading: MountReading, hw: &mut impl MotorBridge) {
        self.controller.on_mount(reading.is_mounted(), &mut self.faults);
        if self.motor.update_calibration(reading, hw, &mut self.faults) {
            self.controller.on_motor_reset(&self.config);
        }
    }

    /// Forget the calibration; the next mounted tick starts a new one.
    fn recalibrate(&mut self, hw: &mut impl MotorBridge) {
        self.motor.update_calibration(MountReading::Unmounted, hw, &mut self.faults);
        self.controller.on_motor_reset(&self.config);
    }

    fn valve_protection_due(&self, now: &WallTime) -> bool {
        !self.faults.contains(ErrorFlag::BatteryLow)
            && !self.faults.contains(ErrorFlag::BatteryWarning)
            && now.weekday() == VALVE_PROTECTION_WEEKDAY
            && now.hour == VALVE_PROTECTION_HOUR
            && now.minute == 0
    }

    fn persist_calibration(&mut self, store: &mut impl CalibrationStore) {
        if let Some(cal) = self.motor.take_manual_change() {
            match store.save_calibration(cal) {
                Ok(()) => info!("MOTOR | calibration hint {} stored", cal.as_raw()),
                Err(e) => warn!("MOTOR | calibration hint not stored: {e}"),
            }
        }
    }

    // ── Event publishing ──────────────────────────────────────

    fn publish_faults(&mut self, sink: &mut impl EventSink) {
        let bits = self.faults.bits();
        let changed = bits ^ self.reported_faults;
        if changed == 0 {
            return;
        }
        for flag in ErrorFlag::ALL {
            if changed & flag.mask() == 0 {
                continue;
            }
            if bits & flag.mask() != 0 {
                sink.emit(&AppEvent::FaultRaised(flag));
            } else {
                sink.emit(&AppEvent::FaultCleared(flag));
            }
        }
        self.reported_faults = bits;
    }

    fn publish_calibration(&mut self, sink: &mut impl EventSink) {
        let step = self.motor.step();
        if step != self.last_step {
            self.last_step = step;
            sink.emit(&AppEvent::CalibrationChanged {
                step,
                travel: self.motor.pos_max(),
            });
        }
    }

    fn report_sent(&mut self, sent: Result<Option<(usize, PacketKind)>, RadioError>, sink: &mut impl EventSink) {
        match sent {
            Ok(Some((len, kind))) => sink.emit(&AppEvent::FrameSent { len, kind }),
            Ok(None) => {}
            Err(e) => warn!("RFM | transmit failed: {e}"),
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Status snapshot as carried on the radio.
    pub fn status_report(&self, now: &WallTime) -> StatusReport {
        StatusReport {
            minute: now.minute,
            second: now.second,
            on_schedule: self.controller.on_schedule(&self.config),
            auto_mode: self.controller.is_auto(),
            window_open: self.controller.window_open(),
            errors: self.faults.bits(),
            temperature: self.inputs.temperature,
            battery_mv: self.inputs.battery_mv,
            wanted: self.controller.wanted(),
            valve: self.controller.valve_wanted(),
        }
    }

    pub fn config(&self) -> &ThermostatConfig {
        &self.config
    }

    pub fn controller(&self) -> &ValveController {
        &self.controller
    }

    pub fn motor(&self) -> &MotorEngine {
        &self.motor
    }

    pub fn wireless(&self) -> &Wireless {
        &self.wireless
    }

    pub fn faults(&self) -> &FaultRegister {
        &self.faults
    }

    pub fn inputs(&self) -> &ControlInputs {
        &self.inputs
    }

    /// Total RTC ticks executed since startup.
    pub fn tick_count(&self) -> u32 {
        self.tick_count
    }

    // ── Config dirty-flag management ──────────────────────────

    /// Mark the config as modified.
    pub fn mark_config_dirty(&mut self) {
        if !self.config_dirty {
            self.config_dirty = true;
            self.dirty_since_tick = self.tick_count;
        }
    }

    /// Save once the config has been unchanged for five ticks.
    /// Returns `true` if the config was saved.
    pub fn auto_save_if_needed(&mut self, storage: &impl ConfigPort) -> bool {
        if !self.config_dirty {
            return false;
        }
        if self.tick_count.wrapping_sub(self.dirty_since_tick) < AUTO_SAVE_DELAY_TICKS {
            return false;
        }
        match storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("CTL | config auto-saved");
                true
            }
            Err(e) => {
                warn!("CTL | config auto-save failed: {e}");
                false
            }
        }
    }

    /// Force-save if dirty (call before a reboot).
    pub fn force_save_if_dirty(&mut self, storage: &impl ConfigPort) {
        if !self.config_dirty {
            return;
        }
        match storage.save(&self.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("CTL | config force-saved");
            }
            Err(e) => warn!("CTL | config force-save failed: {e}"),
        }
    }

    /// Whether the config has unsaved changes.
    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty
    }
}
