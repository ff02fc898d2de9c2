//! GPIO / peripheral pin assignments for the retro-fitted HR20 valve board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// Valve motor (DRV8871-style H-bridge, one PWM input per direction)
// ---------------------------------------------------------------------------

/// IN1: PWM drives the stem open.
pub const MOTOR_OPEN_GPIO: i32 = 16;
/// IN2: PWM drives the stem closed.
pub const MOTOR_CLOSE_GPIO: i32 = 17;

// ---------------------------------------------------------------------------
// Photo eye on the gear train
// ---------------------------------------------------------------------------

/// Digital output: IR LED supply, HIGH = on.
pub const EYE_LED_GPIO: i32 = 3;
/// Digital input: phototransistor, any-edge interrupt.
pub const EYE_SENSE_GPIO: i32 = 4;

// ---------------------------------------------------------------------------
// RFM12 transceiver (bit-banged)
// ---------------------------------------------------------------------------

pub const RFM_SCK_GPIO: i32 = 5;
pub const RFM_SDI_GPIO: i32 = 6;
pub const RFM_NSEL_GPIO: i32 = 7;
/// Chip data output; doubles as the ready flag (rising-edge interrupt).
pub const RFM_SDO_GPIO: i32 = 8;

// ---------------------------------------------------------------------------
// Analog front end (ADC1)
// ---------------------------------------------------------------------------

/// Digital output: powers the NTC divider during a conversion.
pub const NTC_POWER_GPIO: i32 = 9;
/// ADC1 channel of the NTC divider (GPIO 10 on ESP32-S3).
pub const NTC_ADC_CHANNEL: u32 = 9;
/// ADC1 channel of the battery divider (GPIO 1 on ESP32-S3).
pub const BATTERY_ADC_CHANNEL: u32 = 0;

// ---------------------------------------------------------------------------
// Contacts and keys (active-low, internal pull-ups)
// ---------------------------------------------------------------------------

/// Closed while the valve body sits on the radiator.
pub const MOUNT_CONTACT_GPIO: i32 = 12;
pub const KEY_C_GPIO: i32 = 13;
pub const KEY_PROG_GPIO: i32 = 14;
/// Optional reed contact on the window frame; LOW = closed.
pub const WINDOW_CONTACT_GPIO: i32 = 15;

// ---------------------------------------------------------------------------
// PWM configuration
// ---------------------------------------------------------------------------

/// LEDC base frequency for the motor bridge (20 kHz, inaudible).
pub const MOTOR_PWM_FREQ_HZ: u32 = 20_000;

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

/// Motor timer period: 64 µs, one stall/eye tick.
pub const MOTOR_TICK_US: u64 = 64;
/// RTC tick period.
pub const RTC_TICK_US: u64 = 1_000_000;
