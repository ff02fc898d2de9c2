//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements                      | Connects to             |
//! |-------------|---------------------------------|-------------------------|
//! | `clock`     | ClockPort, ScheduleSource       | software RTC, timetable |
//! | `frame_mac` | FrameAuthenticator              | HMAC-SHA256             |
//! | `hardware`  | TemperatureSource, MountSensor  | ESP32 ADC, GPIO         |
//! |             | WindowContact, MotorBridge      | H-bridge (LEDC)         |
//! | `log_sink`  | EventSink                       | serial log output       |
//! | `nvs`       | ConfigPort, CalibrationStore    | NVS / in-memory store   |
//! |             | StoragePort                     |                         |

pub mod clock;
pub mod frame_mac;
pub mod hardware;
pub mod log_sink;
pub mod nvs;
