//! One-shot hardware peripheral initialization.
//!
//! Configures the ADC channels, GPIO directions, the motor LEDC channels
//! and the two edge interrupts (photo eye, RFM12 SDO) using raw ESP-IDF
//! sys calls.  Called once from `main()` before the task loop starts.
//!
//! The small access helpers (`gpio_read`, `gpio_write`, `ledc_set`,
//! `adc1_read`, `gpio_intr`) have host fallbacks so drivers built on top
//! of them compile and run in tests.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

// ── Error type ────────────────────────────────────────────────

/// Errors during one-shot peripheral initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    AdcInitFailed(i32),
    GpioConfigFailed(i32),
    LedcInitFailed(i32),
    IsrInstallFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AdcInitFailed(rc) => write!(f, "ADC1 init failed (rc={})", rc),
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::LedcInitFailed(rc) => write!(f, "LEDC timer/channel config failed (rc={})", rc),
            Self::IsrInstallFailed(rc) => write!(f, "GPIO ISR service install failed (rc={})", rc),
        }
    }
}

impl From<HwInitError> for crate::error::Error {
    fn from(_: HwInitError) -> Self {
        Self::Init("peripheral setup")
    }
}

#[cfg(target_os = "espidf")]
use log::info;

use crate::pins;

pub const LEDC_CH_MOTOR_OPEN: u32 = 0;
pub const LEDC_CH_MOTOR_CLOSE: u32 = 1;

#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<(), HwInitError> {
    // SAFETY: Called once from main() before the task loop; single-threaded.
    unsafe {
        init_adc()?;
        init_gpio_inputs()?;
        init_gpio_outputs()?;
        init_ledc()?;
    }
    info!("hw_init: all peripherals configured");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── ADC (oneshot) ─────────────────────────────────────────────

#[cfg(target_os = "espidf")]
static mut ADC1_HANDLE: adc_oneshot_unit_handle_t = core::ptr::null_mut();

/// SAFETY: Must be called only from the init path or the main-loop ADC
/// read path.  `init_adc()` completes before the task loop starts.
#[cfg(target_os = "espidf")]
unsafe fn adc1_handle() -> adc_oneshot_unit_handle_t {
    unsafe { ADC1_HANDLE }
}

#[cfg(target_os = "espidf")]
unsafe fn init_adc() -> Result<(), HwInitError> {
    let init_cfg = adc_oneshot_unit_init_cfg_t {
        unit_id: adc_unit_t_ADC_UNIT_1,
        ulp_mode: adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
        ..Default::default()
    };
    // SAFETY: ADC1_HANDLE is only written here, once at boot.
    let ret = unsafe { adc_oneshot_new_unit(&init_cfg, &raw mut ADC1_HANDLE) };
    if ret != ESP_OK as i32 {
        return Err(HwInitError::AdcInitFailed(ret));
    }

    // 10-bit readings keep the thermistor table in its native units.
    let chan_cfg = adc_oneshot_chan_cfg_t {
        atten: adc_atten_t_ADC_ATTEN_DB_12,
        bitwidth: adc_bitwidth_t_ADC_BITWIDTH_10,
    };
    for ch in [pins::NTC_ADC_CHANNEL, pins::BATTERY_ADC_CHANNEL] {
        let ret = unsafe { adc_oneshot_config_channel(adc1_handle(), ch, &chan_cfg) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::AdcInitFailed(ret));
        }
    }

    info!(
        "hw_init: ADC1 configured (CH{}=NTC, CH{}=battery)",
        pins::NTC_ADC_CHANNEL,
        pins::BATTERY_ADC_CHANNEL
    );
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn adc1_read(channel: u32) -> u16 {
    let mut raw: i32 = 0;
    // SAFETY: adc1_handle() contract; main-loop access only.
    let ret = unsafe { adc_oneshot_read(adc1_handle(), channel, &mut raw) };
    if ret != ESP_OK as i32 {
        return 0;
    }
    raw.max(0) as u16
}

#[cfg(not(target_os = "espidf"))]
pub fn adc1_read(_channel: u32) -> u16 {
    0
}

// ── GPIO Inputs ───────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_gpio_inputs() -> Result<(), HwInitError> {
    let pulled_up = [
        pins::MOUNT_CONTACT_GPIO,
        pins::KEY_C_GPIO,
        pins::KEY_PROG_GPIO,
        pins::WINDOW_CONTACT_GPIO,
    ];
    for &pin in &pulled_up {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::GpioConfigFailed(ret));
        }
    }

    // Edge sources start with their interrupt masked; the drivers unmask.
    let edges = [
        (pins::EYE_SENSE_GPIO, gpio_int_type_t_GPIO_INTR_ANYEDGE),
        (pins::RFM_SDO_GPIO, gpio_int_type_t_GPIO_INTR_POSEDGE),
    ];
    for &(pin, intr_type) in &edges {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type,
        };
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::GpioConfigFailed(ret));
        }
        unsafe { gpio_intr_disable(pin) };
    }

    info!("hw_init: GPIO inputs configured");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: i32) -> bool {
    // SAFETY: read-only register access on a configured input pin.
    (unsafe { gpio_get_level(pin) }) != 0
}

/// Idle level of the pulled-up inputs.
#[cfg(not(target_os = "espidf"))]
pub fn gpio_read(_pin: i32) -> bool {
    true
}

#[cfg(target_os = "espidf")]
pub fn gpio_intr(pin: i32, enable: bool) {
    // SAFETY: interrupt mask bit of a configured input; ISR-safe.
    unsafe {
        if enable {
            gpio_intr_enable(pin);
        } else {
            gpio_intr_disable(pin);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_intr(_pin: i32, _enable: bool) {}

// ── GPIO Outputs ──────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_gpio_outputs() -> Result<(), HwInitError> {
    let output_pins = [
        pins::EYE_LED_GPIO,
        pins::NTC_POWER_GPIO,
        pins::RFM_SCK_GPIO,
        pins::RFM_SDI_GPIO,
        pins::RFM_NSEL_GPIO,
    ];

    for &pin in &output_pins {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_OUTPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::GpioConfigFailed(ret));
        }
        unsafe { gpio_set_level(pin, 0) };
    }
    // nSEL idles high.
    unsafe { gpio_set_level(pins::RFM_NSEL_GPIO, 1) };

    info!("hw_init: GPIO outputs configured");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: writes an already-configured output pin.
    unsafe {
        gpio_set_level(pin, u32::from(high));
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(_pin: i32, _high: bool) {}

// ── LEDC PWM ─────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_ledc() -> Result<(), HwInitError> {
    let timer = ledc_timer_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        timer_num: ledc_timer_t_LEDC_TIMER_0,
        duty_resolution: ledc_timer_bit_t_LEDC_TIMER_8_BIT,
        freq_hz: pins::MOTOR_PWM_FREQ_HZ,
        clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
        ..Default::default()
    };
    let ret = unsafe { ledc_timer_config(&timer) };
    if ret != ESP_OK {
        return Err(HwInitError::LedcInitFailed(ret));
    }

    for (channel, gpio) in [
        (LEDC_CH_MOTOR_OPEN, pins::MOTOR_OPEN_GPIO),
        (LEDC_CH_MOTOR_CLOSE, pins::MOTOR_CLOSE_GPIO),
    ] {
        let ret = unsafe {
            ledc_channel_config(&ledc_channel_config_t {
                speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
                channel,
                timer_sel: ledc_timer_t_LEDC_TIMER_0,
                gpio_num: gpio,
                duty: 0,
                hpoint: 0,
                ..Default::default()
            })
        };
        if ret != ESP_OK {
            return Err(HwInitError::LedcInitFailed(ret));
        }
    }

    info!("hw_init: LEDC configured (open=CH0, close=CH1)");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn ledc_set(channel: u32, duty: u8) {
    // SAFETY: channels were configured in init_ledc(); also called from the
    // eye and timer ISRs to cut the bridge.
    unsafe {
        ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel, u32::from(duty));
        ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_set(_channel: u32, _duty: u8) {}

// ── GPIO ISR Service ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
use crate::drivers::gpio::DeviceRfm;

#[cfg(target_os = "espidf")]
unsafe extern "C" fn eye_gpio_isr(_arg: *mut core::ffi::c_void) {
    // SAFETY: register read; safe in ISR context.
    let level_low = unsafe { gpio_get_level(pins::EYE_SENSE_GPIO) } == 0;
    crate::motor::MOTOR_SHARED.on_eye_edge(
        level_low,
        &mut crate::drivers::h_bridge::HBridge,
        &crate::events::TASKS,
    );
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn rfm_gpio_isr(arg: *mut core::ffi::c_void) {
    // SAFETY: `arg` is the leaked `&'static DeviceRfm` registered below.
    let radio = unsafe { &*(arg as *const DeviceRfm) };
    if crate::rfm::service_ready_edge(radio) {
        crate::events::TASKS.post(crate::events::Task::Rfm);
    }
}

/// Install the per-pin GPIO ISR service and register the eye and RFM
/// handlers.  Call after init_peripherals() and before the task loop.
#[cfg(target_os = "espidf")]
pub fn init_isr_service(radio: &'static DeviceRfm) -> Result<(), HwInitError> {
    // SAFETY: gpio_install_isr_service is idempotent; ESP_ERR_INVALID_STATE
    // means it was already installed.  Both handlers only touch
    // critical-section protected state and the atomic task flags.
    unsafe {
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
            return Err(HwInitError::IsrInstallFailed(ret));
        }

        let ret = gpio_isr_handler_add(pins::EYE_SENSE_GPIO, Some(eye_gpio_isr), core::ptr::null_mut());
        if ret != ESP_OK {
            return Err(HwInitError::IsrInstallFailed(ret));
        }

        let arg = radio as *const DeviceRfm as *mut core::ffi::c_void;
        let ret = gpio_isr_handler_add(pins::RFM_SDO_GPIO, Some(rfm_gpio_isr), arg);
        if ret != ESP_OK {
            return Err(HwInitError::IsrInstallFailed(ret));
        }

        info!("hw_init: ISR service installed (eye, rfm sdo)");
    }
    Ok(())
}
