//! RFM12 command words and the power-up register sequence.
//!
//! Every command is a 16-bit word clocked over the bus; the high byte
//! selects the register, the low byte carries the settings.  Constants are
//! grouped by command in datasheet order.

// ── 1. Configuration setting ──────────────────────────────────

pub const CONFIG_EL: u16 = 0x8080; // enable TX register
pub const CONFIG_EF: u16 = 0x8040; // enable RX FIFO
pub const CONFIG_X_12_0PF: u16 = 0x8007; // crystal load capacitance

// ── 2. Power management ───────────────────────────────────────

pub const POWER_ER: u16 = 0x8280; // receiver
pub const POWER_EBB: u16 = 0x8240; // base band block
pub const POWER_ET: u16 = 0x8220; // transmitter
pub const POWER_ES: u16 = 0x8210; // synthesizer
pub const POWER_EX: u16 = 0x8208; // crystal oscillator
pub const POWER_DC: u16 = 0x8201; // disable CLK output

/// Synthesizer and oscillator up, transmitter still off.
pub const TX_ON_PRE: u16 = POWER_DC | POWER_ES | POWER_EX;
pub const TX_ON: u16 = POWER_DC | POWER_ET | POWER_ES | POWER_EX;
pub const RX_ON: u16 = POWER_DC | POWER_ER | POWER_EBB | POWER_ES | POWER_EX;
pub const OFF: u16 = POWER_DC;

// ── 3. Frequency setting ──────────────────────────────────────

pub const FREQUENCY: u16 = 0xA000;

// ── 4. Data rate ──────────────────────────────────────────────

pub const DATA_RATE: u16 = 0xC600;
/// Prescaler bit for rates below 4800 baud.
pub const DATA_RATE_CS: u16 = 0xC680;

// ── 5. Receiver control ───────────────────────────────────────

pub const RX_CONTROL_P20_VDI: u16 = 0x9400;
pub const RX_CONTROL_VDI_MED: u16 = 0x9100;
pub const RX_CONTROL_BW_200: u16 = 0x9080;
pub const RX_CONTROL_BW_134: u16 = 0x90A0;
pub const RX_CONTROL_BW_67: u16 = 0x90C0;
pub const RX_CONTROL_GAIN_6: u16 = 0x9008;
pub const RX_CONTROL_RSSI_103: u16 = 0x9000;

// ── 6. Data filter ────────────────────────────────────────────

pub const DATA_FILTER: u16 = 0xC228;

// ── 7. FIFO and reset mode ────────────────────────────────────

pub const FIFO: u16 = 0xCA00;
pub const FIFO_FF: u16 = 0xCA02; // enable FIFO fill
pub const FIFO_DR: u16 = 0xCA01; // disable high-sensitivity reset

/// FIFO interrupt level 8 bits, fill disabled.
pub const FIFO_OFF: u16 = fifo_it(8) | FIFO_DR;
/// FIFO interrupt level 8 bits, fill on sync word.
pub const FIFO_ON: u16 = fifo_it(8) | FIFO_FF | FIFO_DR;

pub const fn fifo_it(level: u16) -> u16 {
    FIFO | ((level & 0xF) << 4)
}

// ── 9. FIFO read / 13. TX register write ──────────────────────

pub const READ_FIFO: u16 = 0xB000;
pub const WRITE: u16 = 0xB800;

pub const fn write(byte: u8) -> u16 {
    WRITE | byte as u16
}

// ── 10. AFC ───────────────────────────────────────────────────

pub const AFC_AUTO_VDI: u16 = 0xC480;
pub const AFC_RANGE_LIMIT_7_8: u16 = 0xC420;
pub const AFC_EN: u16 = 0xC401;
pub const AFC_OE: u16 = 0xC402;
pub const AFC_FI: u16 = 0xC404;

// ── 11. TX configuration ──────────────────────────────────────

pub const TX_CONTROL_MOD_45: u16 = 0x9820;
pub const TX_CONTROL_MOD_90: u16 = 0x9850;
pub const TX_CONTROL_MOD_120: u16 = 0x9870;
pub const TX_CONTROL_POW_0: u16 = 0x9800;

// ── 12. PLL ───────────────────────────────────────────────────

pub const PLL: u16 = 0xCC02;
pub const PLL_UC_CLK_10: u16 = 0x70;
pub const PLL_DELAY_OFF: u16 = 0x00;
pub const PLL_DITHER_OFF: u16 = 0x04;
pub const PLL_BITRATE_LOW: u16 = 0x00;

// ── 16. Low battery detector / clock divider ──────────────────

pub const LOW_BATT_DETECT_D_10MHZ: u16 = 0xC0E0;

// ── 17. Status read ───────────────────────────────────────────

pub const STATUS_READ: u16 = 0x0000;

// ───────────────────────────────────────────────────────────────
// Settings
// ───────────────────────────────────────────────────────────────

/// Frequency band of the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Mhz315,
    Mhz433,
    Mhz868,
    Mhz915,
}

impl Band {
    /// Band bits of the configuration command.
    pub const fn config_bits(self) -> u16 {
        match self {
            Self::Mhz315 => 0x8000,
            Self::Mhz433 => 0x8010,
            Self::Mhz868 => 0x8020,
            Self::Mhz915 => 0x8030,
        }
    }

    /// Frequency word for a carrier given in kHz:
    /// `(f / step - base) * 4000`, computed in integer kHz.
    pub const fn frequency_word(self, carrier_khz: u32) -> u16 {
        let (divisor, base) = match self {
            Self::Mhz315 => (10, 31),
            Self::Mhz433 => (10, 43),
            Self::Mhz868 => (20, 43),
            Self::Mhz915 => (30, 30),
        };
        (carrier_khz * 4 / divisor - base * 4000) as u16
    }
}

/// Link parameters shared by every device on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioSettings {
    pub band: Band,
    pub carrier_khz: u32,
    pub baud: u32,
    /// Signed trim added to the frequency word.
    pub freq_adjust: i8,
    /// Emit the 10 MHz clock divider command (boards clocked from the RFM).
    pub clock_output: bool,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            band: Band::Mhz868,
            carrier_khz: 868_350,
            baud: 19_200,
            freq_adjust: 0,
            clock_output: false,
        }
    }
}

impl From<&crate::config::ThermostatConfig> for RadioSettings {
    fn from(c: &crate::config::ThermostatConfig) -> Self {
        Self {
            freq_adjust: c.rfm_freq_adjust,
            ..Self::default()
        }
    }
}

/// Data-rate command for `baud`.
pub const fn data_rate(baud: u32) -> u16 {
    if baud < 4800 {
        DATA_RATE_CS | (43_104 / baud) as u16
    } else {
        DATA_RATE | (344_828 / baud) as u16
    }
}

/// Receiver baseband bandwidth for `baud` (datasheet tier table).
pub const fn rx_bandwidth(baud: u32) -> u16 {
    if baud < 20_000 {
        RX_CONTROL_BW_67
    } else if baud < 100_000 {
        RX_CONTROL_BW_134
    } else {
        RX_CONTROL_BW_200
    }
}

/// FSK deviation for `baud` (same tiers as the bandwidth).
pub const fn tx_modulation(baud: u32) -> u16 {
    if baud < 20_000 {
        TX_CONTROL_MOD_45
    } else if baud < 100_000 {
        TX_CONTROL_MOD_90
    } else {
        TX_CONTROL_MOD_120
    }
}

/// Longest power-up sequence (with the clock-divider command).
pub const INIT_SEQUENCE_MAX: usize = 11;

/// Power-up command words in issue order.
pub fn init_sequence(s: &RadioSettings) -> heapless::Vec<u16, INIT_SEQUENCE_MAX> {
    let freq = s.band.frequency_word(s.carrier_khz).wrapping_add_signed(i16::from(s.freq_adjust));
    let words = [
        STATUS_READ,
        CONFIG_EL | CONFIG_EF | s.band.config_bits() | CONFIG_X_12_0PF,
        FREQUENCY | (freq & 0x0FFF),
        data_rate(s.baud),
        RX_CONTROL_P20_VDI | RX_CONTROL_VDI_MED | rx_bandwidth(s.baud) | RX_CONTROL_GAIN_6 | RX_CONTROL_RSSI_103,
        DATA_FILTER | (4 & 7),
        FIFO_OFF,
        AFC_AUTO_VDI | AFC_RANGE_LIMIT_7_8 | AFC_EN | AFC_OE | AFC_FI,
        tx_modulation(s.baud) | TX_CONTROL_POW_0,
        PLL | PLL_UC_CLK_10 | PLL_DELAY_OFF | PLL_DITHER_OFF | PLL_BITRATE_LOW,
    ];
    let mut seq = heapless::Vec::new();
    for w in words {
        // Capacity covers every word; push cannot fail.
        let _ = seq.push(w);
    }
    if s.clock_output {
        let _ = seq.push(LOW_BATT_DETECT_D_10MHZ);
    }
    seq
}
