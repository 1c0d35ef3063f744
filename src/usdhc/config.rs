use crate::err::SdError;

use super::adma::{BurstLen, DmaMode};

/// Byte order the controller applies to the data port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndianMode {
    Big = 0,
    HalfWordBig = 1,
    Little = 2,
}

/// CMD6 group 1 functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingMode {
    #[default]
    Sdr12Default = 0,
    Sdr25HighSpeed = 1,
    Sdr50 = 2,
    Sdr104 = 3,
    Ddr50 = 4,
}

/// CMD6 group 3 functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverStrength {
    #[default]
    TypeB = 0,
    TypeA = 1,
    TypeC = 2,
    TypeD = 3,
}

/// CMD6 group 4 functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CurrentLimit {
    #[default]
    Ma200 = 0,
    Ma400 = 1,
    Ma600 = 2,
    Ma800 = 3,
}

/// Iteration budgets for every busy-poll in the driver.
///
/// The defaults were picked for a controller clocked in the 100-400 MHz
/// range; slower or faster cores may need different counts.
#[derive(Debug, Clone, Copy)]
pub struct PollLimits {
    pub cmd_inhibit: u32,
    pub cmd_done: u32,
    pub data_done: u32,
    pub buffer_ready: u32,
    pub clock_stable: u32,
    pub reset: u32,
    pub card_active: u32,
    pub dat_line: u32,
    pub ocr_busy_retries: u32,
    pub if_cond_retries: u32,
    pub verify_read_retries: u32,
    pub tuning_loops: u32,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            cmd_inhibit: 0xFFFF,
            cmd_done: 1_000_000,
            data_done: 1_000_000,
            buffer_ready: 1_000_000,
            clock_stable: 0xFFFF,
            reset: 100,
            card_active: 0xFFFF,
            dat_line: 0xFFFF,
            ocr_busy_retries: 1000,
            if_cond_retries: 10,
            verify_read_retries: 10,
            tuning_loops: 40,
        }
    }
}

/// Board supplied controller configuration.
#[derive(Debug, Clone, Copy)]
pub struct UsdhcConfig {
    /// DTOCV code, 0..=0xF
    pub data_timeout: u32,
    pub endian: EndianMode,
    /// Watermarks in words, 1..=128
    pub read_watermark: u32,
    pub write_watermark: u32,
    pub read_burst_len: u32,
    pub write_burst_len: u32,
    pub dma_mode: DmaMode,
    pub burst_len: BurstLen,
    /// ADMA2 table size in 32-bit words (two per descriptor)
    pub adma_table_words: usize,
    /// Preferred bus timing; `Sdr12Default` lets the driver pick the fastest.
    pub timing: TimingMode,
    pub driver_strength: DriverStrength,
    pub current_limit: CurrentLimit,
    pub poll: PollLimits,
}

impl Default for UsdhcConfig {
    fn default() -> Self {
        Self {
            data_timeout: 0xF,
            endian: EndianMode::Little,
            read_watermark: 128,
            write_watermark: 128,
            read_burst_len: 8,
            write_burst_len: 8,
            dma_mode: DmaMode::Adma2,
            burst_len: BurstLen::Incr,
            adma_table_words: 8,
            timing: TimingMode::Sdr12Default,
            driver_strength: DriverStrength::TypeB,
            current_limit: CurrentLimit::Ma200,
            poll: PollLimits::default(),
        }
    }
}

impl UsdhcConfig {
    pub fn validate(&self) -> Result<(), SdError> {
        if !(1..=128).contains(&self.read_watermark) || !(1..=128).contains(&self.write_watermark) {
            return Err(SdError::InvalidArgument);
        }
        if self.read_burst_len > 16 || self.write_burst_len > 16 {
            return Err(SdError::InvalidArgument);
        }
        if self.data_timeout > 0xF {
            return Err(SdError::InvalidArgument);
        }
        if self.adma_table_words < 2 {
            return Err(SdError::InvalidArgument);
        }
        Ok(())
    }
}
