mod adma;
mod aux;
mod block;
mod card;
mod clock;
mod cmd;
mod config;
mod regs;
mod switch;
mod tuning;

pub mod constant;

use core::fmt::Display;

use bitflags::bitflags;
use log::{debug, info};

use crate::err::SdError;

use constant::*;

pub use adma::{Adma2Descriptor, AdmaAppend, AdmaConfig, BurstLen, DmaMode, EntryState};
#[cfg(feature = "dma")]
pub use adma::AdmaTable;
pub use aux::decode_be_words;
pub use block::{DataBuffer, TransferKind, UsdhcData};
pub use card::{CardFlags, Cid, Csd, InitStage, Scr, SdCard, SignalVoltage};
pub use clock::{compute_divider, ClockDivider};
pub use cmd::{decode_r2, response_flags, CommandType, ResponseType, UsdhcCommand};
pub use config::{CurrentLimit, DriverStrength, EndianMode, PollLimits, TimingMode, UsdhcConfig};
pub use regs::{MmioPort, RegisterPort};
pub use switch::SwitchStatus;

use aux::Timeout;

/// Board hooks the controller cannot discover on its own.
pub trait Board {
    /// Frequency of the clock feeding the SD clock divider.
    fn source_clock_hz(&self) -> u32;

    fn power_on(&mut self) -> Result<(), SdError> {
        Ok(())
    }

    fn card_detect(&self) -> Result<bool, SdError> {
        Ok(true)
    }

    /// Busy-wait for at least `us` microseconds.
    fn delay_us(&self, us: u32);

    /// Adjust IO pad drive strength and speed for a new bus clock.
    fn set_pad_config(&mut self, _freq_hz: u32, _strength: u32) {}
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HostFlags: u32 {
        const ADMA = 1 << 0;
        const HIGH_SPEED = 1 << 1;
        const DMA = 1 << 2;
        const SUSPEND_RESUME = 1 << 3;
        const VOLTAGE_3_3V = 1 << 4;
        const VOLTAGE_3_0V = 1 << 5;
        const VOLTAGE_1_8V = 1 << 6;
        const SDR50 = 1 << 7;
        const SDR104 = 1 << 8;
        const DDR50 = 1 << 9;
        const BUS_4BIT = 1 << 10;
        const BUS_8BIT = 1 << 11;
    }
}

/// What the controller reports in HOST_CTRL_CAP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapability {
    pub max_blk_len: u32,
    pub max_blk_cnt: u32,
    pub flags: HostFlags,
}

impl HostCapability {
    pub fn from_reg(cap: u32) -> Self {
        let mut flags = HostFlags::BUS_4BIT | HostFlags::BUS_8BIT;
        let bits = [
            (USDHC_CAP_ADMAS, HostFlags::ADMA),
            (USDHC_CAP_HSS, HostFlags::HIGH_SPEED),
            (USDHC_CAP_DMAS, HostFlags::DMA),
            (USDHC_CAP_SRS, HostFlags::SUSPEND_RESUME),
            (USDHC_CAP_VS33, HostFlags::VOLTAGE_3_3V),
            (USDHC_CAP_VS30, HostFlags::VOLTAGE_3_0V),
            (USDHC_CAP_VS18, HostFlags::VOLTAGE_1_8V),
            (USDHC_CAP_SDR50, HostFlags::SDR50),
            (USDHC_CAP_SDR104, HostFlags::SDR104),
            (USDHC_CAP_DDR50, HostFlags::DDR50),
        ];
        for (bit, flag) in bits {
            if cap & bit != 0 {
                flags |= flag;
            }
        }

        Self {
            max_blk_len: 512 << ((cap & USDHC_CAP_MBL_MASK) >> USDHC_CAP_MBL_SHIFT),
            max_blk_cnt: USDHC_MAX_BLOCK_COUNT,
            flags,
        }
    }
}

/// One USDHC controller and the card behind it.
pub struct UsdhcHost<P: RegisterPort, B: Board> {
    port: P,
    board: B,
    config: UsdhcConfig,
    caps: HostCapability,
    card: Option<SdCard>,
    adma: AdmaConfig,
    stage: InitStage,
    bus_clock_hz: u32,
}

impl<P: RegisterPort, B: Board> Display for UsdhcHost<P, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "USDHC Controller {{ dma: {:?}, caps: {:?}, stage: {:?}, clock: {} Hz }}",
            self.adma.dma_mode, self.caps, self.stage, self.bus_clock_hz
        )
    }
}

impl<P: RegisterPort, B: Board> UsdhcHost<P, B> {
    pub fn new(port: P, board: B, config: UsdhcConfig) -> Result<Self, SdError> {
        config.validate()?;

        cfg_if::cfg_if! {
            if #[cfg(feature = "dma")] {
                let adma = AdmaConfig {
                    dma_mode: config.dma_mode,
                    burst_len: config.burst_len,
                    table: AdmaTable::new(config.adma_table_words)?,
                };
            } else if #[cfg(feature = "pio")] {
                let adma = AdmaConfig {
                    dma_mode: config.dma_mode,
                    burst_len: config.burst_len,
                };
            }
        }

        let host = Self {
            adma,
            port,
            board,
            config,
            caps: HostCapability::from_reg(0),
            card: None,
            stage: InitStage::Idle,
            bus_clock_hz: 0,
        };

        info!("USDHC Controller created: {}", host);
        Ok(host)
    }

    pub fn config(&self) -> &UsdhcConfig {
        &self.config
    }

    pub fn caps(&self) -> &HostCapability {
        &self.caps
    }

    pub fn card(&self) -> Option<&SdCard> {
        self.card.as_ref()
    }

    pub fn stage(&self) -> InitStage {
        self.stage
    }

    pub fn bus_clock_hz(&self) -> u32 {
        self.bus_clock_hz
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    #[cfg(feature = "dma")]
    pub fn adma_table(&self) -> &AdmaTable {
        &self.adma.table
    }

    /// Reset the controller and program the static transfer settings.
    pub fn init_host(&mut self) -> Result<(), SdError> {
        info!("Init USDHC Controller");

        // Reset the controller
        self.set_bits(USDHC_SYS_CTRL, USDHC_SYS_RSTA);
        let mut timeout = Timeout::new(self.config.poll.reset, SdError::Timeout);
        while self.read_reg(USDHC_SYS_CTRL) & USDHC_SYS_RSTA != 0 {
            timeout.tick()?;
            self.board.delay_us(1000);
        }

        // Endian mode
        self.modify_reg(
            USDHC_PROT_CTRL,
            USDHC_PROT_EMODE_MASK,
            (self.config.endian as u32) << USDHC_PROT_EMODE_SHIFT,
        );

        // Watermark and burst length
        let cfg = &self.config;
        let wtmk = ((cfg.read_watermark << USDHC_WTMK_RD_WML_SHIFT) & USDHC_WTMK_RD_WML_MASK)
            | ((cfg.read_burst_len << USDHC_WTMK_RD_BRST_SHIFT) & USDHC_WTMK_RD_BRST_MASK)
            | ((cfg.write_watermark << USDHC_WTMK_WR_WML_SHIFT) & USDHC_WTMK_WR_WML_MASK)
            | ((cfg.write_burst_len << USDHC_WTMK_WR_BRST_SHIFT) & USDHC_WTMK_WR_BRST_MASK);
        self.write_reg(USDHC_WTMK_LVL, wtmk);

        // Data timeout counter
        self.modify_reg(
            USDHC_SYS_CTRL,
            USDHC_SYS_DTOCV_MASK,
            self.config.data_timeout << USDHC_SYS_DTOCV_SHIFT,
        );

        // Start without DMA and DDR
        self.clear_bits(USDHC_MIX_CTRL, USDHC_MIX_DMAEN | USDHC_MIX_DDR_EN);

        self.set_bits(
            USDHC_INT_STATUS_EN,
            USDHC_INT_CC
                | USDHC_INT_TC
                | USDHC_INT_CMD_ERR
                | USDHC_INT_DATA_ERR
                | USDHC_INT_BRR
                | USDHC_INT_BWR
                | USDHC_INT_DINT
                | USDHC_INT_CARD_DETECT
                | USDHC_INT_RTE
                | USDHC_INT_TP
                | USDHC_INT_TNE
                | USDHC_INT_BGE,
        );

        self.caps = HostCapability::from_reg(self.read_reg(USDHC_HOST_CTRL_CAP));
        debug!("USDHC capabilities: {:?}", self.caps);
        Ok(())
    }

    /// Put the bus back into its power-on state before card init.
    pub fn host_reset(&mut self) {
        // 3.3V signalling
        self.clear_bits(USDHC_VEND_SPEC, USDHC_VEND_VSELECT);
        self.enable_ddr_mode(false, false);
        self.disable_std_tuning();
        self.stage = InitStage::Idle;
        self.card = None;
    }

    pub fn set_bus_width(&self, width: u32) {
        let dtw = match width {
            8 => USDHC_DTW_8BIT,
            4 => USDHC_DTW_4BIT,
            _ => USDHC_DTW_1BIT,
        };
        self.modify_reg(USDHC_PROT_CTRL, USDHC_PROT_DTW_MASK, dtw << USDHC_PROT_DTW_SHIFT);
    }

    /// Send the 80 initialization clocks.
    pub fn set_card_active(&self) -> Result<(), SdError> {
        self.set_bits(USDHC_SYS_CTRL, USDHC_SYS_INITA);
        let mut timeout = Timeout::new(self.config.poll.card_active, SdError::Timeout);
        while self.read_reg(USDHC_SYS_CTRL) & USDHC_SYS_INITA != 0 {
            timeout.tick()?;
        }
        Ok(())
    }

    pub fn is_card_present(&self) -> bool {
        self.read_reg(USDHC_PRES_STATE) & USDHC_PRES_CINST != 0
    }
}
