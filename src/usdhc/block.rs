// ===== Data Transfer Interface =====

#[cfg(feature = "dma")]
use alloc::vec::Vec;

#[cfg(feature = "dma")]
use dma_api::{DVec, Direction};
use log::{debug, warn};

use crate::{constant::*, err::SdError};

#[cfg(feature = "dma")]
use super::adma::AdmaAppend;
use super::{
    aux::Timeout,
    cmd::{CommandType, ResponseType, UsdhcCommand},
    constant::*,
    Board, RegisterPort, UsdhcHost,
};

#[derive(Debug)]
pub enum DataBuffer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl DataBuffer<'_> {
    fn len(&self) -> usize {
        match self {
            DataBuffer::Read(buf) => buf.len(),
            DataBuffer::Write(buf) => buf.len(),
        }
    }

    fn is_read(&self) -> bool {
        matches!(self, DataBuffer::Read(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Normal,
    /// CMD19 tuning block; the controller checks the pattern itself.
    Tuning,
    Boot,
    /// Follow-up chunk of a running boot stream.
    BootContinuous,
}

impl TransferKind {
    pub fn is_boot(&self) -> bool {
        matches!(self, TransferKind::Boot | TransferKind::BootContinuous)
    }
}

/// Data phase of one transaction.
#[derive(Debug)]
pub struct UsdhcData<'a> {
    pub block_size: u32,
    pub block_count: u32,
    pub buffer: DataBuffer<'a>,
    /// Let the controller send CMD12 after a multi-block transfer
    pub cmd12: bool,
    /// Let the controller send CMD23 ahead of the transfer
    pub cmd23: bool,
    /// Tolerate data CRC/end-bit errors (not timeouts)
    pub ignore_err: bool,
    pub kind: TransferKind,
}

impl<'a> UsdhcData<'a> {
    pub fn read(block_size: u32, block_count: u32, buf: &'a mut [u8]) -> Self {
        Self {
            block_size,
            block_count,
            buffer: DataBuffer::Read(buf),
            cmd12: false,
            cmd23: false,
            ignore_err: false,
            kind: TransferKind::Normal,
        }
    }

    pub fn write(block_size: u32, block_count: u32, buf: &'a [u8]) -> Self {
        Self {
            block_size,
            block_count,
            buffer: DataBuffer::Write(buf),
            cmd12: false,
            cmd23: false,
            ignore_err: false,
            kind: TransferKind::Normal,
        }
    }

    pub fn with_cmd12(mut self) -> Self {
        self.cmd12 = true;
        self
    }

    pub fn with_cmd23(mut self) -> Self {
        self.cmd23 = true;
        self
    }

    pub fn with_kind(mut self, kind: TransferKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn ignore_errors(mut self) -> Self {
        self.ignore_err = true;
        self
    }

    // Bytes moved on the bus; blocks are padded to whole words
    fn bus_len(&self) -> usize {
        (self.block_size as usize).next_multiple_of(4) * self.block_count as usize
    }

    // Block geometry the controller can express, and a buffer that holds it
    fn validate(&self) -> Result<(), SdError> {
        if self.block_count == 0 || self.block_count > USDHC_MAX_BLOCK_COUNT {
            return Err(SdError::InvalidArgument);
        }
        if self.block_size == 0 || self.block_size > USDHC_MAX_BLOCK_SIZE {
            return Err(SdError::InvalidArgument);
        }
        if self.buffer.len() < self.block_size as usize * self.block_count as usize {
            return Err(SdError::InvalidArgument);
        }
        Ok(())
    }
}

// Map data-phase INT_STATUS error bits
fn data_error(int_status: u32) -> SdError {
    if int_status & USDHC_INT_DTOE != 0 {
        SdError::DataTimeout
    } else if int_status & USDHC_INT_DCE != 0 {
        SdError::DataCrc
    } else if int_status & USDHC_INT_DEBE != 0 {
        SdError::DataEndBit
    } else if int_status & USDHC_INT_AC12E != 0 {
        SdError::Acmd12Error
    } else if int_status & USDHC_INT_DMAE != 0 {
        SdError::AdmaError
    } else {
        SdError::IoError
    }
}

impl<P: RegisterPort, B: Board> UsdhcHost<P, B> {
    /// Run one command with an optional data phase.
    ///
    /// With the `dma` feature the data phase is staged in DMA memory and
    /// moved by the ADMA engine; when no chain can be built it falls back
    /// to the FIFO. A pending re-tuning event aborts the attempt with
    /// `ReTuningRequested` before anything is sent, and block geometry the
    /// controller cannot express is rejected with `InvalidArgument`.
    pub fn xfer(
        &mut self,
        cmd: &mut UsdhcCommand,
        data: Option<&mut UsdhcData<'_>>,
    ) -> Result<(), SdError> {
        // Check re-tuning request
        if self.read_reg(USDHC_INT_STATUS) & USDHC_INT_RTE != 0 {
            self.write_reg(USDHC_INT_STATUS, USDHC_INT_RTE);
            warn!("Re-tuning requested, CMD{} not sent", cmd.index);
            return Err(SdError::ReTuningRequested);
        }

        if let Some(d) = data.as_deref() {
            d.validate()?;
        }

        cfg_if::cfg_if! {
            if #[cfg(feature = "dma")] {
                let staging = match data.as_deref() {
                    Some(d) if d.kind != TransferKind::Tuning => self.dma_setup(d),
                    _ => None,
                };
                let en_dma = staging.is_some();
            } else if #[cfg(feature = "pio")] {
                let en_dma = false;
            }
        }

        if !en_dma {
            // Polling mode
            self.clear_bits(USDHC_MIX_CTRL, USDHC_MIX_DMAEN);
            self.clear_bits(USDHC_PROT_CTRL, USDHC_PROT_DMASEL_MASK);
        }

        cmd.flags = 0;
        self.data_xfer_cfg(cmd, data.as_deref(), en_dma)?;
        self.send_command(cmd)?;

        let poll_cmd = cmd.cmd_type != CommandType::Empty
            && data.as_deref().map_or(true, |d| d.kind == TransferKind::Normal);
        if poll_cmd {
            self.wait_command_done(cmd)?;
        }

        let Some(data) = data else {
            return Ok(());
        };

        cfg_if::cfg_if! {
            if #[cfg(feature = "dma")] {
                if let Some(staging) = staging {
                    return self.dma_sync_xfer(data, staging);
                }
            }
        }

        if data.buffer.is_read() {
            self.read_data_port_sync(data)
        } else {
            self.write_data_port_sync(data)
        }
    }

    // Stage the data phase in DMA memory and describe it to the engine.
    // None means polling mode.
    #[cfg(feature = "dma")]
    fn dma_setup(&mut self, data: &UsdhcData<'_>) -> Option<DVec<u8>> {
        match self.dma_prepare(data) {
            Ok(staging) => Some(staging),
            Err(e) => {
                warn!("DMA setup failed ({}), falling back to PIO", e);
                None
            }
        }
    }

    #[cfg(feature = "dma")]
    fn dma_prepare(&mut self, data: &UsdhcData<'_>) -> Result<DVec<u8>, SdError> {
        let len = data.bus_len();
        let direction = if data.buffer.is_read() {
            Direction::FromDevice
        } else {
            Direction::ToDevice
        };
        let mut staging: DVec<u8> =
            DVec::zeros(len, USDHC_DMA_ALIGN, direction).ok_or(SdError::MemoryError)?;

        if let DataBuffer::Write(buf) = &data.buffer {
            for (i, &byte) in buf.iter().take(len).enumerate() {
                staging.set(i, byte);
            }
        }

        // The first word of a continuous boot chunk comes from the dummy word
        let offset = if data.kind == TransferKind::BootContinuous { 4 } else { 0 };
        let append = if data.kind.is_boot() {
            AdmaAppend::Multi
        } else {
            AdmaAppend::Single
        };

        self.adma_table_cfg(
            staging.bus_addr() as u64 + offset as u64,
            len.saturating_sub(offset),
            append,
            data.cmd23,
            data.kind != TransferKind::BootContinuous,
        )?;
        Ok(staging)
    }

    fn data_xfer_cfg(
        &self,
        cmd: &mut UsdhcCommand,
        data: Option<&UsdhcData<'_>>,
        en_dma: bool,
    ) -> Result<(), SdError> {
        let mut mix_ctrl = self.read_reg(USDHC_MIX_CTRL);

        let Some(data) = data else {
            // Clear data flags
            mix_ctrl &= !(USDHC_MIX_MSBSEL
                | USDHC_MIX_BCEN
                | USDHC_MIX_DTDSEL
                | USDHC_MIX_AC12EN
                | USDHC_MIX_AC23EN);
            self.write_reg(USDHC_MIX_CTRL, mix_ctrl);
            return Ok(());
        };

        if data.kind == TransferKind::BootContinuous {
            self.clear_bits(USDHC_PROT_CTRL, USDHC_PROT_SABGREQ);
            self.set_bits(USDHC_PROT_CTRL, USDHC_PROT_CREQ);
            return Ok(());
        }

        // Check data inhibit
        let mut timeout = Timeout::new(self.config.poll.cmd_inhibit, SdError::Busy);
        while self.read_reg(USDHC_PRES_STATE) & USDHC_PRES_CDIHB != 0 {
            timeout.tick()?;
        }

        mix_ctrl &= !(USDHC_MIX_MSBSEL | USDHC_MIX_BCEN | USDHC_MIX_DTDSEL | USDHC_MIX_AC12EN);
        if data.buffer.is_read() {
            mix_ctrl |= USDHC_MIX_DTDSEL;
        }
        if data.block_count > 1 {
            mix_ctrl |= USDHC_MIX_MSBSEL | USDHC_MIX_BCEN;
            if data.cmd12 {
                mix_ctrl |= USDHC_MIX_AC12EN;
            }
        }

        // Auto CMD23 takes the block count from DS_ADDR
        if data.cmd23 {
            mix_ctrl |= USDHC_MIX_AC23EN;
            self.set_bits(USDHC_VEND_SPEC2, USDHC_VEND2_ACMD23_ARGU2_EN);
            self.write_reg(USDHC_DS_ADDR, data.block_count);
        } else {
            mix_ctrl &= !USDHC_MIX_AC23EN;
            self.clear_bits(USDHC_VEND_SPEC2, USDHC_VEND2_ACMD23_ARGU2_EN);
        }

        if data.kind != TransferKind::Boot {
            self.write_reg(
                USDHC_BLK_ATT,
                (data.block_size & USDHC_BLK_SIZE_MASK) | (data.block_count << USDHC_BLK_CNT_SHIFT),
            );
        } else {
            mix_ctrl |= USDHC_MIX_MSBSEL | USDHC_MIX_BCEN;
            self.set_bits(USDHC_PROT_CTRL, USDHC_PROT_RD_DONE_NO_8CLK);
        }

        cmd.flags |= USDHC_XFR_DPSEL;

        // Buffer ready interrupts only matter for polling mode
        let buf_ready = USDHC_INT_BWR | USDHC_INT_BRR;
        if en_dma {
            self.clear_bits(USDHC_INT_SIGNAL_EN, buf_ready | USDHC_INT_DINT);
            self.clear_bits(USDHC_INT_STATUS_EN, buf_ready | USDHC_INT_DINT);
        } else {
            self.set_bits(USDHC_INT_SIGNAL_EN, buf_ready);
            self.set_bits(USDHC_INT_STATUS_EN, buf_ready);
        }

        self.write_reg(USDHC_MIX_CTRL, mix_ctrl);
        Ok(())
    }

    #[cfg(feature = "dma")]
    fn dma_sync_xfer(&mut self, data: &mut UsdhcData<'_>, staging: DVec<u8>) -> Result<(), SdError> {
        let int_status = self.wait_int_status(
            USDHC_INT_TC | USDHC_INT_DATA_ERR | USDHC_INT_CMD_ERR | USDHC_INT_TNE | USDHC_INT_DMAE,
            self.config.poll.data_done,
            SdError::DataTimeout,
        )?;

        let mut result = Ok(());
        if int_status & USDHC_INT_TNE != 0 {
            result = Err(SdError::TuningError);
        } else if int_status & (USDHC_INT_DATA_ERR | USDHC_INT_DMAE) != 0 {
            if !data.ignore_err || int_status & USDHC_INT_DTOE != 0 {
                result = Err(data_error(int_status));
            }
        } else if int_status & USDHC_INT_CMD_ERR != 0 {
            result = Err(super::cmd::command_error(int_status));
        }

        self.write_reg(
            USDHC_INT_STATUS,
            USDHC_INT_TC | USDHC_INT_DATA_ERR | USDHC_INT_DMAE | USDHC_INT_TP | USDHC_INT_TNE,
        );

        if result.is_ok() {
            if let DataBuffer::Read(buf) = &mut data.buffer {
                let received: Vec<u8> = staging.to_vec();
                let n = buf.len().min(received.len());
                buf[..n].copy_from_slice(&received[..n]);

                if data.kind == TransferKind::BootContinuous {
                    let word = self.adma.table.boot_dummy().to_le_bytes();
                    let n = buf.len().min(4);
                    buf[..n].copy_from_slice(&word[..n]);
                }
            }
        }
        self.adma.table.retire();

        result
    }

    fn read_data_port_sync(&self, data: &mut UsdhcData<'_>) -> Result<(), SdError> {
        let total_words = (data.bus_len() / 4) as u32;
        let watermark =
            ((self.read_reg(USDHC_WTMK_LVL) & USDHC_WTMK_RD_WML_MASK) >> USDHC_WTMK_RD_WML_SHIFT).max(1);
        let mut xfered_words = 0;
        let mut result = Ok(());

        while result.is_ok() && xfered_words < total_words {
            let int_status = self.wait_int_status(
                USDHC_INT_BRR | USDHC_INT_DATA_ERR | USDHC_INT_TNE,
                self.config.poll.buffer_ready,
                SdError::DataTimeout,
            )?;

            // The controller validates the tuning pattern itself
            if data.kind == TransferKind::Tuning && int_status & USDHC_INT_BRR != 0 {
                self.write_reg(USDHC_INT_STATUS, USDHC_INT_BRR | USDHC_INT_TP);
                return Ok(());
            }

            if int_status & USDHC_INT_TNE != 0 {
                self.write_reg(USDHC_INT_STATUS, USDHC_INT_TNE);
                result = Err(SdError::TuningError);
            } else if int_status & USDHC_INT_DATA_ERR != 0 {
                if !data.ignore_err {
                    result = Err(data_error(int_status));
                }
                self.write_reg(USDHC_INT_STATUS, USDHC_INT_DATA_ERR);
            }

            if result.is_ok() {
                let count = watermark.min(total_words - xfered_words);
                if let DataBuffer::Read(buf) = &mut data.buffer {
                    for i in xfered_words..xfered_words + count {
                        let word = self.read_reg(USDHC_DATA_BUFF_ACC_PORT).to_le_bytes();
                        let start = (i * 4) as usize;
                        if start < buf.len() {
                            let n = (buf.len() - start).min(4);
                            buf[start..start + n].copy_from_slice(&word[..n]);
                        }
                    }
                }
                xfered_words += count;
                self.write_reg(USDHC_INT_STATUS, USDHC_INT_BRR);
            }
        }

        // Clear data complete flag after the last read
        self.write_reg(USDHC_INT_STATUS, USDHC_INT_TC);
        result
    }

    fn write_data_port_sync(&self, data: &mut UsdhcData<'_>) -> Result<(), SdError> {
        let total_words = (data.bus_len() / 4) as u32;
        let watermark =
            ((self.read_reg(USDHC_WTMK_LVL) & USDHC_WTMK_WR_WML_MASK) >> USDHC_WTMK_WR_WML_SHIFT).max(1);
        let mut xfered_words = 0;
        let mut result = Ok(());

        while result.is_ok() && xfered_words < total_words {
            let int_status = self.wait_int_status(
                USDHC_INT_BWR | USDHC_INT_DATA_ERR | USDHC_INT_TNE,
                self.config.poll.buffer_ready,
                SdError::DataTimeout,
            )?;

            if int_status & USDHC_INT_TNE != 0 {
                self.write_reg(USDHC_INT_STATUS, USDHC_INT_TNE);
                return Err(SdError::TuningError);
            } else if int_status & USDHC_INT_DATA_ERR != 0 {
                if !data.ignore_err {
                    result = Err(data_error(int_status));
                }
                self.write_reg(USDHC_INT_STATUS, USDHC_INT_DATA_ERR);
            }

            if result.is_ok() {
                let count = watermark.min(total_words - xfered_words);
                if let DataBuffer::Write(buf) = &data.buffer {
                    for i in xfered_words..xfered_words + count {
                        let start = (i * 4) as usize;
                        let mut word = [0u8; 4];
                        if start < buf.len() {
                            let n = (buf.len() - start).min(4);
                            word[..n].copy_from_slice(&buf[start..start + n]);
                        }
                        self.write_reg(USDHC_DATA_BUFF_ACC_PORT, u32::from_le_bytes(word));
                    }
                }
                xfered_words += count;
                self.write_reg(USDHC_INT_STATUS, USDHC_INT_BWR);
            }
        }

        // Wait for the card to take the last block
        let int_status = self.wait_int_status(
            USDHC_INT_TC | USDHC_INT_DATA_ERR,
            self.config.poll.data_done,
            SdError::DataTimeout,
        )?;
        if int_status & USDHC_INT_DATA_ERR != 0 && !data.ignore_err && result.is_ok() {
            result = Err(data_error(int_status));
        }
        self.write_reg(USDHC_INT_STATUS, USDHC_INT_TC | USDHC_INT_DATA_ERR);

        result
    }

    // Card address of a sector; standard capacity cards take a byte address
    fn sector_arg(&self, sector: u32) -> Result<u32, SdError> {
        match self.card() {
            Some(card) if !card.high_capacity() => sector
                .checked_mul(card.block_size)
                .ok_or(SdError::InvalidArgument),
            _ => Ok(sector),
        }
    }

    fn card_block_size(&self) -> u32 {
        self.card().map_or(SD_BLOCK_SIZE, |card| card.block_size)
    }

    /// Read `count` sectors starting at `sector` into `buf`.
    pub fn read_blocks(&mut self, buf: &mut [u8], sector: u32, count: u32) -> Result<(), SdError> {
        let block_size = self.card_block_size();
        let index = if count == 1 {
            SD_READ_SINGLE_BLOCK
        } else {
            SD_READ_MULTIPLE_BLOCK
        };
        debug!("read sector={} count={}", sector, count);

        let mut cmd = UsdhcCommand::new(index, self.sector_arg(sector)?, ResponseType::R1)
            .with_err_flags(SD_R1_ALL_ERRORS);
        let mut data = UsdhcData::read(block_size, count, buf).with_cmd12();
        self.xfer(&mut cmd, Some(&mut data))
    }

    /// Write `count` sectors from `buf` starting at `sector`.
    pub fn write_blocks(&mut self, buf: &[u8], sector: u32, count: u32) -> Result<(), SdError> {
        let block_size = self.card_block_size();
        let index = if count == 1 {
            SD_WRITE_SINGLE_BLOCK
        } else {
            SD_WRITE_MULTIPLE_BLOCK
        };
        debug!("write sector={} count={}", sector, count);

        let mut cmd = UsdhcCommand::new(index, self.sector_arg(sector)?, ResponseType::R1)
            .with_err_flags(SD_R1_ALL_ERRORS);
        let mut data = UsdhcData::write(block_size, count, buf).with_cmd12();
        self.xfer(&mut cmd, Some(&mut data))
    }
}
