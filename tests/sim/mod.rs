//! Register-level model of a USDHC controller with an SD card attached.
//!
//! The model answers commands as soon as CMD_XFR_TYP is written and keeps
//! INT_STATUS write-1-to-clear, which is all the polling driver needs.

#![allow(dead_code)]

#[cfg(feature = "dma")]
pub mod dma;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use usdhc::constant::*;
use usdhc::usdhc::constant::*;
use usdhc::usdhc::{Board, RegisterPort};
use usdhc::SdError;

pub const SIM_RCA: u32 = 0xB368;
pub const SIM_SOURCE_HZ: u32 = 400_000_000;

// CSD v2.0, C_SIZE 0x3B37
pub const SIM_CSD: [u32; 4] = [0x0A40_0000, 0x3B37_7F80, 0x5B59_0000, 0x400E_0032];
pub const SIM_BLOCK_COUNT: u32 = (0x3B37 + 1) * 1024;
pub const SIM_CID: [u32; 4] = [0x7800_C500, 0x8012_3456, 0x5530_3847, 0x0353_4453];
// SD 3.0, 1/4-bit bus, CMD20 + CMD23
pub const SIM_SCR: [u8; 8] = [0x02, 0x35, 0x80, 0x03, 0, 0, 0, 0];

pub const SIM_HOST_CAP: u32 = USDHC_CAP_SDR50
    | USDHC_CAP_SDR104
    | USDHC_CAP_DDR50
    | USDHC_CAP_ADMAS
    | USDHC_CAP_HSS
    | USDHC_CAP_DMAS
    | USDHC_CAP_VS33
    | USDHC_CAP_VS18;

/// CMD0 argument that starts an alternative boot stream.
pub const SIM_BOOT_ARG: u32 = 0xFFFF_FFFA;

const R1_TRAN: u32 = (SD_R1_STATE_TRAN << SD_R1_CURRENT_STATE_SHIFT) | SD_R1_READY_FOR_DATA;

/// Knobs for the card and controller behaviour.
#[derive(Debug, Clone)]
pub struct SimOptions {
    pub host_cap: u32,
    pub answers_cmd8: bool,
    /// ACMD41 answers still busy this many times
    pub ocr_busy: u32,
    pub accepts_1v8: bool,
    /// DAT lines never go low after CMD11
    pub dat_stuck_high: bool,
    /// CMD19 after which EXECUTE_TUNING drops, 0 never
    pub tuning_pass_on: u32,
    /// Per-group CMD6 support bitmaps, group 1 at index 0
    pub switch_support: [u16; 6],
    /// CMD6 set mode leaves the functions unchanged
    pub ignore_switch_set: bool,
    /// OCR CCS set; otherwise the card takes byte addresses
    pub high_capacity: bool,
    /// Flag a delay cell error the first time EXECUTE_TUNING drops
    pub tap_error_once: bool,
    /// SMP_CLK_SEL drops together with EXECUTE_TUNING
    pub tuning_loses_sample_clock: bool,
    pub card_removed: bool,
    /// Bytes streamed after a boot CMD0
    pub boot_image: Vec<u8>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            host_cap: SIM_HOST_CAP,
            answers_cmd8: true,
            ocr_busy: 1,
            accepts_1v8: true,
            dat_stuck_high: false,
            tuning_pass_on: 2,
            switch_support: [0x001F, 0x0001, 0x0001, 0x000F, 0x0001, 0x0001],
            ignore_switch_set: false,
            high_capacity: true,
            tap_error_once: false,
            tuning_loses_sample_clock: false,
            card_removed: false,
            boot_image: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct PendingWrite {
    sector: u32,
    words: Vec<u32>,
    expected: usize,
}

#[derive(Debug)]
struct SimState {
    opts: SimOptions,
    regs: HashMap<u32, u32>,
    int_status: u32,
    rx_fifo: VecDeque<u32>,
    write: Option<PendingWrite>,
    app_cmd: bool,
    dat_low: bool,
    switch_current: [u32; 6],
    sectors: HashMap<u32, Vec<u8>>,
    commands: Vec<u32>,
    brr_events: u32,
    bwr_events: u32,
    force_clock_pulses: u32,
    tuning_cmds: u32,
    tap_errors: u32,
    dma_xfers: u32,
    dma_error: u32,
    boot_pos: usize,
    boot_cursor: u64,
}

/// Simulated controller plus card. Use `&SimCard` as the register port.
pub struct SimCard {
    state: RefCell<SimState>,
}

impl SimCard {
    pub fn new(opts: SimOptions) -> Self {
        let mut regs = HashMap::new();
        regs.insert(USDHC_HOST_CTRL_CAP, opts.host_cap);

        Self {
            state: RefCell::new(SimState {
                opts,
                regs,
                int_status: 0,
                rx_fifo: VecDeque::new(),
                write: None,
                app_cmd: false,
                dat_low: false,
                switch_current: [0; 6],
                sectors: HashMap::new(),
                commands: Vec::new(),
                brr_events: 0,
                bwr_events: 0,
                force_clock_pulses: 0,
                tuning_cmds: 0,
                tap_errors: 0,
                dma_xfers: 0,
                dma_error: 0,
                boot_pos: 0,
                boot_cursor: 0,
            }),
        }
    }

    pub fn commands(&self) -> Vec<u32> {
        self.state.borrow().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.borrow_mut().commands.clear();
    }

    pub fn brr_events(&self) -> u32 {
        self.state.borrow().brr_events
    }

    pub fn bwr_events(&self) -> u32 {
        self.state.borrow().bwr_events
    }

    pub fn force_clock_pulses(&self) -> u32 {
        self.state.borrow().force_clock_pulses
    }

    pub fn tuning_cmds(&self) -> u32 {
        self.state.borrow().tuning_cmds
    }

    pub fn tap_errors(&self) -> u32 {
        self.state.borrow().tap_errors
    }

    /// Data phases the ADMA engine completed.
    pub fn dma_xfers(&self) -> u32 {
        self.state.borrow().dma_xfers
    }

    /// Error bits the next DMA data phase reports beside TC.
    pub fn inject_dma_error(&self, bits: u32) {
        self.state.borrow_mut().dma_error = bits;
    }

    pub fn switch_current(&self, group: usize) -> u32 {
        self.state.borrow().switch_current[group]
    }

    pub fn set_ignore_switch_set(&self, ignore: bool) {
        self.state.borrow_mut().opts.ignore_switch_set = ignore;
    }

    pub fn raise(&self, bits: u32) {
        self.state.borrow_mut().int_status |= bits;
    }

    pub fn int_status(&self) -> u32 {
        self.state.borrow().int_status
    }

    pub fn reg(&self, offset: u32) -> u32 {
        self.state.borrow().regs.get(&offset).copied().unwrap_or(0)
    }

    pub fn put_sector(&self, sector: u32, data: &[u8]) {
        self.state.borrow_mut().sectors.insert(sector, data.to_vec());
    }

    pub fn sector(&self, sector: u32) -> Vec<u8> {
        self.state.borrow().sector(sector)
    }
}

impl RegisterPort for SimCard {
    fn read(&self, offset: u32) -> u32 {
        self.state.borrow_mut().read(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        self.state.borrow_mut().write(offset, value)
    }
}

impl SimState {
    fn reg(&self, offset: u32) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    fn sector(&self, sector: u32) -> Vec<u8> {
        self.sectors
            .get(&sector)
            .cloned()
            .unwrap_or_else(|| vec![0u8; SD_BLOCK_SIZE as usize])
    }

    fn read(&mut self, offset: u32) -> u32 {
        match offset {
            USDHC_INT_STATUS => self.int_status,
            USDHC_PRES_STATE => {
                let mut pres = USDHC_PRES_SDSTB;
                if !self.opts.card_removed {
                    pres |= USDHC_PRES_CINST;
                }
                if !self.dat_low {
                    pres |= USDHC_PRES_DAT0_3;
                }
                pres
            }
            USDHC_DATA_BUFF_ACC_PORT => {
                let word = self.rx_fifo.pop_front().unwrap_or(0);
                if self.rx_fifo.is_empty() {
                    self.int_status |= USDHC_INT_TC;
                }
                word
            }
            _ => self.reg(offset),
        }
    }

    fn write(&mut self, offset: u32, value: u32) {
        match offset {
            USDHC_INT_STATUS => self.clear_int(value),
            USDHC_SYS_CTRL => {
                // Resets and INITA complete at once
                let self_clearing = USDHC_SYS_RSTA | USDHC_SYS_RSTC | USDHC_SYS_RSTD | USDHC_SYS_INITA;
                self.regs.insert(offset, value & !self_clearing);
            }
            USDHC_VEND_SPEC => {
                let old = self.reg(offset);
                if value & USDHC_VEND_FRC_SDCLK_ON != 0 && old & USDHC_VEND_FRC_SDCLK_ON == 0 {
                    self.force_clock_pulses += 1;
                }
                if value & USDHC_VEND_FRC_SDCLK_ON == 0
                    && old & USDHC_VEND_FRC_SDCLK_ON != 0
                    && value & USDHC_VEND_VSELECT != 0
                {
                    // Card finished its regulator switch
                    self.dat_low = false;
                }
                self.regs.insert(offset, value);
            }
            USDHC_DATA_BUFF_ACC_PORT => self.push_write_word(value),
            USDHC_CLK_TUNE_CTRL_STATUS => {
                // Loading a delay cell clears the tap error flags
                let errors = USDHC_CLKTUNE_PRE_ERR | USDHC_CLKTUNE_NXT_ERR;
                self.regs.insert(offset, value & !errors);
            }
            USDHC_PROT_CTRL => {
                self.regs.insert(offset, value & !USDHC_PROT_CREQ);
                if value & USDHC_PROT_CREQ != 0 {
                    self.continue_request();
                }
            }
            USDHC_CMD_XFR_TYP => {
                self.regs.insert(offset, value);
                self.execute(value);
            }
            _ => {
                self.regs.insert(offset, value);
            }
        }
    }

    fn clear_int(&mut self, value: u32) {
        self.int_status &= !value;

        if value & USDHC_INT_BRR != 0 && !self.rx_fifo.is_empty() {
            self.int_status |= USDHC_INT_BRR;
            self.brr_events += 1;
        }
        if value & USDHC_INT_BWR != 0 {
            if let Some(write) = self.write.as_ref() {
                if write.words.len() < write.expected {
                    self.int_status |= USDHC_INT_BWR;
                    self.bwr_events += 1;
                }
            }
        }
    }

    fn push_write_word(&mut self, word: u32) {
        let Some(write) = self.write.as_mut() else {
            return;
        };
        write.words.push(word);
        if write.words.len() < write.expected {
            return;
        }

        let Some(write) = self.write.take() else {
            return;
        };
        let bytes: Vec<u8> = write.words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.store(write.sector, &bytes);
        self.int_status |= USDHC_INT_TC;
    }

    // Card-to-host data phase, through the engine when DMAEN is set
    fn deliver(&mut self, bytes: &[u8]) {
        #[cfg(feature = "dma")]
        if self.dma_enabled() {
            self.adma_to_memory(bytes);
            return;
        }
        self.start_read(bytes);
    }

    // Host-to-card data phase starting at `sector`
    fn accept(&mut self, sector: u32, len: usize) {
        #[cfg(feature = "dma")]
        if self.dma_enabled() {
            let bytes = self.adma_from_memory(len);
            self.store(sector, &bytes);
            return;
        }
        self.write = Some(PendingWrite {
            sector,
            words: Vec::new(),
            expected: len / 4,
        });
        self.int_status |= USDHC_INT_BWR;
        self.bwr_events += 1;
    }

    fn store(&mut self, sector: u32, bytes: &[u8]) {
        for (i, chunk) in bytes.chunks(SD_BLOCK_SIZE as usize).enumerate() {
            self.sectors.insert(sector + i as u32, chunk.to_vec());
        }
    }

    #[cfg(not(feature = "dma"))]
    fn continue_request(&mut self) {}

    #[cfg(not(feature = "dma"))]
    fn boot_request(&mut self, _arg: u32) {}

    // First sector addressed by a read or write argument
    fn first_sector(&self, arg: u32) -> u32 {
        if self.opts.high_capacity {
            arg
        } else {
            arg / SD_BLOCK_SIZE
        }
    }

    fn start_read(&mut self, bytes: &[u8]) {
        self.rx_fifo = bytes
            .chunks(4)
            .map(|c| {
                let mut word = [0u8; 4];
                word[..c.len()].copy_from_slice(c);
                u32::from_le_bytes(word)
            })
            .collect();
        self.int_status |= USDHC_INT_BRR;
        self.brr_events += 1;
    }

    fn block_att(&self) -> (u32, u32) {
        let att = self.reg(USDHC_BLK_ATT);
        (att & USDHC_BLK_SIZE_MASK, att >> USDHC_BLK_CNT_SHIFT)
    }

    fn respond(&mut self, rsp: u32) {
        self.regs.insert(USDHC_CMD_RSP0, rsp);
        self.int_status |= USDHC_INT_CC;
    }

    // Inverse of the controller's R2 byte stripping
    fn respond_r2(&mut self, value: [u32; 4]) {
        for i in 0..4 {
            let mut word = value[i] >> 8;
            if i < 3 {
                word |= (value[i + 1] & 0xFF) << 24;
            }
            self.regs.insert(USDHC_CMD_RSP0 + 4 * i as u32, word);
        }
        self.int_status |= USDHC_INT_CC;
    }

    fn timeout(&mut self) {
        self.int_status |= USDHC_INT_CTOE;
    }

    fn execute(&mut self, xfr_typ: u32) {
        let index = (xfr_typ & USDHC_XFR_CMDINX_MASK) >> USDHC_XFR_CMDINX_SHIFT;
        let arg = self.reg(USDHC_CMD_ARG);
        let app = std::mem::take(&mut self.app_cmd);
        self.commands.push(index);

        match (app, index) {
            (_, 55) => {
                self.app_cmd = true;
                self.respond(R1_TRAN | SD_R1_APP_CMD);
            }
            (true, 41) => {
                if self.opts.ocr_busy > 0 {
                    self.opts.ocr_busy -= 1;
                    self.respond(0x00FF_8000);
                } else {
                    let mut ocr = SD_OCR_PWR_BUSY | 0x00FF_8000;
                    if self.opts.high_capacity {
                        ocr |= SD_OCR_CARD_CAP;
                    }
                    if self.opts.accepts_1v8 && arg & SD_OCR_SWITCH_18_REQ != 0 {
                        ocr |= SD_OCR_SWITCH_18_ACCEPT;
                    }
                    self.respond(ocr);
                }
            }
            (true, 51) => {
                self.respond(R1_TRAN);
                self.deliver(&SIM_SCR);
            }
            (true, 6) => self.respond(R1_TRAN),
            (_, 0) => {
                self.int_status |= USDHC_INT_CC;
                self.boot_request(arg);
            }
            (_, 8) => {
                if self.opts.answers_cmd8 {
                    self.respond(arg & 0xFFF);
                } else {
                    self.timeout();
                }
            }
            (_, 11) => {
                self.respond(R1_TRAN);
                if !self.opts.dat_stuck_high {
                    self.dat_low = true;
                }
            }
            (_, 2) => self.respond_r2(SIM_CID),
            (_, 3) => self.respond(SIM_RCA << 16),
            (_, 9) => self.respond_r2(SIM_CSD),
            (_, 6) => {
                self.respond(R1_TRAN);
                let status = self.switch(arg);
                self.deliver(&status);
            }
            (_, 19) => {
                self.respond(R1_TRAN);
                self.tuning_cmds += 1;
                if self.opts.tuning_pass_on != 0 && self.tuning_cmds >= self.opts.tuning_pass_on {
                    let ac12 = self.reg(USDHC_AUTOCMD12_ERR_STATUS);
                    if ac12 & USDHC_AC12_EXECUTE_TUNING != 0 {
                        self.tuning_done();
                    }
                }
                // The pattern is checked by the controller, nothing to drain
                self.int_status |= USDHC_INT_BRR;
                self.brr_events += 1;
            }
            (_, 17) | (_, 18) => {
                self.respond(R1_TRAN);
                let (_, count) = self.block_att();
                let first = self.first_sector(arg);
                let mut bytes = Vec::new();
                for s in first..first + count {
                    bytes.extend(self.sector(s));
                }
                self.deliver(&bytes);
            }
            (_, 24) | (_, 25) => {
                self.respond(R1_TRAN);
                let (size, count) = self.block_att();
                let first = self.first_sector(arg);
                self.accept(first, (size * count) as usize);
            }
            (_, 7) | (_, 13) | (_, 16) => self.respond(R1_TRAN),
            _ => self.timeout(),
        }
    }

    fn tuning_done(&mut self) {
        let mut ac12 = self.reg(USDHC_AUTOCMD12_ERR_STATUS) & !USDHC_AC12_EXECUTE_TUNING;
        if self.opts.tuning_loses_sample_clock {
            ac12 &= !USDHC_AC12_SMP_CLK_SEL;
        }
        self.regs.insert(USDHC_AUTOCMD12_ERR_STATUS, ac12);

        if self.opts.tap_error_once && self.tap_errors == 0 {
            self.tap_errors += 1;
            let tune = self.reg(USDHC_CLK_TUNE_CTRL_STATUS);
            self.regs
                .insert(USDHC_CLK_TUNE_CTRL_STATUS, tune | USDHC_CLKTUNE_PRE_ERR);
        }
    }

    // CMD6 status block for `arg`, applying it in set mode
    fn switch(&mut self, arg: u32) -> Vec<u8> {
        let set = arg & SD_SWITCH_MODE_SET != 0;
        let mut shown = self.switch_current;

        for group in 0..6 {
            let function = (arg >> (group * 4)) & 0xF;
            if function == 0xF {
                continue;
            }
            let supported = self.opts.switch_support[group] & (1 << function) != 0;
            if !supported {
                shown[group] = 0xF;
            } else if !set {
                shown[group] = function;
            } else if !self.opts.ignore_switch_set {
                self.switch_current[group] = function;
                shown[group] = function;
            }
        }

        let sup = &self.opts.switch_support;
        let words = [
            0x0064_0000 | sup[5] as u32,
            ((sup[4] as u32) << 16) | sup[3] as u32,
            ((sup[2] as u32) << 16) | sup[1] as u32,
            ((sup[0] as u32) << 16) | (shown[5] << 12) | (shown[4] << 8) | (shown[3] << 4) | shown[2],
            (shown[1] << 28) | (shown[0] << 24),
        ];

        let mut bytes = vec![0u8; SD_SWITCH_STATUS_BYTES];
        for (i, word) in words.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        bytes
    }
}

/// Board with instant delays and a fixed source clock.
#[derive(Debug, Default)]
pub struct SimBoard {
    pub card_absent: bool,
    pub powered: bool,
    pub pad_configs: Vec<(u32, u32)>,
}

impl Board for SimBoard {
    fn source_clock_hz(&self) -> u32 {
        SIM_SOURCE_HZ
    }

    fn power_on(&mut self) -> Result<(), SdError> {
        self.powered = true;
        Ok(())
    }

    fn card_detect(&self) -> Result<bool, SdError> {
        Ok(!self.card_absent)
    }

    fn delay_us(&self, _us: u32) {}

    fn set_pad_config(&mut self, freq_hz: u32, strength: u32) {
        self.pad_configs.push((freq_hz, strength));
    }
}

pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
