use log::{debug, info, warn};

use crate::{constant::*, err::SdError};

use super::{
    aux::Timeout,
    block::{TransferKind, UsdhcData},
    cmd::{ResponseType, UsdhcCommand},
    constant::*,
    Board, RegisterPort, UsdhcHost,
};

impl<P: RegisterPort, B: Board> UsdhcHost<P, B> {
    fn dat_lines_high(&self) -> bool {
        self.read_reg(USDHC_PRES_STATE) & USDHC_PRES_DAT0_3 != 0
    }

    /// Move the IO lines to 1.8V after the card accepted CMD11.
    ///
    /// On `Busy` after the switch the card is in an unknown state and must
    /// be power cycled.
    pub fn switch_voltage(&mut self) -> Result<(), SdError> {
        // The card pulls DAT[3:0] low once it has taken CMD11
        let mut timeout = Timeout::new(self.config.poll.dat_line, SdError::Busy);
        while self.dat_lines_high() {
            timeout.tick()?;
        }

        // Host switch to 1.8V
        self.set_bits(USDHC_VEND_SPEC, USDHC_VEND_VSELECT);
        self.board.delay_us(USDHC_VOLTAGE_SWITCH_SETTLE_US);

        // Clock the card through its regulator switch
        self.set_bits(USDHC_VEND_SPEC, USDHC_VEND_FRC_SDCLK_ON);
        self.board.delay_us(USDHC_FORCE_CLOCK_US);
        self.clear_bits(USDHC_VEND_SPEC, USDHC_VEND_FRC_SDCLK_ON);

        // Lines come back high at 1.8V
        let mut timeout = Timeout::new(self.config.poll.dat_line, SdError::Busy);
        while !self.dat_lines_high() {
            timeout.tick()?;
        }

        info!("Switched to 1.8V signalling");
        Ok(())
    }

    fn enable_std_tuning(&self, start: u32, step: u32) {
        self.set_bits(USDHC_MIX_CTRL, USDHC_MIX_FBCLK_SEL);
        self.modify_reg(
            USDHC_TUNING_CTRL,
            USDHC_TUNING_START_TAP_MASK | USDHC_TUNING_STEP_MASK | USDHC_TUNING_STD_EN,
            ((start << USDHC_TUNING_START_TAP_SHIFT) & USDHC_TUNING_START_TAP_MASK)
                | ((step << USDHC_TUNING_STEP_SHIFT) & USDHC_TUNING_STEP_MASK)
                | USDHC_TUNING_STD_EN,
        );
        self.set_bits(
            USDHC_AUTOCMD12_ERR_STATUS,
            USDHC_AC12_EXECUTE_TUNING | USDHC_AC12_SMP_CLK_SEL,
        );
    }

    pub(crate) fn disable_std_tuning(&self) {
        self.clear_bits(USDHC_TUNING_CTRL, USDHC_TUNING_STD_EN);
        self.clear_bits(
            USDHC_AUTOCMD12_ERR_STATUS,
            USDHC_AC12_EXECUTE_TUNING | USDHC_AC12_SMP_CLK_SEL,
        );
    }

    // Load a delay cell setting, fails if the tap is out of range
    fn adjust_tuning_timing(&self, delay: u32) -> Result<(), SdError> {
        self.modify_reg(
            USDHC_CLK_TUNE_CTRL_STATUS,
            USDHC_CLKTUNE_DLY_CELL_SET_PRE_MASK,
            delay << USDHC_CLKTUNE_DLY_CELL_SET_PRE_SHIFT,
        );
        if self.tap_error() {
            return Err(SdError::TuningError);
        }
        Ok(())
    }

    fn tap_error(&self) -> bool {
        self.read_reg(USDHC_CLK_TUNE_CTRL_STATUS) & (USDHC_CLKTUNE_PRE_ERR | USDHC_CLKTUNE_NXT_ERR) != 0
    }

    /// Standard tuning for SDR50/SDR104.
    ///
    /// CMD19 is repeated until the controller drops EXECUTE_TUNING. A tap
    /// error restarts the sequence once from the start tap.
    pub fn execute_tuning(&mut self) -> Result<(), SdError> {
        let mut block = [0u8; SD_TUNING_BLOCK_SIZE as usize];
        let mut restarted = false;

        self.enable_std_tuning(USDHC_TUNING_START_TAP, USDHC_TUNING_STEP);

        let mut timeout = Timeout::new(self.config.poll.tuning_loops, SdError::TuningError);
        loop {
            timeout.tick()?;

            // Send tuning block
            let mut cmd = UsdhcCommand::new(SD_SEND_TUNING_BLOCK, 0, ResponseType::R1);
            let mut data = UsdhcData::read(SD_TUNING_BLOCK_SIZE, 1, &mut block)
                .with_kind(TransferKind::Tuning);
            self.xfer(&mut cmd, Some(&mut data))?;
            self.board.delay_us(USDHC_TUNING_DELAY_US);

            if self.read_reg(USDHC_AUTOCMD12_ERR_STATUS) & USDHC_AC12_EXECUTE_TUNING != 0 {
                continue;
            }

            // A tap error right after the first pass is a known glitch
            if self.tap_error() && !restarted {
                warn!("Tuning tap error, restarting from tap {}", USDHC_TUNING_START_TAP);
                restarted = true;
                self.enable_std_tuning(USDHC_TUNING_START_TAP, USDHC_TUNING_STEP);
                // The error flag is re-checked on the next pass
                let _ = self.adjust_tuning_timing(USDHC_TUNING_START_TAP);
            } else {
                break;
            }
        }

        // Wait for the sampling clock to settle
        self.board.delay_us(USDHC_TUNING_SETTLE_US);

        if self.read_reg(USDHC_AUTOCMD12_ERR_STATUS) & USDHC_AC12_SMP_CLK_SEL == 0 {
            return Err(SdError::TuningError);
        }

        // Re-tuning timer, the controller raises RTE when it expires
        self.modify_reg(USDHC_HOST_CTRL_CAP, USDHC_CAP_RETUNING_MASK, 0);

        debug!(
            "Tuning done, CLK_TUNE_CTRL_STATUS {:#x}",
            self.read_reg(USDHC_CLK_TUNE_CTRL_STATUS)
        );
        Ok(())
    }
}
