use log::debug;

use crate::{constant::*, err::SdError};

use super::{aux::Timeout, block::UsdhcData, constant::*, Board, RegisterPort, UsdhcHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    None,
    R1,
    R1b,
    R2,
    R3,
    R4,
    R5,
    R5b,
    R6,
    R7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Normal = 0,
    Suspend = 1,
    Resume = 2,
    Abort = 3,
    /// Nothing is put on the bus; only the command-done interrupt is masked.
    Empty = 4,
}

#[derive(Debug, Clone)]
pub struct UsdhcCommand {
    pub index: u32,
    pub argument: u32,
    pub cmd_type: CommandType,
    pub resp_type: ResponseType,
    pub response: [u32; 4],
    /// Card status bits that turn a completed R1/R1b/R5/R6 command into an error
    pub rsp_err_flags: u32,
    /// Extra CMD_XFR_TYP bits (data present)
    pub flags: u32,
}

impl UsdhcCommand {
    pub fn new(index: u32, argument: u32, resp_type: ResponseType) -> Self {
        Self {
            index,
            argument,
            cmd_type: CommandType::Normal,
            resp_type,
            response: [0; 4],
            rsp_err_flags: 0,
            flags: 0,
        }
    }

    pub fn with_err_flags(mut self, flags: u32) -> Self {
        self.rsp_err_flags = flags;
        self
    }

    pub fn with_type(mut self, cmd_type: CommandType) -> Self {
        self.cmd_type = cmd_type;
        self
    }

    pub fn as_r1(&self) -> u32 {
        self.response[0]
    }

    pub fn as_r2(&self) -> [u32; 4] {
        self.response
    }

    pub fn as_r3(&self) -> u32 {
        self.response[0]
    }

    pub fn as_r6(&self) -> u32 {
        self.response[0]
    }

    pub fn as_r7(&self) -> u32 {
        self.response[0]
    }
}

/// CMD_XFR_TYP response length and check bits for a response type.
pub fn response_flags(resp_type: ResponseType) -> u32 {
    match resp_type {
        ResponseType::None => 0,
        ResponseType::R1 | ResponseType::R5 | ResponseType::R6 | ResponseType::R7 => {
            USDHC_XFR_RSPTYP_48 | USDHC_XFR_CCCEN | USDHC_XFR_CICEN
        }
        ResponseType::R1b | ResponseType::R5b => {
            USDHC_XFR_RSPTYP_48_BUSY | USDHC_XFR_CCCEN | USDHC_XFR_CICEN
        }
        ResponseType::R2 => USDHC_XFR_RSPTYP_136 | USDHC_XFR_CCCEN,
        ResponseType::R3 | ResponseType::R4 => USDHC_XFR_RSPTYP_48,
    }
}

/// Rebuild the 128-bit R2 payload from CMD_RSP0..3.
///
/// The controller strips the CRC7/end-bit byte, leaving every word one byte
/// short; shifting each word up and pulling in the top byte of the word
/// below restores the CID/CSD layout with raw[3] as the most significant
/// word.
pub fn decode_r2(raw: &mut [u32; 4]) {
    for i in (1..=4).rev() {
        raw[i - 1] <<= 8;
        if i > 1 {
            raw[i - 1] |= (raw[i - 2] & 0xFF00_0000) >> 24;
        }
    }
}

// Name of the most significant error bit in an R1 status
fn r1_error_name(status: u32) -> &'static str {
    const NAMES: [(u32, &str); 16] = [
        (SD_R1_OUT_OF_RANGE, "out of range"),
        (SD_R1_ADDRESS_ERROR, "address error"),
        (SD_R1_BLOCK_LEN_ERROR, "block length error"),
        (SD_R1_ERASE_SEQ_ERROR, "erase sequence error"),
        (SD_R1_ERASE_PARAM, "erase parameter error"),
        (SD_R1_WP_VIOLATION, "write protect violation"),
        (SD_R1_LOCK_UNLOCK_FAILED, "lock/unlock failed"),
        (SD_R1_COM_CRC_ERROR, "command CRC error"),
        (SD_R1_ILLEGAL_COMMAND, "illegal command"),
        (SD_R1_CARD_ECC_FAILED, "card ECC failed"),
        (SD_R1_CC_ERROR, "card controller error"),
        (SD_R1_ERROR, "general error"),
        (SD_R1_CSD_OVERWRITE, "CSD overwrite"),
        (SD_R1_WP_ERASE_SKIP, "write protect erase skip"),
        (SD_R1_ERASE_RESET, "erase reset"),
        (SD_R1_AKE_SEQ_ERROR, "authentication sequence error"),
    ];
    NAMES
        .iter()
        .find(|(bit, _)| status & bit != 0)
        .map(|(_, name)| *name)
        .unwrap_or("card status error")
}

// Map command-phase INT_STATUS error bits
pub(crate) fn command_error(int_status: u32) -> SdError {
    if int_status & USDHC_INT_TNE != 0 {
        SdError::TuningError
    } else if int_status & USDHC_INT_CTOE != 0 {
        SdError::Timeout
    } else if int_status & USDHC_INT_CCE != 0 {
        SdError::Crc
    } else if int_status & USDHC_INT_CEBE != 0 {
        SdError::EndBit
    } else if int_status & USDHC_INT_CIE != 0 {
        SdError::Index
    } else {
        SdError::CommandError
    }
}

impl<P: RegisterPort, B: Board> UsdhcHost<P, B> {
    // Spin until one of `mask` shows up in INT_STATUS
    pub(crate) fn wait_int_status(&self, mask: u32, limit: u32, err: SdError) -> Result<u32, SdError> {
        let mut timeout = Timeout::new(limit, err);
        loop {
            let int_status = self.read_reg(USDHC_INT_STATUS);
            if int_status & mask != 0 {
                return Ok(int_status);
            }
            timeout.tick()?;
        }
    }

    // Issue a command to the card
    pub(crate) fn send_command(&self, cmd: &UsdhcCommand) -> Result<(), SdError> {
        if cmd.cmd_type == CommandType::Empty {
            // Nothing goes on the bus, just stop the command-done interrupt
            self.clear_bits(USDHC_INT_SIGNAL_EN, USDHC_INT_CC);
            return Ok(());
        }

        // Check if the command line is busy
        let mut timeout = Timeout::new(self.config.poll.cmd_inhibit, SdError::Busy);
        while self.read_reg(USDHC_PRES_STATE) & USDHC_PRES_CIHB != 0 {
            timeout.tick()?;
        }

        // Drop completion and error flags left over from the previous transaction
        self.write_reg(
            USDHC_INT_STATUS,
            USDHC_INT_CC
                | USDHC_INT_CMD_ERR
                | USDHC_INT_DATA_FLAGS
                | USDHC_INT_DATA_ERR
                | USDHC_INT_TNE
                | USDHC_INT_TP
                | USDHC_INT_DMAE,
        );

        let flags = response_flags(cmd.resp_type)
            | cmd.flags
            | (((cmd.cmd_type as u32) << USDHC_XFR_CMDTYP_SHIFT) & USDHC_XFR_CMDTYP_MASK);
        let xfer_type = ((cmd.index << USDHC_XFR_CMDINX_SHIFT) & USDHC_XFR_CMDINX_MASK)
            | (flags
                & (USDHC_XFR_CMDTYP_MASK
                    | USDHC_XFR_CICEN
                    | USDHC_XFR_CCCEN
                    | USDHC_XFR_RSPTYP_MASK
                    | USDHC_XFR_DPSEL));

        debug!(
            "CMD{} arg={:#x} resp={:?} xfr_typ={:#x}",
            cmd.index, cmd.argument, cmd.resp_type, xfer_type
        );

        self.write_reg(USDHC_CMD_ARG, cmd.argument);
        self.write_reg(USDHC_CMD_XFR_TYP, xfer_type);
        Ok(())
    }

    // Wait for command complete and collect the response
    pub(crate) fn wait_command_done(&self, cmd: &mut UsdhcCommand) -> Result<(), SdError> {
        let int_status = self.wait_int_status(
            USDHC_INT_CC | USDHC_INT_CMD_ERR,
            self.config.poll.cmd_done,
            SdError::Timeout,
        )?;

        self.write_reg(
            USDHC_INT_STATUS,
            USDHC_INT_CC | USDHC_INT_CMD_ERR | USDHC_INT_TNE,
        );

        if int_status & (USDHC_INT_CMD_ERR | USDHC_INT_TNE) != 0 {
            let err = command_error(int_status);
            debug!("CMD{} failed: {} (int_status {:#x})", cmd.index, err, int_status);
            return Err(err);
        }

        self.read_response(cmd)
    }

    fn read_response(&self, cmd: &mut UsdhcCommand) -> Result<(), SdError> {
        if cmd.resp_type != ResponseType::None {
            cmd.response[0] = self.read_reg(USDHC_CMD_RSP0);
            if cmd.resp_type == ResponseType::R2 {
                cmd.response[1] = self.read_reg(USDHC_CMD_RSP1);
                cmd.response[2] = self.read_reg(USDHC_CMD_RSP2);
                cmd.response[3] = self.read_reg(USDHC_CMD_RSP3);
                decode_r2(&mut cmd.response);
            }
            debug!("CMD{} response {:x?}", cmd.index, cmd.response);
        }

        // Check the card status bits
        let checked = matches!(
            cmd.resp_type,
            ResponseType::R1 | ResponseType::R1b | ResponseType::R6 | ResponseType::R5
        );
        if checked && cmd.rsp_err_flags & cmd.response[0] != 0 {
            let status = cmd.response[0] & cmd.rsp_err_flags;
            return Err(SdError::CardError(status, r1_error_name(status)));
        }

        Ok(())
    }

    /// Send one command without a data phase.
    pub fn command(&mut self, cmd: &mut UsdhcCommand) -> Result<(), SdError> {
        self.xfer(cmd, None)
    }

    /// CMD55 followed by an application command. A failure of either one
    /// restarts the pair while the shared retry budget lasts; a re-tuning
    /// request ends the attempt at once.
    pub fn app_command(
        &mut self,
        retry: u32,
        rca_arg: u32,
        cmd: &mut UsdhcCommand,
        mut data: Option<&mut UsdhcData<'_>>,
    ) -> Result<(), SdError> {
        let mut retry = retry;
        loop {
            let mut app = UsdhcCommand::new(SD_APP_CMD, rca_arg, ResponseType::R1);
            let result = self.xfer(&mut app, None);
            retry = retry.saturating_sub(1);
            match result {
                Err(e) if retry > 0 && !e.is_retryable() => continue,
                Err(e) => return Err(e),
                Ok(()) => {}
            }

            match self.xfer(cmd, data.as_deref_mut()) {
                Err(e) if retry > 0 && !e.is_retryable() => continue,
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r2_reassembly_shifts_in_lower_bytes() {
        let mut raw = [0x1122_3344, 0x5566_7788, 0x99AA_BBCC, 0x00DD_EEFF];
        decode_r2(&mut raw);
        assert_eq!(raw, [0x2233_4400, 0x6677_8811, 0xAABB_CC55, 0xDDEE_FF99]);
    }

    #[test]
    fn r2_reassembly_restores_register_layout() {
        // CSD v2.0 image as the controller leaves it in CMD_RSP0..3
        let mut raw = [0x8012_3456, 0x003B_377F, 0x325B_5900, 0x0040_0E00];
        decode_r2(&mut raw);
        assert_eq!(raw, [0x1234_5600, 0x3B37_7F80, 0x5B59_0000, 0x400E_0032]);
        assert_eq!(raw[3] >> 30, 1);
    }

    #[test]
    fn response_flags_per_type() {
        assert_eq!(response_flags(ResponseType::None), 0);
        assert_eq!(
            response_flags(ResponseType::R1),
            USDHC_XFR_RSPTYP_48 | USDHC_XFR_CCCEN | USDHC_XFR_CICEN
        );
        assert_eq!(response_flags(ResponseType::R7), response_flags(ResponseType::R6));
        assert_eq!(
            response_flags(ResponseType::R1b),
            USDHC_XFR_RSPTYP_48_BUSY | USDHC_XFR_CCCEN | USDHC_XFR_CICEN
        );
        assert_eq!(response_flags(ResponseType::R5b), response_flags(ResponseType::R1b));
        assert_eq!(response_flags(ResponseType::R2), USDHC_XFR_RSPTYP_136 | USDHC_XFR_CCCEN);
        assert_eq!(response_flags(ResponseType::R3), USDHC_XFR_RSPTYP_48);
        assert_eq!(response_flags(ResponseType::R4), USDHC_XFR_RSPTYP_48);
    }

    #[test]
    fn error_names_pick_highest_bit() {
        assert_eq!(r1_error_name(SD_R1_ADDRESS_ERROR | SD_R1_ERROR), "address error");
        assert_eq!(r1_error_name(SD_R1_ILLEGAL_COMMAND), "illegal command");
        assert_eq!(r1_error_name(1), "card status error");
    }

    #[test]
    fn command_error_mapping() {
        assert_eq!(command_error(USDHC_INT_CTOE), SdError::Timeout);
        assert_eq!(command_error(USDHC_INT_CCE), SdError::Crc);
        assert_eq!(command_error(USDHC_INT_CEBE), SdError::EndBit);
        assert_eq!(command_error(USDHC_INT_CIE), SdError::Index);
        assert_eq!(command_error(USDHC_INT_TNE | USDHC_INT_CTOE), SdError::TuningError);
    }
}
