use log::{debug, info};

use crate::{constant::*, err::SdError};

use super::{
    aux::decode_be_words,
    block::UsdhcData,
    cmd::{ResponseType, UsdhcCommand},
    Board, RegisterPort, UsdhcHost,
};

// Words of the status block covering support bitmaps and active functions
const SWITCH_STATUS_WORDS: usize = 5;
const SWITCH_GROUPS: u32 = 6;
const SWITCH_FUNCTIONS: u32 = 16;

/// The part of the CMD6 status block that function selection looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwitchStatus {
    /// Supported-function bitmap per group, group 1 at index 0
    pub support: [u16; 6],
    /// Active function nibbles, group g at bits `4g..4g+4`
    pub current: u32,
}

impl SwitchStatus {
    /// Parse the status block, `words` are big-endian decoded.
    pub fn parse(words: &[u32; SWITCH_STATUS_WORDS]) -> Self {
        let mut support = [0u16; 6];
        support[5] = words[0] as u16;
        support[4] = (words[1] >> 16) as u16;
        support[3] = words[1] as u16;
        support[2] = (words[2] >> 16) as u16;
        support[1] = words[2] as u16;
        support[0] = (words[3] >> 16) as u16;

        Self {
            support,
            current: Self::parse_current(words),
        }
    }

    fn parse_current(words: &[u32; SWITCH_STATUS_WORDS]) -> u32 {
        ((words[3] & 0xFF) << 8) | (words[4] >> 24)
    }

    pub fn supports(&self, group: u32, function: u32) -> bool {
        group < SWITCH_GROUPS
            && function < SWITCH_FUNCTIONS
            && self.support[group as usize] & (1 << function) != 0
    }

    pub fn active(&self, group: u32) -> u32 {
        if group >= SWITCH_GROUPS {
            return 0;
        }
        (self.current >> (group * 4)) & 0xF
    }
}

// CMD6 argument with `group` set to `function`, all other groups unchanged
fn switch_arg(mode: u32, group: u32, function: u32) -> u32 {
    let mut arg = mode | SD_SWITCH_ARG_DEFAULT;
    arg &= !(0xF << (group * 4));
    arg | (function << (group * 4))
}

impl<P: RegisterPort, B: Board> UsdhcHost<P, B> {
    fn switch_function(&mut self, arg: u32) -> Result<SwitchStatus, SdError> {
        let mut raw = [0u8; SD_SWITCH_STATUS_BYTES];
        let mut cmd =
            UsdhcCommand::new(SD_SWITCH, arg, ResponseType::R1).with_err_flags(SD_R1_ALL_ERRORS);
        let mut data = UsdhcData::read(SD_SWITCH_STATUS_BYTES as u32, 1, &mut raw);
        self.xfer(&mut cmd, Some(&mut data))?;

        let mut words = [0u32; SWITCH_STATUS_WORDS];
        decode_be_words(&raw, self.config.endian, &mut words);
        Ok(SwitchStatus::parse(&words))
    }

    /// Switch `group` to `function` with CMD6.
    ///
    /// Returns `NotSupported` when the card is too old for CMD6 or does not
    /// list the function, `IoError` when the card ignores the switch.
    pub fn select_function(&mut self, group: u32, function: u32) -> Result<(), SdError> {
        if group >= SWITCH_GROUPS || function >= SWITCH_FUNCTIONS {
            return Err(SdError::InvalidArgument);
        }

        let card = self.card.as_ref().ok_or(SdError::NoCard)?;
        if card.version <= SD_SPEC_VERSION_1_0 || card.csd.ccc & SD_CCC_SWITCH == 0 {
            return Err(SdError::NotSupported);
        }

        // Check mode
        let status = self.switch_function(switch_arg(SD_SWITCH_MODE_CHECK, group, function))?;
        debug!("CMD6 group {} function {}: {:x?}", group, function, status);
        if !status.supports(group, function) {
            return Err(SdError::NotSupported);
        }

        // Set mode
        let status = self.switch_function(switch_arg(SD_SWITCH_MODE_SET, group, function))?;
        if status.active(group) != function {
            return Err(SdError::IoError);
        }

        info!("CMD6 group {} switched to function {}", group, function);
        Ok(())
    }
}
