use crate::err::SdError;

use super::config::EndianMode;

/// Iteration-bounded busy wait.
///
/// Each `tick` consumes one poll; once the budget is exhausted the
/// configured error is returned.
pub(crate) struct Timeout {
    remaining: u32,
    err: SdError,
}

impl Timeout {
    pub(crate) fn new(limit: u32, err: SdError) -> Self {
        Self { remaining: limit, err }
    }

    pub(crate) fn tick(&mut self) -> Result<(), SdError> {
        if self.remaining == 0 {
            return Err(self.err);
        }
        self.remaining -= 1;
        Ok(())
    }
}

// Swap the bytes inside each half-word
const fn rev16(x: u32) -> u32 {
    ((x & 0xFF00_FF00) >> 8) | ((x & 0x00FF_00FF) << 8)
}

/// Turn a card structure read through the data port into host words.
///
/// SD registers and status blocks are sent MSB first. Depending on the
/// controller endian mode the bytes land in the buffer in a different
/// order; this returns words whose most significant byte is the first byte
/// the card sent.
pub fn decode_be_words(bytes: &[u8], mode: EndianMode, out: &mut [u32]) {
    for (word, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        *word = match mode {
            EndianMode::Little => raw.swap_bytes(),
            EndianMode::Big => raw,
            EndianMode::HalfWordBig => rev16(raw),
        };
    }
}
