#[cfg(feature = "dma")]
use alloc::{vec, vec::Vec};

#[cfg(feature = "dma")]
use dma_api::{DVec, Direction};
#[cfg(feature = "dma")]
use log::debug;

#[cfg(feature = "dma")]
use crate::err::SdError;

use super::constant::*;
#[cfg(feature = "dma")]
use super::{Board, RegisterPort, UsdhcHost};

/// Controller DMA engine selection (PROT_CTRL DMASEL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaMode {
    Simple = 0,
    Adma1 = 1,
    Adma2 = 2,
    External = 3,
}

/// PROT_CTRL BURST_LEN_EN encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstLen {
    Incr = 1,
    Incr4816 = 2,
    Incr4816Wrap = 4,
}

/// How a new chain is placed in the descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmaAppend {
    /// Rebuild from the first entry and terminate with END.
    Single,
    /// Append after the entries already handed to the engine and leave the
    /// chain open, so a running boot stream continues past the block gap.
    Multi,
}

/// Ownership of one descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Never written since the last reset; the engine has not seen it.
    Free,
    /// Written and handed to the engine.
    Pending,
    /// The engine finished with it.
    Consumed,
}

/// One 64-bit ADMA2 descriptor as the controller reads it from memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Adma2Descriptor {
    pub attribute: u32,
    pub address: u32,
}

impl Adma2Descriptor {
    pub fn length(&self) -> u32 {
        self.attribute >> ADMA2_LEN_SHIFT
    }

    pub fn is_valid(&self) -> bool {
        self.attribute & ADMA2_VALID != 0
    }

    pub fn is_end(&self) -> bool {
        self.attribute & ADMA2_END != 0
    }
}

/// Descriptor table in DMA memory plus the per-entry bookkeeping the CPU
/// keeps beside it.
///
/// Descriptors and data addresses are bus addresses; the controller only
/// has a 32-bit address bus.
#[cfg(feature = "dma")]
pub struct AdmaTable {
    // Two words per descriptor: attribute, then address
    desc: DVec<u32>,
    state: Vec<EntryState>,
    // ADMA cannot describe a zero-length transfer; such chains and the
    // boot stream filler point here instead.
    boot_dummy: DVec<u32>,
}

#[cfg(feature = "dma")]
impl AdmaTable {
    /// `words` is the table size in 32-bit words, two per descriptor.
    pub fn new(words: usize) -> Result<Self, SdError> {
        let count = words / 2;
        if count == 0 {
            return Err(SdError::InvalidArgument);
        }
        let desc = DVec::zeros(count * 2, USDHC_DMA_ALIGN, Direction::ToDevice)
            .ok_or(SdError::MemoryError)?;
        let boot_dummy = DVec::zeros(1, USDHC_DMA_ALIGN, Direction::FromDevice)
            .ok_or(SdError::MemoryError)?;

        Ok(Self {
            desc,
            state: vec![EntryState::Free; count],
            boot_dummy,
        })
    }

    pub fn capacity(&self) -> usize {
        self.state.len()
    }

    pub fn entry(&self, index: usize) -> Option<Adma2Descriptor> {
        if index >= self.capacity() {
            return None;
        }
        Some(Adma2Descriptor {
            attribute: self.desc[index * 2],
            address: self.desc[index * 2 + 1],
        })
    }

    pub fn state(&self, index: usize) -> Option<EntryState> {
        self.state.get(index).copied()
    }

    /// Bus address of the first descriptor.
    pub fn bus_addr(&self) -> u64 {
        self.desc.bus_addr() as u64
    }

    pub fn boot_dummy_bus_addr(&self) -> u64 {
        self.boot_dummy.bus_addr() as u64
    }

    /// Filler word the engine stored while crossing a boot block gap.
    pub fn boot_dummy(&self) -> u32 {
        self.boot_dummy.get(0).unwrap_or(0)
    }

    fn write_entry(&mut self, index: usize, entry: Adma2Descriptor) {
        self.desc.set(index * 2, entry.attribute);
        self.desc.set(index * 2 + 1, entry.address);
    }

    pub fn reset(&mut self) {
        for i in 0..self.capacity() {
            self.write_entry(i, Adma2Descriptor::default());
        }
        self.state.fill(EntryState::Free);
    }

    /// Mark every pending entry as finished once the engine reports done.
    pub fn retire(&mut self) {
        for state in self.state.iter_mut() {
            if *state == EntryState::Pending {
                *state = EntryState::Consumed;
            }
        }
    }

    /// Describe `len` bytes at bus address `addr`, returning the index of
    /// the first descriptor of the new chain.
    pub fn build(&mut self, addr: u64, len: usize, append: AdmaAppend) -> Result<usize, SdError> {
        if addr % 4 != 0 {
            return Err(SdError::AlignmentError);
        }

        let mut remaining = len.next_multiple_of(4);
        let end = addr.checked_add(remaining as u64);
        if end.is_none_or(|end| end > u32::MAX as u64 + 1) {
            return Err(SdError::InvalidArgument);
        }

        let per_entry = ADMA2_MAX_LEN as usize;
        let mut needed = remaining.div_ceil(per_entry).max(1);

        let start = match append {
            AdmaAppend::Single => 0,
            AdmaAppend::Multi => {
                needed += 1;
                self.state
                    .iter()
                    .position(|s| *s == EntryState::Free)
                    .unwrap_or(self.capacity())
            }
        };

        if start + needed > self.capacity() {
            return Err(SdError::InsufficientDescriptors);
        }

        if append == AdmaAppend::Single {
            self.reset();
        }

        let dummy = self.boot_dummy_bus_addr() as u32;
        let mut cursor = addr as u32;
        let data_entries = if append == AdmaAppend::Multi { needed - 1 } else { needed };
        let mut last = start;

        for i in start..start + data_entries {
            let mut entry = if remaining == 0 {
                Adma2Descriptor {
                    attribute: (4 << ADMA2_LEN_SHIFT) | ADMA2_VALID,
                    address: dummy,
                }
            } else {
                let chunk = remaining.min(per_entry);
                let entry = Adma2Descriptor {
                    attribute: ((chunk as u32) << ADMA2_LEN_SHIFT) | ADMA2_XFER | ADMA2_INT,
                    address: cursor,
                };
                cursor = cursor.wrapping_add(chunk as u32);
                remaining -= chunk;
                entry
            };
            if append == AdmaAppend::Single && i == start + data_entries - 1 {
                entry.attribute |= ADMA2_END;
            }
            self.write_entry(i, entry);
            self.state[i] = EntryState::Pending;
            last = i;
        }

        if append == AdmaAppend::Multi {
            let i = last + 1;
            self.write_entry(
                i,
                Adma2Descriptor {
                    attribute: (4 << ADMA2_LEN_SHIFT) | ADMA2_XFER,
                    address: dummy,
                },
            );
            self.state[i] = EntryState::Pending;
        }

        debug!("ADMA2 chain: {} entries from {} ({:?})", needed, start, append);
        Ok(start)
    }
}

/// DMA settings fixed at controller construction.
pub struct AdmaConfig {
    pub dma_mode: DmaMode,
    pub burst_len: BurstLen,
    #[cfg(feature = "dma")]
    pub table: AdmaTable,
}

#[cfg(feature = "dma")]
impl<P: RegisterPort, B: Board> UsdhcHost<P, B> {
    /// Prepare the DMA engine for a data phase at bus address `addr`.
    pub(crate) fn adma_table_cfg(
        &mut self,
        addr: u64,
        len: usize,
        append: AdmaAppend,
        cmd23: bool,
        update_engine: bool,
    ) -> Result<(), SdError> {
        let engine_addr = match self.adma.dma_mode {
            DmaMode::Simple => addr,
            DmaMode::Adma2 => {
                let start = self.adma.table.build(addr, len, append)?;
                self.adma.table.bus_addr() + start as u64 * ADMA2_DESC_BYTES
            }
            DmaMode::Adma1 | DmaMode::External => return Err(SdError::NotSupported),
        };

        // A continuous boot stream only appends descriptors
        if update_engine {
            self.internal_dma_cfg(engine_addr, cmd23)?;
        }
        Ok(())
    }

    fn internal_dma_cfg(&self, addr: u64, cmd23: bool) -> Result<(), SdError> {
        if addr % 4 != 0 {
            return Err(SdError::AlignmentError);
        }
        let addr = u32::try_from(addr).map_err(|_| SdError::InvalidArgument)?;

        if self.adma.dma_mode == DmaMode::Simple {
            // With auto CMD23 the block count owns DS_ADDR
            if cmd23 {
                self.write_reg(USDHC_ADMA_SYS_ADDR, addr);
            } else {
                self.write_reg(USDHC_DS_ADDR, addr);
            }
        } else {
            self.write_reg(USDHC_DS_ADDR, 0);
            self.write_reg(USDHC_ADMA_SYS_ADDR, addr);
        }

        self.modify_reg(
            USDHC_PROT_CTRL,
            USDHC_PROT_DMASEL_MASK | USDHC_PROT_BURST_LEN_EN_MASK,
            ((self.adma.dma_mode as u32) << USDHC_PROT_DMASEL_SHIFT)
                | ((self.adma.burst_len as u32) << USDHC_PROT_BURST_LEN_EN_SHIFT),
        );
        self.set_bits(USDHC_MIX_CTRL, USDHC_MIX_DMAEN);
        Ok(())
    }
}
