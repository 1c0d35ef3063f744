use super::{Board, UsdhcHost};

/// 32-bit access to a USDHC register block.
///
/// Every controller register is 32 bits wide; offsets are relative to the
/// controller base.
pub trait RegisterPort {
    fn read(&self, offset: u32) -> u32;
    fn write(&self, offset: u32, value: u32);
}

impl<R: RegisterPort + ?Sized> RegisterPort for &R {
    fn read(&self, offset: u32) -> u32 {
        (**self).read(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        (**self).write(offset, value)
    }
}

/// Memory-mapped register block.
#[derive(Debug, Clone, Copy)]
pub struct MmioPort {
    base_addr: usize,
}

impl MmioPort {
    /// # Safety
    ///
    /// `base_addr` must point at a mapped USDHC register block that stays
    /// valid for the lifetime of the port.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }

    pub fn base_addr(&self) -> usize {
        self.base_addr
    }
}

impl RegisterPort for MmioPort {
    fn read(&self, offset: u32) -> u32 {
        unsafe { core::ptr::read_volatile((self.base_addr + offset as usize) as *const u32) }
    }

    fn write(&self, offset: u32, value: u32) {
        unsafe { core::ptr::write_volatile((self.base_addr + offset as usize) as *mut u32, value) }
    }
}

impl<P: RegisterPort, B: Board> UsdhcHost<P, B> {
    // Read a 32-bit register
    pub(crate) fn read_reg(&self, offset: u32) -> u32 {
        self.port.read(offset)
    }

    // Write a 32-bit register
    pub(crate) fn write_reg(&self, offset: u32, value: u32) {
        self.port.write(offset, value)
    }

    pub(crate) fn set_bits(&self, offset: u32, bits: u32) {
        let value = self.read_reg(offset);
        self.write_reg(offset, value | bits);
    }

    pub(crate) fn clear_bits(&self, offset: u32, bits: u32) {
        let value = self.read_reg(offset);
        self.write_reg(offset, value & !bits);
    }

    // Replace the bits selected by `mask` with `value`
    pub(crate) fn modify_reg(&self, offset: u32, mask: u32, value: u32) {
        let reg = self.read_reg(offset);
        self.write_reg(offset, (reg & !mask) | (value & mask));
    }
}
