//! Bus address space and ADMA2 engine of the simulated controller.
//!
//! DMA memory is mapped at made-up 32-bit bus addresses that never match
//! the CPU pointers, so anything programmed without translation misses.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dma_api::Direction;
use usdhc::usdhc::constant::*;

use super::{SimState, SIM_BOOT_ARG};

const PAGE: u64 = 0x1000;

struct Mapping {
    bus: u64,
    cpu: usize,
    size: usize,
}

static MAPPINGS: Mutex<Vec<Mapping>> = Mutex::new(Vec::new());
static NEXT_BUS: AtomicU64 = AtomicU64::new(0x1000_0000);

pub struct SimDma;

impl dma_api::Impl for SimDma {
    fn map(addr: NonNull<u8>, size: usize, _direction: Direction) -> u64 {
        let cpu = addr.as_ptr() as usize;
        // Keep the page offset so alignment survives translation
        let span = (size as u64).next_multiple_of(PAGE) + PAGE;
        let bus = NEXT_BUS.fetch_add(span, Ordering::SeqCst) | (cpu as u64 & (PAGE - 1));
        MAPPINGS.lock().unwrap().push(Mapping { bus, cpu, size });
        bus
    }

    fn unmap(addr: NonNull<u8>, _size: usize) {
        let cpu = addr.as_ptr() as usize;
        MAPPINGS.lock().unwrap().retain(|m| m.cpu != cpu);
    }

    fn flush(_addr: NonNull<u8>, _size: usize) {}

    fn invalidate(_addr: NonNull<u8>, _size: usize) {}
}

dma_api::set_impl!(SimDma);

/// CPU pointer behind `len` bytes at `bus`, if all of them are mapped.
pub fn bus_to_cpu(bus: u64, len: usize) -> Option<*mut u8> {
    let mappings = MAPPINGS.lock().unwrap();
    mappings
        .iter()
        .find(|m| bus >= m.bus && bus + len as u64 <= m.bus + m.size as u64)
        .map(|m| (m.cpu + (bus - m.bus) as usize) as *mut u8)
}

fn descriptor(bus: u64) -> Option<(u32, u32)> {
    let ptr = bus_to_cpu(bus, ADMA2_DESC_BYTES as usize)? as *const u32;
    unsafe { Some((ptr.read_volatile(), ptr.add(1).read_volatile())) }
}

impl SimState {
    pub(super) fn dma_enabled(&self) -> bool {
        self.reg(USDHC_MIX_CTRL) & USDHC_MIX_DMAEN != 0
    }

    // Run the chain at ADMA_SYS_ADDR up to END; false on a bad descriptor
    fn adma_walk(&self, mut segment: impl FnMut(*mut u8, usize)) -> bool {
        let mut bus = self.reg(USDHC_ADMA_SYS_ADDR) as u64;
        loop {
            let Some((attr, addr)) = descriptor(bus) else {
                return false;
            };
            if attr & ADMA2_VALID == 0 {
                return false;
            }
            if attr & ADMA2_ACT2 != 0 {
                let len = (attr >> ADMA2_LEN_SHIFT) as usize;
                let Some(ptr) = bus_to_cpu(addr as u64, len) else {
                    return false;
                };
                segment(ptr, len);
            }
            if attr & ADMA2_END != 0 {
                return true;
            }
            bus += ADMA2_DESC_BYTES;
        }
    }

    fn finish_dma(&mut self, ok: bool) {
        self.dma_xfers += 1;
        if ok {
            self.int_status |= USDHC_INT_TC | std::mem::take(&mut self.dma_error);
        } else {
            self.int_status |= USDHC_INT_DMAE;
        }
    }

    pub(super) fn adma_to_memory(&mut self, bytes: &[u8]) {
        let mut pos = 0;
        let ok = self.adma_walk(|dst, len| {
            let src = bytes.get(pos..).unwrap_or(&[]);
            let n = len.min(src.len());
            unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, n) };
            pos += len;
        });
        self.finish_dma(ok);
    }

    pub(super) fn adma_from_memory(&mut self, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let ok = self.adma_walk(|src, n| {
            out.extend_from_slice(unsafe { std::slice::from_raw_parts(src, n) });
        });
        self.finish_dma(ok);
        out.truncate(len);
        out
    }

    pub(super) fn boot_request(&mut self, arg: u32) {
        if arg == SIM_BOOT_ARG && self.dma_enabled() {
            self.boot_start();
        }
    }

    pub(super) fn continue_request(&mut self) {
        if self.boot_cursor != 0 {
            self.boot_continue();
        }
    }

    fn boot_start(&mut self) {
        self.boot_cursor = self.reg(USDHC_ADMA_SYS_ADDR) as u64;
        self.boot_pos = 0;
        self.boot_run();
    }

    // CREQ: the filler entry left at the gap takes the next word first
    fn boot_continue(&mut self) {
        if self.boot_step() {
            self.boot_run();
        } else {
            self.int_status |= USDHC_INT_DMAE;
        }
    }

    // Stream through data entries and stop in front of the block gap filler
    fn boot_run(&mut self) {
        while let Some((attr, _)) = descriptor(self.boot_cursor) {
            if attr & ADMA2_VALID == 0 || attr & ADMA2_INT == 0 {
                break;
            }
            if !self.boot_step() {
                self.int_status |= USDHC_INT_DMAE;
                return;
            }
        }
        self.dma_xfers += 1;
        self.int_status |= USDHC_INT_TC;
    }

    fn boot_step(&mut self) -> bool {
        let Some((attr, addr)) = descriptor(self.boot_cursor) else {
            return false;
        };
        if attr & ADMA2_VALID == 0 {
            return false;
        }
        if attr & ADMA2_ACT2 != 0 {
            let len = (attr >> ADMA2_LEN_SHIFT) as usize;
            let Some(dst) = bus_to_cpu(addr as u64, len) else {
                return false;
            };
            let src = self.opts.boot_image.get(self.boot_pos..).unwrap_or(&[]);
            let n = len.min(src.len());
            unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, n) };
            self.boot_pos += len;
        }
        self.boot_cursor += ADMA2_DESC_BYTES;
        true
    }
}
