//! Physical memory access and page arithmetic.
//!
//! The boot path runs identity-mapped, so "physical memory" is plain addresses. Everything
//! that touches memory outside Rust-owned buffers (the foreign loader's real-mode buffers,
//! the boot application's load address) goes through [`PhysMemory`] so the logic can be
//! driven against an ordinary vector in tests.

use core::slice;

use crate::error::MemoryError;

pub const PAGE_SIZE: u64 = 4096;

/// Index of the page containing `addr`.
#[inline]
pub const fn page_start(addr: u64) -> u64 {
    addr / PAGE_SIZE
}

/// Number of pages spanned by `[start, end)`, counted from the page containing `start`.
#[inline]
pub const fn page_len(start: u64, end: u64) -> u64 {
    let first = page_start(start) * PAGE_SIZE;
    (end - first).div_ceil(PAGE_SIZE)
}

#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Linear address of a real-mode `segment:offset` pair.
#[inline]
pub const fn real_ptr(segment: u16, offset: u16) -> u64 {
    ((segment as u64) << 4) + offset as u64
}

pub trait PhysMemory {
    fn region(&self, addr: u64, len: usize) -> Result<&[u8], MemoryError>;

    fn region_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], MemoryError>;

    fn read(&self, addr: u64, out: &mut [u8]) -> Result<(), MemoryError> {
        out.copy_from_slice(self.region(addr, out.len())?);
        Ok(())
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), MemoryError> {
        self.region_mut(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    fn fill(&mut self, addr: u64, len: usize, byte: u8) -> Result<(), MemoryError> {
        self.region_mut(addr, len)?.fill(byte);
        Ok(())
    }

    fn read_u16(&self, addr: u64) -> Result<u16, MemoryError> {
        let mut raw = [0u8; 2];
        self.read(addr, &mut raw)?;
        Ok(u16::from_le_bytes(raw))
    }

    fn write_u16(&mut self, addr: u64, value: u16) -> Result<(), MemoryError> {
        self.write(addr, &value.to_le_bytes())
    }
}

/// Identity-mapped physical memory below `limit`.
///
/// Only meaningful inside the firmware, where every address below `limit` is backed by RAM
/// the boot path is allowed to touch.
pub struct FlatPhysMemory {
    limit: u64,
}

impl FlatPhysMemory {
    /// # Safety
    ///
    /// Every address in `[0, limit)` must be mapped, writable, and not aliased by live Rust
    /// references for as long as the returned value is used.
    pub unsafe fn new(limit: u64) -> Self {
        Self { limit }
    }

    fn check(&self, addr: u64, len: usize) -> Result<(), MemoryError> {
        let end = addr.checked_add(len as u64);
        match end {
            Some(end) if end <= self.limit && addr != 0 => Ok(()),
            _ => Err(MemoryError::OutOfRange {
                addr,
                len: len as u64,
            }),
        }
    }
}

impl PhysMemory for FlatPhysMemory {
    fn region(&self, addr: u64, len: usize) -> Result<&[u8], MemoryError> {
        self.check(addr, len)?;
        // SAFETY: range checked against the window promised by `new`.
        Ok(unsafe { slice::from_raw_parts(addr as usize as *const u8, len) })
    }

    fn region_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], MemoryError> {
        self.check(addr, len)?;
        // SAFETY: as above; `&mut self` keeps the slice unique among our own accessors.
        Ok(unsafe { slice::from_raw_parts_mut(addr as usize as *mut u8, len) })
    }
}
