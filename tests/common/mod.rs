#![allow(dead_code)]

use vdisk_boot::{MemoryError, PhysMemory};

/// A window of "physical" memory starting at `base`, backed by a vector.
pub struct TestMemory {
    pub base: u64,
    pub bytes: Vec<u8>,
}

impl TestMemory {
    pub fn new(base: u64, len: usize) -> Self {
        Self {
            base,
            bytes: vec![0; len],
        }
    }

    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let err = MemoryError::OutOfRange {
            addr,
            len: len as u64,
        };
        let start = addr.checked_sub(self.base).ok_or(err)? as usize;
        let end = start.checked_add(len).ok_or(err)?;
        if end > self.bytes.len() {
            return Err(err);
        }
        Ok(start..end)
    }
}

impl PhysMemory for TestMemory {
    fn region(&self, addr: u64, len: usize) -> Result<&[u8], MemoryError> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    fn region_mut(&mut self, addr: u64, len: usize) -> Result<&mut [u8], MemoryError> {
        let range = self.range(addr, len)?;
        Ok(&mut self.bytes[range])
    }
}

pub const PE_OFFSET: usize = 0x80;
pub const HEADERS_LEN: u32 = 0x200;
pub const TEXT_RVA: u32 = 0x1000;
pub const TEXT_LEN: u32 = 0x200;
pub const TEXT_FILL: u8 = 0xcc;

/// Minimal PE32 image: headers plus one `.text` section filled with [`TEXT_FILL`].
pub struct Pe32 {
    pub machine: u16,
    pub characteristics: u16,
    pub image_base: u32,
    pub entry_rva: u32,
    pub size_of_image: u32,
    pub text_raw_offset: u32,
}

impl Default for Pe32 {
    fn default() -> Self {
        Self {
            machine: 0x014c,
            characteristics: 0x0102,
            image_base: 0x0010_0000,
            entry_rva: TEXT_RVA,
            size_of_image: 0x2000,
            text_raw_offset: HEADERS_LEN,
        }
    }
}

fn put16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

impl Pe32 {
    pub fn build(&self) -> Vec<u8> {
        let mut img = vec![0u8; (HEADERS_LEN + TEXT_LEN) as usize];
        img[0..2].copy_from_slice(b"MZ");
        put32(&mut img, 0x3c, PE_OFFSET as u32);
        img[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

        let coff = PE_OFFSET + 4;
        put16(&mut img, coff, self.machine);
        put16(&mut img, coff + 2, 1);
        put16(&mut img, coff + 16, 0xe0);
        put16(&mut img, coff + 18, self.characteristics);

        let opt = coff + 20;
        put16(&mut img, opt, 0x010b);
        put32(&mut img, opt + 4, TEXT_LEN);
        put32(&mut img, opt + 16, self.entry_rva);
        put32(&mut img, opt + 20, TEXT_RVA);
        put32(&mut img, opt + 28, self.image_base);
        put32(&mut img, opt + 32, 0x1000);
        put32(&mut img, opt + 36, 0x200);
        put16(&mut img, opt + 40, 6);
        put16(&mut img, opt + 48, 6);
        put32(&mut img, opt + 56, self.size_of_image);
        put32(&mut img, opt + 60, HEADERS_LEN);
        put16(&mut img, opt + 68, 10);
        put32(&mut img, opt + 92, 16);

        let section = opt + 0xe0;
        img[section..section + 5].copy_from_slice(b".text");
        put32(&mut img, section + 8, TEXT_LEN);
        put32(&mut img, section + 12, TEXT_RVA);
        put32(&mut img, section + 16, TEXT_LEN);
        put32(&mut img, section + 20, self.text_raw_offset);
        put32(&mut img, section + 36, 0x6000_0020);

        img[HEADERS_LEN as usize..].fill(TEXT_FILL);
        img
    }
}
