//! Block I/O emulation over a [`VirtualDisk`].
//!
//! The request semantics follow the firmware Block I/O contract. Validation is split in two
//! tiers: identity, alignment and bounds are checked the same way for every disk kind so a
//! malformed request always yields the same status, and only then is the request handed to
//! the backing. Synthesized-filesystem disks skip the first tier entirely because they do
//! not describe a fixed byte range.
//!
//! [`EfiBlockIo`] wraps a disk in the binary protocol layout that firmware drivers and
//! loaders consume.

use alloc::boxed::Box;
use core::ffi::c_void;
use core::{ptr, slice};

use r_efi::efi::{Boolean, Status};
use r_efi::protocols::block_io;

use crate::backing;
use crate::error::BlockIoError;
use crate::vdisk::{DiskKind, Media, VirtualDisk};

pub type BlockIoResult = Result<(), BlockIoError>;

impl Media {
    /// Tier-one validation shared by reads and writes. Returns the byte offset of `lba`.
    pub fn check_request(&self, media_id: u32, lba: u64, len: usize) -> Result<u64, BlockIoError> {
        if media_id != self.media_id {
            return Err(BlockIoError::MediaChanged);
        }
        let block_size = self.block_size as u64;
        let len = len as u64;
        if len % block_size != 0 {
            return Err(BlockIoError::BadBufferSize);
        }
        if lba > self.last_block {
            return Err(BlockIoError::InvalidParameter);
        }
        let block_count = len / block_size;
        match lba.checked_add(block_count.saturating_sub(1)) {
            Some(end) if end <= self.last_block => lba
                .checked_mul(block_size)
                .ok_or(BlockIoError::InvalidParameter),
            _ => Err(BlockIoError::InvalidParameter),
        }
    }
}

impl VirtualDisk<'_> {
    /// Stateless; always succeeds.
    pub fn reset(&mut self, _extended: bool) -> BlockIoResult {
        Ok(())
    }

    pub fn read_blocks(&mut self, media_id: u32, lba: u64, buf: Option<&mut [u8]>) -> BlockIoResult {
        let buf = buf.ok_or(BlockIoError::InvalidParameter)?;
        if buf.is_empty() {
            return Ok(());
        }

        let block_size = self.media.block_size as u64;
        if let DiskKind::SynthesizedFilesystem { fs, logical_offset } = &mut self.kind {
            fs.read(
                lba.wrapping_add(*logical_offset),
                buf.len() as u64 / block_size,
                buf,
            );
            return Ok(());
        }

        let offset = self.media.check_request(media_id, lba, buf.len())?;
        ::log::trace!(target: "blockio", "read lba={lba} len={}", buf.len());
        match &mut self.kind {
            DiskKind::MemoryBacked { image } => {
                // In bounds: the image covers the whole geometry (checked at creation).
                let start = offset as usize;
                buf.copy_from_slice(&image[start..start + buf.len()]);
            }
            DiskKind::FileBacked {
                source,
                base_offset,
            } => backing::read(source, buf, *base_offset + offset)?,
            // Served before validation.
            DiskKind::SynthesizedFilesystem { .. } => {}
        }
        Ok(())
    }

    pub fn write_blocks(&mut self, media_id: u32, lba: u64, buf: Option<&[u8]>) -> BlockIoResult {
        let buf = buf.ok_or(BlockIoError::InvalidParameter)?;
        if buf.is_empty() {
            return Ok(());
        }
        if self.media.read_only || matches!(self.kind, DiskKind::SynthesizedFilesystem { .. }) {
            return Err(BlockIoError::WriteProtected);
        }

        let offset = self.media.check_request(media_id, lba, buf.len())?;
        ::log::trace!(target: "blockio", "write lba={lba} len={}", buf.len());
        match &mut self.kind {
            DiskKind::MemoryBacked { image } => {
                let start = offset as usize;
                image[start..start + buf.len()].copy_from_slice(buf);
                Ok(())
            }
            _ => Err(BlockIoError::WriteProtected),
        }
    }

    /// Nothing is cached; always succeeds.
    pub fn flush(&mut self) -> BlockIoResult {
        Ok(())
    }
}

impl Media {
    /// Snapshot in the firmware `EFI_BLOCK_IO_MEDIA` layout.
    pub fn to_efi(&self) -> block_io::Media {
        block_io::Media {
            media_id: self.media_id,
            removable_media: false,
            media_present: true,
            logical_partition: false,
            read_only: self.read_only,
            write_caching: false,
            block_size: self.block_size,
            io_align: 0,
            last_block: self.last_block,
            lowest_aligned_lba: 0,
            logical_blocks_per_physical_block: 1,
            optimal_transfer_length_granularity: 0,
        }
    }
}

/// A virtual disk published as a firmware Block I/O protocol instance.
///
/// The protocol header is the first field so the interface pointer handed to firmware is
/// also a pointer to the whole instance.
#[repr(C)]
pub struct EfiBlockIo {
    protocol: block_io::Protocol,
    media: block_io::Media,
    disk: VirtualDisk<'static>,
}

impl EfiBlockIo {
    pub const GUID: r_efi::efi::Guid = block_io::PROTOCOL_GUID;

    pub fn new(disk: VirtualDisk<'static>) -> Box<Self> {
        Box::new(Self {
            protocol: block_io::Protocol {
                revision: block_io::REVISION,
                media: ptr::null(),
                reset: efi_reset,
                read_blocks: efi_read_blocks,
                write_blocks: efi_write_blocks,
                flush_blocks: efi_flush_blocks,
            },
            media: disk.media().to_efi(),
            disk,
        })
    }

    /// Hand the instance over to firmware. It is never freed; every later access goes
    /// through the returned pointer.
    pub fn into_protocol(self: Box<Self>) -> *mut block_io::Protocol {
        let raw = Box::into_raw(self);
        // SAFETY: `raw` is the allocation just released from the box.
        unsafe { (*raw).protocol.media = ptr::addr_of!((*raw).media) };
        raw.cast()
    }

    pub fn into_interface(self: Box<Self>) -> *mut c_void {
        self.into_protocol().cast()
    }

    pub fn disk(&self) -> &VirtualDisk<'static> {
        &self.disk
    }

    /// # Safety
    ///
    /// `this` must be null or a pointer returned by [`EfiBlockIo::into_protocol`].
    unsafe fn from_protocol<'p>(this: *mut block_io::Protocol) -> Option<&'p mut EfiBlockIo> {
        this.cast::<EfiBlockIo>().as_mut()
    }
}

fn status(result: BlockIoResult) -> Status {
    match result {
        Ok(()) => Status::SUCCESS,
        Err(e) => e.efi_status(),
    }
}

extern "efiapi" fn efi_reset(this: *mut block_io::Protocol, extended: Boolean) -> Status {
    // SAFETY: firmware only calls us through the pointer we published.
    match unsafe { EfiBlockIo::from_protocol(this) } {
        Some(dev) => status(dev.disk.reset(extended.into())),
        None => Status::INVALID_PARAMETER,
    }
}

extern "efiapi" fn efi_read_blocks(
    this: *mut block_io::Protocol,
    media_id: u32,
    lba: u64,
    len: usize,
    buf: *mut c_void,
) -> Status {
    // SAFETY: as above; a non-null buffer is caller-owned and `len` bytes long.
    let Some(dev) = (unsafe { EfiBlockIo::from_protocol(this) }) else {
        return Status::INVALID_PARAMETER;
    };
    let buf = (!buf.is_null()).then(|| unsafe { slice::from_raw_parts_mut(buf.cast::<u8>(), len) });
    status(dev.disk.read_blocks(media_id, lba, buf))
}

extern "efiapi" fn efi_write_blocks(
    this: *mut block_io::Protocol,
    media_id: u32,
    lba: u64,
    len: usize,
    buf: *mut c_void,
) -> Status {
    // SAFETY: see `efi_read_blocks`.
    let Some(dev) = (unsafe { EfiBlockIo::from_protocol(this) }) else {
        return Status::INVALID_PARAMETER;
    };
    let buf = (!buf.is_null()).then(|| unsafe { slice::from_raw_parts(buf.cast::<u8>().cast_const(), len) });
    status(dev.disk.write_blocks(media_id, lba, buf))
}

extern "efiapi" fn efi_flush_blocks(this: *mut block_io::Protocol) -> Status {
    // SAFETY: see `efi_reset`.
    match unsafe { EfiBlockIo::from_protocol(this) } {
        Some(dev) => status(dev.disk.flush()),
        None => Status::INVALID_PARAMETER,
    }
}
