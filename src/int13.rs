//! INT 13h emulation for the virtual drive.
//!
//! Register conventions follow the BIOS: function in AH, status back in AH with CF set on
//! failure. Buffers live in real-mode memory and are reached through [`PhysMemory`]. Nothing
//! is remembered between calls, so "status of last operation" always reports success.

use alloc::format;

use bitflags::bitflags;
use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::callback::CallbackParams;
use crate::error::BlockIoError;
use crate::log::logger::log_debug;
use crate::memory::{real_ptr, PhysMemory};
use crate::vdisk::VirtualDisk;

pub const INT13_VECTOR: u32 = 0x13;

pub const VDISK_HEADS: u64 = 255;
pub const VDISK_SECTORS_PER_TRACK: u64 = 63;
const MAX_CYLINDERS: u64 = 1024;

const RESET: u8 = 0x00;
const GET_LAST_STATUS: u8 = 0x01;
const READ_SECTORS: u8 = 0x02;
const WRITE_SECTORS: u8 = 0x03;
const GET_PARAMETERS: u8 = 0x08;
const GET_DISK_TYPE: u8 = 0x15;
const EXTENSION_CHECK: u8 = 0x41;
const EXTENDED_READ: u8 = 0x42;
const EXTENDED_WRITE: u8 = 0x43;
const GET_EXTENDED_PARAMETERS: u8 = 0x48;

/// Invalid function or parameter.
pub const STATUS_INVALID: u8 = 0x01;
const DISK_TYPE_FIXED: u8 = 0x03;
const EXTENSIONS_VERSION_3: u8 = 0x30;
const EXTENSION_CHECK_MAGIC: u16 = 0x55aa;

bitflags! {
    /// Extension subsets advertised by function 41h.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Int13Extensions: u16 {
        const LINEAR_ACCESS = 1 << 0;
        const REMOVABLE = 1 << 1;
        const EDD = 1 << 2;
    }
}

/// Disk address packet for functions 42h/43h (at DS:SI).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes)]
pub struct DiskAddressPacket {
    pub len: u8,
    pub reserved: u8,
    pub count: u16,
    pub buffer_offset: u16,
    pub buffer_segment: u16,
    pub lba: u64,
}

/// Result buffer for function 48h (at DS:SI).
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes)]
pub struct DriveParameters {
    pub bufsize: u16,
    pub flags: u16,
    pub cylinders: u32,
    pub heads: u32,
    pub sectors_per_track: u32,
    pub sectors: u64,
    pub sector_size: u16,
}

const_assert_eq!(core::mem::size_of::<DiskAddressPacket>(), 16);
const_assert_eq!(core::mem::size_of::<DriveParameters>(), 26);

#[derive(Clone, Copy)]
enum Direction {
    Read,
    Write,
}

/// AH on success; AH status on failure.
type Int13Result = Result<u8, u8>;

/// Handle one INT 13h call addressed to `disk`.
pub fn emulate<M: PhysMemory + ?Sized>(
    disk: &mut VirtualDisk<'_>,
    mem: &mut M,
    params: &mut CallbackParams,
) {
    let function = params.ah();
    let result = match function {
        RESET => disk.reset(false).map(|()| 0).map_err(BlockIoError::int13_status),
        GET_LAST_STATUS => Ok(0),
        READ_SECTORS => chs_transfer(disk, mem, params, Direction::Read),
        WRITE_SECTORS => chs_transfer(disk, mem, params, Direction::Write),
        GET_PARAMETERS => get_parameters(disk, params),
        GET_DISK_TYPE => get_disk_type(disk, params),
        EXTENSION_CHECK => extension_check(params),
        EXTENDED_READ => extended_transfer(disk, mem, params, Direction::Read),
        EXTENDED_WRITE => extended_transfer(disk, mem, params, Direction::Write),
        GET_EXTENDED_PARAMETERS => get_extended_parameters(disk, mem, params),
        _ => Err(STATUS_INVALID),
    };

    match result {
        Ok(ah) => {
            params.set_ah(ah);
            params.set_carry(false);
        }
        Err(status) => {
            log_debug(
                "int13",
                &format!("function {:#04x} failed with status {:#04x}", function, status),
            );
            params.set_ah(status);
            params.set_carry(true);
        }
    }
}

fn cylinders(disk: &VirtualDisk<'_>) -> u64 {
    disk.media().block_count() / (VDISK_HEADS * VDISK_SECTORS_PER_TRACK)
}

fn transfer<M: PhysMemory + ?Sized>(
    disk: &mut VirtualDisk<'_>,
    mem: &mut M,
    direction: Direction,
    lba: u64,
    count: u64,
    buffer: u64,
) -> Result<(), u8> {
    let media = *disk.media();
    let len = count
        .checked_mul(media.block_size as u64)
        .and_then(|len| usize::try_from(len).ok())
        .ok_or(STATUS_INVALID)?;
    if len == 0 {
        return Ok(());
    }
    let result = match direction {
        Direction::Read => {
            let buf = mem.region_mut(buffer, len).map_err(|_| STATUS_INVALID)?;
            disk.read_blocks(media.media_id, lba, Some(buf))
        }
        Direction::Write => {
            let buf = mem.region(buffer, len).map_err(|_| STATUS_INVALID)?;
            disk.write_blocks(media.media_id, lba, Some(buf))
        }
    };
    result.map_err(BlockIoError::int13_status)
}

/// 02h/03h: AL sectors at CHS (CH, CL, DH) to or from ES:BX.
fn chs_transfer<M: PhysMemory + ?Sized>(
    disk: &mut VirtualDisk<'_>,
    mem: &mut M,
    params: &mut CallbackParams,
    direction: Direction,
) -> Int13Result {
    let count = params.al() as u64;
    let sector = (params.cl() & 0x3f) as u64;
    let cylinder = params.ch() as u64 | (((params.cl() & 0xc0) as u64) << 2);
    let head = params.dh() as u64;
    if sector == 0 || head >= VDISK_HEADS {
        return Err(STATUS_INVALID);
    }
    let lba = (cylinder * VDISK_HEADS + head) * VDISK_SECTORS_PER_TRACK + (sector - 1);
    let buffer = real_ptr(params.es(), params.bx());

    match transfer(disk, mem, direction, lba, count, buffer) {
        Ok(()) => Ok(0),
        Err(status) => {
            params.set_al(0);
            Err(status)
        }
    }
}

/// 08h: legacy geometry, clamped to what CHS can express.
fn get_parameters(disk: &VirtualDisk<'_>, params: &mut CallbackParams) -> Int13Result {
    let max_cylinder = cylinders(disk).clamp(1, MAX_CYLINDERS) - 1;
    params.set_bl(0);
    params.set_ch(max_cylinder as u8);
    params.set_cl(VDISK_SECTORS_PER_TRACK as u8 | ((max_cylinder >> 2) as u8 & 0xc0));
    params.set_dh((VDISK_HEADS - 1) as u8);
    params.set_dl(1);
    Ok(0)
}

/// 15h: fixed disk, sector count in CX:DX.
fn get_disk_type(disk: &VirtualDisk<'_>, params: &mut CallbackParams) -> Int13Result {
    let sectors = u32::try_from(disk.media().block_count()).unwrap_or(u32::MAX);
    params.set_cx((sectors >> 16) as u16);
    params.set_dx(sectors as u16);
    Ok(DISK_TYPE_FIXED)
}

/// 41h: report EDD 3.0 with linear access.
fn extension_check(params: &mut CallbackParams) -> Int13Result {
    if params.bx() != EXTENSION_CHECK_MAGIC {
        return Err(STATUS_INVALID);
    }
    params.set_bx(EXTENSION_CHECK_MAGIC.swap_bytes());
    params.set_cx((Int13Extensions::LINEAR_ACCESS | Int13Extensions::EDD).bits());
    Ok(EXTENSIONS_VERSION_3)
}

/// 42h/43h: transfer described by the disk address packet at DS:SI.
fn extended_transfer<M: PhysMemory + ?Sized>(
    disk: &mut VirtualDisk<'_>,
    mem: &mut M,
    params: &mut CallbackParams,
    direction: Direction,
) -> Int13Result {
    let dap_addr = real_ptr(params.ds(), params.si());
    let dap = mem
        .region(dap_addr, core::mem::size_of::<DiskAddressPacket>())
        .ok()
        .and_then(DiskAddressPacket::read_from)
        .ok_or(STATUS_INVALID)?;
    let buffer = real_ptr(dap.buffer_segment, dap.buffer_offset);

    match transfer(disk, mem, direction, dap.lba, dap.count as u64, buffer) {
        Ok(()) => Ok(0),
        Err(status) => {
            // Blocks actually transferred.
            let count_addr = dap_addr + core::mem::offset_of!(DiskAddressPacket, count) as u64;
            if mem.write_u16(count_addr, 0).is_err() {
                log_debug("int13", "disk address packet count is not writable");
            }
            Err(status)
        }
    }
}

/// 48h: fill the caller's drive parameter buffer at DS:SI.
fn get_extended_parameters<M: PhysMemory + ?Sized>(
    disk: &VirtualDisk<'_>,
    mem: &mut M,
    params: &mut CallbackParams,
) -> Int13Result {
    let addr = real_ptr(params.ds(), params.si());
    let len = core::mem::size_of::<DriveParameters>();
    let supplied = mem.read_u16(addr).map_err(|_| STATUS_INVALID)?;
    if (supplied as usize) < len {
        return Err(STATUS_INVALID);
    }
    let media = disk.media();
    let sector_size = u16::try_from(media.block_size).map_err(|_| STATUS_INVALID)?;
    let out = DriveParameters {
        bufsize: len as u16,
        flags: 0,
        cylinders: cylinders(disk) as u32,
        heads: VDISK_HEADS as u32,
        sectors_per_track: VDISK_SECTORS_PER_TRACK as u32,
        sectors: media.block_count(),
        sector_size,
    };
    mem.write(addr, out.as_bytes()).map_err(|_| STATUS_INVALID)?;
    Ok(0)
}
