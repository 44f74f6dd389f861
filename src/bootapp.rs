//! Boot application descriptor set.
//!
//! A boot application is entered with a pointer to one packed block of descriptors. The
//! header records the total length and the offset of every sub-descriptor, so those values
//! are derived from the Rust layout itself (`offset_of!`/`size_of`) rather than written by
//! hand. The fixed fields are a compile-time template; [`BootAppDescriptorSet::assemble`]
//! fills in the load address and the three memory regions once the image is in place.
//!
//! Layout (little-endian, packed):
//!   +--------------------------+ 0x000
//!   | header ("BOOT APP")      | 0x3c
//!   | memory descriptor        | 0x14
//!   | regions[3]               | 3 x 0x30
//!   | entry ("BTAPENT")        | 0x2c
//!   | entry options            | 0x18
//!   | options padding          | 0x10
//!   | boot device              | 0x58
//!   | boot device (copy)       | 0x58
//!   | callback                 | 0x08
//!   | trailer                  | 0x1c
//!   +--------------------------+ 0x208

use core::mem::{offset_of, size_of};
use core::ops::Range;

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::callback::BootAppCallback;
use crate::memory::{page_len, page_start};
use crate::pe::{LoadedImage, IMAGE_FILE_MACHINE_I386};

pub const BOOTAPP_SIGNATURE: [u8; 8] = *b"BOOT APP";
pub const BOOTAPP_VERSION: u32 = 2;
pub const BOOTAPP_MEMORY_VERSION: u32 = 1;
pub const BOOTAPP_ENTRY_SIGNATURE: [u8; 8] = *b"BTAPENT\0";
pub const BOOTAPP_ENTRY_FLAGS: u32 = 0x21;
pub const BOOTAPP_TRAILER_VERSION: u32 = 1;

/// Sector size and partition layout of the emulated boot disk.
pub const VDISK_SECTOR_SIZE: u64 = 512;
pub const VDISK_VBR_LBA: u64 = 0x20;
pub const VDISK_MBR_SIGNATURE: u32 = 0xc0ff_eeee;

/// Region slots. The boot application indexes these positionally.
pub const EMULATOR_REGION: usize = 0;
pub const IMAGE_REGION: usize = 1;
pub const PAYLOAD_REGION: usize = 2;
pub const NUM_REGIONS: usize = 3;

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct BootAppHeader {
    pub signature: [u8; 8],
    pub version: u32,
    /// Length of the whole descriptor set.
    pub len: u32,
    /// COFF machine type.
    pub arch: u32,
    pub reserved_0x14: u32,
    pub image_base: u64,
    pub image_len: u32,
    /// Offsets from the start of the set.
    pub memory: u32,
    pub entry: u32,
    pub boot_device_copy: u32,
    pub callback: u32,
    pub trailer: u32,
    pub reserved_0x38: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct MemoryDescriptor {
    pub version: u32,
    /// Length excluding the region array.
    pub len: u32,
    pub num_regions: u32,
    pub region_len: u32,
    /// Length of the reserved prefix of each region.
    pub reserved_len: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct MemoryRegion {
    pub reserved: [u8; 16],
    pub start_page: u64,
    pub reserved_0x18: [u8; 8],
    pub num_pages: u64,
    pub reserved_0x28: [u8; 4],
    pub flags: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct EntryDescriptor {
    pub signature: [u8; 8],
    pub flags: u32,
    pub guid: [u8; 16],
    pub reserved: [u8; 16],
}

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct EntryOptions {
    pub flags: u32,
    pub len: u32,
    /// Length of the descriptors that follow (padding + boot device).
    pub extra_len: u32,
    pub reserved: [u8; 12],
}

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct OptionsPadding {
    pub reserved: [u8; 16],
}

/// Where the boot partition lives on the emulated disk.
#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct BootDevice {
    pub flags: u32,
    pub reserved_0x04: u32,
    pub len: u32,
    pub reserved_0x0c: u32,
    pub boot_partition_offset: u64,
    pub reserved_0x18: [u8; 16],
    pub partition_style: u32,
    pub reserved_0x2c: [u8; 4],
    pub mbr_signature: u32,
    pub reserved_0x34: [u8; 36],
}

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct CallbackDescriptor {
    /// 32-bit address of the [`BootAppCallback`].
    pub callback: u32,
    pub reserved: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct TrailerDescriptor {
    pub version: u32,
    pub reserved: [u8; 24],
}

#[repr(C, packed)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct BootAppDescriptorSet {
    pub header: BootAppHeader,
    pub memory: MemoryDescriptor,
    pub regions: [MemoryRegion; NUM_REGIONS],
    pub entry: EntryDescriptor,
    pub options: EntryOptions,
    pub options_padding: OptionsPadding,
    pub boot_device: BootDevice,
    pub boot_device_copy: BootDevice,
    pub callback: CallbackDescriptor,
    pub trailer: TrailerDescriptor,
}

const_assert_eq!(size_of::<BootAppHeader>(), 0x3c);
const_assert_eq!(size_of::<MemoryDescriptor>(), 0x14);
const_assert_eq!(size_of::<MemoryRegion>(), 0x30);
const_assert_eq!(size_of::<EntryDescriptor>(), 0x2c);
const_assert_eq!(size_of::<BootDevice>(), 0x58);
const_assert_eq!(size_of::<BootAppDescriptorSet>(), 0x208);

const EMPTY_REGION: MemoryRegion = MemoryRegion {
    reserved: [0; 16],
    start_page: 0,
    reserved_0x18: [0; 8],
    num_pages: 0,
    reserved_0x28: [0; 4],
    flags: 0,
};

const BOOT_DEVICE: BootDevice = BootDevice {
    flags: 0x0000_0006,
    reserved_0x04: 0,
    len: size_of::<BootDevice>() as u32,
    reserved_0x0c: 0,
    boot_partition_offset: VDISK_VBR_LBA * VDISK_SECTOR_SIZE,
    reserved_0x18: [0; 16],
    partition_style: 0x01,
    reserved_0x2c: [0; 4],
    mbr_signature: VDISK_MBR_SIGNATURE,
    reserved_0x34: [0; 36],
};

/// Loaded-memory ranges described to the boot application besides the image itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRanges {
    /// The loader's own code and data.
    pub emulator: Range<u64>,
    /// Auxiliary payload (the packaged boot files).
    pub payload: Range<u64>,
}

impl BootAppDescriptorSet {
    /// Every field that does not depend on where things were loaded.
    pub const TEMPLATE: Self = Self {
        header: BootAppHeader {
            signature: BOOTAPP_SIGNATURE,
            version: BOOTAPP_VERSION,
            len: size_of::<Self>() as u32,
            arch: IMAGE_FILE_MACHINE_I386 as u32,
            reserved_0x14: 0,
            image_base: 0,
            image_len: 0,
            memory: offset_of!(Self, memory) as u32,
            entry: offset_of!(Self, entry) as u32,
            boot_device_copy: offset_of!(Self, boot_device_copy) as u32,
            callback: offset_of!(Self, callback) as u32,
            trailer: offset_of!(Self, trailer) as u32,
            reserved_0x38: 0,
        },
        memory: MemoryDescriptor {
            version: BOOTAPP_MEMORY_VERSION,
            len: size_of::<MemoryDescriptor>() as u32,
            num_regions: NUM_REGIONS as u32,
            region_len: size_of::<MemoryRegion>() as u32,
            reserved_len: 16,
        },
        regions: [EMPTY_REGION; NUM_REGIONS],
        entry: EntryDescriptor {
            signature: BOOTAPP_ENTRY_SIGNATURE,
            flags: BOOTAPP_ENTRY_FLAGS,
            guid: [0; 16],
            reserved: [0; 16],
        },
        options: EntryOptions {
            flags: 0x1100_0001,
            len: size_of::<EntryOptions>() as u32,
            extra_len: (size_of::<OptionsPadding>() + size_of::<BootDevice>()) as u32,
            reserved: [0; 12],
        },
        options_padding: OptionsPadding { reserved: [0; 16] },
        boot_device: BOOT_DEVICE,
        boot_device_copy: BOOT_DEVICE,
        callback: CallbackDescriptor {
            callback: 0,
            reserved: 0,
        },
        trailer: TrailerDescriptor {
            version: BOOTAPP_TRAILER_VERSION,
            reserved: [0; 24],
        },
    };

    /// Complete the template for an image loaded at `image.base`.
    ///
    /// Regions are always written emulator, image, payload, in that order.
    pub fn assemble(image: &LoadedImage, ranges: &RegionRanges, callback: &BootAppCallback) -> Self {
        let mut set = Self::TEMPLATE;
        set.header.image_base = image.base;
        set.header.image_len = image.len as u32;
        set.regions[EMULATOR_REGION] = region(&ranges.emulator);
        set.regions[IMAGE_REGION] = region(&(image.base..image.base + image.len));
        set.regions[PAYLOAD_REGION] = region(&ranges.payload);
        // Boot applications run with a 32-bit address space.
        set.callback.callback = callback as *const BootAppCallback as usize as u32;
        set
    }

    pub fn header_ptr(&mut self) -> *mut BootAppHeader {
        &mut self.header
    }
}

fn region(range: &Range<u64>) -> MemoryRegion {
    MemoryRegion {
        start_page: page_start(range.start),
        num_pages: page_len(range.start, range.end),
        ..EMPTY_REGION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], off: usize) -> u32 {
        u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap())
    }

    fn u64_at(bytes: &[u8], off: usize) -> u64 {
        u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap())
    }

    #[test]
    fn header_offsets_point_at_their_descriptors() {
        let set = BootAppDescriptorSet::TEMPLATE;
        let bytes = set.as_bytes();

        assert_eq!(&bytes[..8], b"BOOT APP");
        assert_eq!(u32_at(bytes, 0x0c) as usize, bytes.len());

        let memory = u32_at(bytes, 0x24) as usize;
        assert_eq!(u32_at(bytes, memory), BOOTAPP_MEMORY_VERSION);
        assert_eq!(u32_at(bytes, memory + 8), NUM_REGIONS as u32);

        let entry = u32_at(bytes, 0x28) as usize;
        assert_eq!(&bytes[entry..entry + 8], b"BTAPENT\0");

        let copy = u32_at(bytes, 0x2c) as usize;
        assert_eq!(u32_at(bytes, copy), 0x6);
        assert_eq!(u64_at(bytes, copy + 0x10), 0x20 * 512);
        assert_eq!(u32_at(bytes, copy + 0x30), VDISK_MBR_SIGNATURE);

        let trailer = u32_at(bytes, 0x34) as usize;
        assert_eq!(trailer + size_of::<TrailerDescriptor>(), bytes.len());
        assert_eq!(u32_at(bytes, trailer), BOOTAPP_TRAILER_VERSION);
    }

    #[test]
    fn regions_follow_the_memory_descriptor() {
        let set = BootAppDescriptorSet::TEMPLATE;
        let memory = set.header.memory as usize;
        let memory_len = set.memory.len as usize;
        assert_eq!(offset_of!(BootAppDescriptorSet, regions), memory + memory_len);
        let options_len = set.options.extra_len as usize;
        assert_eq!(
            offset_of!(BootAppDescriptorSet, options) + size_of::<EntryOptions>() + options_len,
            offset_of!(BootAppDescriptorSet, boot_device_copy)
        );
    }

    #[test]
    fn assemble_fills_regions_in_fixed_order() {
        let callback = BootAppCallback { fns: 0, drive: 0x80 };
        let image = LoadedImage {
            base: 0x0040_0000,
            len: 0x12000,
            entry: 0x0040_1000,
        };
        let ranges = RegionRanges {
            emulator: 0x0001_0800..0x0003_0000,
            payload: 0x0100_0000..0x0100_0000 + 70_000,
        };
        let set = BootAppDescriptorSet::assemble(&image, &ranges, &callback);

        let (base, len) = (set.header.image_base, set.header.image_len);
        assert_eq!(base, 0x0040_0000);
        assert_eq!(len, 0x12000);

        let pages: [(u64, u64); NUM_REGIONS] =
            core::array::from_fn(|i| (set.regions[i].start_page, set.regions[i].num_pages));
        assert_eq!(pages[EMULATOR_REGION], (0x10, 0x20));
        assert_eq!(pages[IMAGE_REGION], (0x400, 0x12));
        assert_eq!(pages[PAYLOAD_REGION], (0x1000, 18));

        // Fixed fields are untouched.
        let template = BootAppDescriptorSet::TEMPLATE;
        assert_eq!(set.entry.as_bytes(), template.entry.as_bytes());
        assert_eq!(set.boot_device.as_bytes(), template.boot_device.as_bytes());
    }
}
