//! Boot application image loader.
//!
//! Boot applications are 32-bit PE executables. They are loaded at their preferred image
//! base without relocation: headers and raw section data are copied in, everything else in
//! the page-rounded image is zero.

use alloc::vec::Vec;

use goblin::pe::PE;

use crate::error::BootError;
use crate::memory::{align_up, PhysMemory, PAGE_SIZE};

pub const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;
const CHARACTERISTICS_EXECUTABLE_IMAGE: u16 = 0x0002;

/// A boot application resident at its load address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub base: u64,
    /// Image length rounded up to whole pages.
    pub len: u64,
    pub entry: u64,
}

struct SectionCopy {
    rva: u64,
    file_offset: usize,
    len: usize,
}

/// Validate `raw` and lay it out in `mem` at its preferred base.
pub fn load<M: PhysMemory + ?Sized>(raw: &[u8], mem: &mut M) -> Result<LoadedImage, BootError> {
    let pe = PE::parse(raw).map_err(|_| BootError::MalformedImage("not a PE image"))?;

    let machine = pe.header.coff_header.machine;
    if machine != IMAGE_FILE_MACHINE_I386 || pe.is_64 {
        return Err(BootError::UnsupportedArchitecture(machine));
    }
    if pe.header.coff_header.characteristics & CHARACTERISTICS_EXECUTABLE_IMAGE == 0 {
        return Err(BootError::MalformedImage("not an executable image"));
    }
    let optional = pe
        .header
        .optional_header
        .ok_or(BootError::MalformedImage("missing optional header"))?;

    let base = optional.windows_fields.image_base as u64;
    let image_size = optional.windows_fields.size_of_image as u64;
    let headers_len = optional.windows_fields.size_of_headers as usize;
    let entry_rva = optional.standard_fields.address_of_entry_point as u64;

    if headers_len > raw.len() || headers_len as u64 > image_size {
        return Err(BootError::MalformedImage("headers exceed image"));
    }
    if entry_rva >= image_size {
        return Err(BootError::MalformedImage("entry point outside image"));
    }

    let sections = pe
        .sections
        .iter()
        .map(|s| {
            let copy = SectionCopy {
                rva: s.virtual_address as u64,
                file_offset: s.pointer_to_raw_data as usize,
                len: s.size_of_raw_data as usize,
            };
            let in_file = copy
                .file_offset
                .checked_add(copy.len)
                .is_some_and(|end| end <= raw.len());
            let in_image = copy.rva + copy.len as u64 <= image_size;
            if in_file && in_image {
                Ok(copy)
            } else {
                Err(BootError::MalformedImage("section outside image"))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let len = align_up(image_size, PAGE_SIZE);
    mem.fill(base, len as usize, 0)?;
    mem.write(base, &raw[..headers_len])?;
    for s in &sections {
        mem.write(base + s.rva, &raw[s.file_offset..s.file_offset + s.len])?;
    }

    Ok(LoadedImage {
        base,
        len,
        entry: base + entry_rva,
    })
}
