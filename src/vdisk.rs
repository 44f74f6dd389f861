//! Virtual disk descriptor.
//!
//! A [`VirtualDisk`] is created once per boot attempt with fixed geometry. Only the bytes
//! behind a memory-backed disk ever change afterwards; the media description does not.

use alloc::boxed::Box;
use alloc::format;

use crate::backing::{ByteSource, Environment, QuietSource};
use crate::error::DiskError;
use crate::log::logger::log_info;

/// On-demand block reader for a filesystem image that is synthesized rather than stored.
///
/// The implementation owns its bounds: requests beyond the synthesized content are
/// satisfied with whatever filler it chooses (normally zeroes).
pub trait SynthesizedFs {
    fn read(&mut self, lba: u64, count: u64, buf: &mut [u8]);
}

/// Geometry and identity of an emulated disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Media {
    pub media_id: u32,
    pub block_size: u32,
    /// Highest valid LBA (inclusive).
    pub last_block: u64,
    pub read_only: bool,
}

impl Media {
    pub fn new(media_id: u32, block_size: u32, last_block: u64) -> Self {
        Self {
            media_id,
            block_size,
            last_block,
            read_only: false,
        }
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn block_count(&self) -> u64 {
        self.last_block.wrapping_add(1)
    }

    /// Total size in bytes, checked against overflow.
    pub fn byte_len(&self) -> Result<u64, DiskError> {
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(DiskError::InvalidBlockSize(self.block_size));
        }
        self.last_block
            .checked_add(1)
            .and_then(|blocks| blocks.checked_mul(self.block_size as u64))
            .ok_or(DiskError::GeometryOverflow)
    }
}

pub enum DiskKind<'a> {
    /// Image resident in memory; LBA 0 is the first byte of `image`.
    MemoryBacked { image: &'a mut [u8] },
    /// Streamed from an open file; LBA 0 sits at `base_offset` within it. Never writable.
    /// Every read runs with the host's progress indicator switched off.
    FileBacked {
        source: QuietSource<Box<dyn ByteSource + 'a>, Box<dyn Environment + 'a>>,
        base_offset: u64,
    },
    /// Content produced on demand; requests are shifted by `logical_offset` blocks.
    SynthesizedFilesystem {
        fs: Box<dyn SynthesizedFs + 'a>,
        logical_offset: u64,
    },
}

impl DiskKind<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            DiskKind::MemoryBacked { .. } => "memory",
            DiskKind::FileBacked { .. } => "file",
            DiskKind::SynthesizedFilesystem { .. } => "vfat",
        }
    }
}

pub struct VirtualDisk<'a> {
    pub(crate) kind: DiskKind<'a>,
    pub(crate) media: Media,
}

impl<'a> VirtualDisk<'a> {
    pub fn memory(media: Media, image: &'a mut [u8]) -> Result<Self, DiskError> {
        let needed = media.byte_len()?;
        let available = image.len() as u64;
        if needed > available {
            return Err(DiskError::ImageTooSmall { needed, available });
        }
        Ok(Self::created(DiskKind::MemoryBacked { image }, media))
    }

    pub fn file(
        media: Media,
        source: Box<dyn ByteSource + 'a>,
        env: Box<dyn Environment + 'a>,
        base_offset: u64,
    ) -> Result<Self, DiskError> {
        let needed = base_offset
            .checked_add(media.byte_len()?)
            .ok_or(DiskError::GeometryOverflow)?;
        let available = source.len();
        if needed > available {
            return Err(DiskError::ImageTooSmall { needed, available });
        }
        Ok(Self::created(
            DiskKind::FileBacked {
                source: QuietSource::new(source, env),
                base_offset,
            },
            media,
        ))
    }

    pub fn synthesized(
        media: Media,
        fs: Box<dyn SynthesizedFs + 'a>,
        logical_offset: u64,
    ) -> Result<Self, DiskError> {
        media.byte_len()?;
        Ok(Self::created(
            DiskKind::SynthesizedFilesystem { fs, logical_offset },
            media,
        ))
    }

    fn created(kind: DiskKind<'a>, media: Media) -> Self {
        log_info(
            "vdisk",
            &format!(
                "{} disk: id={} {} x {} bytes{}",
                kind.name(),
                media.media_id,
                media.block_count(),
                media.block_size,
                if media.read_only { " (ro)" } else { "" }
            ),
        );
        Self { kind, media }
    }

    pub fn media(&self) -> &Media {
        &self.media
    }

    pub fn kind(&self) -> &DiskKind<'a> {
        &self.kind
    }
}
