//! Handoff to the boot application.
//!
//! [`Handoff::prepare`] does everything that can still fail gracefully: it finds the boot
//! application, stages and loads it, and assembles its descriptor set.
//! [`PreparedBoot::boot`] is the one-way jump. It only returns control to the platform's
//! `halt`, so nothing after it runs on the success path.

use alloc::boxed::Box;
use alloc::format;

use crate::backing::{self, ByteSource};
use crate::bootapp::{BootAppDescriptorSet, BootAppHeader, RegionRanges};
use crate::callback::BootAppCallback;
use crate::error::{BootError, MemoryError};
use crate::log::logger::{log_critical, log_info};
use crate::memory::{align_up, PhysMemory, PAGE_SIZE};
use crate::options::BootOptions;
use crate::pe;

/// Where the boot application's bytes come from.
pub enum BootFile<'a> {
    /// Already resident; loaded in place.
    Resident(&'a [u8]),
    /// Read through the backing store into a staging area first.
    Streamed(Box<dyn ByteSource + 'a>),
}

impl BootFile<'_> {
    pub fn len(&self) -> u64 {
        match self {
            BootFile::Resident(bytes) => bytes.len() as u64,
            BootFile::Streamed(source) => source.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Machine services needed for the final jump.
pub trait Platform {
    /// Block until the user presses a key.
    fn wait_for_key(&mut self);

    /// Call the boot application's entry point with its descriptor set.
    ///
    /// # Safety
    ///
    /// `entry` must be the entry point of an image loaded by [`pe::load`] and `descriptor`
    /// must stay valid for as long as the boot application runs.
    unsafe fn enter(&mut self, entry: u64, descriptor: *mut BootAppHeader);

    /// Report `error` and stop the machine.
    fn halt(&mut self, error: BootError) -> !;
}

pub struct Handoff<'o> {
    options: &'o BootOptions,
    ranges: RegionRanges,
    callback: &'static BootAppCallback,
}

impl<'o> Handoff<'o> {
    pub fn new(
        options: &'o BootOptions,
        ranges: RegionRanges,
        callback: &'static BootAppCallback,
    ) -> Self {
        Self {
            options,
            ranges,
            callback,
        }
    }

    /// Load the boot application and build its descriptor set.
    pub fn prepare<M: PhysMemory + ?Sized>(
        &self,
        boot_file: Option<BootFile<'_>>,
        mem: &mut M,
    ) -> Result<PreparedBoot, BootError> {
        let boot_file = boot_file.ok_or(BootError::MissingBootImage)?;

        let image = match boot_file {
            BootFile::Resident(raw) => pe::load(raw, mem)?,
            BootFile::Streamed(mut source) => {
                let staged = self.stage(source.as_mut(), mem)?;
                let len = source.len() as usize;
                // `pe::load` writes through `mem`, so parse from a copy.
                let raw = mem.region(staged, len)?.to_vec();
                pe::load(&raw, mem)?
            }
        };
        log_info(
            "handoff",
            &format!(
                "boot application at {:#x}+{:#x}, entry {:#x}",
                image.base, image.len, image.entry
            ),
        );

        let set = BootAppDescriptorSet::assemble(&image, &self.ranges, self.callback);
        Ok(PreparedBoot {
            entry: image.entry,
            descriptor: Box::leak(Box::new(set)),
            pause: self.options.pause,
        })
    }

    /// Read a streamed image into the pages immediately below the payload region.
    fn stage<S: ByteSource + ?Sized, M: PhysMemory + ?Sized>(
        &self,
        source: &mut S,
        mem: &mut M,
    ) -> Result<u64, BootError> {
        let len = source.len();
        let too_large = MemoryError::OutOfRange { addr: 0, len };
        let padded = align_up(len, PAGE_SIZE);
        let staged = self
            .ranges
            .payload
            .start
            .checked_sub(padded)
            .ok_or(too_large)?;
        let len = usize::try_from(len).map_err(|_| too_large)?;

        log_info(
            "handoff",
            &format!("staging {} byte boot application at {:#x}", len, staged),
        );
        backing::read(source, mem.region_mut(staged, len)?, 0)?;
        Ok(staged)
    }

    /// Prepare and boot, halting on any failure.
    pub fn run<M: PhysMemory + ?Sized, P: Platform>(
        &self,
        boot_file: Option<BootFile<'_>>,
        mem: &mut M,
        platform: &mut P,
    ) -> ! {
        match self.prepare(boot_file, mem) {
            Ok(prepared) => prepared.boot(platform),
            Err(err) => {
                log_critical("handoff", &format!("{}", err));
                platform.halt(err)
            }
        }
    }
}

/// A boot application ready to be entered.
pub struct PreparedBoot {
    entry: u64,
    descriptor: &'static mut BootAppDescriptorSet,
    pause: bool,
}

impl PreparedBoot {
    pub fn entry(&self) -> u64 {
        self.entry
    }

    pub fn descriptor(&self) -> &BootAppDescriptorSet {
        &*self.descriptor
    }

    pub fn boot<P: Platform>(self, platform: &mut P) -> ! {
        let Self {
            entry,
            descriptor,
            pause,
        } = self;
        if pause {
            platform.wait_for_key();
        }
        let descriptor = descriptor.header_ptr();
        log_info(
            "handoff",
            &format!(
                "entering boot application at {:#x} with parameters at {:p}",
                entry, descriptor
            ),
        );
        // SAFETY: `entry` comes from `pe::load` and the descriptor set is leaked.
        unsafe { platform.enter(entry, descriptor) };

        let err = BootError::EntryReturned;
        log_critical("handoff", &format!("{}", err));
        platform.halt(err)
    }
}
