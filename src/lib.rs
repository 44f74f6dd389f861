//! Virtual block device emulation and boot-application handoff.
//!
//! A loader uses this crate to present an in-memory, file-streamed or synthesized image
//! as a disk to a foreign boot application, then hand control to that application:
//!
//! - [`vdisk`] / [`blockio`]: the emulated disk and its firmware Block I/O surface
//! - [`bootapp`]: the packed boot-application descriptor set
//! - [`shim`] / [`int13`] / [`callback`]: real-mode interrupt interception for the loader
//! - [`handoff`]: image loading and the one-way jump
//!
//! The library is `no_std` + `alloc` so it links into the firmware image; everything except
//! the final jump is exercised on the host by the test suite.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod backing;
pub mod blockio;
pub mod bootapp;
pub mod callback;
pub mod error;
pub mod handoff;
pub mod int13;
pub mod log;
pub mod memory;
pub mod options;
pub mod pe;
pub mod shim;
pub mod vdisk;

pub use backing::{ByteSource, Environment, MemorySource, ProgressGuard, QuietSource};
pub use blockio::EfiBlockIo;
pub use bootapp::{BootAppDescriptorSet, RegionRanges};
pub use callback::{BootAppCallback, CallbackParams};
pub use error::{BackingError, BlockIoError, BootError, DiskError, MemoryError};
pub use handoff::{BootFile, Handoff, Platform, PreparedBoot};
pub use int13::emulate as emulate_int13;
pub use memory::{FlatPhysMemory, PhysMemory, PAGE_SIZE};
pub use options::{parse_payloads, BootCommand, BootOptions, PayloadMode, PayloadSpec};
pub use shim::{InterruptHandler, InterruptShim, RealModeServices};
pub use vdisk::{DiskKind, Media, SynthesizedFs, VirtualDisk};
