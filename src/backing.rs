//! Backing store accessor: resolves a source plus byte offset into bytes.
//!
//! Two kinds of source exist. Resident images are copied straight out of memory
//! ([`MemorySource`]); everything else is a streaming reader supplied by the host loader
//! (a file on a firmware volume, a network transfer, a decompressor) that may block for a
//! long time but always completes or fails the whole request.
//!
//! The host loader normally draws a progress indicator for its own large transfers. Low
//! level reads issued on behalf of an emulated disk must not animate it, so streaming reads
//! run under a [`ProgressGuard`] that forces the indicator off and puts the previous
//! setting back afterwards.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};

use crate::error::BackingError;

/// Environment variable controlling the host loader's progress indicator.
pub const PROGRESS_VAR: &str = "enable_progress_indicator";

pub trait ByteSource {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    /// Fill `buf` from `offset`. Either every byte is read or an error is returned.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), BackingError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), BackingError> {
        (**self).read_at(offset, buf)
    }
}

/// A source that is already resident in memory.
pub struct MemorySource<'a> {
    bytes: &'a [u8],
}

impl<'a> MemorySource<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

impl ByteSource for MemorySource<'_> {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), BackingError> {
        let out_of_range = BackingError::OutOfRange {
            offset,
            len: buf.len(),
            size: self.len(),
        };
        let start = usize::try_from(offset).map_err(|_| out_of_range)?;
        let end = start.checked_add(buf.len()).ok_or(out_of_range)?;
        let src = self.bytes.get(start..end).ok_or(out_of_range)?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

/// Key/value environment of the host loader.
pub trait Environment {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn unset(&mut self, key: &str);
}

impl Environment for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.insert(key.to_string(), value.to_string());
    }

    fn unset(&mut self, key: &str) {
        self.remove(key);
    }
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) {
        (**self).set(key, value)
    }

    fn unset(&mut self, key: &str) {
        (**self).unset(key)
    }
}

/// Turns the progress indicator off until dropped, then restores the prior state.
pub struct ProgressGuard<'e, E: Environment + ?Sized> {
    env: &'e mut E,
    saved: Option<String>,
}

impl<'e, E: Environment + ?Sized> ProgressGuard<'e, E> {
    pub fn new(env: &'e mut E) -> Self {
        let saved = env.get(PROGRESS_VAR);
        env.set(PROGRESS_VAR, "0");
        Self { env, saved }
    }
}

impl<E: Environment + ?Sized> Drop for ProgressGuard<'_, E> {
    fn drop(&mut self) {
        match self.saved.take() {
            Some(value) => self.env.set(PROGRESS_VAR, &value),
            None => self.env.unset(PROGRESS_VAR),
        }
    }
}

/// A streaming source whose reads never drive the progress indicator.
pub struct QuietSource<S, E> {
    inner: S,
    env: E,
}

impl<S: ByteSource, E: Environment> QuietSource<S, E> {
    pub fn new(inner: S, env: E) -> Self {
        Self { inner, env }
    }

    pub fn into_parts(self) -> (S, E) {
        (self.inner, self.env)
    }
}

impl<S: ByteSource, E: Environment> ByteSource for QuietSource<S, E> {
    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), BackingError> {
        let _quiet = ProgressGuard::new(&mut self.env);
        self.inner.read_at(offset, buf)
    }
}

/// Read `buf.len()` bytes at `offset` from `source`.
pub fn read<S: ByteSource + ?Sized>(
    source: &mut S,
    buf: &mut [u8],
    offset: u64,
) -> Result<(), BackingError> {
    ::log::trace!(target: "backing", "read {} bytes at {:#x}", buf.len(), offset);
    source.read_at(offset, buf)
}
