use r_efi::efi::Status;
use thiserror::Error;

/// Construction-time geometry failures for a [`crate::VirtualDisk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiskError {
    #[error("block size {0} is not a non-zero power of two")]
    InvalidBlockSize(u32),

    #[error("disk geometry overflows the address space")]
    GeometryOverflow,

    #[error("memory image too small: geometry needs {needed} bytes, image has {available}")]
    ImageTooSmall { needed: u64, available: u64 },
}

/// Status codes returned by the emulated Block I/O surface.
///
/// These never abort anything; they are handed back to whoever issued the request (the
/// firmware protocol thunk or the INT 13h emulation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlockIoError {
    #[error("invalid parameter")]
    InvalidParameter,

    #[error("media changed")]
    MediaChanged,

    #[error("buffer size is not a multiple of the block size")]
    BadBufferSize,

    #[error("device is write protected")]
    WriteProtected,

    #[error("backing store read failed")]
    DeviceError,
}

impl BlockIoError {
    pub fn efi_status(self) -> Status {
        match self {
            BlockIoError::InvalidParameter => Status::INVALID_PARAMETER,
            BlockIoError::MediaChanged => Status::MEDIA_CHANGED,
            BlockIoError::BadBufferSize => Status::BAD_BUFFER_SIZE,
            BlockIoError::WriteProtected => Status::WRITE_PROTECTED,
            BlockIoError::DeviceError => Status::DEVICE_ERROR,
        }
    }

    /// INT 13h status byte (returned in AH with CF set).
    pub fn int13_status(self) -> u8 {
        match self {
            BlockIoError::InvalidParameter => 0x04, // sector not found
            BlockIoError::WriteProtected => 0x03,
            BlockIoError::MediaChanged => 0x06,
            BlockIoError::BadBufferSize => 0x09, // data boundary error
            BlockIoError::DeviceError => 0x20,   // controller failure
        }
    }
}

impl From<BackingError> for BlockIoError {
    fn from(_: BackingError) -> Self {
        BlockIoError::DeviceError
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BackingError {
    #[error("read of {len} bytes at offset {offset:#x} is outside the source ({size} bytes)")]
    OutOfRange { offset: u64, len: usize, size: u64 },

    #[error("stream read failed at offset {offset:#x}")]
    Read { offset: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("physical range {addr:#x}+{len:#x} is not addressable")]
    OutOfRange { addr: u64, len: u64 },
}

/// Fatal handoff conditions. None of these are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BootError {
    #[error("FATAL: no boot application")]
    MissingBootImage,

    #[error("FATAL: could not read boot application: {0}")]
    ImageRead(#[from] BackingError),

    #[error("FATAL: could not load boot application: {0}")]
    MalformedImage(&'static str),

    #[error("FATAL: unsupported boot application machine type {0:#06x}")]
    UnsupportedArchitecture(u16),

    #[error("FATAL: {0}")]
    Memory(#[from] MemoryError),

    #[error("FATAL: boot application returned")]
    EntryReturned,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn block_io_errors_map_to_efi_status() {
        assert_eq!(
            BlockIoError::InvalidParameter.efi_status(),
            Status::INVALID_PARAMETER
        );
        assert_eq!(BlockIoError::MediaChanged.efi_status(), Status::MEDIA_CHANGED);
        assert_eq!(BlockIoError::BadBufferSize.efi_status(), Status::BAD_BUFFER_SIZE);
        assert_eq!(BlockIoError::WriteProtected.efi_status(), Status::WRITE_PROTECTED);
        assert_eq!(BlockIoError::DeviceError.efi_status(), Status::DEVICE_ERROR);
    }

    #[test]
    fn backing_failure_becomes_device_error() {
        let err: BlockIoError = BackingError::Read { offset: 0x200 }.into();
        assert_eq!(err, BlockIoError::DeviceError);
    }

    #[test]
    fn fatal_messages_are_short_diagnostics() {
        assert_eq!(
            BootError::MissingBootImage.to_string(),
            "FATAL: no boot application"
        );
        assert_eq!(
            BootError::EntryReturned.to_string(),
            "FATAL: boot application returned"
        );
    }
}
