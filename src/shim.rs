//! Interrupt interception.
//!
//! Every interrupt the boot application raises arrives here. Disk interrupts for the
//! emulated drive are answered from the [`VirtualDisk`]; VBE mode queries are passed to the
//! real handler and then edited unless graphics were requested; everything else goes
//! straight through. Each call is handled in isolation and never retried.

use bitflags::bitflags;

use crate::callback::CallbackParams;
use crate::int13::{self, INT13_VECTOR};
use crate::log::logger::log_debug;
use crate::memory::{real_ptr, PhysMemory};
use crate::vdisk::VirtualDisk;

pub const INT10_VECTOR: u32 = 0x10;
/// VBE "return mode information".
pub const VBE_MODE_INFO: u16 = 0x4f01;
pub const VDISK_DRIVE: u8 = 0x80;

bitflags! {
    /// Leading bits of the VBE mode attributes word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VbeModeAttributes: u16 {
        const SUPPORTED = 1 << 0;
        const TTY = 1 << 2;
        const COLOR = 1 << 3;
        const GRAPHICS = 1 << 4;
    }
}

/// Receiver of the boot application's callbacks.
pub trait InterruptHandler {
    fn call_interrupt(&mut self, params: &mut CallbackParams);
    fn call_real(&mut self, params: &mut CallbackParams);
}

/// The platform's own way of executing a real-mode interrupt or far call.
pub trait RealModeServices {
    fn call_interrupt(&mut self, params: &mut CallbackParams);
    fn call_real(&mut self, params: &mut CallbackParams);
}

pub struct InterruptShim<'a, M, R> {
    disk: VirtualDisk<'a>,
    memory: M,
    services: R,
    drive: u8,
    gui: bool,
}

impl<'a, M: PhysMemory, R: RealModeServices> InterruptShim<'a, M, R> {
    pub fn new(disk: VirtualDisk<'a>, memory: M, services: R, gui: bool) -> Self {
        Self {
            disk,
            memory,
            services,
            drive: VDISK_DRIVE,
            gui,
        }
    }

    pub fn with_drive(mut self, drive: u8) -> Self {
        self.drive = drive;
        self
    }

    pub fn drive(&self) -> u8 {
        self.drive
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn disk_mut(&mut self) -> &mut VirtualDisk<'a> {
        &mut self.disk
    }

    pub fn services(&self) -> &R {
        &self.services
    }

    fn query_vbe_mode(&mut self, params: &mut CallbackParams) {
        let attributes = real_ptr(params.es(), params.di());
        self.services.call_interrupt(params);
        let masked = self
            .memory
            .read_u16(attributes)
            .map(|raw| VbeModeAttributes::from_bits_retain(raw) - VbeModeAttributes::SUPPORTED)
            .and_then(|attrs| self.memory.write_u16(attributes, attrs.bits()));
        if masked.is_err() {
            log_debug("shim", "VBE mode info buffer is not addressable");
        }
    }
}

impl<M: PhysMemory, R: RealModeServices> InterruptHandler for InterruptShim<'_, M, R> {
    fn call_interrupt(&mut self, params: &mut CallbackParams) {
        match params.vector {
            INT13_VECTOR if params.dl() == self.drive => {
                int13::emulate(&mut self.disk, &mut self.memory, params);
            }
            INT10_VECTOR if params.ax() == VBE_MODE_INFO && !self.gui => {
                self.query_vbe_mode(params);
            }
            _ => self.services.call_interrupt(params),
        }
    }

    fn call_real(&mut self, params: &mut CallbackParams) {
        self.services.call_real(params);
    }
}
