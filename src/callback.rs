//! Real-mode callback table handed to the boot application.
//!
//! The boot application never touches the BIOS directly. It calls back into us through a
//! small table of function addresses, passing a packed register block; we decide what
//! happens to each interrupt (see [`crate::shim`]). The table is built once by [`install`]
//! and is immutable afterwards.

use alloc::boxed::Box;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use bitflags::bitflags;
use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::log::logger::{log_info, log_warn};
use crate::shim::InterruptHandler;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Eflags: u32 {
        const CARRY = 1 << 0;
        const ZERO = 1 << 6;
        const INTERRUPT = 1 << 9;
    }
}

/// Register block exchanged with the boot application on every callback.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes)]
pub struct CallbackParams {
    /// Interrupt number (or real-mode function address for `call_real`).
    pub vector: u32,
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub unused_esp: u32,
    pub unused_ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub unused_cs: u32,
    pub ds: u32,
    pub unused_ss: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub eflags: u32,
}

const_assert_eq!(core::mem::size_of::<CallbackParams>(), 64);

#[inline]
fn set_low16(reg: u32, value: u16) -> u32 {
    (reg & !0xffff) | value as u32
}

#[inline]
fn set_high8(reg: u32, value: u8) -> u32 {
    (reg & !0xff00) | ((value as u32) << 8)
}

#[inline]
fn set_low8(reg: u32, value: u8) -> u32 {
    (reg & !0xff) | value as u32
}

impl CallbackParams {
    pub fn interrupt(vector: u8) -> Self {
        Self {
            vector: vector as u32,
            ..Self::default()
        }
    }

    pub fn ax(&self) -> u16 {
        self.eax as u16
    }

    pub fn ah(&self) -> u8 {
        (self.eax >> 8) as u8
    }

    pub fn al(&self) -> u8 {
        self.eax as u8
    }

    pub fn bx(&self) -> u16 {
        self.ebx as u16
    }

    pub fn cx(&self) -> u16 {
        self.ecx as u16
    }

    pub fn ch(&self) -> u8 {
        (self.ecx >> 8) as u8
    }

    pub fn cl(&self) -> u8 {
        self.ecx as u8
    }

    pub fn dx(&self) -> u16 {
        self.edx as u16
    }

    pub fn dh(&self) -> u8 {
        (self.edx >> 8) as u8
    }

    pub fn dl(&self) -> u8 {
        self.edx as u8
    }

    pub fn si(&self) -> u16 {
        self.esi as u16
    }

    pub fn di(&self) -> u16 {
        self.edi as u16
    }

    pub fn ds(&self) -> u16 {
        self.ds as u16
    }

    pub fn es(&self) -> u16 {
        self.es as u16
    }

    pub fn set_ax(&mut self, value: u16) {
        self.eax = set_low16(self.eax, value);
    }

    pub fn set_ah(&mut self, value: u8) {
        self.eax = set_high8(self.eax, value);
    }

    pub fn set_al(&mut self, value: u8) {
        self.eax = set_low8(self.eax, value);
    }

    pub fn set_bx(&mut self, value: u16) {
        self.ebx = set_low16(self.ebx, value);
    }

    pub fn set_bl(&mut self, value: u8) {
        self.ebx = set_low8(self.ebx, value);
    }

    pub fn set_cx(&mut self, value: u16) {
        self.ecx = set_low16(self.ecx, value);
    }

    pub fn set_ch(&mut self, value: u8) {
        self.ecx = set_high8(self.ecx, value);
    }

    pub fn set_cl(&mut self, value: u8) {
        self.ecx = set_low8(self.ecx, value);
    }

    pub fn set_dx(&mut self, value: u16) {
        self.edx = set_low16(self.edx, value);
    }

    pub fn set_dh(&mut self, value: u8) {
        self.edx = set_high8(self.edx, value);
    }

    pub fn set_dl(&mut self, value: u8) {
        self.edx = set_low8(self.edx, value);
    }

    pub fn flags(&self) -> Eflags {
        Eflags::from_bits_retain(self.eflags)
    }

    pub fn carry(&self) -> bool {
        self.flags().contains(Eflags::CARRY)
    }

    pub fn set_carry(&mut self, carry: bool) {
        let mut flags = self.flags();
        flags.set(Eflags::CARRY, carry);
        self.eflags = flags.bits();
    }
}

/// 32-bit addresses of the two callback entry points.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackFunctions {
    pub call_interrupt: u32,
    pub call_real: u32,
}

/// Root of the callback table, referenced from the boot descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootAppCallback {
    /// 32-bit address of a [`CallbackFunctions`].
    pub fns: u32,
    pub drive: u32,
}

static HANDLER: AtomicPtr<Box<dyn InterruptHandler>> = AtomicPtr::new(ptr::null_mut());

// Boot applications run in a 32-bit address space.
fn addr32(addr: usize) -> u32 {
    addr as u32
}

/// Make `handler` the target of every callback and build the table pointing at it.
///
/// Intended to run once per boot attempt. The handler and table live for the rest of
/// execution since the boot application may call back at any point until it exits boot
/// services.
pub fn install(handler: Box<dyn InterruptHandler>, drive: u8) -> &'static BootAppCallback {
    let slot = Box::into_raw(Box::new(handler));
    if !HANDLER.swap(slot, Ordering::AcqRel).is_null() {
        log_warn("callback", "replacing an installed interrupt handler");
    }

    let fns: &'static CallbackFunctions = Box::leak(Box::new(CallbackFunctions {
        call_interrupt: addr32(call_interrupt_thunk as usize),
        call_real: addr32(call_real_thunk as usize),
    }));
    log_info("callback", "real-mode callbacks installed");
    Box::leak(Box::new(BootAppCallback {
        fns: addr32(fns as *const CallbackFunctions as usize),
        drive: drive as u32,
    }))
}

/// Route `params` to the installed handler. Returns `false` if nothing is installed.
pub fn dispatch_interrupt(params: &mut CallbackParams) -> bool {
    // SAFETY: the slot only ever holds pointers leaked by `install`, and execution is
    // single-threaded, so no other reference to the handler is live.
    match unsafe { HANDLER.load(Ordering::Acquire).as_mut() } {
        Some(handler) => {
            handler.call_interrupt(params);
            true
        }
        None => false,
    }
}

pub fn dispatch_real(params: &mut CallbackParams) -> bool {
    // SAFETY: as in `dispatch_interrupt`.
    match unsafe { HANDLER.load(Ordering::Acquire).as_mut() } {
        Some(handler) => {
            handler.call_real(params);
            true
        }
        None => false,
    }
}

pub extern "C" fn call_interrupt_thunk(params: *mut CallbackParams) {
    // SAFETY: the boot application passes a valid register block for the call's duration.
    if let Some(params) = unsafe { params.as_mut() } {
        dispatch_interrupt(params);
    }
}

pub extern "C" fn call_real_thunk(params: *mut CallbackParams) {
    // SAFETY: as above.
    if let Some(params) = unsafe { params.as_mut() } {
        dispatch_real(params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    #[test]
    fn register_halves_are_independent() {
        let mut p = CallbackParams::interrupt(0x13);
        p.eax = 0xdead_0000;
        p.set_ah(0x42);
        p.set_al(0x07);
        assert_eq!(p.ax(), 0x4207);
        assert_eq!({ p.eax }, 0xdead_4207);

        p.set_dx(0x0180);
        assert_eq!((p.dh(), p.dl()), (0x01, 0x80));
        p.set_cl(0xff);
        p.set_ch(0x12);
        assert_eq!(p.cx(), 0x12ff);
    }

    #[test]
    fn carry_flag_leaves_other_flags_alone() {
        let mut p = CallbackParams {
            eflags: (Eflags::INTERRUPT | Eflags::ZERO).bits(),
            ..CallbackParams::default()
        };
        p.set_carry(true);
        assert!(p.carry());
        assert!(p.flags().contains(Eflags::INTERRUPT | Eflags::ZERO));
        p.set_carry(false);
        assert!(!p.carry());
        assert_eq!(p.flags(), Eflags::INTERRUPT | Eflags::ZERO);
    }

    struct Recorder(Rc<RefCell<Vec<(bool, u32)>>>);

    impl InterruptHandler for Recorder {
        fn call_interrupt(&mut self, params: &mut CallbackParams) {
            self.0.borrow_mut().push((false, params.vector));
            params.set_ah(0);
        }

        fn call_real(&mut self, params: &mut CallbackParams) {
            self.0.borrow_mut().push((true, params.vector));
        }
    }

    // The only test that touches the global handler slot.
    #[test]
    fn installed_table_routes_to_handler() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let table = install(Box::new(Recorder(seen.clone())), 0x80);
        assert_eq!(table.drive, 0x80);
        assert_ne!(table.fns, 0);

        let mut p = CallbackParams::interrupt(0x13);
        p.set_ah(0x41);
        call_interrupt_thunk(&mut p);
        assert_eq!(p.ah(), 0);

        let mut p = CallbackParams {
            vector: 0x7c00,
            ..CallbackParams::default()
        };
        call_real_thunk(&mut p);
        call_interrupt_thunk(ptr::null_mut());

        assert_eq!(*seen.borrow(), [(false, 0x13), (true, 0x7c00)]);
    }
}
