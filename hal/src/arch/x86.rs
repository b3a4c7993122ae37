//! # x86 Port I/O and Delays
//!
//! Legacy I/O space access with `in`/`out`, valid in both 32-bit protected
//! mode firmware and 64-bit long mode.

use core::arch::asm;

use crate::delay::Delay;
use crate::io::PortIo;

/// POST diagnostic port; writes take roughly one microsecond on the ISA bus
const POST_PORT: u16 = 0x80;

/// Read a 32-bit value from an I/O port
///
/// # Safety
/// Reading from invalid ports can cause undefined behavior.
#[inline]
pub unsafe fn inl(port: u16) -> u32 {
    let value: u32;
    unsafe { asm!("in eax, dx", out("eax") value, in("dx") port, options(nostack, preserves_flags)); }
    value
}

/// Write a 32-bit value to an I/O port
///
/// Not `nomem`: a write may hand the device the address of a frame that was
/// just filled in, so prior stores must stay ordered before it.
///
/// # Safety
/// Writing to invalid ports can cause undefined behavior.
#[inline]
pub unsafe fn outl(port: u16, value: u32) {
    unsafe { asm!("out dx, eax", in("dx") port, in("eax") value, options(nostack, preserves_flags)); }
}

/// Write a byte to an I/O port
///
/// # Safety
/// Writing to invalid ports can cause undefined behavior.
#[inline]
pub unsafe fn outb(port: u16, value: u8) {
    unsafe { asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags)); }
}

/// Port accessor backed by the `in`/`out` instructions
#[derive(Debug)]
pub struct X86PortIo {
    _private: (),
}

impl X86PortIo {
    /// Create the accessor
    ///
    /// # Safety
    /// The caller must be allowed to execute port I/O and must only hand
    /// this accessor to drivers that own the ports they touch.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PortIo for X86PortIo {
    #[inline]
    fn read_u32(&self, port: u16) -> u32 {
        // SAFETY: port ownership established in `X86PortIo::new`
        unsafe { inl(port) }
    }

    #[inline]
    fn write_u32(&self, port: u16, value: u32) {
        // SAFETY: port ownership established in `X86PortIo::new`
        unsafe { outl(port, value) }
    }
}

/// Microsecond delay made of POST port writes
///
/// Uncalibrated but independent of CPU speed, which is what matters before
/// any timer has been programmed.
#[derive(Debug)]
pub struct PortDelay {
    _private: (),
}

impl PortDelay {
    /// Create the delay source
    ///
    /// # Safety
    /// Port 0x80 must be free for scratch writes.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl Delay for PortDelay {
    fn delay_us(&self, us: u32) {
        for _ in 0..us {
            // SAFETY: port 0x80 reserved for scratch writes in `PortDelay::new`
            unsafe { outb(POST_PORT, 0) }
        }
    }
}
