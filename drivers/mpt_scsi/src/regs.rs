//! # Fusion-MPT Register Window
//!
//! All registers are 32-bit, little-endian, at fixed offsets from the I/O
//! base taken from BAR0.

use bitflags::bitflags;
use helix_hal::{BusAddr, IoWindow, PortIo};

/// Doorbell: command codes out, handshake words out, reply half-words in
pub const DOORBELL: u16 = 0x00;
/// Write sequence (diagnostic unlock, unused)
pub const WRITE_SEQ: u16 = 0x04;
/// Host diagnostic (unused)
pub const HOST_DIAG: u16 = 0x08;
/// Test base address (unused)
pub const TEST: u16 = 0x0c;
/// Diagnostic read/write data (unused)
pub const DIAG_DATA: u16 = 0x10;
/// Diagnostic read/write address (unused)
pub const DIAG_ADDR: u16 = 0x14;
/// Host interrupt status
pub const INT_STATUS: u16 = 0x30;
/// Host interrupt mask
pub const INT_MASK: u16 = 0x34;
/// Request queue: post the bus address of a request frame
pub const REQUEST_QUEUE: u16 = 0x40;
/// Reply queue: read a reply token, or write a free reply frame address
pub const REPLY_QUEUE: u16 = 0x44;

/// Doorbell command codes
pub mod doorbell {
    /// Message unit reset
    pub const MSG_RESET: u8 = 0x40;
    /// Start a doorbell handshake
    pub const HANDSHAKE: u8 = 0x42;

    /// Encode a doorbell command word
    #[inline]
    pub const fn command(function: u8, size_words: u8) -> u32 {
        ((function as u32) << 24) | ((size_words as u32) << 16)
    }
}

bitflags! {
    /// Host interrupt bits, shared by the status and mask registers
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Interrupts: u32 {
        /// Doorbell event
        const DOORBELL = 1 << 0;
        /// Reply available in the reply queue
        const REPLY = 1 << 3;
    }
}

/// Typed access to one controller's registers
pub struct MptRegisters<'a, I: PortIo + ?Sized> {
    window: IoWindow<'a, I>,
}

impl<I: PortIo + ?Sized> Clone for MptRegisters<'_, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I: PortIo + ?Sized> Copy for MptRegisters<'_, I> {}

impl<I: PortIo + ?Sized> core::fmt::Debug for MptRegisters<'_, I> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MptRegisters").field("io_base", &self.io_base()).finish()
    }
}

impl<'a, I: PortIo + ?Sized> MptRegisters<'a, I> {
    /// Create the register view for the adapter at `io_base`
    pub fn new(io: &'a I, io_base: u16) -> Self {
        Self { window: IoWindow::new(io, io_base) }
    }

    /// Get the I/O base
    pub fn io_base(&self) -> u16 {
        self.window.base()
    }

    /// Write a raw word to the doorbell
    #[inline]
    pub fn write_doorbell(&self, value: u32) {
        self.window.write(DOORBELL, value)
    }

    /// Ring the doorbell with a command
    #[inline]
    pub fn ring(&self, function: u8, size_words: u8) {
        self.write_doorbell(doorbell::command(function, size_words))
    }

    /// Read the doorbell register
    #[inline]
    pub fn read_doorbell(&self) -> u32 {
        self.window.read(DOORBELL)
    }

    /// Read the interrupt status; unknown bits are dropped
    #[inline]
    pub fn int_status(&self) -> Interrupts {
        Interrupts::from_bits_truncate(self.window.read(INT_STATUS))
    }

    /// Clear the interrupt status register
    #[inline]
    pub fn clear_int_status(&self) {
        self.window.write(INT_STATUS, 0)
    }

    /// Program the interrupt mask register
    #[inline]
    pub fn set_int_mask(&self, mask: Interrupts) {
        self.window.write(INT_MASK, mask.bits())
    }

    /// Post a request frame
    #[inline]
    pub fn post_request(&self, frame: BusAddr) {
        self.window.write(REQUEST_QUEUE, frame.as_u32())
    }

    /// Pop one reply token
    #[inline]
    pub fn read_reply(&self) -> u32 {
        self.window.read(REPLY_QUEUE)
    }

    /// Hand the controller a free reply frame
    #[inline]
    pub fn post_reply_frame(&self, frame: BusAddr) {
        self.window.write(REPLY_QUEUE, frame.as_u32())
    }
}
