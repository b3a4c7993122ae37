//! # Register Access
//!
//! Adapters in the legacy I/O space expose 32-bit little-endian registers at
//! fixed offsets from a base port taken from a PCI BAR.

/// 32-bit port I/O
pub trait PortIo {
    /// Read a 32-bit register
    fn read_u32(&self, port: u16) -> u32;

    /// Write a 32-bit register
    fn write_u32(&self, port: u16, value: u32);
}

impl<T: PortIo + ?Sized> PortIo for &T {
    #[inline]
    fn read_u32(&self, port: u16) -> u32 {
        (**self).read_u32(port)
    }

    #[inline]
    fn write_u32(&self, port: u16, value: u32) {
        (**self).write_u32(port, value)
    }
}

/// A device's register window: base port plus register offsets
pub struct IoWindow<'a, I: PortIo + ?Sized> {
    io: &'a I,
    base: u16,
}

impl<I: PortIo + ?Sized> Clone for IoWindow<'_, I> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<I: PortIo + ?Sized> Copy for IoWindow<'_, I> {}

impl<I: PortIo + ?Sized> core::fmt::Debug for IoWindow<'_, I> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IoWindow").field("base", &self.base).finish_non_exhaustive()
    }
}

impl<'a, I: PortIo + ?Sized> IoWindow<'a, I> {
    /// Create a window at `base`
    pub fn new(io: &'a I, base: u16) -> Self {
        Self { io, base }
    }

    /// Get the base port
    pub fn base(&self) -> u16 {
        self.base
    }

    /// Read the register at `offset`
    #[inline]
    pub fn read(&self, offset: u16) -> u32 {
        self.io.read_u32(self.base.wrapping_add(offset))
    }

    /// Write the register at `offset`
    #[inline]
    pub fn write(&self, offset: u16, value: u32) {
        self.io.write_u32(self.base.wrapping_add(offset), value)
    }
}
