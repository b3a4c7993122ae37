//! # Helix HAL - Boot Driver Hardware Seams
//!
//! This crate defines the small set of hardware capabilities a boot-time
//! storage driver needs, and nothing else:
//!
//! - **Port I/O**: 32-bit register reads and writes ([`io::PortIo`])
//! - **Delays**: short busy waits between polls ([`delay::Delay`])
//! - **Bus addressing**: turning a CPU buffer into an address the adapter can
//!   DMA to ([`dma::BusAddressTranslator`])
//!
//! Drivers are generic over a [`Platform`] that bundles the three, so the
//! same protocol code runs on real hardware and against an emulated device.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod delay;
pub mod dma;
pub mod io;

// Architecture-specific implementations
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod arch;

use core::fmt;

pub use delay::{Delay, NoDelay};
pub use dma::{BusAddressTranslator, IdentityTranslator};
pub use io::{IoWindow, PortIo};

/// Result type for HAL operations
pub type HalResult<T> = Result<T, HalError>;

/// Errors that can occur in HAL operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalError {
    /// Address cannot be expressed on the bus
    InvalidAddress,
    /// Address is not aligned as the hardware requires
    Misaligned,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::InvalidAddress => write!(f, "address not reachable from the bus"),
            HalError::Misaligned => write!(f, "address misaligned"),
        }
    }
}

/// The platform a driver instance runs on
///
/// Aggregates the capabilities a polled storage driver uses. Implementations
/// are usually zero-sized on real hardware and stateful in tests.
pub trait Platform {
    /// Register access type
    type Io: PortIo;

    /// Busy-wait type
    type Delay: Delay;

    /// Buffer address translation type
    type Dma: BusAddressTranslator;

    /// Get the register accessor
    fn io(&self) -> &Self::Io;

    /// Get the delay source
    fn delay(&self) -> &Self::Delay;

    /// Get the address translator
    fn dma(&self) -> &Self::Dma;
}

/// 32-bit bus address, as seen by a DMA-capable adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BusAddr(u32);

impl BusAddr {
    /// Create a new bus address
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Get the raw address value
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Check if the address is aligned to the given alignment
    #[inline]
    pub const fn is_aligned(self, align: u32) -> bool {
        self.0 % align == 0
    }

    /// Add an offset to the address
    #[inline]
    pub const fn add(self, offset: u32) -> Self {
        Self(self.0.wrapping_add(offset))
    }
}

impl fmt::Display for BusAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Bare-metal x86 platform: real port I/O, POST-port delays, flat addressing
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[derive(Debug)]
pub struct X86Platform {
    io: arch::x86::X86PortIo,
    delay: arch::x86::PortDelay,
    dma: IdentityTranslator,
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl X86Platform {
    /// Create the platform
    ///
    /// # Safety
    /// The caller must own the I/O port space (ring 0 or IOPL 3, no other
    /// driver touching the same ports) and run with flat 32-bit reachable
    /// memory for every buffer handed to the adapter.
    pub unsafe fn new() -> Self {
        Self {
            // SAFETY: forwarded from the caller
            io: unsafe { arch::x86::X86PortIo::new() },
            delay: unsafe { arch::x86::PortDelay::new() },
            dma: IdentityTranslator,
        }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl Platform for X86Platform {
    type Io = arch::x86::X86PortIo;
    type Delay = arch::x86::PortDelay;
    type Dma = IdentityTranslator;

    fn io(&self) -> &Self::Io {
        &self.io
    }

    fn delay(&self) -> &Self::Delay {
        &self.delay
    }

    fn dma(&self) -> &Self::Dma {
        &self.dma
    }
}
