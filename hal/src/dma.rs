//! # Bus Address Translation
//!
//! A DMA-capable adapter needs the bus address of every buffer it touches:
//! request frames, sense buffers, data buffers, reply frames. How a CPU
//! pointer maps to a bus address depends on the memory model the firmware
//! runs in, so drivers ask a translator instead of casting pointers.

use crate::{BusAddr, HalError, HalResult};

/// Turns a CPU-visible buffer into a bus address, valid while the buffer lives
pub trait BusAddressTranslator {
    /// Translate the address of the first byte of a buffer
    fn bus_address(&self, cpu_addr: usize) -> HalResult<BusAddr>;

    /// Translate a typed reference
    fn bus_address_of<T>(&self, value: &T) -> HalResult<BusAddr>
    where
        Self: Sized,
    {
        self.bus_address(value as *const T as usize)
    }
}

impl<T: BusAddressTranslator + ?Sized> BusAddressTranslator for &T {
    #[inline]
    fn bus_address(&self, cpu_addr: usize) -> HalResult<BusAddr> {
        (**self).bus_address(cpu_addr)
    }
}

/// Flat memory model: the bus address is the CPU address, if it fits 32 bits
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityTranslator;

impl BusAddressTranslator for IdentityTranslator {
    fn bus_address(&self, cpu_addr: usize) -> HalResult<BusAddr> {
        match u32::try_from(cpu_addr) {
            Ok(addr) => Ok(BusAddr::new(addr)),
            Err(_) => {
                log::warn!("buffer at {:#x} is above the 32-bit bus window", cpu_addr);
                Err(HalError::InvalidAddress)
            }
        }
    }
}
