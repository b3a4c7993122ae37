//! # Busy Delays
//!
//! Boot drivers poll; between polls they back off for a few microseconds so
//! they do not saturate the bus.

/// Microsecond busy wait
pub trait Delay {
    /// Spin for at least `us` microseconds
    fn delay_us(&self, us: u32);
}

impl<T: Delay + ?Sized> Delay for &T {
    #[inline]
    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Delay that returns immediately
///
/// Useful on emulated devices where register reads already make progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl Delay for NoDelay {
    #[inline]
    fn delay_us(&self, _us: u32) {}
}
