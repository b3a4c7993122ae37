//! # Architecture-Specific HAL Modules
//!
//! Real hardware implementations of the HAL traits, selected by the target
//! architecture.

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod x86;

// Re-export the current architecture's implementation
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use x86 as current;
