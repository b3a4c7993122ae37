//! # Helix Fusion-MPT SCSI Boot Driver
//!
//! Boots from disks behind LSI Fusion-MPT host adapters (53C1030, SAS1068,
//! SAS1068E) before any interrupt handling exists. Everything is polled and
//! synchronous: one request is outstanding per controller at any time.
//!
//! ## Flow
//!
//! ```text
//! setup()
//!   └─ per matching PCI function
//!        ├─ MptController::initialize()   doorbell reset + IOC-Init handshake
//!        └─ scan::scan_targets()          targets 0..7, LUN 0, register drives
//!
//! MptLun::execute()                       later, once per block request
//!   └─ MptController::execute_scsi()      build frame, post, poll for the tag
//! ```
//!
//! ## Modules
//!
//! - [`frame`]: wire layouts (IOC-Init, SCSI-IO + SGE, reply frame)
//! - [`regs`]: register offsets and typed register access
//! - [`handshake`]: reset and IOC-Init over the doorbell
//! - [`reply`]: reply token classification and the completion poller
//! - [`command`]: direction classification and SCSI-IO submission
//! - [`scan`]: target/LUN enumeration and drive naming
//! - [`controller`]: per-controller context and adapter bring-up
//! - [`block`], [`pci`]: the block layer and PCI seams

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod block;
pub mod command;
pub mod config;
pub mod controller;
pub mod frame;
pub mod handshake;
pub mod pci;
pub mod regs;
pub mod reply;
pub mod scan;

#[cfg(test)]
mod testing;

use core::fmt;

use helix_hal::HalError;

pub use block::{BlockDrive, DiskOp, DiskStatus, DriveId, DriveRegistry, DriveSetupError, MptLun};
pub use config::{InitReplyPolicy, MptConfig};
pub use controller::{setup, CommandStats, ControllerHandle, MptController};
pub use pci::{Bdf, PciAccess, PciDevice};
pub use reply::ReplyToken;

/// Result type for driver operations
pub type MptResult<T> = Result<T, MptError>;

/// Errors raised inside the driver
///
/// Callers of the block interface only ever see a [`DiskStatus`]; the
/// conversion lives in one place (`From<MptError> for DiskStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MptError {
    /// LUN other than 0 requested
    NotReady,
    /// A second aliased reply arrived after the retry was spent
    RetryExhausted,
    /// The poll limit expired without a recognizable reply
    Timeout,
    /// The IOC-Init reply reported a failure and policy says reject
    InitReplyRejected {
        /// IOC status from the reply
        status: u16,
    },
    /// Transfer does not fit in the supplied buffer
    BufferTooSmall,
    /// Transfer longer than a single SGE can describe
    TransferTooLarge,
    /// A buffer could not be mapped for the adapter
    Hal(HalError),
    /// The block layer could not store the drive
    AllocationFailed,
    /// Drive name did not fit
    NameTooLong,
    /// The block layer refused the drive
    RegistrationFailed,
    /// BAR0 does not decode to a 16-bit I/O port
    IoBaseOutOfRange,
}

impl From<HalError> for MptError {
    fn from(err: HalError) -> Self {
        MptError::Hal(err)
    }
}

impl fmt::Display for MptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MptError::NotReady => write!(f, "only LUN 0 is supported"),
            MptError::RetryExhausted => write!(f, "aliased reply after retry"),
            MptError::Timeout => write!(f, "no reply from IOC"),
            MptError::InitReplyRejected { status } => {
                write!(f, "IOC-Init failed with status {:#06x}", status)
            }
            MptError::BufferTooSmall => write!(f, "transfer larger than buffer"),
            MptError::TransferTooLarge => write!(f, "transfer exceeds one SGE"),
            MptError::Hal(err) => write!(f, "hal: {}", err),
            MptError::AllocationFailed => write!(f, "out of memory"),
            MptError::NameTooLong => write!(f, "drive name too long"),
            MptError::RegistrationFailed => write!(f, "drive registration refused"),
            MptError::IoBaseOutOfRange => write!(f, "I/O base out of range"),
        }
    }
}
