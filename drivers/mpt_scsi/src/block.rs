//! # Block Layer Seam
//!
//! The driver produces one [`BlockDrive`] per registered LUN and consumes a
//! [`DriveRegistry`] that stores drives and hands out boot priorities.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use helix_hal::Platform;

use crate::command::ScsiCommand;
use crate::controller::MptController;
use crate::frame::CDB_SLOT_LEN;
use crate::pci::{Bdf, PciDevice};
use crate::MptError;

// =============================================================================
// DISK STATUS
// =============================================================================

/// Disk operation status, as reported to the block layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DiskStatus {
    /// Command completed
    Success = 0x00,
    /// Bad request parameters
    Param = 0x01,
    /// I/O error on the medium or adapter
    BadTrack = 0x0c,
    /// Device did not answer in time
    Timeout = 0x80,
    /// Device not ready
    NotReady = 0xaa,
}

impl DiskStatus {
    /// Check if the status reports success
    pub const fn is_success(self) -> bool {
        matches!(self, DiskStatus::Success)
    }
}

impl From<MptError> for DiskStatus {
    fn from(err: MptError) -> Self {
        match err {
            MptError::NotReady => DiskStatus::NotReady,
            MptError::RetryExhausted => DiskStatus::BadTrack,
            MptError::Timeout => DiskStatus::Timeout,
            MptError::BufferTooSmall | MptError::TransferTooLarge => DiskStatus::Param,
            MptError::Hal(_) => DiskStatus::BadTrack,
            MptError::InitReplyRejected { .. }
            | MptError::AllocationFailed
            | MptError::NameTooLong
            | MptError::RegistrationFailed
            | MptError::IoBaseOutOfRange => DiskStatus::NotReady,
        }
    }
}

impl fmt::Display for DiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskStatus::Success => write!(f, "success"),
            DiskStatus::Param => write!(f, "bad parameter"),
            DiskStatus::BadTrack => write!(f, "bad track"),
            DiskStatus::Timeout => write!(f, "timeout"),
            DiskStatus::NotReady => write!(f, "not ready"),
        }
    }
}

// =============================================================================
// BLOCK INTERFACE
// =============================================================================

/// A block I/O request as handed down by the boot loader
#[derive(Debug)]
pub struct DiskOp<'a> {
    /// Transfer buffer
    pub buffer: &'a mut [u8],
    /// Number of blocks
    pub count: u16,
}

impl<'a> DiskOp<'a> {
    /// Create a request for `count` blocks through `buffer`
    pub fn new(buffer: &'a mut [u8], count: u16) -> Self {
        Self { buffer, count }
    }
}

/// A drive that executes SCSI commands
pub trait BlockDrive {
    /// Execute `cdb` synchronously
    fn execute(&self, op: &mut DiskOp<'_>, cdb: &[u8; CDB_SLOT_LEN], block_size: u16) -> DiskStatus;
}

/// Why the block layer would not take a drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveSetupError {
    /// No room to keep the drive
    OutOfMemory,
    /// Drive refused
    Rejected,
}

impl From<DriveSetupError> for MptError {
    fn from(err: DriveSetupError) -> Self {
        match err {
            DriveSetupError::OutOfMemory => MptError::AllocationFailed,
            DriveSetupError::Rejected => MptError::RegistrationFailed,
        }
    }
}

/// Where a drive lives: owning PCI function, target and LUN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveId {
    /// Controller the drive hangs off
    pub pci: PciDevice,
    /// Target ID
    pub target: u8,
    /// LUN
    pub lun: u8,
}

impl DriveId {
    /// Bus/device/function of the owning controller
    pub fn controller(&self) -> Bdf {
        self.pci.bdf
    }
}

/// The block layer drives are registered with
pub trait DriveRegistry {
    /// Boot priority for a drive; lower boots first
    fn boot_priority(&self, id: &DriveId) -> i32;

    /// Take ownership of a drive
    fn setup_drive(
        &mut self,
        id: DriveId,
        drive: Box<dyn BlockDrive>,
        name: &str,
        priority: i32,
    ) -> Result<(), DriveSetupError>;
}

// =============================================================================
// LUN
// =============================================================================

/// One registered logical unit
pub struct MptLun<P: Platform> {
    controller: Arc<MptController<P>>,
    target: u8,
    lun: u8,
}

impl<P: Platform> MptLun<P> {
    /// Create a LUN record on `controller`
    pub fn new(controller: Arc<MptController<P>>, target: u8, lun: u8) -> Self {
        Self { controller, target, lun }
    }

    /// Target ID
    pub fn target(&self) -> u8 {
        self.target
    }

    /// LUN
    pub fn lun(&self) -> u8 {
        self.lun
    }

    /// Owning controller
    pub fn controller(&self) -> &Arc<MptController<P>> {
        &self.controller
    }

    /// Identity handed to the block layer
    pub fn id(&self) -> DriveId {
        DriveId {
            pci: self.controller.handle().pci,
            target: self.target,
            lun: self.lun,
        }
    }
}

impl<P: Platform> fmt::Debug for MptLun<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MptLun")
            .field("controller", &self.controller.handle())
            .field("target", &self.target)
            .field("lun", &self.lun)
            .finish()
    }
}

impl<P: Platform> BlockDrive for MptLun<P> {
    fn execute(&self, op: &mut DiskOp<'_>, cdb: &[u8; CDB_SLOT_LEN], block_size: u16) -> DiskStatus {
        let command = ScsiCommand {
            target: self.target,
            lun: self.lun,
            cdb,
            block_size,
            count: op.count,
        };
        match self.controller.execute_scsi(&command, op.buffer) {
            Ok(()) => DiskStatus::Success,
            Err(err) => {
                log::debug!("[mpt] target {} lun {}: {}", self.target, self.lun, err);
                err.into()
            }
        }
    }
}
