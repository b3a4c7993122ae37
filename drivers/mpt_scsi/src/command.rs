//! # Command Issuer
//!
//! Builds one SCSI-IO frame, posts it and waits for its context tag. The
//! frame, its sense buffer and the data buffer are all borrowed for the
//! duration of the call; the controller lock guarantees nothing else is
//! outstanding meanwhile.

use core::sync::atomic::{compiler_fence, Ordering};

use helix_hal::{BusAddr, BusAddressTranslator, HalError, Platform};

use crate::controller::MptController;
use crate::frame::{
    control, ScsiIoFrame, ScsiIoRequest, SgeFlags, SgeSimple32, CDB_SLOT_LEN, MAX_SGE_LENGTH,
    MPT_CONTEXT_MAGIC, SENSE_BUFFER_LEN,
};
use crate::reply::ReplyPoller;
use crate::{MptError, MptResult};

/// SCSI operation codes that move data from host to target
pub mod opcode {
    /// WRITE(6)
    pub const WRITE_6: u8 = 0x0a;
    /// WRITE(10)
    pub const WRITE_10: u8 = 0x2a;
    /// WRITE AND VERIFY(10)
    pub const WRITE_VERIFY_10: u8 = 0x2e;
    /// WRITE(16)
    pub const WRITE_16: u8 = 0x8a;
    /// WRITE AND VERIFY(16)
    pub const WRITE_VERIFY_16: u8 = 0x8e;
    /// WRITE(12)
    pub const WRITE_12: u8 = 0xaa;
}

/// Check if a CDB moves data from target to host
pub fn cdb_is_read(cdb: &[u8; CDB_SLOT_LEN]) -> bool {
    !matches!(
        cdb[0],
        opcode::WRITE_6
            | opcode::WRITE_10
            | opcode::WRITE_12
            | opcode::WRITE_16
            | opcode::WRITE_VERIFY_10
            | opcode::WRITE_VERIFY_16
    )
}

/// Data phase of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// No data moves
    None,
    /// Target to host
    In,
    /// Host to target
    Out,
}

impl Direction {
    /// Classify a command; a block size of zero means no data phase
    pub fn classify(cdb: &[u8; CDB_SLOT_LEN], block_size: u16) -> Self {
        if block_size == 0 {
            Direction::None
        } else if cdb_is_read(cdb) {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// SCSI-IO control word
    pub const fn control(self) -> u32 {
        match self {
            Direction::None => control::NO_DATA,
            Direction::In => control::DATA_IN,
            Direction::Out => control::DATA_OUT,
        }
    }

    /// SGE flags for the single data segment
    pub fn sge_flags(self) -> SgeFlags {
        match self {
            Direction::Out => SgeFlags::SINGLE_SEGMENT | SgeFlags::CONTAINS_DATA,
            _ => SgeFlags::SINGLE_SEGMENT,
        }
    }
}

/// Everything needed to fill a SCSI-IO frame
#[derive(Debug, Clone, Copy)]
pub struct ScsiCommand<'a> {
    /// Target ID
    pub target: u8,
    /// LUN
    pub lun: u8,
    /// Command block, zero padded
    pub cdb: &'a [u8; CDB_SLOT_LEN],
    /// Logical block size, 0 for non-data commands
    pub block_size: u16,
    /// Number of blocks
    pub count: u16,
}

impl ScsiCommand<'_> {
    /// Bytes moved by this command
    pub fn transfer_length(&self) -> u32 {
        u32::from(self.count) * u32::from(self.block_size)
    }

    /// Build the frame for this command
    pub fn build_frame(&self, data: BusAddr, sense: BusAddr) -> MptResult<ScsiIoFrame> {
        let length = self.transfer_length();
        if length > MAX_SGE_LENGTH {
            return Err(MptError::TransferTooLarge);
        }
        let direction = Direction::classify(self.cdb, self.block_size);

        let mut request = ScsiIoRequest::new(self.target, self.lun);
        request.cdb = *self.cdb;
        request.set_control(direction.control());
        request.set_data_length(length);
        request.set_sense_buffer(sense);

        Ok(ScsiIoFrame {
            request,
            sge: SgeSimple32::new(length, data, direction.sge_flags()),
        })
    }
}

impl<P: Platform> MptController<P> {
    /// Execute one SCSI command synchronously
    ///
    /// Only LUN 0 is served; anything else fails before the hardware is
    /// touched. `buffer` must hold `count * block_size` bytes.
    pub fn execute_scsi(&self, command: &ScsiCommand<'_>, buffer: &mut [u8]) -> MptResult<()> {
        if command.lun != 0 {
            return Err(MptError::NotReady);
        }
        let length = command.transfer_length();
        if length as usize > buffer.len() {
            log::debug!("[mpt] transfer of {} bytes into {} byte buffer", length, buffer.len());
            return Err(MptError::BufferTooSmall);
        }

        let dma = self.platform().dma();
        let mut sense = [0u8; SENSE_BUFFER_LEN];
        let sense_addr = dma.bus_address(sense.as_mut_ptr() as usize)?;
        let data_addr = if length == 0 {
            BusAddr::new(0)
        } else {
            dma.bus_address(buffer.as_mut_ptr() as usize)?
        };

        let frame = command.build_frame(data_addr, sense_addr)?;
        let frame_addr = dma.bus_address_of(&frame)?;
        if !frame_addr.is_aligned(8) {
            return Err(HalError::Misaligned.into());
        }
        let reply_frame = self.reply_frame_addr()?;

        let mut state = self.state.lock();
        if state.needs_reset {
            // A late completion from the abandoned request must not be taken for ours
            log::warn!("[mpt] {} resetting IOC before next command", self.handle().pci.bdf);
            self.reset_locked(&mut state, reply_frame)?;
        }
        let regs = self.regs();
        let mut resubmissions = 0u64;

        log::debug!(
            "[mpt] {} target {} opcode {:#04x} len {} data {} frame {}",
            self.handle().pci.bdf,
            command.target,
            command.cdb[0],
            length,
            data_addr,
            frame_addr
        );

        compiler_fence(Ordering::Release);
        regs.post_request(frame_addr);

        let outcome = ReplyPoller::new(regs, self.platform().delay(), MPT_CONTEXT_MAGIC, reply_frame)
            .poll_delay_us(self.config().poll_delay_us)
            .retry_budget(self.config().retry_budget)
            .poll_timeout(self.config().poll_timeout)
            .wait(|| {
                resubmissions += 1;
                regs.post_request(frame_addr);
            });
        compiler_fence(Ordering::Acquire);

        let stats = &mut state.stats;
        stats.submissions += 1 + resubmissions;
        stats.retries += resubmissions;
        match outcome {
            Ok(_) => stats.completions += 1,
            Err(_) => stats.failures += 1,
        }
        if outcome == Err(MptError::Timeout) {
            state.needs_reset = true;
        }

        outcome.map(|_| ())
    }
}
