//! # MPT Message Frames
//!
//! Wire layouts exchanged with the IOC. Field order and widths are fixed by
//! the Message Passing Interface; everything multi-byte is little-endian.
//!
//! - [`IocInitRequest`] / [`IocInitReply`]: pushed and pulled through the
//!   doorbell during the handshake
//! - [`ScsiIoFrame`]: a [`ScsiIoRequest`] immediately followed by one
//!   [`SgeSimple32`], posted by address to the request queue
//! - [`ReplyFrame`]: memory the IOC may fill with an address reply

use core::cell::UnsafeCell;
use core::mem::{align_of, size_of};

use bitflags::bitflags;
use helix_hal::BusAddr;
use static_assertions::{assert_eq_size, const_assert_eq};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Message function codes
pub mod function {
    /// SCSI I/O request
    pub const SCSI_IO_REQUEST: u8 = 0x00;
    /// IOC initialization
    pub const IOC_INIT: u8 = 0x02;
}

/// Context tag carried by every SCSI-IO request and echoed on completion
pub const MPT_CONTEXT_MAGIC: u32 = 0xaaaa_5555;

/// Size of the reply frame handed to the IOC
pub const REPLY_FRAME_SIZE: usize = 128;

/// CDB slot in a SCSI-IO request
pub const CDB_SLOT_LEN: usize = 16;

/// Sense buffer length advertised in a SCSI-IO request
pub const SENSE_BUFFER_LEN: usize = 32;

/// Largest length a simple SGE can describe (24 bits)
pub const MAX_SGE_LENGTH: u32 = 0x00ff_ffff;

/// `WhoInit` value for a host driver
pub const WHO_INIT_HOST_DRIVER: u8 = 0x02;

/// IOC status: success
pub const IOC_STATUS_SUCCESS: u16 = 0x0000;

/// IOC status code bits (bit 15 flags log info)
pub const IOC_STATUS_MASK: u16 = 0x7fff;

/// IOC status flag: `IOCLogInfo` is valid
pub const IOC_STATUS_LOG_INFO_AVAILABLE: u16 = 0x8000;

// =============================================================================
// REPLY FRAME
// =============================================================================

/// Reply frame memory owned by the host and written only by the IOC
#[repr(C, align(8))]
pub struct ReplyFrame {
    bytes: UnsafeCell<[u8; REPLY_FRAME_SIZE]>,
}

// SAFETY: the CPU never touches the bytes after construction; the IOC is the
// only writer and nothing reads them back.
unsafe impl Sync for ReplyFrame {}

impl ReplyFrame {
    /// Create a zeroed reply frame
    pub const fn new() -> Self {
        Self { bytes: UnsafeCell::new([0; REPLY_FRAME_SIZE]) }
    }

    /// CPU address of the first byte
    pub fn cpu_addr(&self) -> usize {
        self.bytes.get() as usize
    }
}

impl Default for ReplyFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ReplyFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReplyFrame").field("cpu_addr", &self.cpu_addr()).finish()
    }
}

// =============================================================================
// IOC INIT
// =============================================================================

/// IOC-Init request, sent word by word through the doorbell
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IocInitRequest {
    /// Which system sent this init request
    pub who_init: u8,
    /// Reserved
    pub reserved1: u8,
    /// Chain offset
    pub chain_offset: u8,
    /// Message function
    pub function: u8,
    /// Flags
    pub flags: u8,
    /// Max devices the host can handle
    pub max_devices: u8,
    /// Max buses the host can handle
    pub max_buses: u8,
    /// Message flags
    pub message_flags: u8,
    /// Message context
    pub message_context: u32,
    /// Reply frame size in bytes
    pub reply_frame_size: u16,
    /// Reserved
    pub reserved2: u16,
    /// Upper 32 bits of message frame addresses
    pub host_mfa_high_addr: u32,
    /// Upper 32 bits of sense buffer addresses
    pub sense_buffer_high_addr: u32,
}

impl IocInitRequest {
    /// Size in bytes
    pub const SIZE: usize = 24;
    /// Size in doorbell words
    pub const WORDS: usize = Self::SIZE / 4;
    /// Devices advertised to the IOC
    pub const MAX_DEVICES: u8 = 8;
    /// Buses advertised to the IOC
    pub const MAX_BUSES: u8 = 1;

    /// The request this driver sends after every reset
    pub const fn new() -> Self {
        Self {
            who_init: WHO_INIT_HOST_DRIVER,
            reserved1: 0,
            chain_offset: 0,
            function: function::IOC_INIT,
            flags: 0,
            max_devices: Self::MAX_DEVICES,
            max_buses: Self::MAX_BUSES,
            message_flags: 0,
            message_context: 0,
            reply_frame_size: REPLY_FRAME_SIZE as u16,
            reserved2: 0,
            host_mfa_high_addr: 0,
            sense_buffer_high_addr: 0,
        }
    }

    /// Serialize in wire order
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        b[0] = self.who_init;
        b[1] = self.reserved1;
        b[2] = self.chain_offset;
        b[3] = self.function;
        b[4] = self.flags;
        b[5] = self.max_devices;
        b[6] = self.max_buses;
        b[7] = self.message_flags;
        b[8..12].copy_from_slice(&self.message_context.to_le_bytes());
        b[12..14].copy_from_slice(&self.reply_frame_size.to_le_bytes());
        b[14..16].copy_from_slice(&self.reserved2.to_le_bytes());
        b[16..20].copy_from_slice(&self.host_mfa_high_addr.to_le_bytes());
        b[20..24].copy_from_slice(&self.sense_buffer_high_addr.to_le_bytes());
        b
    }

    /// Split into the 32-bit words written to the doorbell
    pub fn to_words(&self) -> [u32; Self::WORDS] {
        let bytes = self.to_bytes();
        let mut words = [0u32; Self::WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words
    }
}

impl Default for IocInitRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// IOC-Init reply, read back 16 bits at a time from the doorbell
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IocInitReply {
    /// Which subsystem sent the init request
    pub who_init: u8,
    /// Reserved
    pub reserved1: u8,
    /// Message length in words
    pub message_length: u8,
    /// Message function
    pub function: u8,
    /// Flags
    pub flags: u8,
    /// Max devices accepted
    pub max_devices: u8,
    /// Max buses accepted
    pub max_buses: u8,
    /// Message flags
    pub message_flags: u8,
    /// Message context
    pub message_context: u32,
    /// Reserved
    pub reserved2: u16,
    /// IOC status
    pub ioc_status: u16,
    /// IOC log information
    pub ioc_log_info: u32,
}

impl IocInitReply {
    /// Size in bytes
    pub const SIZE: usize = 20;
    /// Size in doorbell half-words
    pub const HALF_WORDS: usize = Self::SIZE / 2;

    /// Reassemble from doorbell half-words
    pub fn from_half_words(halves: &[u16; Self::HALF_WORDS]) -> Self {
        let mut b = [0u8; Self::SIZE];
        for (chunk, half) in b.chunks_exact_mut(2).zip(halves.iter()) {
            chunk.copy_from_slice(&half.to_le_bytes());
        }
        Self {
            who_init: b[0],
            reserved1: b[1],
            message_length: b[2],
            function: b[3],
            flags: b[4],
            max_devices: b[5],
            max_buses: b[6],
            message_flags: b[7],
            message_context: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
            reserved2: u16::from_le_bytes([b[12], b[13]]),
            ioc_status: u16::from_le_bytes([b[14], b[15]]),
            ioc_log_info: u32::from_le_bytes([b[16], b[17], b[18], b[19]]),
        }
    }

    /// Split into doorbell half-words
    pub fn to_half_words(&self) -> [u16; Self::HALF_WORDS] {
        let mut b = [0u8; Self::SIZE];
        b[0] = self.who_init;
        b[1] = self.reserved1;
        b[2] = self.message_length;
        b[3] = self.function;
        b[4] = self.flags;
        b[5] = self.max_devices;
        b[6] = self.max_buses;
        b[7] = self.message_flags;
        b[8..12].copy_from_slice(&self.message_context.to_le_bytes());
        b[12..14].copy_from_slice(&self.reserved2.to_le_bytes());
        b[14..16].copy_from_slice(&self.ioc_status.to_le_bytes());
        b[16..20].copy_from_slice(&self.ioc_log_info.to_le_bytes());
        let mut halves = [0u16; Self::HALF_WORDS];
        for (half, chunk) in halves.iter_mut().zip(b.chunks_exact(2)) {
            *half = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        halves
    }

    /// IOC status code without the log-info flag
    pub const fn status(&self) -> u16 {
        self.ioc_status & IOC_STATUS_MASK
    }

    /// Check if `ioc_log_info` carries data
    pub const fn has_log_info(&self) -> bool {
        self.ioc_status & IOC_STATUS_LOG_INFO_AVAILABLE != 0
    }

    /// Check if this acknowledges an IOC-Init with success
    pub const fn is_success(&self) -> bool {
        self.function == function::IOC_INIT && self.status() == IOC_STATUS_SUCCESS
    }
}

// =============================================================================
// SCSI IO
// =============================================================================

/// Data direction field of the SCSI-IO control word
pub mod control {
    /// No data phase
    pub const NO_DATA: u32 = 0;
    /// Host to target
    pub const DATA_OUT: u32 = 1 << 24;
    /// Target to host
    pub const DATA_IN: u32 = 2 << 24;
}

/// SCSI-IO request header; multi-byte fields are stored little-endian
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiIoRequest {
    /// Target ID
    pub target_id: u8,
    /// Bus number
    pub bus: u8,
    /// Chain offset
    pub chain_offset: u8,
    /// Message function
    pub function: u8,
    /// CDB length
    pub cdb_length: u8,
    /// Sense buffer length
    pub sense_buffer_length: u8,
    /// Reserved
    pub reserved: u8,
    /// Message flags
    pub message_flags: u8,
    message_context: u32,
    /// Eight-byte SCSI LUN
    pub lun: [u8; 8],
    control: u32,
    /// Command descriptor block
    pub cdb: [u8; CDB_SLOT_LEN],
    data_length: u32,
    sense_buffer_low_addr: u32,
}

impl ScsiIoRequest {
    /// Size in bytes
    pub const SIZE: usize = 48;

    /// Request header for `target`/`lun`, tagged with [`MPT_CONTEXT_MAGIC`]
    pub const fn new(target_id: u8, lun: u8) -> Self {
        Self {
            target_id,
            bus: 0,
            chain_offset: 0,
            function: function::SCSI_IO_REQUEST,
            cdb_length: CDB_SLOT_LEN as u8,
            sense_buffer_length: SENSE_BUFFER_LEN as u8,
            reserved: 0,
            message_flags: 0,
            message_context: MPT_CONTEXT_MAGIC.to_le(),
            lun: [0, lun, 0, 0, 0, 0, 0, 0],
            control: control::NO_DATA,
            cdb: [0; CDB_SLOT_LEN],
            data_length: 0,
            sense_buffer_low_addr: 0,
        }
    }

    /// Message context
    pub const fn message_context(&self) -> u32 {
        u32::from_le(self.message_context)
    }

    /// Control word
    pub const fn control(&self) -> u32 {
        u32::from_le(self.control)
    }

    /// Set the control word
    pub fn set_control(&mut self, control: u32) {
        self.control = control.to_le();
    }

    /// Total transfer length
    pub const fn data_length(&self) -> u32 {
        u32::from_le(self.data_length)
    }

    /// Set the total transfer length
    pub fn set_data_length(&mut self, length: u32) {
        self.data_length = length.to_le();
    }

    /// Sense buffer bus address
    pub const fn sense_buffer(&self) -> BusAddr {
        BusAddr::new(u32::from_le(self.sense_buffer_low_addr))
    }

    /// Set the sense buffer bus address
    pub fn set_sense_buffer(&mut self, addr: BusAddr) {
        self.sense_buffer_low_addr = addr.as_u32().to_le();
    }

    /// LUN number (byte 1 of the SCSI LUN)
    pub const fn lun_number(&self) -> u8 {
        self.lun[1]
    }
}

bitflags! {
    /// Simple SGE flags, in their position within the flags/length word
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SgeFlags: u32 {
        /// Last element of the whole list
        const END_OF_LIST = 1 << 24;
        /// Address is 64 bits wide
        const ADDRESS_64 = 1 << 25;
        /// Buffer holds data for the IOC (host to IOC)
        const CONTAINS_DATA = 1 << 26;
        /// Address is IOC-local
        const LOCAL_ADDRESS = 1 << 27;
        /// Element type: simple
        const ELEMENT_SIMPLE = 1 << 28;
        /// Element type high bit (chain when set with simple)
        const ELEMENT_TYPE_HIGH = 1 << 29;
        /// Last element of this buffer
        const END_OF_BUFFER = 1 << 30;
        /// Last element of this segment
        const LAST_ELEMENT = 1 << 31;

        /// A single simple element describing the entire transfer
        const SINGLE_SEGMENT = Self::END_OF_LIST.bits()
            | Self::ELEMENT_SIMPLE.bits()
            | Self::END_OF_BUFFER.bits()
            | Self::LAST_ELEMENT.bits();
    }
}

/// Simple 32-bit scatter-gather element
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgeSimple32 {
    flags_length: u32,
    data_buffer_address_low: u32,
}

impl SgeSimple32 {
    /// Size in bytes
    pub const SIZE: usize = 8;

    /// Describe `length` bytes at `address`; the length is cut to 24 bits
    pub fn new(length: u32, address: BusAddr, flags: SgeFlags) -> Self {
        Self {
            flags_length: ((length & MAX_SGE_LENGTH) | flags.bits()).to_le(),
            data_buffer_address_low: address.as_u32().to_le(),
        }
    }

    /// Buffer length
    pub const fn length(&self) -> u32 {
        u32::from_le(self.flags_length) & MAX_SGE_LENGTH
    }

    /// Flags
    pub const fn flags(&self) -> SgeFlags {
        SgeFlags::from_bits_truncate(u32::from_le(self.flags_length) & !MAX_SGE_LENGTH)
    }

    /// Two-bit element type
    pub const fn element_type(&self) -> u8 {
        ((u32::from_le(self.flags_length) >> 28) & 0x3) as u8
    }

    /// Buffer bus address
    pub const fn address(&self) -> BusAddr {
        BusAddr::new(u32::from_le(self.data_buffer_address_low))
    }
}

/// A SCSI-IO request with its single trailing SGE, posted as one frame
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScsiIoFrame {
    /// Request header
    pub request: ScsiIoRequest,
    /// Scatter-gather element
    pub sge: SgeSimple32,
}

impl ScsiIoFrame {
    /// Size in bytes
    pub const SIZE: usize = ScsiIoRequest::SIZE + SgeSimple32::SIZE;

    /// Raw frame bytes as the IOC reads them
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        // SAFETY: both parts are packed plain data with no padding, and the
        // sizes are asserted equal below.
        unsafe { core::mem::transmute::<Self, [u8; Self::SIZE]>(*self) }
    }

    /// Rebuild a frame from raw bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        // SAFETY: every bit pattern is a valid frame; the read is unaligned.
        unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Self) }
    }
}

// =============================================================================
// LAYOUT CHECKS
// =============================================================================

assert_eq_size!(IocInitRequest, [u8; IocInitRequest::SIZE]);
assert_eq_size!(IocInitReply, [u8; IocInitReply::SIZE]);
assert_eq_size!(ScsiIoRequest, [u8; ScsiIoRequest::SIZE]);
assert_eq_size!(SgeSimple32, [u8; SgeSimple32::SIZE]);
assert_eq_size!(ScsiIoFrame, [u8; ScsiIoFrame::SIZE]);
assert_eq_size!(ReplyFrame, [u8; REPLY_FRAME_SIZE]);

const_assert_eq!(IocInitRequest::SIZE, 24);
const_assert_eq!(IocInitReply::SIZE, 20);
const_assert_eq!(ScsiIoFrame::SIZE, 56);
const_assert_eq!(align_of::<IocInitRequest>(), 8);
const_assert_eq!(align_of::<ScsiIoFrame>(), 8);
const_assert_eq!(align_of::<ReplyFrame>(), 8);
const_assert_eq!(IocInitRequest::new().reply_frame_size as usize, size_of::<ReplyFrame>());
