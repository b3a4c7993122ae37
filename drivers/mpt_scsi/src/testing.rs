//! Emulated Fusion-MPT hardware for unit tests
//!
//! [`EmulatedMpt`] answers the doorbell handshake with a scripted IOC-Init
//! reply, decodes posted SCSI-IO frames and replays reply-queue tokens.
//! Every register access is logged relative to the I/O base.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use helix_hal::{BusAddr, BusAddressTranslator, Delay, HalResult, Platform, PortIo};

use crate::block::{BlockDrive, DiskOp, DiskStatus, DriveId, DriveRegistry, DriveSetupError};
use crate::frame::{function, IocInitReply, ScsiIoFrame, CDB_SLOT_LEN, MPT_CONTEXT_MAGIC};
use crate::pci::{Bdf, PciAccess, PciDevice, PCI_BASE_ADDRESS_0};
use crate::regs::{doorbell, Interrupts, DOORBELL, INT_STATUS, REPLY_QUEUE, REQUEST_QUEUE};
use crate::reply::REPLY_QUEUE_EMPTY;

/// First bus address handed out by [`EmulatedDma`]
const DMA_WINDOW_BASE: u32 = 0x0010_0000;

// =============================================================================
// DEVICE
// =============================================================================

/// One logged register access; offsets are relative to the I/O base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read(u16),
    Write(u16, u32),
}

/// A scripted reply-queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Context reply carrying this tag
    Context(u32),
    /// Address reply for the published reply frame
    AddressReply,
    /// Null token
    Zero,
    /// Any raw value
    Raw(u32),
}

#[derive(Debug)]
struct DeviceState {
    accesses: Vec<Access>,
    handshake_remaining: usize,
    init_words: Vec<u32>,
    init_reply: [u16; IocInitReply::HALF_WORDS],
    init_reply_pos: usize,
    reply_frame: Option<u32>,
    queue: VecDeque<Reply>,
    scripts: VecDeque<Vec<Reply>>,
    idle_polls: u32,
    posted: Vec<ScsiIoFrame>,
}

/// Emulated IOC behind a port I/O window
#[derive(Debug)]
pub struct EmulatedMpt {
    base: u16,
    dma: Option<EmulatedDma>,
    state: RefCell<DeviceState>,
}

impl EmulatedMpt {
    /// Device at `base` that cannot decode posted frames
    pub fn new(base: u16) -> Self {
        Self::build(base, None)
    }

    /// Device at `base` reading posted frames through `dma`
    pub fn with_dma(base: u16, dma: EmulatedDma) -> Self {
        Self::build(base, Some(dma))
    }

    fn build(base: u16, dma: Option<EmulatedDma>) -> Self {
        let good_reply = IocInitReply {
            who_init: 2,
            message_length: (IocInitReply::SIZE / 4) as u8,
            function: function::IOC_INIT,
            max_devices: 8,
            max_buses: 1,
            ..Default::default()
        };
        Self {
            base,
            dma,
            state: RefCell::new(DeviceState {
                accesses: Vec::new(),
                handshake_remaining: 0,
                init_words: Vec::new(),
                init_reply: good_reply.to_half_words(),
                init_reply_pos: IocInitReply::HALF_WORDS,
                reply_frame: None,
                queue: VecDeque::new(),
                scripts: VecDeque::new(),
                idle_polls: 0,
                posted: Vec::new(),
            }),
        }
    }

    pub fn accesses(&self) -> Vec<Access> {
        self.state.borrow().accesses.clone()
    }

    pub fn clear_accesses(&self) {
        self.state.borrow_mut().accesses.clear();
    }

    /// Words received during the last handshake
    pub fn init_request_words(&self) -> Vec<u32> {
        self.state.borrow().init_words.clone()
    }

    /// Reply frame address last written to the reply queue
    pub fn reply_frame(&self) -> Option<u32> {
        self.state.borrow().reply_frame
    }

    pub fn set_reply_frame(&self, addr: u32) {
        self.state.borrow_mut().reply_frame = Some(addr);
    }

    /// IOC-Init reply served on the next handshake
    pub fn set_init_reply(&self, reply: IocInitReply) {
        self.state.borrow_mut().init_reply = reply.to_half_words();
    }

    /// Status reads that report nothing before replies become visible
    pub fn set_idle_polls(&self, polls: u32) {
        self.state.borrow_mut().idle_polls = polls;
    }

    /// Queue replies right now
    pub fn push_replies(&self, replies: &[Reply]) {
        self.state.borrow_mut().queue.extend(replies.iter().copied());
    }

    /// Replies for the next posted frame; unscripted posts complete normally
    pub fn script_replies(&self, replies: &[Reply]) {
        self.state.borrow_mut().scripts.push_back(replies.to_vec());
    }

    /// Frames posted to the request queue, in order
    pub fn posted_frames(&self) -> Vec<ScsiIoFrame> {
        self.state.borrow().posted.clone()
    }

    fn doorbell_write(state: &mut DeviceState, value: u32) {
        if state.handshake_remaining > 0 {
            state.init_words.push(value);
            state.handshake_remaining -= 1;
            if state.handshake_remaining == 0 {
                state.init_reply_pos = 0;
            }
            return;
        }
        match (value >> 24) as u8 {
            doorbell::MSG_RESET => {
                state.reply_frame = None;
                state.queue.clear();
                state.init_reply_pos = IocInitReply::HALF_WORDS;
            }
            doorbell::HANDSHAKE => {
                state.init_words.clear();
                state.handshake_remaining = ((value >> 16) & 0xff) as usize;
            }
            _ => {}
        }
    }

    fn doorbell_read(state: &mut DeviceState) -> u32 {
        match state.init_reply.get(state.init_reply_pos) {
            Some(&half) => {
                state.init_reply_pos += 1;
                // Garbage in the upper half, as on real parts
                0xdead_0000 | u32::from(half)
            }
            None => 0,
        }
    }

    fn post(&self, state: &mut DeviceState, addr: u32) {
        let cpu = self.dma.as_ref().and_then(|dma| dma.cpu_address(BusAddr::new(addr)));
        if let Some(cpu) = cpu {
            // SAFETY: the driver keeps the frame alive until its reply is seen
            let bytes = unsafe { core::ptr::read_unaligned(cpu as *const [u8; ScsiIoFrame::SIZE]) };
            state.posted.push(ScsiIoFrame::from_bytes(&bytes));
        }
        let replies = state
            .scripts
            .pop_front()
            .unwrap_or_else(|| alloc::vec![Reply::Context(MPT_CONTEXT_MAGIC)]);
        state.queue.extend(replies);
    }

    fn pop_reply(state: &mut DeviceState) -> u32 {
        match state.queue.pop_front() {
            Some(Reply::Context(tag)) | Some(Reply::Raw(tag)) => tag,
            Some(Reply::AddressReply) => 0x8000_0000 | (state.reply_frame.unwrap_or(0) >> 1),
            Some(Reply::Zero) => 0,
            None => REPLY_QUEUE_EMPTY,
        }
    }
}

impl PortIo for EmulatedMpt {
    fn read_u32(&self, port: u16) -> u32 {
        let offset = port.wrapping_sub(self.base);
        let mut state = self.state.borrow_mut();
        state.accesses.push(Access::Read(offset));
        match offset {
            DOORBELL => Self::doorbell_read(&mut state),
            INT_STATUS => {
                if state.idle_polls > 0 {
                    state.idle_polls -= 1;
                    0
                } else if state.queue.is_empty() {
                    0
                } else {
                    Interrupts::REPLY.bits()
                }
            }
            REPLY_QUEUE => Self::pop_reply(&mut state),
            _ => 0,
        }
    }

    fn write_u32(&self, port: u16, value: u32) {
        let offset = port.wrapping_sub(self.base);
        let mut state = self.state.borrow_mut();
        state.accesses.push(Access::Write(offset, value));
        match offset {
            DOORBELL => Self::doorbell_write(&mut state, value),
            REQUEST_QUEUE => self.post(&mut state, value),
            REPLY_QUEUE => state.reply_frame = Some(value),
            _ => {}
        }
    }
}

// =============================================================================
// PLATFORM
// =============================================================================

/// Address translator that hands out fake bus addresses
///
/// Each CPU buffer gets its own 4 KiB slot; the low 12 bits are kept so
/// alignment survives translation.
#[derive(Debug, Clone, Default)]
pub struct EmulatedDma {
    map: Rc<RefCell<Vec<(usize, u32)>>>,
}

impl EmulatedDma {
    /// Bus address already assigned to `cpu`
    pub fn lookup(&self, cpu: usize) -> Option<BusAddr> {
        self.map.borrow().iter().find(|(c, _)| *c == cpu).map(|&(_, bus)| BusAddr::new(bus))
    }

    /// CPU address behind a bus address
    pub fn cpu_address(&self, bus: BusAddr) -> Option<usize> {
        self.map.borrow().iter().find(|(_, b)| *b == bus.as_u32()).map(|&(cpu, _)| cpu)
    }
}

impl BusAddressTranslator for EmulatedDma {
    fn bus_address(&self, cpu_addr: usize) -> HalResult<BusAddr> {
        if let Some(bus) = self.lookup(cpu_addr) {
            return Ok(bus);
        }
        let mut map = self.map.borrow_mut();
        let bus = DMA_WINDOW_BASE + (map.len() as u32) * 0x1000 + (cpu_addr & 0xfff) as u32;
        map.push((cpu_addr, bus));
        Ok(BusAddr::new(bus))
    }
}

/// Delay that only counts
#[derive(Debug, Default)]
pub struct CountingDelay {
    calls: Cell<u32>,
    total_us: Cell<u64>,
}

impl CountingDelay {
    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    pub fn total_us(&self) -> u64 {
        self.total_us.get()
    }
}

impl Delay for CountingDelay {
    fn delay_us(&self, us: u32) {
        self.calls.set(self.calls.get() + 1);
        self.total_us.set(self.total_us.get() + u64::from(us));
    }
}

/// Emulated device, delay and translator; clones share the same hardware
#[derive(Debug, Clone)]
pub struct EmulatedPlatform {
    device: Rc<EmulatedMpt>,
    delay: Rc<CountingDelay>,
    dma: EmulatedDma,
}

impl EmulatedPlatform {
    pub fn new(io_base: u16) -> Self {
        let dma = EmulatedDma::default();
        Self {
            device: Rc::new(EmulatedMpt::with_dma(io_base, dma.clone())),
            delay: Rc::new(CountingDelay::default()),
            dma,
        }
    }

    pub fn device(&self) -> &EmulatedMpt {
        &self.device
    }
}

impl Platform for EmulatedPlatform {
    type Io = EmulatedMpt;
    type Delay = CountingDelay;
    type Dma = EmulatedDma;

    fn io(&self) -> &Self::Io {
        &self.device
    }

    fn delay(&self) -> &Self::Delay {
        &self.delay
    }

    fn dma(&self) -> &Self::Dma {
        &self.dma
    }
}

// =============================================================================
// PCI AND BLOCK LAYER
// =============================================================================

/// PCI bus with BAR0 values per function
#[derive(Debug, Default)]
pub struct EmulatedPciBus {
    devices: Vec<PciDevice>,
    bars: Vec<(Bdf, u32)>,
}

impl EmulatedPciBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: PciDevice, bar0: u32) {
        self.devices.push(device);
        self.bars.push((device.bdf, bar0));
    }
}

impl PciAccess for EmulatedPciBus {
    fn devices(&self) -> &[PciDevice] {
        &self.devices
    }

    fn config_read_u32(&self, bdf: Bdf, offset: u8) -> u32 {
        if offset != PCI_BASE_ADDRESS_0 {
            return 0xffff_ffff;
        }
        self.bars.iter().find(|(b, _)| *b == bdf).map_or(0xffff_ffff, |&(_, bar)| bar)
    }
}

/// A drive accepted by [`RecordingRegistry`]
pub struct RegisteredDrive {
    pub id: DriveId,
    pub name: String,
    pub priority: i32,
    pub drive: Box<dyn BlockDrive>,
}

/// Block layer that keeps every drive it accepts
#[derive(Default)]
pub struct RecordingRegistry {
    drives: Vec<RegisteredDrive>,
    calls: u32,
    failures: Vec<(u32, DriveSetupError)>,
    inquire: bool,
    lookups: Cell<u32>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `call`-th setup (counting from 0) with `err`
    pub fn fail_at(mut self, call: u32, err: DriveSetupError) -> Self {
        self.failures.push((call, err));
        self
    }

    /// Send INQUIRY through every drive before accepting it
    pub fn with_inquiry(mut self) -> Self {
        self.inquire = true;
        self
    }

    pub fn drives(&self) -> &[RegisteredDrive] {
        &self.drives
    }

    pub fn priority_lookups(&self) -> u32 {
        self.lookups.get()
    }
}

impl DriveRegistry for RecordingRegistry {
    fn boot_priority(&self, id: &DriveId) -> i32 {
        self.lookups.set(self.lookups.get() + 1);
        i32::from(id.target)
    }

    fn setup_drive(
        &mut self,
        id: DriveId,
        drive: Box<dyn BlockDrive>,
        name: &str,
        priority: i32,
    ) -> Result<(), DriveSetupError> {
        let call = self.calls;
        self.calls += 1;
        if let Some(&(_, err)) = self.failures.iter().find(|(c, _)| *c == call) {
            return Err(err);
        }

        if self.inquire {
            let mut cdb = [0u8; CDB_SLOT_LEN];
            cdb[0] = 0x12;
            cdb[4] = 36;
            let mut buffer = [0u8; 36];
            let mut op = DiskOp::new(&mut buffer, 1);
            if drive.execute(&mut op, &cdb, 36) != DiskStatus::Success {
                return Err(DriveSetupError::Rejected);
            }
        }

        self.drives.push(RegisteredDrive { id, name: String::from(name), priority, drive });
        Ok(())
    }
}
