//! # Controller Context and Bring-up
//!
//! Each adapter gets its own [`MptController`]: register window, reply
//! frame, IOC-Init request/reply and counters. Nothing is global, so any
//! number of controllers can coexist.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use helix_hal::{BusAddr, BusAddressTranslator, HalError, Platform};
use spin::Mutex;

use crate::block::DriveRegistry;
use crate::config::MptConfig;
use crate::frame::{IocInitReply, IocInitRequest, ReplyFrame};
use crate::handshake;
use crate::pci::{self, PciAccess, PciDevice};
use crate::regs::{doorbell, MptRegisters};
use crate::scan;
use crate::MptResult;

/// Identity of a controller: PCI location plus I/O base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerHandle {
    /// PCI function
    pub pci: PciDevice,
    /// I/O base decoded from BAR0
    pub io_base: u16,
}

/// Per-controller command counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStats {
    /// Frames posted, resubmissions included
    pub submissions: u64,
    /// Resubmissions after an aliased reply
    pub retries: u64,
    /// Commands that saw their context tag
    pub completions: u64,
    /// Commands that gave up
    pub failures: u64,
}

/// State guarded by the controller lock
#[derive(Debug)]
pub(crate) struct ControllerState {
    pub(crate) init_request: IocInitRequest,
    pub(crate) init_reply: Option<IocInitReply>,
    /// Set after a timeout or a rejected IOC-Init; the next command resets first
    pub(crate) needs_reset: bool,
    pub(crate) stats: CommandStats,
}

/// One Fusion-MPT adapter
pub struct MptController<P: Platform> {
    handle: ControllerHandle,
    platform: P,
    config: MptConfig,
    reply_frame: ReplyFrame,
    pub(crate) state: Mutex<ControllerState>,
}

impl<P: Platform> MptController<P> {
    /// Create a controller context
    ///
    /// Returned behind an `Arc` so that the reply frame keeps the address
    /// published to the IOC.
    pub fn new(handle: ControllerHandle, platform: P, config: MptConfig) -> Arc<Self> {
        Arc::new(Self {
            handle,
            platform,
            config,
            reply_frame: ReplyFrame::new(),
            state: Mutex::new(ControllerState {
                init_request: IocInitRequest::new(),
                init_reply: None,
                needs_reset: false,
                stats: CommandStats::default(),
            }),
        })
    }

    /// Reset the IOC and run the IOC-Init handshake
    pub fn initialize(&self) -> MptResult<IocInitReply> {
        let reply_frame = self.reply_frame_addr()?;
        let reply = self.reset_locked(&mut self.state.lock(), reply_frame)?;
        log::info!(
            "[mpt] {} ready at io {:#06x}, reply frame {}",
            self.handle.pci.bdf,
            self.handle.io_base,
            reply_frame
        );
        Ok(reply)
    }

    /// Run the handshake with the controller lock held
    ///
    /// A reply refused by the policy leaves the IOC in message unit reset,
    /// so it no longer owns the reply frame.
    pub(crate) fn reset_locked(&self, state: &mut ControllerState, reply_frame: BusAddr) -> MptResult<IocInitReply> {
        let regs = self.regs();
        let reply = handshake::ioc_init(&regs, &state.init_request, reply_frame);
        state.init_reply = Some(reply);
        if let Err(err) = handshake::check_init_reply(&reply, self.config.init_reply_policy) {
            regs.ring(doorbell::MSG_RESET, 0);
            state.needs_reset = true;
            return Err(err);
        }
        state.needs_reset = false;
        Ok(reply)
    }

    /// Check if the next command will reset the IOC first
    pub fn needs_reset(&self) -> bool {
        self.state.lock().needs_reset
    }

    /// Controller identity
    pub fn handle(&self) -> &ControllerHandle {
        &self.handle
    }

    /// Active configuration
    pub fn config(&self) -> &MptConfig {
        &self.config
    }

    /// Platform the controller runs on
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// IOC-Init reply from the last handshake
    pub fn init_reply(&self) -> Option<IocInitReply> {
        self.state.lock().init_reply
    }

    /// Snapshot of the command counters
    pub fn stats(&self) -> CommandStats {
        self.state.lock().stats
    }

    /// Register view of this controller
    pub fn regs(&self) -> MptRegisters<'_, P::Io> {
        MptRegisters::new(self.platform.io(), self.handle.io_base)
    }

    /// Bus address of the reply frame
    pub fn reply_frame_addr(&self) -> MptResult<BusAddr> {
        let addr = self.platform.dma().bus_address(self.reply_frame.cpu_addr())?;
        if !addr.is_aligned(8) {
            return Err(HalError::Misaligned.into());
        }
        Ok(addr)
    }
}

impl<P: Platform> fmt::Debug for MptController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MptController")
            .field("handle", &self.handle)
            .field("config", &self.config)
            .field("reply_frame", &self.reply_frame)
            .finish_non_exhaustive()
    }
}

/// Bring up every supported adapter and register its drives
///
/// `platform_for` supplies the platform each controller runs on. A
/// controller that cannot be brought up is skipped; the others still are.
pub fn setup<P, F>(
    bus: &impl PciAccess,
    registry: &mut impl DriveRegistry,
    config: &MptConfig,
    mut platform_for: F,
) -> Vec<Arc<MptController<P>>>
where
    P: Platform + 'static,
    F: FnMut(&ControllerHandle) -> P,
{
    let mut controllers = Vec::new();

    for device in bus.devices() {
        let Some(name) = device.match_adapter() else {
            continue;
        };
        let io_base = match pci::io_base(bus, device.bdf) {
            Ok(io_base) => io_base,
            Err(err) => {
                log::warn!("[mpt] {} {}: {}, skipped", name, device.bdf, err);
                continue;
            }
        };
        log::info!("[mpt] found {} at {} io {:#06x}", name, device.bdf, io_base);

        let handle = ControllerHandle { pci: *device, io_base };
        let controller = MptController::new(handle, platform_for(&handle), config.clone());
        if let Err(err) = controller.initialize() {
            log::warn!("[mpt] {} {}: init failed: {}, skipped", name, device.bdf, err);
            continue;
        }

        let drives = scan::scan_targets(&controller, registry);
        log::info!("[mpt] {} {}: {} drive(s) registered", name, device.bdf, drives);
        controllers.push(controller);
    }

    controllers
}
