//! # Target Scan
//!
//! Only LUN 0 of each target is scanned; REPORT LUNS is never sent.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt::Write;

use helix_hal::Platform;

use crate::block::{DriveRegistry, MptLun};
use crate::controller::MptController;
use crate::pci::Bdf;
use crate::{MptError, MptResult};

/// Longest drive name handed to the block layer
pub const DRIVE_NAME_LEN: usize = 15;

/// Drive name buffer
pub type DriveName = heapless::String<DRIVE_NAME_LEN>;

/// Format `"mpt BB:DD.F T:L"`
pub fn drive_name(bdf: Bdf, target: u8, lun: u8) -> MptResult<DriveName> {
    let mut name = DriveName::new();
    write!(name, "mpt {} {}:{}", bdf, target, lun).map_err(|_| MptError::NameTooLong)?;
    Ok(name)
}

/// Name one LUN and hand it to the block layer
pub fn add_lun<P, R>(controller: &Arc<MptController<P>>, registry: &mut R, target: u8, lun: u8) -> MptResult<()>
where
    P: Platform + 'static,
    R: DriveRegistry + ?Sized,
{
    let drive = Box::new(MptLun::new(Arc::clone(controller), target, lun));
    let id = drive.id();
    let name = drive_name(id.controller(), target, lun)?;
    let priority = registry.boot_priority(&id);

    registry.setup_drive(id, drive, &name, priority)?;
    log::info!("[mpt] registered {} (priority {})", name, priority);
    Ok(())
}

/// Scan LUN 0 of one target
pub fn scan_target<P, R>(controller: &Arc<MptController<P>>, registry: &mut R, target: u8) -> MptResult<()>
where
    P: Platform + 'static,
    R: DriveRegistry + ?Sized,
{
    add_lun(controller, registry, target, 0)
}

/// Scan targets `0..max_targets`; returns how many drives were registered
///
/// A target that fails does not stop the scan.
pub fn scan_targets<P, R>(controller: &Arc<MptController<P>>, registry: &mut R) -> usize
where
    P: Platform + 'static,
    R: DriveRegistry + ?Sized,
{
    let mut registered = 0;
    for target in 0..controller.config().max_targets {
        match scan_target(controller, registry, target) {
            Ok(()) => registered += 1,
            Err(err) => log::warn!(
                "[mpt] {} target {}: {}",
                controller.handle().pci.bdf,
                target,
                err
            ),
        }
    }
    registered
}
