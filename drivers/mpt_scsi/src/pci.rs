//! # PCI Seam
//!
//! Just enough PCI to find Fusion-MPT functions and their I/O window.

use core::fmt;

use crate::{MptError, MptResult};

/// LSI Logic vendor ID
pub const VENDOR_LSI_LOGIC: u16 = 0x1000;

/// Config space offset of BAR0
pub const PCI_BASE_ADDRESS_0: u8 = 0x10;

/// BAR bits that hold the I/O address
pub const PCI_BASE_ADDRESS_IO_MASK: u32 = !0x3;

/// Adapters this driver binds to: (vendor, device, name)
pub const SUPPORTED_ADAPTERS: [(u16, u16, &str); 3] = [
    (VENDOR_LSI_LOGIC, 0x0030, "lsi53c1030"),
    (VENDOR_LSI_LOGIC, 0x0054, "sas1068"),
    (VENDOR_LSI_LOGIC, 0x0058, "sas1068e"),
];

/// Bus/device/function, packed as `bus << 8 | device << 3 | function`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bdf(u16);

impl Bdf {
    /// Create from parts; device and function are masked to 5 and 3 bits
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self(((bus as u16) << 8) | (((device & 0x1f) as u16) << 3) | (function & 0x7) as u16)
    }

    /// Create from the packed form
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Packed form
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Bus number
    pub const fn bus(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Device number
    pub const fn device(self) -> u8 {
        ((self.0 >> 3) & 0x1f) as u8
    }

    /// Function number
    pub const fn function(self) -> u8 {
        (self.0 & 0x7) as u8
    }
}

impl fmt::Display for Bdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{:x}", self.bus(), self.device(), self.function())
    }
}

/// A PCI function found during enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDevice {
    /// Location
    pub bdf: Bdf,
    /// Vendor ID
    pub vendor_id: u16,
    /// Device ID
    pub device_id: u16,
}

impl PciDevice {
    /// Create a device record
    pub const fn new(bdf: Bdf, vendor_id: u16, device_id: u16) -> Self {
        Self { bdf, vendor_id, device_id }
    }

    /// Name of the adapter if this driver supports it
    pub fn match_adapter(&self) -> Option<&'static str> {
        SUPPORTED_ADAPTERS
            .iter()
            .find(|(vendor, device, _)| *vendor == self.vendor_id && *device == self.device_id)
            .map(|(_, _, name)| *name)
    }
}

/// PCI enumeration and config space access
pub trait PciAccess {
    /// All functions found on the bus
    fn devices(&self) -> &[PciDevice];

    /// Read a config space dword
    fn config_read_u32(&self, bdf: Bdf, offset: u8) -> u32;
}

/// Decode the I/O base from BAR0
pub fn io_base(pci: &impl PciAccess, bdf: Bdf) -> MptResult<u16> {
    let bar = pci.config_read_u32(bdf, PCI_BASE_ADDRESS_0) & PCI_BASE_ADDRESS_IO_MASK;
    u16::try_from(bar).map_err(|_| {
        log::warn!("[mpt] {}: BAR0 {:#010x} is not a port address", bdf, bar);
        MptError::IoBaseOutOfRange
    })
}
