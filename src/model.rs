// ABOUTME: The resolved hardware model handed to every output backend
// ABOUTME: Built once by the rule engine and only ever shared read-only afterwards

use crate::arch::ArchConfig;
use crate::dtb::NodeId;
use crate::region::AddressRange;
use serde::Serialize;

/// Final classification of a listed device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Driven by the kernel
    Kernel,
    /// Memory withheld from untyped allocation
    Reserved,
}

/// A device after rule resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedDevice {
    #[serde(skip)]
    pub(crate) node: NodeId,
    pub(crate) path: String,
    pub(crate) name: String,
    pub(crate) classification: Classification,
    pub(crate) compatible: Vec<String>,
    pub(crate) regions: Vec<AddressRange>,
    pub(crate) interrupts: Vec<u32>,
    pub(crate) address_less: bool,
    pub(crate) rule: String,
}

impl ResolvedDevice {
    /// Source node in the device tree
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Source node path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stable symbolic name, unique within the model
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Final classification
    pub fn classification(&self) -> Classification {
        self.classification
    }

    /// Compatible strings of the source node, most specific first
    pub fn compatible(&self) -> &[String] {
        &self.compatible
    }

    /// Validated physical ranges
    pub fn regions(&self) -> &[AddressRange] {
        &self.regions
    }

    /// Kernel-visible interrupt numbers
    pub fn interrupts(&self) -> &[u32] {
        &self.interrupts
    }

    /// Explicitly marked as having no MMIO
    pub fn is_address_less(&self) -> bool {
        self.address_less
    }

    /// Rule that classified the device
    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// Whether the kernel drives this device
    pub fn is_kernel(&self) -> bool {
        self.classification == Classification::Kernel
    }
}

/// Memory available for untyped allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UntypedRegion {
    /// Page-aligned range
    pub range: AddressRange,
    /// Device memory rather than RAM
    pub device: bool,
}

/// Why a range is kept out of untyped memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "source", rename_all = "kebab-case")]
pub enum ReservedOrigin {
    /// Entry of the blob's memory reservation block
    MemReserve,
    /// Node classified `reserved` by a rule
    Rule(String),
    /// Node ignored or unmatched and not released
    Unclaimed(String),
}

/// A range withheld from untyped allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservedRegion {
    /// Reserved range
    pub range: AddressRange,
    /// Where the reservation comes from
    pub origin: ReservedOrigin,
}

/// Everything the backends render
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedHardwareModel {
    pub(crate) arch: ArchConfig,
    pub(crate) devices: Vec<ResolvedDevice>,
    pub(crate) untyped: Vec<UntypedRegion>,
    pub(crate) reserved: Vec<ReservedRegion>,
}

impl ResolvedHardwareModel {
    /// Architecture configuration the model was resolved for
    pub fn arch(&self) -> &ArchConfig {
        &self.arch
    }

    /// Kernel and reserved devices in document order
    pub fn devices(&self) -> &[ResolvedDevice] {
        &self.devices
    }

    /// Kernel devices in document order
    pub fn kernel_devices(&self) -> impl Iterator<Item = &ResolvedDevice> {
        self.devices.iter().filter(|d| d.is_kernel())
    }

    /// Untyped regions sorted by base
    pub fn untyped(&self) -> &[UntypedRegion] {
        &self.untyped
    }

    /// RAM untyped regions
    pub fn ram_regions(&self) -> impl Iterator<Item = AddressRange> + '_ {
        self.untyped.iter().filter(|u| !u.device).map(|u| u.range)
    }

    /// Device untyped regions
    pub fn device_regions(&self) -> impl Iterator<Item = AddressRange> + '_ {
        self.untyped.iter().filter(|u| u.device).map(|u| u.range)
    }

    /// Reserved regions in discovery order
    pub fn reserved(&self) -> &[ReservedRegion] {
        &self.reserved
    }

    /// Device by symbolic name
    pub fn device(&self, name: &str) -> Option<&ResolvedDevice> {
        self.devices.iter().find(|d| d.name == name)
    }
}
