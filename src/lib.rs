// ABOUTME: Device tree to hardware model compiler for microkernel builds
// ABOUTME: Parses a DTB, resolves hardware rules against it and renders build-time artifacts

//! # hwgen
//!
//! Turn a flattened device tree blob plus a YAML hardware rule file into the
//! constants, tables and dumps a microkernel build consumes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # use hwgen::{pipeline, Backend, Inputs};
//! # fn main() -> hwgen::Result<()> {
//! let inputs = Inputs {
//!     dtb: std::fs::read("qemu-arm-virt.dtb").unwrap(),
//!     rules: std::fs::read_to_string("hardware.yml").unwrap(),
//!     schema: Some(std::fs::read_to_string("hardware_schema.yml").unwrap()),
//!     arch: "aarch64".to_owned(),
//!     ..Inputs::default()
//! };
//!
//! let model = pipeline::resolve(&inputs)?;
//! for device in model.kernel_devices() {
//!     println!("{} {:?} irqs {:?}", device.name(), device.regions(), device.interrupts());
//! }
//!
//! for artifact in pipeline::render(&model, &Backend::ALL)? {
//!     println!("{}: {} bytes", artifact.backend.default_file(), artifact.contents.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Stages
//!
//! - [`dtb`] - blob decoding, address translation and interrupt resolution
//! - [`arch`] - architecture defaults merged with explicit overrides
//! - [`rules`] - rule loading, schema validation and the [`RuleEngine`]
//! - [`model`] - the immutable [`ResolvedHardwareModel`]
//! - [`outputs`] - the fixed [`Backend`] registry
//!
//! Any error aborts the run before a backend is invoked.

extern crate alloc;

pub mod arch;
pub mod dtb;
pub mod error;
pub mod model;
pub mod outputs;
pub mod pipeline;
pub mod region;
pub mod rules;


pub use arch::{Arch, ArchConfig, ArchOverrides};
pub use dtb::{DeviceTree, DeviceTreeNode, DeviceTreeParser, DtbError, NodeId};
pub use error::{Error, Result, RuleConflict};
pub use model::{
    Classification, ReservedOrigin, ReservedRegion, ResolvedDevice, ResolvedHardwareModel,
    UntypedRegion,
};
pub use outputs::{Artifact, Backend};
pub use pipeline::Inputs;
pub use region::{AddressRange, RangeSet};
pub use rules::{RuleEngine, RuleSet};
