// ABOUTME: End-to-end driver from raw inputs to rendered artifacts
// ABOUTME: Nothing is rendered unless resolution succeeded, nothing is returned unless every render did

use crate::arch::{ArchConfig, ArchOverrides};
use crate::dtb::DeviceTreeParser;
use crate::error::Result;
use crate::model::ResolvedHardwareModel;
use crate::outputs::{Artifact, Backend};
use crate::rules::{RuleEngine, RuleSet};

/// Everything one run needs, already read into memory
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    /// Device tree blob
    pub dtb: Vec<u8>,
    /// Hardware rule document (YAML)
    pub rules: String,
    /// Rule schema document (YAML); validation is skipped when absent
    pub schema: Option<String>,
    /// Architecture identifier
    pub arch: String,
    /// Values layered over the architecture defaults
    pub overrides: ArchOverrides,
}

/// Parse, validate and resolve the inputs into a hardware model
pub fn resolve(inputs: &Inputs) -> Result<ResolvedHardwareModel> {
    let arch = ArchConfig::new(&inputs.arch, inputs.overrides.clone())?;
    let tree = DeviceTreeParser::new(&inputs.dtb).parse_tree()?;
    log::info!(
        "parsed device tree: {} nodes, {} memory reservations",
        tree.len(),
        tree.reservations.len()
    );
    let rules = RuleSet::load(&inputs.rules, inputs.schema.as_deref())?;
    RuleEngine::new(&tree, &rules, &arch).resolve()
}

/// Render `model` with every backend in `backends`, in registry order.
///
/// Either every artifact is returned or none is.
pub fn render(model: &ResolvedHardwareModel, backends: &[Backend]) -> Result<Vec<Artifact>> {
    Backend::ALL
        .into_iter()
        .filter(|b| backends.contains(b))
        .map(|b| b.render(model))
        .collect()
}

/// [`resolve`] then [`render`]
pub fn run(inputs: &Inputs, backends: &[Backend]) -> Result<Vec<Artifact>> {
    let model = resolve(inputs)?;
    render(&model, backends)
}
