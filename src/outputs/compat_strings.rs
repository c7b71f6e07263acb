// ABOUTME: Compatible-string table backend
// ABOUTME: One compatible string per line for every kernel device, sorted and deduplicated

use crate::model::ResolvedHardwareModel;
use core::fmt::{self, Write};
use std::collections::BTreeSet;

/// Render the compatible-string table
pub fn render(model: &ResolvedHardwareModel) -> Result<String, fmt::Error> {
    let strings: BTreeSet<&str> = model
        .kernel_devices()
        .flat_map(|d| d.compatible().iter().map(String::as_str))
        .collect();

    let mut out = String::new();
    for s in strings {
        writeln!(out, "{s}")?;
    }
    Ok(out)
}
