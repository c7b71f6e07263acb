// ABOUTME: JSON backend
// ABOUTME: Pretty-printed serialization of the whole resolved model

use crate::error::Result;
use crate::model::ResolvedHardwareModel;

/// Render the model as pretty JSON with a trailing newline
pub fn render(model: &ResolvedHardwareModel) -> Result<String> {
    let mut out = serde_json::to_string_pretty(model)?;
    out.push('\n');
    Ok(out)
}
