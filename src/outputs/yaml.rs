// ABOUTME: YAML backend
// ABOUTME: Serialization of the whole resolved model in the rule file's own format

use crate::error::Result;
use crate::model::ResolvedHardwareModel;

/// Render the model as YAML
pub fn render(model: &ResolvedHardwareModel) -> Result<String> {
    Ok(serde_yaml::to_string(model)?)
}
