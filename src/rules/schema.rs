// ABOUTME: Best-effort schema validation of the raw rule document
// ABOUTME: Violations are hard errors with the `schema` feature, a skipped step with a warning without it

use crate::error::Result;
use serde_json::Value;

/// What happened to the rule document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaOutcome {
    /// The document satisfies the schema
    Validated,
    /// No validation took place
    Skipped,
}

/// Whether this build can validate against a schema
pub const fn validator_available() -> bool {
    cfg!(feature = "schema")
}

/// Validate `rules` against `schema`, or skip with a warning when that is not possible
pub fn validate_rules(rules: &Value, schema: Option<&Value>) -> Result<SchemaOutcome> {
    let Some(schema) = schema else {
        log::warn!("skipping hardware rule validation: no schema supplied");
        return Ok(SchemaOutcome::Skipped);
    };
    validate_with(rules, schema)
}

#[cfg(feature = "schema")]
fn validate_with(rules: &Value, schema: &Value) -> Result<SchemaOutcome> {
    use crate::error::Error;

    let validator = jsonschema::validator_for(schema).map_err(|e| Error::SchemaValidation {
        errors: vec![format!("schema itself is invalid: {e}")],
    })?;

    let errors: Vec<String> = validator.iter_errors(rules).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        return Err(Error::SchemaValidation { errors });
    }
    log::debug!("hardware rules satisfy the schema");
    Ok(SchemaOutcome::Validated)
}

#[cfg(not(feature = "schema"))]
fn validate_with(_rules: &Value, _schema: &Value) -> Result<SchemaOutcome> {
    log::warn!("skipping hardware rule validation; rebuild with the `schema` feature to validate");
    Ok(SchemaOutcome::Skipped)
}
