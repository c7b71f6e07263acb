// ABOUTME: Hardware rule loading, schema contract and the rule engine
// ABOUTME: Turns a YAML rule document into a validated RuleSet and resolves it against a tree

pub mod engine;
pub mod naming;
pub mod rule;
pub mod schema;

pub use engine::RuleEngine;
pub use naming::derive_name;
pub use rule::{Action, LabeledRule, Matcher, Overrides, RegionOverride, Rule, RuleFile, RuleSet, Specificity};
pub use schema::{SchemaOutcome, validate_rules, validator_available};

use crate::error::Result;
use serde_json::Value;

impl RuleSet {
    /// Parse, schema-check and structurally check a YAML rule document.
    ///
    /// Both documents are read into the same JSON value model, so the schema
    /// sees exactly what the typed decoder sees.
    pub fn load(rules_yaml: &str, schema_yaml: Option<&str>) -> Result<Self> {
        let document: Value = serde_yaml::from_str(rules_yaml)?;
        let schema: Option<Value> = schema_yaml.map(serde_yaml::from_str).transpose()?;

        validate_rules(&document, schema.as_ref())?;

        let file: RuleFile = serde_json::from_value(document)?;
        let rules = RuleSet::new(file)?;
        log::info!("loaded {} hardware rules", rules.len());
        Ok(rules)
    }
}
