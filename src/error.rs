// ABOUTME: Pipeline error taxonomy
// ABOUTME: Any of these aborts the run before a single artifact is written

use crate::dtb::DtbError;
use crate::region::AddressRange;
use std::path::PathBuf;

/// Result alias used across the crate
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Two rules, two devices or two ranges that cannot both hold
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleConflict {
    /// Two matching rules set the same field to different values at equal or
    /// decreasing specificity
    #[error("{path}: field `{field}` set by rule `{first}` conflicts with rule `{second}`")]
    Field {
        /// Node both rules matched
        path: String,
        /// Override field name
        field: &'static str,
        /// Rule that set the field first
        first: String,
        /// Rule that tried to change it
        second: String,
    },
    /// Two devices resolve to the same symbolic name
    #[error("devices {first} and {second} both resolve to the name `{name}`")]
    Name {
        /// Colliding name
        name: String,
        /// First device path
        first: String,
        /// Second device path
        second: String,
    },
    /// Two kernel devices claim overlapping physical memory
    #[error("kernel devices {first} {first_range} and {second} {second_range} overlap")]
    Overlap {
        /// First device path
        first: String,
        /// Its range
        first_range: AddressRange,
        /// Second device path
        second: String,
        /// Its range
        second_range: AddressRange,
    },
}

/// Pipeline error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device tree blob could not be decoded
    #[error("malformed device tree: {0}")]
    MalformedDtb(#[from] DtbError),
    /// The rule file violates its schema
    #[error("hardware rules fail schema validation:\n  {}", .errors.join("\n  "))]
    SchemaValidation {
        /// One message per violation
        errors: Vec<String>,
    },
    /// The rule file is not valid YAML
    #[error("cannot read YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// A document does not have the expected shape, or JSON output failed
    #[error("cannot decode or encode JSON data: {0}")]
    Json(#[from] serde_json::Error),
    /// A rule is structurally unusable
    #[error("rule `{rule}`: {reason}")]
    InvalidRule {
        /// Rule label
        rule: String,
        /// What is wrong with it
        reason: String,
    },
    /// Rules disagree
    #[error("rule conflict: {0}")]
    RuleConflict(#[from] RuleConflict),
    /// A region override does not fit the node it applies to
    #[error("{path}: rule `{rule}`: {reason}")]
    InvalidOverride {
        /// Node path
        path: String,
        /// Rule label
        rule: String,
        /// What is wrong with the override
        reason: String,
    },
    /// A kernel device range reaches past the architecture bound
    #[error(
        "{path}: range {range} (rule `{rule}`) exceeds the maximum physical address 0x{max:x}"
    )]
    AddressOverflow {
        /// Device path
        path: String,
        /// Classifying rule
        rule: String,
        /// Offending range
        range: AddressRange,
        /// `addrspace_max`
        max: u64,
    },
    /// A kernel device has no address and is not marked address-less
    #[error("{path}: classified as a kernel device by rule `{rule}` but has no address range")]
    MissingRegion {
        /// Device path
        path: String,
        /// Classifying rule
        rule: String,
    },
    /// Architecture identifier outside the supported set
    #[error("unknown architecture `{0}`")]
    UnknownArch(String),
    /// Override values the architecture cannot honor
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A backend could not format its output
    #[error("output backend `{backend}` failed to render")]
    Render {
        /// Backend name
        backend: &'static str,
    },
    /// Reading an input or writing an artifact failed
    #[error("{}: {source}", .path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}
