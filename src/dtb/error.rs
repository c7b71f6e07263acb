// ABOUTME: Error types for device tree blob parsing
// ABOUTME: Every variant names the blob offset or node path where the fault was found

use alloc::string::String;

/// Main error type for DTB parsing operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DtbError {
    /// Invalid magic number in DTB header
    #[error("invalid magic number 0x{found:08x} at offset 0x0 (expected 0xd00dfeed)")]
    InvalidMagic {
        /// The value found in the magic field
        found: u32,
    },
    /// Blob is shorter than its header or its declared total size
    #[error("truncated blob: need {needed} bytes, got {actual}")]
    Truncated {
        /// Bytes the header requires
        needed: usize,
        /// Bytes actually supplied
        actual: usize,
    },
    /// Blob format version we cannot read
    #[error("unsupported DTB version {version} (last compatible version {last_comp_version})")]
    UnsupportedVersion {
        /// Version field of the header
        version: u32,
        /// Last compatible version field of the header
        last_comp_version: u32,
    },
    /// Malformed header structure
    #[error("malformed DTB header: {0}")]
    MalformedHeader(&'static str),
    /// Invalid token in structure block
    #[error("invalid token 0x{token:08x} at offset 0x{offset:x}")]
    InvalidToken {
        /// Raw token value
        token: u32,
        /// Absolute blob offset of the token
        offset: usize,
    },
    /// Malformed data inside a block
    #[error("malformed {what} at offset 0x{offset:x}")]
    Malformed {
        /// What was being decoded
        what: &'static str,
        /// Absolute blob offset
        offset: usize,
    },
    /// Property with a shape that does not match its cell sizes
    #[error("{path}: property `{property}` is malformed: {reason}")]
    BadProperty {
        /// Path of the node holding the property
        path: String,
        /// Property name
        property: String,
        /// What is wrong with it
        reason: String,
    },
    /// A phandle reference that names no node
    #[error("{path}: property `{property}` references unknown phandle 0x{phandle:x}")]
    UnresolvedPhandle {
        /// Path of the referencing node
        path: String,
        /// Referencing property
        property: String,
        /// The phandle value
        phandle: u32,
    },
    /// Two nodes carry the same phandle
    #[error("duplicate phandle 0x{phandle:x} on {first} and {second}")]
    DuplicatePhandle {
        /// The phandle value
        phandle: u32,
        /// First node carrying it
        first: String,
        /// Second node carrying it
        second: String,
    },
}
