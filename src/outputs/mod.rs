// ABOUTME: Fixed registry of output backends and the artifacts they render
// ABOUTME: Every backend reads the same immutable hardware model and renders deterministically

pub mod c_header;
pub mod compat_strings;
pub mod elfloader;
pub mod json;
pub mod yaml;

use crate::error::{Error, Result};
use crate::model::ResolvedHardwareModel;
use core::fmt;
use core::str::FromStr;

/// Output format selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Backend {
    /// Kernel header with per-device constants and region tables
    CHeader,
    /// Compatible strings of kernel devices
    CompatStrings,
    /// Bootloader device descriptor table
    Elfloader,
    /// Canonical JSON dump of the model
    Json,
    /// Canonical YAML dump of the model
    Yaml,
}

impl Backend {
    /// Every backend, in rendering order
    pub const ALL: [Backend; 5] = [
        Backend::CHeader,
        Backend::CompatStrings,
        Backend::Elfloader,
        Backend::Json,
        Backend::Yaml,
    ];

    /// Name used for the command-line flag
    pub fn name(self) -> &'static str {
        match self {
            Backend::CHeader => "c-header",
            Backend::CompatStrings => "compat-strings",
            Backend::Elfloader => "elfloader",
            Backend::Json => "json",
            Backend::Yaml => "yaml",
        }
    }

    /// File written when no explicit path is given
    pub fn default_file(self) -> &'static str {
        match self {
            Backend::CHeader => "hardware_gen.h",
            Backend::CompatStrings => "hardware_compat.txt",
            Backend::Elfloader => "elfloader_devices.c",
            Backend::Json => "hardware.json",
            Backend::Yaml => "hardware.yaml",
        }
    }

    /// Render `model` into this backend's format
    pub fn render(self, model: &ResolvedHardwareModel) -> Result<Artifact> {
        let contents = match self {
            Backend::CHeader => c_header::render(model),
            Backend::CompatStrings => compat_strings::render(model),
            Backend::Elfloader => elfloader::render(model),
            Backend::Json => return json::render(model).map(|c| Artifact::new(self, c)),
            Backend::Yaml => return yaml::render(model).map(|c| Artifact::new(self, c)),
        }
        .map_err(|_| Error::Render { backend: self.name() })?;

        log::debug!("{self}: rendered {} bytes", contents.len());
        Ok(Artifact::new(self, contents))
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Backend::ALL
            .into_iter()
            .find(|b| b.name() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown output backend `{s}`")))
    }
}

/// Rendered output of one backend, not yet written anywhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Backend that produced it
    pub backend: Backend,
    /// File contents
    pub contents: String,
}

impl Artifact {
    fn new(backend: Backend, contents: String) -> Self {
        Self { backend, contents }
    }
}

/// C hex literal
pub(crate) fn hex(value: u64) -> String {
    format!("0x{value:x}")
}
