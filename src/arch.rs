// ABOUTME: Architecture constraints and kernel configuration overrides
// ABOUTME: ArchConfig is built once from an identifier plus an explicit ArchOverrides value

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Smallest page size we accept, in bits
pub const MIN_PAGE_BITS: u8 = 12;
/// Largest page size we accept, in bits
pub const MAX_PAGE_BITS: u8 = 30;

/// Supported kernel architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    /// 32-bit ARM
    Aarch32,
    /// 32-bit ARM with the hypervisor extensions
    ArmHyp,
    /// 64-bit ARM
    Aarch64,
    /// 32-bit RISC-V
    Riscv32,
    /// 64-bit RISC-V
    Riscv64,
}

/// Defaults one architecture brings before overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchDefaults {
    /// Machine word size
    pub word_bits: u8,
    /// Physical addressing width
    pub paddr_bits: u8,
    /// Default exclusive upper bound for device and untyped memory
    pub addrspace_max: u64,
}

impl Arch {
    /// Every supported architecture
    pub const ALL: [Arch; 5] = [
        Arch::Aarch32,
        Arch::ArmHyp,
        Arch::Aarch64,
        Arch::Riscv32,
        Arch::Riscv64,
    ];

    /// Identifier used on the command line and in artifacts
    pub fn name(self) -> &'static str {
        match self {
            Arch::Aarch32 => "aarch32",
            Arch::ArmHyp => "arm_hyp",
            Arch::Aarch64 => "aarch64",
            Arch::Riscv32 => "riscv32",
            Arch::Riscv64 => "riscv64",
        }
    }

    /// Built-in constraints of the architecture
    pub fn defaults(self) -> ArchDefaults {
        let (word_bits, paddr_bits, max_bits) = match self {
            Arch::Aarch32 => (32, 32, 32),
            Arch::ArmHyp => (32, 40, 40),
            Arch::Aarch64 => (64, 48, 40),
            Arch::Riscv32 => (32, 34, 32),
            Arch::Riscv64 => (64, 56, 39),
        };
        ArchDefaults {
            word_bits,
            paddr_bits,
            addrspace_max: 1 << max_bits,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Arch::ALL
            .into_iter()
            .find(|arch| arch.name() == s)
            .ok_or_else(|| Error::UnknownArch(s.to_owned()))
    }
}

/// Values that replace architecture defaults field by field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchOverrides {
    /// Exclusive upper bound on device and untyped physical memory
    pub addrspace_max: Option<u64>,
    /// Page size in bits
    pub page_bits: Option<u8>,
    /// Kernel configuration flags, passed through untouched
    pub kernel_config: BTreeMap<String, String>,
}

impl ArchOverrides {
    /// Record a `KEY=VALUE` kernel configuration flag; a repeated key keeps the last value
    pub fn push_config_flag(&mut self, flag: &str) -> Result<()> {
        let (key, value) = parse_config_flag(flag)?;
        self.kernel_config.insert(key, value);
        Ok(())
    }
}

/// Split a `KEY=VALUE` flag at the first `=`
pub fn parse_config_flag(flag: &str) -> Result<(String, String)> {
    match flag.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(Error::InvalidConfig(format!(
            "kernel config flag `{flag}` is not of the form KEY=VALUE"
        ))),
    }
}

/// Validated architecture constraints with overrides applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchConfig {
    arch: Arch,
    word_bits: u8,
    paddr_bits: u8,
    page_bits: u8,
    addrspace_max: u64,
    kernel_config: BTreeMap<String, String>,
}

impl ArchConfig {
    /// Build the configuration for `arch_id` with `overrides` layered on top.
    pub fn new(arch_id: &str, overrides: ArchOverrides) -> Result<Self> {
        let arch: Arch = arch_id.parse()?;
        let defaults = arch.defaults();

        let page_bits = overrides.page_bits.unwrap_or(MIN_PAGE_BITS);
        if !(MIN_PAGE_BITS..=MAX_PAGE_BITS).contains(&page_bits) {
            return Err(Error::InvalidConfig(format!(
                "page size of {page_bits} bits is outside {MIN_PAGE_BITS}..={MAX_PAGE_BITS}"
            )));
        }

        let addrspace_max = overrides.addrspace_max.unwrap_or(defaults.addrspace_max);
        let limit = 1u64 << defaults.paddr_bits;
        if addrspace_max == 0 {
            return Err(Error::InvalidConfig("addrspace_max must be non-zero".to_owned()));
        }
        if addrspace_max > limit {
            return Err(Error::InvalidConfig(format!(
                "addrspace_max 0x{addrspace_max:x} exceeds the {}-bit physical address space of {arch} (0x{limit:x})",
                defaults.paddr_bits
            )));
        }

        let mut kernel_config = BTreeMap::from([
            ("KernelSel4Arch".to_owned(), arch.name().to_owned()),
            ("KernelWordSize".to_owned(), defaults.word_bits.to_string()),
        ]);
        kernel_config.extend(overrides.kernel_config);

        log::info!(
            "architecture {arch}: addrspace_max 0x{addrspace_max:x}, {} kernel config flags",
            kernel_config.len()
        );

        Ok(Self {
            arch,
            word_bits: defaults.word_bits,
            paddr_bits: defaults.paddr_bits,
            page_bits,
            addrspace_max,
            kernel_config,
        })
    }

    /// Selected architecture
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Machine word size in bits
    pub fn word_bits(&self) -> u8 {
        self.word_bits
    }

    /// Physical addressing width in bits
    pub fn paddr_bits(&self) -> u8 {
        self.paddr_bits
    }

    /// Page size in bits
    pub fn page_bits(&self) -> u8 {
        self.page_bits
    }

    /// Page size in bytes
    pub fn page_size(&self) -> u64 {
        1 << self.page_bits
    }

    /// Exclusive upper bound on device and untyped physical addresses
    pub fn addrspace_max(&self) -> u64 {
        self.addrspace_max
    }

    /// Kernel configuration flags, defaults merged with overrides
    pub fn kernel_config(&self) -> &BTreeMap<String, String> {
        &self.kernel_config
    }
}
