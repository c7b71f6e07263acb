// ABOUTME: Command-line parsing for the hwgen binary
// ABOUTME: Builds one explicit Args value; nothing is accumulated in global state

use hwgen::{ArchOverrides, Backend};
use log::LevelFilter;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A command line that cannot be acted on
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("missing required option --{0}")]
    Missing(&'static str),
    #[error("option {0} needs a value")]
    MissingValue(String),
    #[error("unknown option `{0}`")]
    Unknown(String),
    #[error("invalid value `{value}` for {option}: {reason}")]
    Invalid {
        option: String,
        value: String,
        reason: String,
    },
}

/// What the user asked for
#[derive(Debug)]
pub enum Command {
    Run(Args),
    Help,
}

/// A validated command line
#[derive(Debug)]
pub struct Args {
    pub dtb: PathBuf,
    pub hardware_config: PathBuf,
    pub hardware_schema: Option<PathBuf>,
    pub sel4arch: String,
    pub overrides: ArchOverrides,
    pub output_dir: PathBuf,
    /// Enabled backends with their explicit output path, if any
    pub outputs: BTreeMap<Backend, Option<PathBuf>>,
    pub log_level: LevelFilter,
}

impl Args {
    /// Where the artifact of `backend` goes
    pub fn output_path(&self, backend: Backend) -> PathBuf {
        match self.outputs.get(&backend) {
            Some(Some(path)) => path.clone(),
            _ => self.output_dir.join(backend.default_file()),
        }
    }
}

pub fn usage() -> String {
    let mut text = String::from(
        "Resolve a device tree and hardware rules into kernel build artifacts\n\n\
         Usage: hwgen --dtb PATH --hardware-config PATH --sel4arch ARCH [OPTIONS]\n\n\
         Options:\n  \
           --dtb PATH                    device tree blob to parse\n  \
           --hardware-config PATH        YAML hardware rules\n  \
           --hardware-schema PATH        YAML schema for the hardware rules\n  \
           --sel4arch ARCH               aarch32, arm_hyp, aarch64, riscv32 or riscv64\n  \
           --addrspace-max N             exclusive upper bound of device and untyped memory\n  \
           --page-bits N                 page size in bits\n  \
           --kernel-config-flags K=V...  kernel configuration overrides, repeatable\n  \
           --output-dir DIR              directory for artifacts without an explicit path\n  \
           -v, -vv, -q                   more, even more, or less logging\n  \
           -h, --help                    print this help\n\nOutputs:\n",
    );
    for backend in Backend::ALL {
        text.push_str(&format!(
            "  --{name:<14} --{name}-out PATH   (default {file})\n",
            name = backend.name(),
            file = backend.default_file()
        ));
    }
    text
}

/// Decimal or `0x` hexadecimal
fn parse_int<T: TryFrom<u64>>(option: &str, value: &str) -> Result<T, UsageError> {
    let invalid = |reason: &str| UsageError::Invalid {
        option: option.to_owned(),
        value: value.to_owned(),
        reason: reason.to_owned(),
    };
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => value.replace('_', "").parse::<u64>(),
    }
    .map_err(|_| invalid("not a decimal or 0x-prefixed hexadecimal integer"))?;
    T::try_from(parsed).map_err(|_| invalid("out of range"))
}

/// Parse the arguments after the program name
pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Command, UsageError> {
    let mut dtb = None;
    let mut hardware_config = None;
    let mut hardware_schema = None;
    let mut sel4arch = None;
    let mut overrides = ArchOverrides::default();
    let mut output_dir = PathBuf::from(".");
    let mut outputs: BTreeMap<Backend, Option<PathBuf>> = BTreeMap::new();
    let mut log_level = LevelFilter::Info;

    let mut args = args.into_iter().peekable();
    while let Some(arg) = args.next() {
        // `--option=value` is the same as `--option value`
        let (option, inline) = match arg.split_once('=') {
            Some((option, value)) if option.starts_with("--") => {
                (option.to_owned(), Some(value.to_owned()))
            }
            _ => (arg.clone(), None),
        };
        let value = |args: &mut std::iter::Peekable<I::IntoIter>| {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| UsageError::MissingValue(option.clone()))
        };

        match option.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" => log_level = LevelFilter::Debug,
            "-vv" => log_level = LevelFilter::Trace,
            "-q" => log_level = LevelFilter::Error,
            "--dtb" => dtb = Some(PathBuf::from(value(&mut args)?)),
            "--hardware-config" => hardware_config = Some(PathBuf::from(value(&mut args)?)),
            "--hardware-schema" => hardware_schema = Some(PathBuf::from(value(&mut args)?)),
            "--sel4arch" => sel4arch = Some(value(&mut args)?),
            "--addrspace-max" => {
                overrides.addrspace_max = Some(parse_int(&option, &value(&mut args)?)?)
            }
            "--page-bits" => overrides.page_bits = Some(parse_int(&option, &value(&mut args)?)?),
            "--output-dir" => output_dir = PathBuf::from(value(&mut args)?),
            "--kernel-config-flags" => {
                let mut flags: Vec<String> = inline.iter().cloned().collect();
                while let Some(next) = args.next_if(|a| !a.starts_with('-')) {
                    flags.push(next);
                }
                if flags.is_empty() {
                    return Err(UsageError::MissingValue(option.clone()));
                }
                for flag in flags {
                    overrides
                        .push_config_flag(&flag)
                        .map_err(|e| UsageError::Invalid {
                            option: option.clone(),
                            value: flag.clone(),
                            reason: e.to_string(),
                        })?;
                }
            }
            other => match backend_option(other) {
                Some((backend, false)) if inline.is_none() => {
                    outputs.entry(backend).or_insert(None);
                }
                Some((backend, true)) => {
                    let path = PathBuf::from(value(&mut args)?);
                    outputs.insert(backend, Some(path));
                }
                _ => return Err(UsageError::Unknown(arg)),
            },
        }
    }

    Ok(Command::Run(Args {
        dtb: dtb.ok_or(UsageError::Missing("dtb"))?,
        hardware_config: hardware_config.ok_or(UsageError::Missing("hardware-config"))?,
        hardware_schema,
        sel4arch: sel4arch.ok_or(UsageError::Missing("sel4arch"))?,
        overrides,
        output_dir,
        outputs,
        log_level,
    }))
}

/// `--<backend>` or `--<backend>-out`; the flag says whether a path follows
fn backend_option(option: &str) -> Option<(Backend, bool)> {
    let name = option.strip_prefix("--")?;
    let (name, with_path) = match name.strip_suffix("-out") {
        Some(name) => (name, true),
        None => (name, false),
    };
    name.parse().ok().map(|backend| (backend, with_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(line: &str) -> Result<Command, UsageError> {
        parse(line.split_whitespace().map(str::to_owned))
    }

    fn run(line: &str) -> Args {
        match parse_args(line).unwrap() {
            Command::Run(args) => args,
            Command::Help => panic!("unexpected help"),
        }
    }

    const BASE: &str = "--dtb virt.dtb --hardware-config hw.yml --sel4arch aarch64";

    #[test]
    fn test_required_options() {
        let args = run(BASE);
        assert_eq!(args.dtb, PathBuf::from("virt.dtb"));
        assert_eq!(args.sel4arch, "aarch64");
        assert!(args.hardware_schema.is_none());
        assert!(args.outputs.is_empty());

        assert!(matches!(
            parse_args("--dtb virt.dtb --sel4arch aarch64"),
            Err(UsageError::Missing("hardware-config"))
        ));
    }

    #[test]
    fn test_kernel_config_flags_accumulate() {
        let args = run(&format!(
            "{BASE} --kernel-config-flags A=1 B=2 --c-header --kernel-config-flags=C=x=y"
        ));
        let config = &args.overrides.kernel_config;
        assert_eq!(config["A"], "1");
        assert_eq!(config["B"], "2");
        assert_eq!(config["C"], "x=y");
        assert!(args.outputs.contains_key(&Backend::CHeader));
    }

    #[test]
    fn test_integers() {
        let args = run(&format!("{BASE} --addrspace-max 0x1_0000_0000 --page-bits 16"));
        assert_eq!(args.overrides.addrspace_max, Some(1 << 32));
        assert_eq!(args.overrides.page_bits, Some(16));

        assert!(matches!(
            parse_args(&format!("{BASE} --page-bits 300")),
            Err(UsageError::Invalid { .. })
        ));
    }

    #[test]
    fn test_outputs() {
        let args = run(&format!("{BASE} --json --yaml-out /tmp/model.yaml --output-dir out"));
        assert_eq!(args.output_path(Backend::Json), PathBuf::from("out/hardware.json"));
        assert_eq!(args.output_path(Backend::Yaml), PathBuf::from("/tmp/model.yaml"));
        assert_eq!(args.outputs.len(), 2);
    }

    #[test]
    fn test_unknown_option() {
        assert!(matches!(
            parse_args(&format!("{BASE} --html")),
            Err(UsageError::Unknown(ref o)) if o == "--html"
        ));
        assert!(matches!(parse_args("--help"), Ok(Command::Help)));
    }
}
