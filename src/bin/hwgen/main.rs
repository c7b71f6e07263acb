// ABOUTME: hwgen command-line entry point
// ABOUTME: Reads the inputs, runs the pipeline and writes artifacts only once every backend rendered

mod args;
mod logger;

use args::{Args, Command};
use hwgen::pipeline::{self, Inputs};
use hwgen::{Backend, Error, Result};
use logger::StderrLogger;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = match args::parse(std::env::args().skip(1)) {
        Ok(Command::Run(args)) => args,
        Ok(Command::Help) => {
            print!("{}", args::usage());
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("hwgen: {e}\n\n{}", args::usage());
            return ExitCode::from(2);
        }
    };

    if let Err(e) = StderrLogger::new(args.log_level).init() {
        eprintln!("hwgen: cannot install logger: {e}");
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let inputs = Inputs {
        dtb: read(&args.dtb)?,
        rules: read_to_string(&args.hardware_config)?,
        schema: args
            .hardware_schema
            .as_deref()
            .map(read_to_string)
            .transpose()?,
        arch: args.sel4arch.clone(),
        overrides: args.overrides.clone(),
    };

    let backends: Vec<Backend> = args.outputs.keys().copied().collect();
    if backends.is_empty() {
        log::warn!("no output selected, checking the inputs only");
    }

    // Every artifact is rendered before the first one is written.
    let artifacts = pipeline::run(&inputs, &backends)?;

    // Staged next to their targets, renamed only once all writes succeeded.
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(artifacts.len());
    for artifact in &artifacts {
        let path = args.output_path(artifact.backend);
        match stage(&path, artifact.contents.as_bytes()) {
            Ok(temp) => staged.push((temp, path)),
            Err(e) => {
                discard(&staged);
                return Err(e);
            }
        }
    }
    for (index, (temp, path)) in staged.iter().enumerate() {
        if let Err(source) = fs::rename(temp, path) {
            discard(&staged[index..]);
            return Err(Error::Io {
                path: path.clone(),
                source,
            });
        }
        log::info!("wrote {}", path.display());
    }
    Ok(())
}

/// Temporary sibling of `path`
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `contents` to the staging file of `path`, creating its directory
fn stage(path: &Path, contents: &[u8]) -> Result<PathBuf> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| Error::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let temp = staging_path(path);
    fs::write(&temp, contents).map_err(|source| Error::Io {
        path: temp.clone(),
        source,
    })?;
    Ok(temp)
}

fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (temp, _) in staged {
        if let Err(e) = fs::remove_file(temp) {
            log::warn!("cannot remove {}: {e}", temp.display());
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_is_a_sibling() {
        assert_eq!(
            staging_path(Path::new("out/hardware_gen.h")),
            PathBuf::from("out/hardware_gen.h.tmp")
        );
        assert_eq!(staging_path(Path::new("hardware.json")), PathBuf::from("hardware.json.tmp"));
    }

    #[test]
    fn test_failed_write_leaves_existing_artifacts() {
        let dir = std::env::temp_dir().join(format!("hwgen-stage-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let header = dir.join("hardware_gen.h");
        fs::write(&header, "old").unwrap();

        let temp = stage(&header, b"new").unwrap();
        assert_eq!(fs::read_to_string(&header).unwrap(), "old");

        // A directory in the way makes the second staging write fail
        let blocked = dir.join("hardware.json");
        fs::create_dir_all(staging_path(&blocked)).unwrap();
        assert!(matches!(stage(&blocked, b"{}"), Err(Error::Io { .. })));

        discard(&[(temp.clone(), header.clone())]);
        assert!(!temp.exists());
        assert_eq!(fs::read_to_string(&header).unwrap(), "old");

        fs::remove_dir_all(&dir).unwrap();
    }
}
