//! The archiver contract: a subprocess-backed interface for producing and
//! verifying volumed, optionally encrypted archives out of a directory of
//! loose files, used by the offsite executor's optional compression step.
//!
//! External tools sit behind a trait (`std::process::Command` invocations
//! gated behind `Archiver`) so the call site never needs a feature flag or
//! branch to pick an implementation - it always calls `create` then
//! `verify`, whether that's `CommandArchiver` or `NullArchiver`.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{Error, Result};

/// Parameters for one archive creation.
#[derive(Debug, Clone)]
pub struct ArchiveSpec {
    /// Base name of the archive, e.g. `data.7z`; volumes are named
    /// `<archive_name>.001`, `<archive_name>.002`, ...
    pub archive_name: String,
    /// Maximum size of each volume, in bytes.
    pub volume_size: u64,
    /// 0-9, archiver-defined; `CommandArchiver` passes this straight
    /// through to the configured binary.
    pub compression_level: u8,
    pub password: Option<String>,
}

/// A subprocess contract for turning a directory of loose files into a
/// volumed archive, and back. The offsite executor's control flow (§4.7
/// step 8) is the same whether compression is on or off: it always calls
/// `create` then `verify`, and reaches for `NullArchiver` when the caller
/// didn't ask for compression so no branch is needed at the call site.
pub trait Archiver: Send + Sync {
    /// Archives every file under `source_dir` into `dest_dir`, producing
    /// one or more volume files per `spec`. Returns the list of volume
    /// paths actually written.
    fn create(&self, source_dir: &Utf8Path, dest_dir: &Utf8Path, spec: &ArchiveSpec) -> Result<Vec<Utf8PathBuf>>;

    /// Runs the archiver's own integrity check against a set of volumes
    /// previously produced by `create` (or fetched from a remote store).
    fn verify(&self, volumes: &[Utf8PathBuf], password: Option<&str>) -> Result<()>;

    /// Extracts a set of volumes into `dest_dir`.
    fn extract(&self, volumes: &[Utf8PathBuf], dest_dir: &Utf8Path, password: Option<&str>) -> Result<()>;
}

/// Shells out to a configured binary (default `7z`, see [`crate::config`])
/// using the conventional `a`/`t`/`x` subcommands and `-v<size>`/`-p<pw>`
/// flags. This crate does not bundle or vendor that binary: it must be
/// installed and on `PATH`.
pub struct CommandArchiver {
    binary: String,
}

impl CommandArchiver {
    pub fn new(binary: impl Into<String>) -> CommandArchiver {
        CommandArchiver { binary: binary.into() }
    }

    fn run(&self, args: &[String]) -> Result<()> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| Error::external_tool(format!("couldn't run {}: {e}", self.binary)))?;
        if !output.status.success() {
            return Err(Error::external_tool(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

impl Archiver for CommandArchiver {
    fn create(&self, source_dir: &Utf8Path, dest_dir: &Utf8Path, spec: &ArchiveSpec) -> Result<Vec<Utf8PathBuf>> {
        let archive_path = dest_dir.join(&spec.archive_name);
        let mut args = vec![
            "a".to_string(),
            format!("-v{}b", spec.volume_size),
            format!("-mx{}", spec.compression_level),
            archive_path.to_string(),
            format!("{source_dir}{}", std::path::MAIN_SEPARATOR),
        ];
        if let Some(password) = &spec.password {
            args.push(format!("-p{password}"));
        }
        self.run(&args)?;

        let mut volumes = Vec::new();
        for entry in std::fs::read_dir(dest_dir).map_err(|e| Error::io(dest_dir, e))? {
            let entry = entry.map_err(|e| Error::io(dest_dir, e))?;
            if let Ok(name) = Utf8PathBuf::try_from(entry.path()) {
                if name
                    .file_name()
                    .is_some_and(|n| n.starts_with(&spec.archive_name))
                {
                    volumes.push(name);
                }
            }
        }
        volumes.sort();
        Ok(volumes)
    }

    fn verify(&self, volumes: &[Utf8PathBuf], password: Option<&str>) -> Result<()> {
        let Some(first) = volumes.first() else {
            return Err(Error::external_tool("no archive volumes to verify"));
        };
        let mut args = vec!["t".to_string(), first.to_string()];
        if let Some(password) = password {
            args.push(format!("-p{password}"));
        }
        self.run(&args)
    }

    fn extract(&self, volumes: &[Utf8PathBuf], dest_dir: &Utf8Path, password: Option<&str>) -> Result<()> {
        let Some(first) = volumes.first() else {
            return Err(Error::external_tool("no archive volumes to extract"));
        };
        let mut args = vec!["x".to_string(), first.to_string(), format!("-o{dest_dir}"), "-y".to_string()];
        if let Some(password) = password {
            args.push(format!("-p{password}"));
        }
        self.run(&args)
    }
}

/// Used when compression/encryption isn't requested: `create` simply
/// reports no volumes were written, and `verify`/`extract` are no-ops.
/// This is what lets the offsite executor call the same two methods
/// unconditionally regardless of whether archiving is enabled.
pub struct NullArchiver;

impl Archiver for NullArchiver {
    fn create(&self, _source_dir: &Utf8Path, _dest_dir: &Utf8Path, _spec: &ArchiveSpec) -> Result<Vec<Utf8PathBuf>> {
        Ok(Vec::new())
    }

    fn verify(&self, _volumes: &[Utf8PathBuf], _password: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn extract(&self, _volumes: &[Utf8PathBuf], _dest_dir: &Utf8Path, _password: Option<&str>) -> Result<()> {
        Ok(())
    }
}
