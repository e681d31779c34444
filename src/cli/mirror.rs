//! `snapvault mirror backup|cleanup|validate`.

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Subcommand;

use crate::mirror::{self, MirrorOptions, ValidateMode};
use crate::sidecar;
use crate::store;

use super::FilterArgs;

#[derive(Subcommand)]
pub enum MirrorCommand {
    /// Sync a set of inputs onto a destination, applying only the diff.
    Backup(BackupArgs),
    /// Reconcile a destination left mid-commit by a crashed run.
    Cleanup(CleanupArgs),
    /// Recompute the destination's content and compare it to what was persisted.
    Validate(ValidateArgs),
}

#[derive(clap::Args)]
pub struct BackupArgs {
    /// Where the mirror lives; a plain path or an `ftp://` connection string.
    pub destination: String,
    /// One or more local files/directories to mirror.
    #[arg(required = true)]
    pub inputs: Vec<Utf8PathBuf>,
    /// Treat the destination as empty: restream every input and restore
    /// anything the persisted snapshot still claims but the destination lost.
    #[arg(long)]
    pub force: bool,
    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(clap::Args)]
pub struct CleanupArgs {
    pub destination: String,
}

#[derive(clap::Args)]
pub struct ValidateArgs {
    pub destination: String,
    /// Re-hash every file instead of trusting sizes alone.
    #[arg(long)]
    pub complete: bool,
}

pub fn run(cmd: MirrorCommand) -> anyhow::Result<i32> {
    match cmd {
        MirrorCommand::Backup(args) => backup(args),
        MirrorCommand::Cleanup(args) => cleanup(args),
        MirrorCommand::Validate(args) => validate(args),
    }
}

fn backup(args: BackupArgs) -> anyhow::Result<i32> {
    let dest = store::resolve_destination(&args.destination)?;
    let store = dest.as_file_store()?;

    let filter = args.filter.build()?;
    let opts = MirrorOptions {
        force: args.force,
        filter: filter.as_deref(),
    };

    let (progress, _thread) = super::progress_reporter();
    let report = mirror::backup(
        store,
        store.working_dir(),
        &args.inputs,
        &opts,
        &progress.byte_callback(),
    )
    .context("mirror backup failed")?;

    eprintln!("applied {} changes", report.applied.len());
    Ok(0)
}

fn cleanup(args: CleanupArgs) -> anyhow::Result<i32> {
    let dest = store::resolve_destination(&args.destination)?;
    let store = dest.as_file_store()?;
    sidecar::cleanup(store, &store.working_dir().join("Content")).context("mirror cleanup failed")?;
    Ok(0)
}

fn validate(args: ValidateArgs) -> anyhow::Result<i32> {
    let dest = store::resolve_destination(&args.destination)?;
    let store = dest.as_file_store()?;
    let mode = if args.complete { ValidateMode::Complete } else { ValidateMode::Standard };

    let report = mirror::validate(store, store.working_dir(), mode).context("mirror validate failed")?;
    for d in report.added.iter().chain(&report.removed).chain(&report.modified) {
        eprintln!("{:?} {}", d.operation, d.path);
    }
    if report.is_clean() { Ok(0) } else { Ok(1) }
}
