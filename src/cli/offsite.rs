//! `snapvault offsite backup|commit|restore|cleanup`.

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Subcommand;

use crate::archiver::{ArchiveSpec, Archiver, CommandArchiver, NullArchiver};
use crate::offsite::{self, OffsiteDestination, OffsiteOptions, RestoreOptions};
use crate::store::{self, FilesystemStore};

use super::FilterArgs;

#[derive(Subcommand)]
pub enum OffsiteCommand {
    /// Assemble a primary or delta directory and optionally ship it.
    Backup(BackupArgs),
    /// Promote a backup name's pending snapshot once a transfer is confirmed.
    Commit(CommitArgs),
    /// Replay a primary and its deltas forward into a target directory.
    Restore(RestoreArgs),
    /// Reconcile a destination left mid-transfer by a crashed run.
    Cleanup(CleanupArgs),
}

#[derive(clap::Args)]
pub struct BackupArgs {
    /// Name this series of backups is tracked under.
    pub backup_name: String,
    #[arg(required = true)]
    pub inputs: Vec<Utf8PathBuf>,
    /// Where to ship the assembled directory; a plain path, an `ftp://`
    /// connection string, or omitted to stage locally and commit later.
    #[arg(long)]
    pub destination: Option<String>,
    /// Force a primary even if a standard snapshot already exists.
    #[arg(long)]
    pub force: bool,
    /// Discard a conflicting pending snapshot instead of refusing to run.
    #[arg(long)]
    pub ignore_pending: bool,
    /// Compress and optionally encrypt the working directory via the
    /// configured archiver binary before transfer.
    #[arg(long)]
    pub compress: bool,
    #[arg(long, default_value_t = 200 * 1024 * 1024)]
    pub volume_size: u64,
    #[arg(long, default_value_t = 5)]
    pub compression_level: u8,
    #[arg(long)]
    pub password: Option<String>,
    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(clap::Args)]
pub struct CommitArgs {
    pub backup_name: String,
}

#[derive(clap::Args)]
pub struct RestoreArgs {
    pub backup_name: String,
    /// Where the offsite backups live; a plain path or `ftp://` connection string.
    pub destination: String,
    pub target_dir: Utf8PathBuf,
    /// Plan the restore without writing anything.
    #[arg(long)]
    pub dry_run: bool,
    /// Allow restoring over an existing file.
    #[arg(long)]
    pub overwrite: bool,
    /// `from=to` string substitutions applied to each index path before
    /// it's mapped under `target_dir`. May repeat.
    #[arg(long = "substitute", value_parser = parse_substitution)]
    pub substitutions: Vec<(String, String)>,
    #[arg(long)]
    pub password: Option<String>,
}

fn parse_substitution(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(from, to)| (from.to_string(), to.to_string()))
        .ok_or_else(|| format!("expected from=to, got {s}"))
}

#[derive(clap::Args)]
pub struct CleanupArgs {
    pub destination: String,
    pub backup_name: String,
}

pub fn run(cmd: OffsiteCommand) -> anyhow::Result<i32> {
    match cmd {
        OffsiteCommand::Backup(args) => backup(args),
        OffsiteCommand::Commit(args) => commit(args),
        OffsiteCommand::Restore(args) => restore(args),
        OffsiteCommand::Cleanup(args) => cleanup(args),
    }
}

fn backup(args: BackupArgs) -> anyhow::Result<i32> {
    let config = crate::config::load()?;
    let local = FilesystemStore::new(super::scratch_dir(&config));
    // validate_backup_inputs only rejects an input overlapping this store's
    // own working_dir; a marker under our own scratch area can never
    // legitimately collide with a real backup input.
    let source = FilesystemStore::new(local.working_dir().join(".offsite-source"));

    let state = FilesystemStore::new(super::state_dir(&config)?);

    let resolved_dest = args.destination.as_deref().map(store::resolve_destination).transpose()?;
    let destination = resolved_dest
        .as_ref()
        .map(|d| d.as_file_store().map(OffsiteDestination::File))
        .transpose()?;

    let command_archiver = CommandArchiver::new(config.archiver_binary.clone());
    let null_archiver = NullArchiver;
    let archiver: &dyn Archiver = if args.compress { &command_archiver } else { &null_archiver };

    let compress = args.compress.then(|| ArchiveSpec {
        archive_name: offsite::ARCHIVE_NAME.to_string(),
        volume_size: args.volume_size,
        compression_level: args.compression_level,
        password: args.password.clone(),
    });

    let filter = args.filter.build()?;
    let opts = OffsiteOptions {
        force: args.force,
        ignore_pending_snapshot: args.ignore_pending,
        compress,
        filter: filter.as_deref(),
    };

    let (progress, _thread) = super::progress_reporter();
    let report = offsite::backup(
        &source,
        &local,
        &state,
        destination,
        archiver,
        &args.backup_name,
        &args.inputs,
        &opts,
        &progress.byte_callback(),
    )
    .context("offsite backup failed")?;

    match report {
        Some(r) => {
            eprintln!(
                "{} directory {} with {} diffs",
                if r.is_primary { "primary" } else { "delta" },
                r.working_dir,
                r.diffs.len()
            );
            Ok(0)
        }
        None => {
            eprintln!("nothing changed; no backup produced");
            Ok(0)
        }
    }
}

fn commit(args: CommitArgs) -> anyhow::Result<i32> {
    let config = crate::config::load()?;
    let state = FilesystemStore::new(super::state_dir(&config)?);
    offsite::commit(&state, &args.backup_name).context("offsite commit failed")?;
    Ok(0)
}

fn restore(args: RestoreArgs) -> anyhow::Result<i32> {
    let config = crate::config::load()?;
    let dest = store::resolve_destination(&args.destination)?;
    let destination = dest.as_file_store()?;
    let target = FilesystemStore::new(Utf8PathBuf::from("/"));
    let archiver = CommandArchiver::new(config.archiver_binary.clone());

    let opts = RestoreOptions {
        dry_run: args.dry_run,
        overwrite: args.overwrite,
        path_substitutions: args.substitutions,
        password: args.password,
    };

    let report = offsite::restore(destination, &target, &archiver, &args.backup_name, &args.target_dir, &opts)
        .context("offsite restore failed")?;

    eprintln!(
        "replayed {} directories, restored {} items, removed {} items",
        report.replayed_directories.len(),
        report.restored.len(),
        report.removed.len()
    );
    Ok(0)
}

fn cleanup(args: CleanupArgs) -> anyhow::Result<i32> {
    let dest = store::resolve_destination(&args.destination)?;
    let destination = dest.as_file_store()?;
    offsite::cleanup(destination, &args.backup_name).context("offsite cleanup failed")?;
    Ok(0)
}
