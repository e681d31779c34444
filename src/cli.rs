//! The `snapvault` binary's command surface: argument parsing, help text,
//! and the thin translation from parsed flags into library calls and
//! process exit codes. Never re-implements engine logic - every command
//! function here is a few lines of setup around a call into [`crate::mirror`]
//! or [`crate::offsite`].
//!
//! One module per subcommand, each taking an `Args` struct built by
//! `clap`'s derive API and an owning `anyhow::Result<()>` return, with
//! shared path/filter flags pulled out via `#[command(flatten)]`.

pub mod mirror;
pub mod offsite;

use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{ArgAction, Parser, Subcommand};
use console::Term;

use crate::progress::{Progress, ProgressThread};

#[derive(Parser)]
#[command(name = "snapvault", version, about = "A crash-safe mirror and offsite backup engine")]
pub struct Cli {
    /// Repeatable: -v for info, -vv for debug, -vvv for trace.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Keep a destination byte-identical to a set of inputs.
    #[command(subcommand)]
    Mirror(mirror::MirrorCommand),
    /// Produce restorable, append-only deltas suitable for untrusted storage.
    #[command(subcommand)]
    Offsite(offsite::OffsiteCommand),
}

/// Flags shared by every filtering command: a list of regexes whose
/// matches are dropped from discovery.
#[derive(clap::Args)]
pub struct FilterArgs {
    /// Regex; any discovered path matching one is excluded. May repeat.
    #[arg(long = "skip")]
    pub skip: Vec<String>,
}

impl FilterArgs {
    pub fn build(&self) -> anyhow::Result<Option<Box<dyn Fn(&camino::Utf8Path) -> bool + Sync>>> {
        if self.skip.is_empty() {
            return Ok(None);
        }
        let filter = crate::filter::skip_matching_paths(&self.skip)?;
        Ok(Some(Box::new(filter)))
    }
}

pub fn install_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();
}

/// Directory holding every per-backup-name offsite snapshot file
/// (`OffsiteBackup.<name>.json` and its `.__pending__` sibling), kept apart
/// from any single backup's destination so commit/restore can find prior
/// state regardless of where this run's destination points.
pub fn state_dir(config: &crate::config::Configuration) -> anyhow::Result<Utf8PathBuf> {
    if let Some(dir) = &config.cache_dir {
        return Ok(dir.join("state"));
    }
    let mut dir: Utf8PathBuf = home::home_dir()
        .ok_or_else(|| anyhow::anyhow!("can't find home directory"))?
        .try_into()
        .map_err(|_| anyhow::anyhow!("home directory isn't UTF-8"))?;
    dir.extend([".config", "snapvault", "state"]);
    Ok(dir)
}

/// Scratch directory an offsite run assembles its working directory under.
pub fn scratch_dir(config: &crate::config::Configuration) -> Utf8PathBuf {
    match &config.cache_dir {
        Some(dir) => dir.join("scratch"),
        None => Utf8PathBuf::try_from(std::env::temp_dir().join("snapvault")).unwrap_or_else(|_| Utf8PathBuf::from("/tmp/snapvault")),
    }
}

/// Spawns the CLI's default progress renderer and returns it along with a
/// `Progress` handle whose `byte_callback` can be handed to an executor.
/// Dropping the returned `ProgressThread` draws one final line and joins.
pub fn progress_reporter() -> (Arc<Progress>, ProgressThread) {
    let progress = Progress::new();
    let thread = ProgressThread::for_cli(Arc::clone(&progress), Term::stderr());
    (progress, thread)
}

/// Runs the parsed command, returning the process exit code (0 on success,
/// 1 if the library reported any non-fatal errors/warnings worth flagging).
pub fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Mirror(cmd) => mirror::run(cmd),
        Command::Offsite(cmd) => offsite::run(cmd),
    }
}
