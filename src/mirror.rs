//! The mirror executor: `backup` (two-phase-commit sync of input paths
//! onto a destination's `Content/` tree) and `validate` (recomputing the
//! destination's content and diffing it against what was persisted).
//!
//! The overall shape is "diff against the previous snapshot, then execute
//! the diff," staging every write under a throwaway name before making it
//! visible - the whole-destination two-phase commit described in
//! [`crate::sidecar`].

use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;

use crate::diff::{DiffHash, DiffOperation, DiffResult};
use crate::error::{Error, IoContext, Result};
use crate::sidecar::{self, commit_pending_delete, commit_pending_write, mark_pending_delete, stage_pending_commit};
use crate::snapshot::{MIRROR_SNAPSHOT_NAME, Snapshot};
use crate::store::{FileStore, ItemType};
use crate::tree::Node;
use crate::{discovery, hashing};

/// Projected writes may not exceed this fraction of reported free space.
const CAPACITY_HEADROOM: f64 = 0.85;

pub struct MirrorOptions<'a> {
    /// Treat the destination as empty regardless of what's persisted -
    /// every input is restreamed, and any content the destination still
    /// has but the persisted snapshot doesn't know about is left alone
    /// until the next run observes it as a stray remove.
    pub force: bool,
    pub filter: Option<&'a (dyn Fn(&Utf8Path) -> bool + Sync)>,
}

impl Default for MirrorOptions<'_> {
    fn default() -> Self {
        MirrorOptions {
            force: false,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateMode {
    /// Trust file sizes; never re-hash content.
    Standard,
    /// Re-hash every file under `Content/`.
    Complete,
}

pub struct MirrorReport {
    pub applied: Vec<DiffResult>,
}

fn content_dir(destination: &Utf8Path) -> Utf8PathBuf {
    destination.join("Content")
}

fn snapshot_path(destination: &Utf8Path) -> Utf8PathBuf {
    destination.join(MIRROR_SNAPSHOT_NAME)
}

/// Runs one mirror backup: computes the local snapshot from `inputs`,
/// diffs it against what's persisted at `destination`, and applies the
/// difference through the pending-commit/pending-delete protocol.
///
/// `store` both reads `inputs` (absolute local paths) and writes
/// `destination`; its `working_dir` must be `destination` so
/// `validate_backup_inputs` can reject an input that overlaps it.
pub fn backup(
    store: &dyn FileStore,
    destination: &Utf8Path,
    inputs: &[Utf8PathBuf],
    opts: &MirrorOptions,
    progress: &(dyn Fn(u64) + Sync),
) -> Result<MirrorReport> {
    let content_dir = content_dir(destination);
    let snapshot_path = snapshot_path(destination);

    let local_root = discovery::discover_and_hash(
        store,
        inputs,
        &discovery::DiscoveryOptions {
            hash_files: true,
            filter: opts.filter,
        },
        progress,
    )?;
    let local_snapshot = Snapshot::from_root(local_root);

    let dest_snapshot = if opts.force || !Snapshot::is_persisted(store, &snapshot_path) {
        Snapshot::empty()
    } else {
        Snapshot::load_persisted(store, &snapshot_path)?
    };

    let diffs = local_snapshot.diff(&dest_snapshot, true);

    let required: u64 = diffs
        .iter()
        .filter(|d| matches!(d.operation, DiffOperation::Add | DiffOperation::Modify))
        .filter_map(|d| d.this.as_ref())
        .filter_map(|side| side.file_size)
        .sum();
    if let Some(available) = store.bytes_available() {
        if (required as f64) > CAPACITY_HEADROOM * (available as f64) {
            return Err(Error::Capacity { required, available });
        }
    }

    sidecar::cleanup(store, &content_dir)?;

    store
        .open_write(&sidecar::pending_commit_path(&snapshot_path))?
        .write_all(&local_snapshot.to_bytes())
        .path_context(&snapshot_path)?;

    // Commits before deletes (fixed order, see design notes): stage every
    // write first so a crash between these two loops still leaves a
    // destination cleanup can reconcile either way.
    let mut pending_writes = Vec::new();
    for d in &diffs {
        if !matches!(d.operation, DiffOperation::Add | DiffOperation::Modify) {
            continue;
        }
        let mapped = content_dir.join(store.snapshot_filename_to_destination_name(&d.path));
        let this = d.this.as_ref().expect("add/modify always set this");
        match &this.hash {
            DiffHash::File(_) => {
                let staged = sidecar::temp_path(&mapped, 0);
                stream_file(store, &d.path, &staged)?;
                stage_pending_commit(store, &staged, &mapped)?;
            }
            DiffHash::Directory => {
                store.make_dirs(&sidecar::pending_commit_path(&mapped))?;
            }
        }
        pending_writes.push(mapped);
    }

    let mut pending_deletes = Vec::new();
    for d in &diffs {
        if !matches!(d.operation, DiffOperation::Remove | DiffOperation::Modify) {
            continue;
        }
        let mapped = content_dir.join(store.snapshot_filename_to_destination_name(&d.path));
        if store.item_type(&mapped).is_some() {
            mark_pending_delete(store, &mapped)?;
            pending_deletes.push(mapped);
        }
    }

    for target in &pending_writes {
        commit_pending_write(store, target)?;
    }
    for target in &pending_deletes {
        commit_pending_delete(store, target)?;
    }

    commit_pending_write(store, &snapshot_path)?;

    Ok(MirrorReport { applied: diffs })
}

fn stream_file(store: &dyn FileStore, from: &Utf8Path, to: &Utf8Path) -> Result<()> {
    let mut reader = store.open_read(from)?;
    let mut writer = store.open_write(to)?;
    std::io::copy(&mut reader, &mut writer).path_context(to)?;
    Ok(())
}

pub struct ValidateReport {
    /// Items present at the destination but not in the persisted
    /// snapshot.
    pub added: Vec<DiffResult>,
    /// Items the persisted snapshot expects but that are missing.
    pub removed: Vec<DiffResult>,
    /// Items present on both sides but differing (size, or hash in
    /// [`ValidateMode::Complete`]).
    pub modified: Vec<DiffResult>,
}

impl ValidateReport {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Recomputes the destination's content tree and compares it against what
/// was persisted, after remapping the persisted snapshot's roots through
/// [`FileStore::snapshot_filename_to_destination_name`] (the persisted
/// tree keys on raw source paths; the content tree on disk keys on mapped
/// ones - see module docs on [`crate::store`]).
pub fn validate(store: &dyn FileStore, destination: &Utf8Path, mode: ValidateMode) -> Result<ValidateReport> {
    let content_dir = content_dir(destination);
    let snapshot_path = snapshot_path(destination);

    let persisted = Snapshot::load_persisted(store, &snapshot_path)?;
    sidecar::cleanup(store, &content_dir)?;

    let remapped = remap_roots(store, &persisted.root);
    let fresh = hash_content_tree(store, &content_dir, mode == ValidateMode::Complete)?;

    let diffs = Snapshot::from_root(fresh).diff(&Snapshot::from_root(remapped), mode == ValidateMode::Complete);

    let mut report = ValidateReport {
        added: Vec::new(),
        removed: Vec::new(),
        modified: Vec::new(),
    };
    for d in diffs {
        match d.operation {
            DiffOperation::Add => report.added.push(d),
            DiffOperation::Remove => report.removed.push(d),
            DiffOperation::Modify => report.modified.push(d),
        }
    }
    Ok(report)
}

fn remap_roots(store: &dyn FileStore, root: &Node) -> Node {
    let mut remapped = Node::new_root();
    for (path, node) in root.walk() {
        let mapped = store.snapshot_filename_to_destination_name(&path);
        match &node.hash_value {
            crate::tree::HashValue::File(hash) => {
                remapped.add_file(&mapped, hash.clone(), node.file_size.unwrap_or(0), true);
            }
            crate::tree::HashValue::Directory(_) if node.children.is_empty() => {
                remapped.add_dir(&mapped);
            }
            crate::tree::HashValue::Directory(_) => {}
        }
    }
    remapped
}

fn hash_content_tree(store: &dyn FileStore, content_dir: &Utf8Path, hash_files: bool) -> Result<Node> {
    if store.item_type(content_dir).is_none() {
        return Ok(Node::new_root());
    }

    let mut filenames = Vec::new();
    let mut empty_dirs = Vec::new();
    for entry in store.walk(content_dir)? {
        let entry = entry?;
        let files: Vec<&String> = entry.files.iter().filter(|f| !sidecar::is_sidecar(Utf8Path::new(f))).collect();
        if entry.dirs.is_empty() && files.is_empty() {
            if let Ok(rel) = entry.root.strip_prefix(content_dir) {
                if !rel.as_str().is_empty() {
                    empty_dirs.push(rel.to_path_buf());
                }
            }
            continue;
        }
        for file in files {
            if let Ok(rel) = entry.root.join(file).strip_prefix(content_dir) {
                filenames.push(rel.to_path_buf());
            }
        }
    }

    let width = if store.execute_in_parallel() { num_cpus::get().max(1) } else { 1 };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(width)
        .build()
        .map_err(|e| Error::usage(format!("couldn't build worker pool: {e}")))?;

    let hashed: Vec<Option<(Utf8PathBuf, String, u64)>> = pool.install(|| {
        filenames
            .par_iter()
            .map(|rel| {
                let full = content_dir.join(rel);
                let size = store.file_size(&full).ok()?;
                if !hash_files {
                    return Some((rel.clone(), discovery::IGNORED_HASH.to_string(), size));
                }
                let reader = store.open_read(&full).ok()?;
                let counter = AtomicU64::new(0);
                let hash = hashing::hash_reader(reader, |n| {
                    counter.store(n, Ordering::Relaxed);
                })
                .ok()?;
                Some((rel.clone(), hash, size))
            })
            .collect()
    });

    let mut root = Node::new_root();
    for dir in &empty_dirs {
        root.add_dir(dir);
    }
    for (path, hash, size) in hashed.into_iter().flatten() {
        root.add_file(&path, hash, size, false);
    }
    Ok(root)
}
