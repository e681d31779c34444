//! The two-phase commit sidecar protocol shared by the mirror and offsite
//! executors: suffix constants, the transition helpers that apply them,
//! and the idempotent cleanup pass that reconciles a destination left
//! mid-commit by a prior crashed run.
//!
//! Rename-based: stage a write under a throwaway sibling name, then
//! rename into place, so a reader never observes a half-written file.
//! This module lifts that single-file idiom to whole-tree two-phase
//! commit - many pending writes and deletes, committed or rolled back
//! together.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::Result;
use crate::store::{FileStore, ItemType};

pub const PENDING_COMMIT_SUFFIX: &str = ".__pending_commit__";
pub const PENDING_DELETE_SUFFIX: &str = ".__pending_delete__";
pub const TEMP_SUFFIX: &str = ".__temp__";

/// True for any path carrying one of the sidecar suffixes; used by walkers
/// that must not let pending items show up in a computed snapshot.
pub fn is_sidecar(path: &Utf8Path) -> bool {
    let name = path.file_name().unwrap_or_default();
    name.ends_with(PENDING_COMMIT_SUFFIX) || name.ends_with(PENDING_DELETE_SUFFIX) || name.contains(TEMP_SUFFIX)
}

pub fn pending_commit_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}{PENDING_COMMIT_SUFFIX}"))
}

pub fn pending_delete_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}{PENDING_DELETE_SUFFIX}"))
}

pub fn temp_path(path: &Utf8Path, disambiguator: u64) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}{TEMP_SUFFIX}{disambiguator}"))
}

/// Marks `target` (which must currently exist at the destination) for
/// removal: renames it to its pending-delete sidecar. A later [`commit`]
/// call (or, if the run dies first, the next [`cleanup`]) decides whether
/// that rename sticks or is undone.
pub fn mark_pending_delete(store: &dyn FileStore, target: &Utf8Path) -> Result<()> {
    store.rename(target, &pending_delete_path(target))
}

/// Renames `staged` (typically a `.__temp__N` scratch path the content was
/// just streamed into) to `target`'s pending-commit sidecar.
pub fn stage_pending_commit(store: &dyn FileStore, staged: &Utf8Path, target: &Utf8Path) -> Result<()> {
    store.rename(staged, &pending_commit_path(target))
}

/// Strips the pending-commit suffix from `target`, publishing the write.
pub fn commit_pending_write(store: &dyn FileStore, target: &Utf8Path) -> Result<()> {
    store.rename(&pending_commit_path(target), target)
}

/// Removes `target`'s pending-delete sidecar outright, finalizing the
/// deletion.
pub fn commit_pending_delete(store: &dyn FileStore, target: &Utf8Path) -> Result<()> {
    store.remove_item(&pending_delete_path(target))
}

/// Walks `content_dir` and reconciles every sidecar found: pending-commit
/// items are discarded (they never finished arriving), pending-delete
/// items are restored by stripping the suffix (they were never confirmed
/// gone). Safe to call any number of times; a destination with no
/// sidecars is left untouched.
///
/// If `content_dir` doesn't exist, this is a no-op (nothing to reconcile
/// yet - the first backup hasn't run). If something exists at that path
/// but isn't a directory, it's removed outright: it can't be a valid
/// content tree.
pub fn cleanup(store: &dyn FileStore, content_dir: &Utf8Path) -> Result<()> {
    match store.item_type(content_dir) {
        None => return Ok(()),
        Some(ItemType::Dir) => {}
        Some(_) => {
            store.remove_item(content_dir)?;
            return Ok(());
        }
    }

    let mut pending_commits = Vec::new();
    let mut pending_deletes = Vec::new();
    for entry in store.walk(content_dir)? {
        let entry = entry?;
        for name in entry.dirs.iter().chain(entry.files.iter()) {
            let path = entry.root.join(name);
            if name.ends_with(PENDING_COMMIT_SUFFIX) {
                pending_commits.push(path);
            } else if name.ends_with(PENDING_DELETE_SUFFIX) {
                pending_deletes.push(path);
            }
        }
    }

    for path in pending_commits {
        tracing::info!("cleanup: discarding unfinished write {path}");
        store.remove_item(&path)?;
    }
    for path in pending_deletes {
        let restored = Utf8PathBuf::from(
            path.as_str()
                .strip_suffix(PENDING_DELETE_SUFFIX)
                .expect("matched the suffix above"),
        );
        tracing::info!("cleanup: restoring unconfirmed delete {path}");
        store.rename(&path, &restored)?;
    }
    Ok(())
}
