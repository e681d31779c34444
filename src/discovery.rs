//! The discovery+hashing pipeline: validates a set of input paths, walks
//! them through a [`FileStore`], and assembles a [`Node`] tree, hashing (or
//! sizing) files along the way with a rayon worker pool.
//!
//! No object-reuse cache is consulted: every file is re-hashed on every
//! run, there's no rolling-hash dedup against a prior tree. Parallelism is
//! pushed down into rayon rather than hand-rolled threads.

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::hashing;
use crate::store::{FileStore, ItemType};
use crate::tree::Node;

/// Marker hash recorded for files when hashing is skipped entirely (a
/// "hash-less" discovery pass that trusts size alone).
pub const IGNORED_HASH: &str = "ignored";

pub struct DiscoveryOptions<'a> {
    /// Whether to actually hash file contents (`false` only makes sense
    /// for callers that will compare by size, e.g. an explicit opt-out of
    /// re-hashing everything).
    pub hash_files: bool,
    /// Exclude takes precedence over include: `false` means "drop this
    /// path from the snapshot".
    pub filter: Option<&'a (dyn Fn(&Utf8Path) -> bool + Sync)>,
}

impl Default for DiscoveryOptions<'_> {
    fn default() -> Self {
        DiscoveryOptions {
            hash_files: true,
            filter: None,
        }
    }
}

/// Validates that every input exists, then sorts by path-part count and
/// rejects any input that is a descendant of a preceding one (so nobody
/// backs up both `/data` and `/data/logs` as two separate roots).
pub fn validate_inputs(store: &dyn FileStore, inputs: &[Utf8PathBuf]) -> Result<Vec<Utf8PathBuf>> {
    for input in inputs {
        if store.item_type(input).is_none() {
            return Err(Error::usage(format!("input path does not exist: {input}")));
        }
    }

    let mut sorted = inputs.to_vec();
    sorted.sort_by_key(|p| p.components().count());

    for i in 0..sorted.len() {
        for j in 0..i {
            if sorted[i] != sorted[j] && sorted[i].starts_with(&sorted[j]) {
                return Err(Error::usage(format!(
                    "{} is nested under input {}",
                    sorted[i], sorted[j]
                )));
            }
        }
    }

    store.validate_backup_inputs(&sorted)?;
    Ok(sorted)
}

/// Runs discovery and hashing over `inputs`, returning the assembled
/// snapshot tree rooted at a synthetic root. `progress` is called with the
/// number of additional bytes processed (hashed, or sized in hash-less
/// mode) after each chunk/file; it may be called concurrently from
/// multiple worker threads.
pub fn discover_and_hash(
    store: &dyn FileStore,
    inputs: &[Utf8PathBuf],
    opts: &DiscoveryOptions,
    progress: &(dyn Fn(u64) + Sync),
) -> Result<Node> {
    let inputs = validate_inputs(store, inputs)?;

    let mut filenames: Vec<Utf8PathBuf> = Vec::new();
    let mut explicit_dirs: Vec<Utf8PathBuf> = Vec::new();
    let mut empty_dirs: Vec<Utf8PathBuf> = Vec::new();

    for input in &inputs {
        match store.item_type(input) {
            Some(ItemType::File) => filenames.push(input.clone()),
            Some(ItemType::Dir) => {
                explicit_dirs.push(input.clone());
                for entry in store.walk(input)? {
                    let entry = entry?;
                    if entry.dirs.is_empty() && entry.files.is_empty() {
                        empty_dirs.push(entry.root.clone());
                        continue;
                    }
                    for file in &entry.files {
                        let path = entry.root.join(file);
                        let keep = opts.filter.map(|f| f(&path)).unwrap_or(true);
                        if keep {
                            filenames.push(path);
                        }
                    }
                }
            }
            Some(ItemType::SymLink) => {
                tracing::info!("skipping symlink input {input}");
            }
            None => unreachable!("validated above"),
        }
    }

    let width = if store.execute_in_parallel() {
        num_cpus::get().max(1)
    } else {
        1
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(width)
        .build()
        .map_err(|e| Error::usage(format!("couldn't build worker pool: {e}")))?;

    let hashed: Vec<Option<(Utf8PathBuf, String, u64)>> = pool.install(|| {
        filenames
            .par_iter()
            .map(|path| hash_one(store, path, opts.hash_files, progress))
            .collect()
    });

    let mut root = Node::new_root();
    for dir in &explicit_dirs {
        root.add_dir(dir);
    }
    for dir in &empty_dirs {
        root.add_dir(dir);
    }
    for (path, hash, size) in hashed.into_iter().flatten() {
        root.add_file(&path, hash, size, false);
    }
    Ok(root)
}

/// Hashes (or sizes) a single file. Returns `None` silently if the file
/// vanished between discovery and hashing: a dropped entry, not an error.
fn hash_one(
    store: &dyn FileStore,
    path: &Utf8Path,
    hash_files: bool,
    progress: &(dyn Fn(u64) + Sync),
) -> Option<(Utf8PathBuf, String, u64)> {
    if !hash_files {
        let size = store.file_size(path).ok()?;
        progress(size);
        return Some((path.to_path_buf(), IGNORED_HASH.to_string(), size));
    }

    let reader = store.open_read(path).ok()?;
    let mut last = 0u64;
    let hash = hashing::hash_reader(reader, |total| {
        progress(total - last);
        last = total;
    })
    .ok()?;
    let size = store.file_size(path).ok()?;
    Some((path.to_path_buf(), hash, size))
}
