//! The offsite executor: `backup` (content-addressed delta directory
//! assembly plus optional archiving and transfer), `commit` (pending→
//! standard per-backup snapshot promotion), `restore` (replay a primary
//! plus its deltas forward into a target directory), and `cleanup`.
//!
//! Assembles a batch of content-addressed objects into a directory, then
//! ships it: pool entries are whole files keyed by their own SHA-512, and
//! content already shipped under a given hash is never touched again
//! within a run. Reuses [`crate::mirror`]'s pending-commit transfer
//! protocol per-file instead of per-destination.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashSet;

use crate::archiver::{ArchiveSpec, Archiver};
use crate::diff::{DiffHash, DiffOperation, DiffResult};
use crate::error::{Error, IoContext, Result};
use crate::hashing;
use crate::sidecar;
use crate::snapshot::Snapshot;
use crate::store::{BulkStore, FileStore, ItemType};
use crate::tree::{HashValue, Node};
use crate::discovery;

/// Name of the archive base this crate asks the configured archiver for.
pub const ARCHIVE_NAME: &str = "data.7z";
pub const INDEX_NAME: &str = "index.json";
pub const INDEX_HASH_NAME: &str = "index.json.hash";

/// Where the destination is going, chosen by what the destination store
/// supports. A file-based store gets the same per-file pending-commit
/// dance [`crate::mirror`] uses, addressed under `backup_name/<dirname>`
/// computed here. A bulk store instead gets one recursive `upload` of the
/// assembled working directory; since [`BulkStore::upload`] has no
/// destination-subpath parameter of its own, the caller must hand in a
/// store whose own `working_dir` is already the exact
/// `backup_name/<dirname>` target (the same precondition
/// [`crate::mirror::backup`] places on its own `store` argument).
pub enum OffsiteDestination<'a> {
    Bulk(&'a dyn BulkStore),
    File(&'a dyn FileStore),
}

pub struct OffsiteOptions<'a> {
    /// Force a primary even if a standard snapshot is already on file for
    /// this `backup_name`.
    pub force: bool,
    /// Discard a conflicting pending snapshot instead of refusing to run.
    pub ignore_pending_snapshot: bool,
    pub compress: Option<ArchiveSpec>,
    pub filter: Option<&'a (dyn Fn(&Utf8Path) -> bool + Sync)>,
}

impl Default for OffsiteOptions<'_> {
    fn default() -> Self {
        OffsiteOptions {
            force: false,
            ignore_pending_snapshot: false,
            compress: None,
            filter: None,
        }
    }
}

pub struct OffsiteReport {
    pub working_dir: Utf8PathBuf,
    pub is_primary: bool,
    pub diffs: Vec<DiffResult>,
    pub archive_volumes: Vec<Utf8PathBuf>,
}

fn standard_snapshot_path(state: &dyn FileStore, backup_name: &str) -> Utf8PathBuf {
    state.working_dir().join(format!("OffsiteBackup.{backup_name}.json"))
}

fn pending_snapshot_path(state: &dyn FileStore, backup_name: &str) -> Utf8PathBuf {
    state.working_dir().join(format!("OffsiteBackup.{backup_name}.__pending__.json"))
}

/// Runs one offsite backup. `source` reads `inputs`; `local` is a writable
/// scratch [`FileStore`] the working directory is assembled under (its
/// `working_dir` is the scratch root, not the final destination); `state`
/// is where the per-backup-name snapshot files live; `destination` is
/// where the assembled directory is shipped, if anywhere.
///
/// Returns `None` if the computed diff against the previous offsite
/// snapshot is empty (the backup silently no-ops, per spec).
#[allow(clippy::too_many_arguments)]
pub fn backup(
    source: &dyn FileStore,
    local: &dyn FileStore,
    state: &dyn FileStore,
    destination: Option<OffsiteDestination>,
    archiver: &dyn Archiver,
    backup_name: &str,
    inputs: &[Utf8PathBuf],
    opts: &OffsiteOptions,
    progress: &(dyn Fn(u64) + Sync),
) -> Result<Option<OffsiteReport>> {
    let pending_path = pending_snapshot_path(state, backup_name);
    let pending_exists = matches!(state.item_type(&pending_path), Some(ItemType::File));
    if pending_exists && !opts.ignore_pending_snapshot {
        return Err(Error::usage(format!(
            "a pending offsite snapshot for {backup_name} already exists; commit or discard it first"
        )));
    }
    if pending_exists && opts.ignore_pending_snapshot {
        state.remove_item(&pending_path)?;
    }

    let local_root = discovery::discover_and_hash(
        source,
        inputs,
        &discovery::DiscoveryOptions {
            hash_files: true,
            filter: opts.filter,
        },
        progress,
    )?;
    let local_snapshot = Snapshot::from_root(local_root);

    let standard_path = standard_snapshot_path(state, backup_name);
    let is_primary = opts.force || !Snapshot::is_persisted(state, &standard_path);
    let offsite_snapshot = if is_primary {
        Snapshot::empty()
    } else {
        Snapshot::load_persisted(state, &standard_path)?
    };

    let mut diffs = local_snapshot.diff(&offsite_snapshot, true);
    if diffs.is_empty() {
        return Ok(None);
    }
    diffs.sort_by(|a, b| a.path.as_str().cmp(b.path.as_str()));

    let dirname = allocate_working_dir_name(is_primary);
    let working_dir = local.working_dir().join(backup_name).join(&dirname);
    local.make_dirs(&working_dir)?;

    let mut known_hashes: FxHashSet<String> = FxHashSet::default();
    collect_file_hashes(&offsite_snapshot.root, &mut known_hashes);

    let mut written_files = Vec::new();
    for d in &diffs {
        if !matches!(d.operation, DiffOperation::Add | DiffOperation::Modify) {
            continue;
        }
        let Some(this) = &d.this else { continue };
        let DiffHash::File(hash) = &this.hash else { continue };
        if !known_hashes.insert(hash.clone()) {
            continue;
        }
        let pool_path = pool_path(&working_dir, hash);
        stream_file(source, &d.path, local, &pool_path)?;
        written_files.push(pool_path);
    }

    let index_bytes = serde_json::to_vec_pretty(&diffs).expect("DiffResult serialization is infallible");
    let index_path = working_dir.join(INDEX_NAME);
    local.open_write(&index_path)?.write_all(&index_bytes).path_context(&index_path)?;
    written_files.push(index_path.clone());

    let index_hash_path = working_dir.join(INDEX_HASH_NAME);
    let index_hash = hashing::hash_bytes(&index_bytes);
    local.open_write(&index_hash_path)?.write_all(index_hash.as_bytes()).path_context(&index_hash_path)?;
    written_files.push(index_hash_path);

    let mut archive_volumes = Vec::new();
    if let Some(spec) = &opts.compress {
        let spec = ArchiveSpec {
            archive_name: ARCHIVE_NAME.to_string(),
            ..spec.clone()
        };
        archive_volumes = archiver.create(&working_dir, &working_dir, &spec)?;
        archiver.verify(&archive_volumes, spec.password.as_deref())?;
        for f in &written_files {
            local.remove_item(f)?;
        }
    }

    if let Some(dest) = destination {
        transfer(local, &working_dir, dest, backup_name, &dirname)?;
        local_snapshot.persist(state, &standard_path)?;
    } else {
        local_snapshot.persist(state, &pending_path)?;
    }

    Ok(Some(OffsiteReport {
        working_dir,
        is_primary,
        diffs,
        archive_volumes,
    }))
}

fn pool_path(working_dir: &Utf8Path, hash: &str) -> Utf8PathBuf {
    working_dir.join(&hash[0..2]).join(&hash[2..4]).join(hash)
}

fn collect_file_hashes(root: &Node, out: &mut FxHashSet<String>) {
    for (_, node) in root.walk() {
        if let HashValue::File(hash) = &node.hash_value {
            out.insert(hash.clone());
        }
    }
}

fn stream_file(source: &dyn FileStore, from: &Utf8Path, local: &dyn FileStore, to: &Utf8Path) -> Result<()> {
    let mut reader = source.open_read(from)?;
    let mut writer = local.open_write(to)?;
    std::io::copy(&mut reader, &mut writer).path_context(to)?;
    Ok(())
}

fn transfer(
    local: &dyn FileStore,
    working_dir: &Utf8Path,
    destination: OffsiteDestination,
    backup_name: &str,
    dirname: &str,
) -> Result<()> {
    match destination {
        OffsiteDestination::Bulk(bulk) => bulk.upload(working_dir),
        OffsiteDestination::File(dest) => {
            let remote_dir = dest.working_dir().join(backup_name).join(dirname);
            let mut files = Vec::new();
            collect_files(local, working_dir, &mut files)?;
            let mut pending = Vec::new();
            for from in &files {
                let rel = from.strip_prefix(working_dir).unwrap_or(from);
                let to = remote_dir.join(rel);
                let staged = sidecar::temp_path(&to, 0);
                let mut reader = local.open_read(from)?;
                let mut writer = dest.open_write(&staged)?;
                std::io::copy(&mut reader, &mut writer).path_context(&to)?;
                sidecar::stage_pending_commit(dest, &staged, &to)?;
                pending.push(to);
            }
            for to in &pending {
                sidecar::commit_pending_write(dest, to)?;
            }
            Ok(())
        }
    }
}

fn collect_files(store: &dyn FileStore, dir: &Utf8Path, out: &mut Vec<Utf8PathBuf>) -> Result<()> {
    for entry in store.walk(dir)? {
        let entry = entry?;
        for f in &entry.files {
            out.push(entry.root.join(f));
        }
    }
    Ok(())
}

/// Promotes a backup name's pending snapshot to standard, confirming an
/// out-of-band transfer finished. A no-op if there's nothing pending.
pub fn commit(state: &dyn FileStore, backup_name: &str) -> Result<()> {
    let pending = pending_snapshot_path(state, backup_name);
    if !matches!(state.item_type(&pending), Some(ItemType::File)) {
        tracing::debug!("nothing pending to commit for {backup_name}");
        return Ok(());
    }
    state.rename(&pending, &standard_snapshot_path(state, backup_name))
}

/// Reconciles a destination left mid-transfer by a crashed offsite run.
pub fn cleanup(destination: &dyn FileStore, backup_name: &str) -> Result<()> {
    sidecar::cleanup(destination, &destination.working_dir().join(backup_name))
}

// ---------------------------------------------------------------------
// Offsite directory naming
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct OffsiteTimestamp {
    pub year: i16,
    pub month: i8,
    pub day: i8,
    pub hour: i8,
    pub minute: i8,
    pub second: i8,
    pub micros: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsiteDirName {
    pub name: String,
    pub timestamp: OffsiteTimestamp,
    pub is_delta: bool,
}

fn dir_name_regex() -> regex::Regex {
    regex::Regex::new(r"^(\d{4})\.(\d{2})\.(\d{2})\.(\d{2})\.(\d{2})\.(\d{2})-(\d+)(\.delta)?$")
        .expect("static regex is valid")
}

/// Parses a directory name against `YYYY.MM.DD.HH.MM.SS-N[.delta]`.
/// Returns `None` for anything else (the caller surfaces unrecognized
/// entries as an [`Error::Integrity`] at the call site, since an
/// unrecognized name inside a backup-name directory means the listing
/// can't be trusted).
pub fn parse_dir_name(name: &str) -> Option<OffsiteDirName> {
    let caps = dir_name_regex().captures(name)?;
    Some(OffsiteDirName {
        name: name.to_string(),
        timestamp: OffsiteTimestamp {
            year: caps[1].parse().ok()?,
            month: caps[2].parse().ok()?,
            day: caps[3].parse().ok()?,
            hour: caps[4].parse().ok()?,
            minute: caps[5].parse().ok()?,
            second: caps[6].parse().ok()?,
            micros: caps[7].parse().ok()?,
        },
        is_delta: caps.get(8).is_some(),
    })
}

fn allocate_working_dir_name(is_primary: bool) -> String {
    let now = jiff::Zoned::now();
    let dt = now.datetime();
    let micros = dt.subsec_nanosecond() / 1_000;
    let stem = format!(
        "{:04}.{:02}.{:02}.{:02}.{:02}.{:02}-{}",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        micros
    );
    if is_primary { stem } else { format!("{stem}.delta") }
}

// ---------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------

pub struct RestoreOptions {
    pub dry_run: bool,
    pub overwrite: bool,
    /// Applied in order, as plain string-replace, to the posix form of
    /// each index path before it's mapped to a local target.
    pub path_substitutions: Vec<(String, String)>,
    pub password: Option<String>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        RestoreOptions {
            dry_run: false,
            overwrite: false,
            path_substitutions: Vec::new(),
            password: None,
        }
    }
}

pub struct RestoreReport {
    pub replayed_directories: Vec<String>,
    pub restored: Vec<Utf8PathBuf>,
    pub removed: Vec<Utf8PathBuf>,
}

enum PlannedOp {
    RestoreFile { staged: Utf8PathBuf, target: Utf8PathBuf },
    MakeDir { target: Utf8PathBuf },
    Remove { target: Utf8PathBuf },
}

/// Restores `backup_name` into `target_dir` on `target`, replaying the
/// primary directory and every chronologically later delta found under
/// `destination`.
pub fn restore(
    destination: &dyn FileStore,
    target: &dyn FileStore,
    archiver: &dyn Archiver,
    backup_name: &str,
    target_dir: &Utf8Path,
    opts: &RestoreOptions,
) -> Result<RestoreReport> {
    let backup_dir = destination.working_dir().join(backup_name);
    let replay_set = replay_set(destination, &backup_dir)?;

    let mut pool: BTreeMap<String, Utf8PathBuf> = BTreeMap::new();
    let mut all_diffs: Vec<(String, Vec<DiffResult>)> = Vec::new();

    for dir_name in &replay_set {
        let source_dir = backup_dir.join(&dir_name.name);
        let fetched_dir = fetch_directory(destination, target, &source_dir, archiver, opts.password.as_deref())?;

        let index_path = fetched_dir.join(INDEX_NAME);
        let mut index_bytes = Vec::new();
        target.open_read(&index_path)?.read_to_end(&mut index_bytes).path_context(&index_path)?;

        let hash_path = fetched_dir.join(INDEX_HASH_NAME);
        let mut expected_hash = String::new();
        target.open_read(&hash_path)?.read_to_string(&mut expected_hash).path_context(&hash_path)?;
        let actual_hash = hashing::hash_bytes(&index_bytes);
        if actual_hash != expected_hash.trim() {
            return Err(Error::integrity(format!(
                "index.json hash mismatch in {}",
                dir_name.name
            )));
        }

        let diffs: Vec<DiffResult> = serde_json::from_slice(&index_bytes)?;

        for entry in target.walk(&fetched_dir)?.collect::<Result<Vec<_>>>()? {
            for file in &entry.files {
                if file == INDEX_NAME || file == INDEX_HASH_NAME || file.starts_with("data.7z") {
                    continue;
                }
                let path = entry.root.join(file);
                let mut buf = Vec::new();
                target.open_read(&path)?.read_to_end(&mut buf).path_context(&path)?;
                let actual = hashing::hash_bytes(&buf);
                if actual != *file {
                    return Err(Error::integrity(format!("pool file {path} hash mismatch")));
                }
                pool.entry(file.clone()).or_insert(path);
            }
        }

        all_diffs.push((dir_name.name.clone(), diffs));
    }

    let mut known_hashes: FxHashSet<String> = FxHashSet::default();
    let mut plan = Vec::new();
    for (_, diffs) in &all_diffs {
        for d in diffs {
            // Substitutions run on the posix form of the index path itself
            // (before root-mapping), same as the original's `PathToFilename`
            // replacing on `item["path"]` directly - a substitution anchored
            // with a leading slash only matches before the leading `/` is
            // stripped. `d.path` is absolute (the original input path); map
            // the substituted path onto `target_dir` the same way a mirror
            // destination's content tree does, rather than joining the
            // absolute path directly (which would discard `target_dir` and
            // write back over the source).
            let substituted = apply_substitutions(&d.path, &opts.path_substitutions);
            let local_path = crate::store::snapshot_filename_to_destination_name(&substituted);
            let full_target = target_dir.join(&local_path);
            match d.operation {
                DiffOperation::Add => {
                    let this = d.this.as_ref().expect("add always sets this");
                    match &this.hash {
                        DiffHash::File(hash) => {
                            known_hashes.insert(hash.clone());
                            let pool_file = pool
                                .get(hash)
                                .ok_or_else(|| Error::integrity(format!("missing pool file for {hash}")))?;
                            let staged = sidecar::temp_path(&full_target, 0);
                            stream_file(target, pool_file, target, &staged)?;
                            plan.push(PlannedOp::RestoreFile { staged, target: full_target });
                        }
                        DiffHash::Directory => {
                            plan.push(PlannedOp::MakeDir { target: full_target });
                        }
                    }
                }
                DiffOperation::Modify => {
                    let other = d.other.as_ref().expect("modify always sets other");
                    if let DiffHash::File(other_hash) = &other.hash {
                        if !known_hashes.contains(other_hash) {
                            return Err(Error::integrity(format!(
                                "modify at {} references unknown prior hash {other_hash}",
                                d.path
                            )));
                        }
                    }
                    let this = d.this.as_ref().expect("modify always sets this");
                    if let DiffHash::File(hash) = &this.hash {
                        known_hashes.insert(hash.clone());
                        let pool_file = pool
                            .get(hash)
                            .ok_or_else(|| Error::integrity(format!("missing pool file for {hash}")))?;
                        let staged = sidecar::temp_path(&full_target, 0);
                        stream_file(target, pool_file, target, &staged)?;
                        plan.push(PlannedOp::RestoreFile { staged, target: full_target });
                    }
                }
                DiffOperation::Remove => {
                    plan.push(PlannedOp::Remove { target: full_target });
                }
            }
        }
    }

    if opts.dry_run {
        for op in &plan {
            match op {
                PlannedOp::RestoreFile { target, .. } => tracing::info!("would restore {target}"),
                PlannedOp::MakeDir { target } => tracing::info!("would create directory {target}"),
                PlannedOp::Remove { target } => tracing::info!("would remove {target}"),
            }
        }
        // Discard the staged temp files we created for the dry-run plan.
        for op in &plan {
            if let PlannedOp::RestoreFile { staged, .. } = op {
                let _ = target.remove_item(staged);
            }
        }
        return Ok(RestoreReport {
            replayed_directories: replay_set.iter().map(|d| d.name.clone()).collect(),
            restored: Vec::new(),
            removed: Vec::new(),
        });
    }

    for op in &plan {
        if let PlannedOp::RestoreFile { target: t, .. } = op {
            if !opts.overwrite && target.item_type(t).is_some() {
                for op in &plan {
                    if let PlannedOp::RestoreFile { staged, .. } = op {
                        let _ = target.remove_item(staged);
                    }
                }
                return Err(Error::usage(format!("{t} already exists and overwrite is disabled")));
            }
        }
    }

    let mut restored = Vec::new();
    let mut removed = Vec::new();
    for op in plan {
        match op {
            PlannedOp::RestoreFile { staged, target: t } => {
                target.rename(&staged, &t)?;
                restored.push(t);
            }
            PlannedOp::MakeDir { target: t } => {
                target.make_dirs(&t)?;
                restored.push(t);
            }
            PlannedOp::Remove { target: t } => {
                target.remove_item(&t)?;
                removed.push(t);
            }
        }
    }

    Ok(RestoreReport {
        replayed_directories: replay_set.iter().map(|d| d.name.clone()).collect(),
        restored,
        removed,
    })
}

fn apply_substitutions(path: &Utf8Path, subs: &[(String, String)]) -> Utf8PathBuf {
    let mut s = path.as_str().to_string();
    for (from, to) in subs {
        s = s.replace(from.as_str(), to.as_str());
    }
    Utf8PathBuf::from(s)
}

fn replay_set(destination: &dyn FileStore, backup_dir: &Utf8Path) -> Result<Vec<OffsiteDirName>> {
    let entry = destination
        .walk(backup_dir)?
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .find(|e| e.root == backup_dir)
        .ok_or_else(|| Error::integrity(format!("no backup directory at {backup_dir}")))?;

    let mut parsed = Vec::new();
    for name in &entry.dirs {
        match parse_dir_name(name) {
            Some(d) => parsed.push(d),
            None => return Err(Error::integrity(format!("unrecognized offsite directory name: {name}"))),
        }
    }

    let primaries: Vec<&OffsiteDirName> = parsed.iter().filter(|d| !d.is_delta).collect();
    if primaries.is_empty() {
        return Err(Error::integrity("no primary directory found".to_string()));
    }
    if primaries.len() > 1 {
        return Err(Error::integrity("multiple primary directories found".to_string()));
    }
    let primary = primaries[0].clone();

    let mut set: Vec<OffsiteDirName> = parsed
        .into_iter()
        .filter(|d| d.is_delta && d.timestamp > primary.timestamp)
        .collect();
    set.sort_by_key(|d| d.timestamp);
    set.insert(0, primary);
    Ok(set)
}

/// Fetches a backup directory into a local working area. Local
/// destinations work in place; this crate ships only local stores, so the
/// "streamed chunks if remote" branch is dormant until a networked store
/// exists, but the split is kept so one exists to plug in.
fn fetch_directory(
    destination: &dyn FileStore,
    target: &dyn FileStore,
    source_dir: &Utf8Path,
    archiver: &dyn Archiver,
    password: Option<&str>,
) -> Result<Utf8PathBuf> {
    let working_dir = if destination.is_local_filesystem() {
        source_dir.to_path_buf()
    } else {
        let scratch = target.working_dir().join(".fetch").join(source_dir.file_name().unwrap_or("dir"));
        target.make_dirs(&scratch)?;
        for entry in destination.walk(source_dir)? {
            let entry = entry?;
            let rel = entry.root.strip_prefix(source_dir).unwrap_or(Utf8Path::new(""));
            for file in &entry.files {
                let from = entry.root.join(file);
                let to = scratch.join(rel).join(file);
                let mut reader = destination.open_read(&from)?;
                let mut writer = target.open_write(&to)?;
                std::io::copy(&mut reader, &mut writer).path_context(&to)?;
            }
        }
        scratch
    };

    let archive_marker = working_dir.join(format!("{ARCHIVE_NAME}.001"));
    if matches!(target.item_type(&archive_marker), Some(ItemType::File)) {
        let mut volumes = Vec::new();
        for entry in target.walk(&working_dir)?.collect::<Result<Vec<_>>>()? {
            for f in &entry.files {
                if f.starts_with(ARCHIVE_NAME) {
                    volumes.push(entry.root.join(f));
                }
            }
        }
        volumes.sort();
        archiver.verify(&volumes, password)?;
        archiver.extract(&volumes, &working_dir, password)?;
    }

    Ok(working_dir)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::archiver::NullArchiver;
    use crate::store::MemoryStore;
    use camino::Utf8PathBuf;
    use std::io::Write as _;

    fn put(store: &MemoryStore, path: &str, contents: &[u8]) {
        store.open_write(Utf8Path::new(path)).unwrap().write_all(contents).unwrap();
    }

    #[test]
    fn dir_name_parses_primary_and_delta() {
        let primary = parse_dir_name("2026.07.28.10.00.00-123456").unwrap();
        assert!(!primary.is_delta);
        let delta = parse_dir_name("2026.07.28.11.00.00-1.delta").unwrap();
        assert!(delta.is_delta);
        assert!(parse_dir_name("not-a-dir-name").is_none());
    }

    #[test]
    fn first_backup_is_a_primary_and_second_is_a_delta() {
        let mut source = MemoryStore::new();
        put(&source, "/src/one/A", b"one/A");
        let state = MemoryStore::new();
        let archiver = NullArchiver;

        let report = backup(
            &source,
            &state,
            &state,
            None,
            &archiver,
            "mybackup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions::default(),
            &|_| {},
        )
        .unwrap()
        .unwrap();
        assert!(report.is_primary);
        commit(&state, "mybackup").unwrap();

        put(&mut source, "/src/one/NewFile1", b"New file 1");
        let second = backup(
            &source,
            &state,
            &state,
            None,
            &archiver,
            "mybackup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions::default(),
            &|_| {},
        )
        .unwrap()
        .unwrap();
        assert!(!second.is_primary);
    }

    #[test]
    fn empty_diff_aborts_silently() {
        let mut source = MemoryStore::new();
        put(&source, "/src/one/A", b"one/A");
        let state = MemoryStore::new();
        let archiver = NullArchiver;

        backup(
            &source,
            &state,
            &state,
            None,
            &archiver,
            "mybackup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions::default(),
            &|_| {},
        )
        .unwrap();
        commit(&state, "mybackup").unwrap();

        let again = backup(
            &source,
            &state,
            &state,
            None,
            &archiver,
            "mybackup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions::default(),
            &|_| {},
        )
        .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn pending_snapshot_blocks_next_backup_without_ignore() {
        let mut source = MemoryStore::new();
        put(&source, "/src/one/A", b"one/A");
        let state = MemoryStore::new();
        let archiver = NullArchiver;

        backup(
            &source,
            &state,
            &state,
            None,
            &archiver,
            "mybackup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions::default(),
            &|_| {},
        )
        .unwrap();

        put(&mut source, "/src/one/B", b"b");
        let err = backup(
            &source,
            &state,
            &state,
            None,
            &archiver,
            "mybackup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions::default(),
            &|_| {},
        )
        .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));

        let ok = backup(
            &source,
            &state,
            &state,
            None,
            &archiver,
            "mybackup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions {
                ignore_pending_snapshot: true,
                ..OffsiteOptions::default()
            },
            &|_| {},
        )
        .unwrap();
        assert!(ok.is_some());
    }

    #[test]
    fn duplicate_content_dedupes_within_one_run() {
        let mut source = MemoryStore::new();
        put(&source, "/src/a", b"same");
        put(&source, "/src/b", b"same");
        let state = MemoryStore::new();
        let archiver = NullArchiver;

        let report = backup(
            &source,
            &state,
            &state,
            None,
            &archiver,
            "dedup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions::default(),
            &|_| {},
        )
        .unwrap()
        .unwrap();

        let mut pool_files = 0;
        for entry in state.walk(&report.working_dir).unwrap() {
            let entry = entry.unwrap();
            pool_files += entry.files.iter().filter(|f| f.as_str() != INDEX_NAME && f.as_str() != INDEX_HASH_NAME).count();
        }
        assert_eq!(pool_files, 1);
    }

    #[test]
    fn primary_plus_delta_restores_byte_for_byte() {
        let mut source = MemoryStore::new();
        put(&source, "/src/one/A", b"one/A");
        put(&source, "/src/one/BC", b"one/BC");
        let dest = MemoryStore::new();
        let state = MemoryStore::new();
        let archiver = NullArchiver;

        backup(
            &source,
            &state,
            &state,
            Some(OffsiteDestination::File(&dest)),
            &archiver,
            "mybackup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions::default(),
            &|_| {},
        )
        .unwrap();

        put(&mut source, "/src/one/NewFile1", b"New file 1");
        backup(
            &source,
            &state,
            &state,
            Some(OffsiteDestination::File(&dest)),
            &archiver,
            "mybackup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions::default(),
            &|_| {},
        )
        .unwrap();

        let restore_target = MemoryStore::new();
        let report = restore(
            &dest,
            &restore_target,
            &archiver,
            "mybackup",
            Utf8Path::new("/out"),
            &RestoreOptions::default(),
        )
        .unwrap();
        assert_eq!(report.replayed_directories.len(), 2);

        let mut buf = Vec::new();
        restore_target
            .open_read(Utf8Path::new("/out/src/one/A"))
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        assert_eq!(buf, b"one/A");
        buf.clear();
        restore_target
            .open_read(Utf8Path::new("/out/src/one/NewFile1"))
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        assert_eq!(buf, b"New file 1");
    }

    #[test]
    fn restore_substitution_matches_a_leading_slash_on_the_index_path() {
        let mut source = MemoryStore::new();
        put(&source, "/src/one/A", b"one/A");
        let dest = MemoryStore::new();
        let state = MemoryStore::new();
        let archiver = NullArchiver;

        backup(
            &source,
            &state,
            &state,
            Some(OffsiteDestination::File(&dest)),
            &archiver,
            "mybackup",
            &[Utf8PathBuf::from("/src")],
            &OffsiteOptions::default(),
            &|_| {},
        )
        .unwrap();

        let restore_target = MemoryStore::new();
        let report = restore(
            &dest,
            &restore_target,
            &archiver,
            "mybackup",
            Utf8Path::new("/out"),
            &RestoreOptions {
                // Anchored with the leading slash the index path actually
                // carries; only matches if applied before root-mapping
                // strips it.
                path_substitutions: vec![("/src/".to_string(), "/renamed/".to_string())],
                ..RestoreOptions::default()
            },
        )
        .unwrap();
        assert_eq!(report.restored.len(), 1);

        let mut buf = Vec::new();
        restore_target
            .open_read(Utf8Path::new("/out/renamed/A"))
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        assert_eq!(buf, b"one/A");
    }
}
