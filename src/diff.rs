//! The diff engine: [`DiffOperation`], [`DiffResult`], and [`create_diffs`].
//!
//! Walks two trees in lockstep and returns `Vec<DiffResult>` records
//! rather than dispatching to a callback trait, since the caller needs to
//! serialize the whole set wholesale into an offsite `index.json`. The
//! recursion itself is a straightforward tree-walk: recurse into matching
//! children, handle additions/removals by set difference on the two
//! `children` maps.

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::tree::{HashValue, Node};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOperation {
    Add,
    Modify,
    Remove,
}

/// The hash half of a [`DiffSide`]: either a file's content hash or "this
/// side is a directory" (directories carry no hash of their own).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffHash {
    File(String),
    Directory,
}

/// One side (`this` or `other`) of a [`DiffResult`]. `file_size` is
/// present if and only if `hash` is a file hash — mirroring the
/// `Node`-level invariant that directories have no size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSide {
    pub hash: DiffHash,
    pub file_size: Option<u64>,
}

impl DiffSide {
    fn from_node(node: &Node) -> DiffSide {
        match &node.hash_value {
            HashValue::File(hash) => DiffSide {
                hash: DiffHash::File(hash.clone()),
                file_size: node.file_size,
            },
            HashValue::Directory(_) => DiffSide {
                hash: DiffHash::Directory,
                file_size: None,
            },
        }
    }
}

/// An immutable record of one add/modify/remove at `path`. Constructed
/// only through [`DiffResult::add`]/[`modify`](DiffResult::modify)/[`remove`](DiffResult::remove),
/// which enforce the consistency invariants from the data model: `add`
/// carries only `this`, `remove` carries only `other`, and `modify`
/// carries both with differing file hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub operation: DiffOperation,
    pub path: Utf8PathBuf,
    pub this: Option<DiffSide>,
    pub other: Option<DiffSide>,
}

impl DiffResult {
    pub fn add(path: impl Into<Utf8PathBuf>, this: &Node) -> DiffResult {
        DiffResult {
            operation: DiffOperation::Add,
            path: path.into(),
            this: Some(DiffSide::from_node(this)),
            other: None,
        }
    }

    pub fn remove(path: impl Into<Utf8PathBuf>, other: &Node) -> DiffResult {
        DiffResult {
            operation: DiffOperation::Remove,
            path: path.into(),
            this: None,
            other: Some(DiffSide::from_node(other)),
        }
    }

    pub fn modify(path: impl Into<Utf8PathBuf>, this: &Node, other: &Node) -> DiffResult {
        let this_side = DiffSide::from_node(this);
        let other_side = DiffSide::from_node(other);
        debug_assert!(
            !matches!(
                (&this_side.hash, &other_side.hash),
                (DiffHash::File(_), DiffHash::Directory) | (DiffHash::Directory, DiffHash::File(_))
            ),
            "modify must not mix a file hash with a directory placeholder"
        );
        if let (DiffHash::File(a), DiffHash::File(b)) = (&this_side.hash, &other_side.hash) {
            debug_assert_ne!(a, b, "modify requires differing file hashes");
        }
        DiffResult {
            operation: DiffOperation::Modify,
            path: path.into(),
            this: Some(this_side),
            other: Some(other_side),
        }
    }

    /// Checks the consistency invariants from the data model section; used
    /// by tests and by callers deserializing an `index.json` they don't
    /// trust.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.operation {
            DiffOperation::Add => {
                if self.this.is_none() || self.other.is_some() {
                    return Err(format!("add at {} must set this, not other", self.path));
                }
            }
            DiffOperation::Remove => {
                if self.this.is_some() || self.other.is_none() {
                    return Err(format!("remove at {} must set other, not this", self.path));
                }
            }
            DiffOperation::Modify => {
                let (Some(this), Some(other)) = (&self.this, &self.other) else {
                    return Err(format!("modify at {} requires both sides", self.path));
                };
                if let (DiffHash::File(a), DiffHash::File(b)) = (&this.hash, &other.hash) {
                    if a == b {
                        return Err(format!("modify at {} has identical hashes", self.path));
                    }
                }
            }
        }
        for side in [&self.this, &self.other].into_iter().flatten() {
            let is_placeholder = matches!(side.hash, DiffHash::Directory);
            if is_placeholder != side.file_size.is_none() {
                return Err(format!(
                    "at {}: file_size must be null iff hash is a directory placeholder",
                    self.path
                ));
            }
        }
        Ok(())
    }
}

/// `hash equality` file comparator (used when `compare_hashes = true`).
pub fn compare_by_hash(a: &Node, b: &Node) -> bool {
    a.hash_value.as_file_hash() == b.hash_value.as_file_hash()
}

/// `file_size equality` file comparator (used when `compare_hashes = false`,
/// i.e. a "standard" validate pass that trusts sizes instead of re-hashing
/// everything).
pub fn compare_by_size(a: &Node, b: &Node) -> bool {
    a.file_size == b.file_size
}

/// Recursively diffs `this` against `other`, returning every emitted
/// [`DiffResult`] plus a summary of whether this subtree's changes are all
/// of one kind (used by the parent call to decide whether to collapse a
/// removed subtree into one record). `other = None` means no counterpart
/// exists at `path` at all (as opposed to an empty directory, which is
/// `Some` and has no children).
pub fn create_diffs(
    path: &Utf8Path,
    this: &Node,
    other: Option<&Node>,
    compare: &dyn Fn(&Node, &Node) -> bool,
) -> (Vec<DiffResult>, Option<DiffOperation>) {
    match other {
        None => add_only(path, this),
        Some(other) if this.is_file() != other.is_file() => type_mismatch(path, this, other),
        Some(other) if this.is_file() => file_vs_file(path, this, other, compare),
        Some(other) => dir_vs_dir(path, this, other, compare),
    }
}

fn add_only(path: &Utf8Path, this: &Node) -> (Vec<DiffResult>, Option<DiffOperation>) {
    if this.is_file() || (this.children.is_empty() && this.explicitly_added()) {
        return (vec![DiffResult::add(path, this)], Some(DiffOperation::Add));
    }
    let mut results = Vec::new();
    for (name, child) in &this.children {
        let child_path = path.join(name);
        let (child_results, _) = add_only(&child_path, child);
        results.extend(child_results);
    }
    (results, Some(DiffOperation::Add))
}

fn type_mismatch(path: &Utf8Path, this: &Node, other: &Node) -> (Vec<DiffResult>, Option<DiffOperation>) {
    let mut results = vec![DiffResult::remove(path, other)];
    let (add_results, _) = add_only(path, this);
    results.extend(add_results);
    (results, Some(DiffOperation::Modify))
}

fn file_vs_file(
    path: &Utf8Path,
    this: &Node,
    other: &Node,
    compare: &dyn Fn(&Node, &Node) -> bool,
) -> (Vec<DiffResult>, Option<DiffOperation>) {
    if compare(this, other) {
        (Vec::new(), None)
    } else {
        (vec![DiffResult::modify(path, this, other)], Some(DiffOperation::Modify))
    }
}

fn dir_vs_dir(
    path: &Utf8Path,
    this: &Node,
    other: &Node,
    compare: &dyn Fn(&Node, &Node) -> bool,
) -> (Vec<DiffResult>, Option<DiffOperation>) {
    let mut results = Vec::new();
    let mut summaries: Vec<Option<DiffOperation>> = Vec::new();

    for (name, other_child) in &other.children {
        if !this.children.contains_key(name) {
            let child_path = path.join(name);
            results.push(DiffResult::remove(&child_path, other_child));
            summaries.push(Some(DiffOperation::Remove));
        }
    }
    for (name, this_child) in &this.children {
        let child_path = path.join(name);
        let other_child = other.children.get(name);
        let (child_results, child_summary) = create_diffs(&child_path, this_child, other_child, compare);
        results.extend(child_results);
        summaries.push(child_summary);
    }

    let combined = combine_summaries(&summaries);

    // The synthetic tree root has no path of its own and can't be
    // collapsed into "a remove of the root" - only a named subdirectory
    // can collapse into a single remove record.
    if combined == Some(DiffOperation::Remove) && !path.as_str().is_empty() {
        if this.explicitly_added() || other.explicitly_added() {
            // A user explicitly named this directory on one side or the
            // other: never let it vanish as a side effect of every child
            // being removed. Keep the per-child removes and demote the
            // summary so the parent doesn't try to collapse further up.
            (results, Some(DiffOperation::Modify))
        } else {
            (vec![DiffResult::remove(path, other)], Some(DiffOperation::Remove))
        }
    } else {
        (results, combined)
    }
}

/// Combines child summaries the way `UpdateAtomicResult` does: `None`
/// (an unchanged child) is a participating value, not a value to discard.
/// All-`None` stays `None`; all-equal-and-no-`None` adopts that operation;
/// anything else (a `None` alongside a `Some`, or two distinct `Some`s)
/// demotes to `Modify` so an unchanged sibling is never swept into a
/// collapsed directory-level remove.
fn combine_summaries(summaries: &[Option<DiffOperation>]) -> Option<DiffOperation> {
    let mut has_none = false;
    let mut distinct: Option<DiffOperation> = None;
    let mut mixed = false;

    for s in summaries {
        match s {
            None => has_none = true,
            Some(op) => match distinct {
                None => distinct = Some(*op),
                Some(prev) if prev == *op => {}
                Some(_) => mixed = true,
            },
        }
    }

    let op = distinct?;
    if mixed || has_none {
        Some(DiffOperation::Modify)
    } else {
        Some(op)
    }
}

/// Diffs two full snapshots rooted at `this`/`other`. This is the entry
/// point `Snapshot::diff` calls; the roots are always directories (the
/// synthetic tree root), so the file/directory type-mismatch branch never
/// triggers here, only inside the recursion.
pub fn diff_roots(this: &Node, other: &Node, compare_hashes: bool) -> Vec<DiffResult> {
    let compare: &dyn Fn(&Node, &Node) -> bool = if compare_hashes {
        &compare_by_hash
    } else {
        &compare_by_size
    };
    let (results, _) = dir_vs_dir(Utf8Path::new(""), this, other, compare);
    results
}

impl Serialize for DiffResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut fields = 2;
        if self.this.is_some() {
            fields += 1;
            if matches!(self.this.as_ref().unwrap().hash, DiffHash::File(_)) {
                fields += 1;
            }
        }
        if self.other.is_some() {
            fields += 1;
            if matches!(self.other.as_ref().unwrap().hash, DiffHash::File(_)) {
                fields += 1;
            }
        }
        let mut map = serializer.serialize_map(Some(fields))?;
        let op = match self.operation {
            DiffOperation::Add => "add",
            DiffOperation::Modify => "modify",
            DiffOperation::Remove => "remove",
        };
        map.serialize_entry("operation", op)?;
        map.serialize_entry("path", self.path.as_str())?;
        if let Some(this) = &self.this {
            if let DiffHash::File(hash) = &this.hash {
                map.serialize_entry("this_hash", hash)?;
                map.serialize_entry("this_file_size", &this.file_size)?;
            }
        }
        if let Some(other) = &self.other {
            if let DiffHash::File(hash) = &other.hash {
                map.serialize_entry("other_hash", hash)?;
                map.serialize_entry("other_file_size", &other.file_size)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DiffResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(DiffResultVisitor)
    }
}

struct DiffResultVisitor;

impl<'de> Visitor<'de> for DiffResultVisitor {
    type Value = DiffResult;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a DiffResult record")
    }

    fn visit_map<A>(self, mut map: A) -> Result<DiffResult, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut operation: Option<String> = None;
        let mut path: Option<String> = None;
        let mut this_hash: Option<String> = None;
        let mut this_file_size: Option<u64> = None;
        let mut other_hash: Option<String> = None;
        let mut other_file_size: Option<u64> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "operation" => operation = Some(map.next_value()?),
                "path" => path = Some(map.next_value()?),
                "this_hash" => this_hash = Some(map.next_value()?),
                "this_file_size" => this_file_size = Some(map.next_value()?),
                "other_hash" => other_hash = Some(map.next_value()?),
                "other_file_size" => other_file_size = Some(map.next_value()?),
                _ => {
                    let _ignore: de::IgnoredAny = map.next_value()?;
                }
            }
        }

        let operation = match operation.as_deref() {
            Some("add") => DiffOperation::Add,
            Some("modify") => DiffOperation::Modify,
            Some("remove") => DiffOperation::Remove,
            other => return Err(de::Error::custom(format!("unknown operation {other:?}"))),
        };
        let path = path.ok_or_else(|| de::Error::missing_field("path"))?;

        let this = match operation {
            DiffOperation::Remove => None,
            _ => Some(match this_hash {
                Some(hash) => DiffSide {
                    hash: DiffHash::File(hash),
                    file_size: this_file_size,
                },
                None => DiffSide {
                    hash: DiffHash::Directory,
                    file_size: None,
                },
            }),
        };
        let other = match operation {
            DiffOperation::Add => None,
            _ => Some(match other_hash {
                Some(hash) => DiffSide {
                    hash: DiffHash::File(hash),
                    file_size: other_file_size,
                },
                None => DiffSide {
                    hash: DiffHash::Directory,
                    file_size: None,
                },
            }),
        };

        Ok(DiffResult {
            operation,
            path: Utf8PathBuf::from(path),
            this,
            other,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tree::Node;

    fn snapshot_from_files(files: &[(&str, &str, u64)]) -> Node {
        let mut root = Node::new_root();
        for (path, hash, size) in files {
            root.add_file(Utf8Path::new(path), (*hash).to_string(), *size, false);
        }
        root
    }

    #[test]
    fn identical_snapshots_diff_to_nothing() {
        let a = snapshot_from_files(&[("one/A", "h1", 3), ("two/b", "h2", 4)]);
        let diffs = diff_roots(&a, &a, true);
        assert!(diffs.is_empty());
    }

    #[test]
    fn add_against_empty_root() {
        let a = snapshot_from_files(&[("one/A", "h1", 3)]);
        let empty = Node::new_root();
        let diffs = diff_roots(&a, &empty, true);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].operation, DiffOperation::Add);
        assert_eq!(diffs[0].path, Utf8PathBuf::from("one/A"));
    }

    #[test]
    fn mirror_image_of_add_is_remove() {
        let a = snapshot_from_files(&[("one/A", "h1", 3)]);
        let empty = Node::new_root();
        let forward = diff_roots(&a, &empty, true);
        let backward = diff_roots(&empty, &a, true);
        assert_eq!(forward.len(), 1);
        assert_eq!(backward.len(), 1);
        assert_eq!(forward[0].operation, DiffOperation::Add);
        assert_eq!(backward[0].operation, DiffOperation::Remove);
        assert_eq!(forward[0].path, backward[0].path);
    }

    #[test]
    fn modify_on_differing_hash() {
        let a = snapshot_from_files(&[("one/A", "h1", 3)]);
        let b = snapshot_from_files(&[("one/A", "h2", 3)]);
        let diffs = diff_roots(&a, &b, true);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].operation, DiffOperation::Modify);
    }

    #[test]
    fn standard_mode_ignores_hash_differences_with_same_size() {
        let a = snapshot_from_files(&[("one/A", "h1", 3)]);
        let b = snapshot_from_files(&[("one/A", "h2", 3)]);
        let diffs = diff_roots(&a, &b, false);
        assert!(diffs.is_empty());
    }

    #[test]
    fn whole_subtree_removal_collapses_to_one_record() {
        let a = Node::new_root();
        let b = snapshot_from_files(&[("dir/x", "h1", 1), ("dir/y", "h2", 1)]);
        let diffs = diff_roots(&a, &b, true);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].operation, DiffOperation::Remove);
        assert_eq!(diffs[0].path, Utf8PathBuf::from("dir"));
    }

    #[test]
    fn explicitly_added_empty_dir_survives_as_its_own_remove() {
        let mut b = Node::new_root();
        b.add_dir(Utf8Path::new("dir"));
        let a = Node::new_root();
        let diffs = diff_roots(&a, &b, true);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].operation, DiffOperation::Remove);
        assert_eq!(diffs[0].path, Utf8PathBuf::from("dir"));
    }

    #[test]
    fn explicit_subdir_blocks_collapse_of_sibling_removals() {
        let other = snapshot_from_files(&[("dir/x", "h1", 1), ("dir/y", "h2", 1)]);
        // `dir` itself is still present (explicitly) on the `this` side,
        // just emptied out, so removing both its children must not
        // collapse into a single directory remove.
        let mut this = Node::new_root();
        this.add_dir(Utf8Path::new("dir"));
        let (results, summary) = create_diffs(Utf8Path::new(""), &this, Some(&other), &compare_by_hash);
        assert_eq!(summary, Some(DiffOperation::Modify));
        let paths: Vec<_> = results.iter().map(|r| r.path.as_str()).collect();
        assert!(paths.contains(&"dir/x"));
        assert!(paths.contains(&"dir/y"));
        assert!(!paths.contains(&"dir"));
    }

    #[test]
    fn unchanged_sibling_blocks_collapse_of_a_single_removed_child() {
        // `dir/x` is identical on both sides; `dir/y` only exists on
        // `other`. The combined child summary is a mix of `None`
        // (unchanged `x`) and `Remove` (missing `y`), which must demote to
        // `Modify` rather than collapse into a single `remove(dir)` -
        // otherwise `x` would be deleted along with `y`.
        let other = snapshot_from_files(&[("dir/x", "h1", 1), ("dir/y", "h2", 1)]);
        let this = snapshot_from_files(&[("dir/x", "h1", 1)]);

        let diffs = diff_roots(&this, &other, true);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].operation, DiffOperation::Remove);
        assert_eq!(diffs[0].path, Utf8PathBuf::from("dir/y"));

        let (results, summary) = create_diffs(Utf8Path::new(""), &this, Some(&other), &compare_by_hash);
        assert_eq!(summary, Some(DiffOperation::Modify));
        let paths: Vec<_> = results.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["dir/y"]);
    }

    #[test]
    fn type_mismatch_emits_remove_then_adds() {
        let mut this = Node::new_root();
        this.add_file(Utf8Path::new("item/a"), "h1".into(), 1, false);
        this.add_file(Utf8Path::new("item/b"), "h2".into(), 1, false);
        let other = snapshot_from_files(&[("item", "was-a-file", 9)]);

        let diffs = diff_roots(&this, &other, true);
        assert_eq!(diffs.len(), 3);
        assert_eq!(diffs[0].operation, DiffOperation::Remove);
        assert_eq!(diffs[0].path, Utf8PathBuf::from("item"));
        assert!(diffs[1..].iter().all(|d| d.operation == DiffOperation::Add));
    }

    #[test]
    fn json_round_trip_omits_hash_for_directory_targets() {
        let mut other = Node::new_root();
        other.add_dir(Utf8Path::new("dir"));
        let this = Node::new_root();
        let diffs = diff_roots(&this, &other, true);
        let json = serde_json::to_string(&diffs[0]).unwrap();
        assert!(!json.contains("this_hash"));
        assert!(!json.contains("other_hash"));
        let round_tripped: DiffResult = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped, diffs[0]);
    }

    #[test]
    fn invariants_hold_for_every_emitted_diff() {
        let mut this = Node::new_root();
        this.add_file(Utf8Path::new("a"), "h1".into(), 1, false);
        this.add_dir(Utf8Path::new("b"));
        let other = Node::new_root();
        for d in diff_roots(&this, &other, true) {
            d.check_invariants().unwrap();
        }
    }
}
