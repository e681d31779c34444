//! [`Snapshot`]: the persistable wrapper around a [`Node`] tree, plus the
//! handful of load/persist helpers every executor needs.
//!
//! No metadata envelope of its own - a snapshot *is* the tree, serialized
//! as plain JSON - so the helpers here are just "load bytes from a store
//! path, decode, construct" and its inverse, kept as a free-standing
//! struct with explicit persist/load functions rather than baking I/O
//! into `Node` itself.

use camino::Utf8Path;
use std::io::{Read, Write};

use crate::diff::DiffResult;
use crate::error::{IoContext, Result};
use crate::store::{FileStore, ItemType};
use crate::tree::Node;

/// The persisted name of a mirror destination's snapshot file.
pub const MIRROR_SNAPSHOT_NAME: &str = "BackupSnapshot.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub root: Node,
}

impl Snapshot {
    pub fn empty() -> Snapshot {
        Snapshot { root: Node::new_root() }
    }

    pub fn from_root(root: Node) -> Snapshot {
        Snapshot { root }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.root).expect("Node serialization is infallible")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Snapshot> {
        Ok(Snapshot {
            root: serde_json::from_slice(bytes)?,
        })
    }

    /// Whether a persisted snapshot exists at `path` on `store`.
    pub fn is_persisted(store: &dyn FileStore, path: &Utf8Path) -> bool {
        matches!(store.item_type(path), Some(ItemType::File))
    }

    /// Loads a persisted snapshot from `store`, or an empty one if nothing
    /// is there yet (first run).
    pub fn load_persisted(store: &dyn FileStore, path: &Utf8Path) -> Result<Snapshot> {
        if !Self::is_persisted(store, path) {
            return Ok(Snapshot::empty());
        }
        let mut buf = Vec::new();
        store.open_read(path)?.read_to_end(&mut buf).path_context(path)?;
        Snapshot::from_bytes(&buf)
    }

    /// Writes this snapshot to `path` on `store`, as plain JSON (no
    /// pending-commit dance - callers that need crash safety wrap this
    /// with the sidecar protocol themselves).
    pub fn persist(&self, store: &dyn FileStore, path: &Utf8Path) -> Result<()> {
        store.open_write(path)?.write_all(&self.to_bytes()).path_context(path)
    }

    /// Diffs this snapshot (`this`) against `other`, the way `Diff` is
    /// specified: add/modify/remove records to turn `other` into `this`.
    pub fn diff(&self, other: &Snapshot, compare_hashes: bool) -> Vec<DiffResult> {
        crate::diff::diff_roots(&self.root, &other.root, compare_hashes)
    }
}
