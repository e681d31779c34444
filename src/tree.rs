//! The snapshot tree data model: [`Node`], [`HashValue`], and
//! [`DirHashPlaceholder`].
//!
//! A recursive, serde-friendly node type with a hand-rolled
//! `Serialize`/`Deserialize` to control the exact on-disk shape: no
//! chunking, no object store, no parent back-references. A node's full
//! path is reconstructed by callers as they walk the tree (see
//! [`Node::walk`]) rather than stored on the node itself, which avoids a
//! parent/child reference cycle.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sentinel carried in the hash slot of directory nodes. Equality ignores
/// `explicitly_added`: two placeholders are equal regardless of the flag,
/// which is what lets [`crate::diff::create_diffs`] treat "same directory,
/// different explicit-ness" as no change.
#[derive(Debug, Clone, Copy)]
pub struct DirHashPlaceholder {
    pub explicitly_added: bool,
}

impl PartialEq for DirHashPlaceholder {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}
impl Eq for DirHashPlaceholder {}

/// The polymorphic hash slot: either a file's content hash, or a
/// directory's placeholder. Modeling this as a tagged enum (rather than
/// `Option<String>` plus a separate `is_dir` flag) means `file_size`
/// presence and "is this a placeholder" fall out of pattern matching
/// instead of being tracked by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashValue {
    File(String),
    Directory(DirHashPlaceholder),
}

impl HashValue {
    pub fn as_file_hash(&self) -> Option<&str> {
        match self {
            HashValue::File(h) => Some(h),
            HashValue::Directory(_) => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, HashValue::Directory(_))
    }
}

/// A tree vertex. The root of a [`crate::snapshot::Snapshot`] is a `Node`
/// whose own name is implicit (it has none); every other node is reached
/// through some parent's `children` map, keyed by path component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub hash_value: HashValue,
    pub file_size: Option<u64>,
    pub children: BTreeMap<String, Node>,
}

impl Node {
    pub fn new_root() -> Node {
        Node::new_dir(false)
    }

    fn new_dir(explicitly_added: bool) -> Node {
        Node {
            hash_value: HashValue::Directory(DirHashPlaceholder { explicitly_added }),
            file_size: None,
            children: BTreeMap::new(),
        }
    }

    fn new_file(hash: String, file_size: u64) -> Node {
        Node {
            hash_value: HashValue::File(hash),
            file_size: Some(file_size),
            children: BTreeMap::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.hash_value, HashValue::File(_))
    }

    pub fn is_dir(&self) -> bool {
        !self.is_file()
    }

    pub fn explicitly_added(&self) -> bool {
        match &self.hash_value {
            HashValue::Directory(p) => p.explicitly_added,
            HashValue::File(_) => false,
        }
    }

    /// Inserts a file leaf at `path`, creating any missing intermediate
    /// directory placeholders (`explicitly_added = false`) along the way.
    /// Without `force`, re-inserting an existing leaf is a programmer
    /// error: the discovery pipeline is expected to visit each path once.
    pub fn add_file(&mut self, path: &Utf8Path, hash: String, file_size: u64, force: bool) {
        let components: Vec<&str> = path.components().map(|c| c.as_str()).collect();
        assert!(!components.is_empty(), "cannot add a file at the root");
        insert_file(self, &components, hash, file_size, force);
    }

    /// Ensures `path` exists as a directory, creating intermediate
    /// placeholders as needed, and marks the leaf directory
    /// `explicitly_added = true` (it was named as a user input, so it
    /// survives even if left empty).
    pub fn add_dir(&mut self, path: &Utf8Path) {
        let components: Vec<&str> = path.components().map(|c| c.as_str()).collect();
        if components.is_empty() {
            return;
        }
        insert_dir(self, &components);
    }

    /// Pre-order traversal yielding every non-root node alongside its full
    /// path, relative to this node.
    pub fn walk(&self) -> Vec<(Utf8PathBuf, &Node)> {
        let mut out = Vec::new();
        walk_impl(self, Utf8PathBuf::new(), &mut out);
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Node serialization is infallible")
    }

    pub fn from_json(value: &serde_json::Value) -> serde_json::Result<Node> {
        serde_json::from_value(value.clone())
    }
}

fn walk_impl<'a>(node: &'a Node, prefix: Utf8PathBuf, out: &mut Vec<(Utf8PathBuf, &'a Node)>) {
    for (name, child) in &node.children {
        let path = prefix.join(name);
        out.push((path.clone(), child));
        if child.is_dir() {
            walk_impl(child, path, out);
        }
    }
}

fn insert_dir(node: &mut Node, components: &[&str]) {
    let (head, rest) = components
        .split_first()
        .expect("insert_dir called with empty components");
    if rest.is_empty() {
        let child = node
            .children
            .entry((*head).to_string())
            .or_insert_with(|| Node::new_dir(false));
        if let HashValue::Directory(ref mut placeholder) = child.hash_value {
            placeholder.explicitly_added = true;
        }
    } else {
        let child = node
            .children
            .entry((*head).to_string())
            .or_insert_with(|| Node::new_dir(false));
        insert_dir(child, rest);
    }
}

fn insert_file(node: &mut Node, components: &[&str], hash: String, file_size: u64, force: bool) {
    let (head, rest) = components
        .split_first()
        .expect("insert_file called with empty components");
    if rest.is_empty() {
        assert!(
            force || !node.children.contains_key(*head),
            "duplicate leaf insertion for {head} (pass force=true to overwrite)"
        );
        node.children
            .insert((*head).to_string(), Node::new_file(hash, file_size));
    } else {
        let child = node
            .children
            .entry((*head).to_string())
            .or_insert_with(|| Node::new_dir(false));
        insert_file(child, rest, hash, file_size, force);
    }
}

impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.hash_value {
            HashValue::File(hash) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("hash_value", hash)?;
                map.serialize_entry("file_size", &self.file_size)?;
                map.end()
            }
            HashValue::Directory(_) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("hash_value", &Option::<&str>::None)?;
                map.serialize_entry("children", &self.children)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(NodeVisitor)
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a snapshot tree node")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Node, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut hash_value: Option<Option<String>> = None;
        let mut file_size: Option<Option<u64>> = None;
        let mut children: Option<BTreeMap<String, Node>> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "hash_value" => hash_value = Some(map.next_value()?),
                "file_size" => file_size = Some(map.next_value()?),
                "children" => children = Some(map.next_value()?),
                _ => {
                    let _ignore: de::IgnoredAny = map.next_value()?;
                }
            }
        }

        let hash_value = hash_value.ok_or_else(|| de::Error::missing_field("hash_value"))?;
        match hash_value {
            Some(hash) => {
                let file_size = file_size
                    .flatten()
                    .ok_or_else(|| de::Error::missing_field("file_size"))?;
                Ok(Node {
                    hash_value: HashValue::File(hash),
                    file_size: Some(file_size),
                    children: BTreeMap::new(),
                })
            }
            None => {
                let children = children.unwrap_or_default();
                let explicitly_added = children.is_empty();
                Ok(Node {
                    hash_value: HashValue::Directory(DirHashPlaceholder { explicitly_added }),
                    file_size: None,
                    children,
                })
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_file_creates_intermediate_dirs() {
        let mut root = Node::new_root();
        root.add_file(Utf8Path::new("a/b/c.txt"), "deadbeef".into(), 3, false);

        assert!(root.children["a"].is_dir());
        assert!(!root.children["a"].explicitly_added());
        assert!(root.children["a"].children["b"].is_dir());
        let leaf = &root.children["a"].children["b"].children["c.txt"];
        assert!(leaf.is_file());
        assert_eq!(leaf.file_size, Some(3));
        assert_eq!(leaf.hash_value.as_file_hash(), Some("deadbeef"));
    }

    #[test]
    fn add_dir_marks_explicitly_added() {
        let mut root = Node::new_root();
        root.add_dir(Utf8Path::new("empty/dir"));
        assert!(root.children["empty"].is_dir());
        assert!(!root.children["empty"].explicitly_added());
        assert!(root.children["empty"].children["dir"].explicitly_added());
    }

    #[test]
    #[should_panic(expected = "duplicate leaf insertion")]
    fn duplicate_insertion_without_force_panics() {
        let mut root = Node::new_root();
        root.add_file(Utf8Path::new("a"), "1".into(), 1, false);
        root.add_file(Utf8Path::new("a"), "2".into(), 1, false);
    }

    #[test]
    fn round_trip_file_and_empty_dir() {
        let mut root = Node::new_root();
        root.add_file(Utf8Path::new("one/A"), "hash-a".into(), 5, false);
        root.add_dir(Utf8Path::new("EmptyDirTest/EmptyDir"));

        let json = root.to_json();
        let restored = Node::from_json(&json).unwrap();
        assert_eq!(restored, root);
    }

    #[test]
    fn walk_is_pre_order_and_excludes_root() {
        let mut root = Node::new_root();
        root.add_file(Utf8Path::new("a/b"), "h".into(), 1, false);
        root.add_file(Utf8Path::new("a/c"), "h".into(), 1, false);

        let paths: Vec<String> = root.walk().into_iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["a", "a/b", "a/c"]);
    }

    #[test]
    fn placeholder_equality_ignores_explicitly_added() {
        let a = DirHashPlaceholder {
            explicitly_added: true,
        };
        let b = DirHashPlaceholder {
            explicitly_added: false,
        };
        assert_eq!(a, b);
    }
}
