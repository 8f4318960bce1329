//! Snapshot materialization
//!
//! A snapshot is the tree of nodes reachable from a root checksum. Workers
//! never receive a snapshot eagerly: [`SnapshotService`] pulls the nodes it
//! has not seen yet through the shared [`AssetCache`](crate::asset::AssetCache).
//!
//! # Structural sharing
//!
//! | Level | Shared by | Effect |
//! |-------|-----------|--------|
//! | Asset | every instance in the process | a node is fetched once per process |
//! | Materialized node | one session | a live subtree is reused without decoding |

pub mod builder;
pub mod node;
pub mod service;

pub use builder::{dir_entries, AssetStore, KIND_DIR, KIND_FILE};
pub use node::Node;
pub use service::{AssetSource, SnapshotService};

use crate::checksum::Checksum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// A materialized node with its resolved children
#[derive(Debug)]
pub struct SnapshotNode {
    pub checksum: Checksum,
    pub kind: String,
    pub data: Vec<u8>,
    pub children: Vec<Arc<SnapshotNode>>,
}

impl SnapshotNode {
    /// Visit this node and its descendants depth-first
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a SnapshotNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Options carried alongside a materialized snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotOptions(BTreeMap<String, String>);

impl SnapshotOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Look up an option
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether no option is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Fully materialized state reachable from one root checksum
#[derive(Debug, Clone)]
pub struct Snapshot {
    root: Arc<SnapshotNode>,
    options: SnapshotOptions,
}

impl Snapshot {
    pub(crate) fn new(root: Arc<SnapshotNode>, options: SnapshotOptions) -> Self {
        Self { root, options }
    }

    /// Root checksum
    pub fn checksum(&self) -> Checksum {
        self.root.checksum
    }

    /// Root node
    pub fn root(&self) -> &SnapshotNode {
        &self.root
    }

    /// Options this snapshot was requested with
    pub fn options(&self) -> &SnapshotOptions {
        &self.options
    }

    /// Same tree carrying different options
    pub fn with_options(&self, options: SnapshotOptions) -> Self {
        Self {
            root: self.root.clone(),
            options,
        }
    }

    /// Number of distinct nodes in the tree
    pub fn node_count(&self) -> usize {
        let mut seen = HashSet::new();
        self.root.walk(&mut |node| {
            seen.insert(node.checksum);
        });
        seen.len()
    }

    /// Find a node by checksum
    pub fn find(&self, checksum: &Checksum) -> Option<&SnapshotNode> {
        let mut found = None;
        self.root.walk(&mut |node| {
            if found.is_none() && node.checksum == *checksum {
                found = Some(node);
            }
        });
        found
    }
}

impl PartialEq for Snapshot {
    /// Equal checksums mean structurally identical trees
    fn eq(&self, other: &Self) -> bool {
        self.checksum() == other.checksum() && self.options == other.options
    }
}

impl Eq for Snapshot {}
