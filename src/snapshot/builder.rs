//! Host-side asset store
//!
//! The host owns the authoritative state. `AssetStore` turns that state into
//! content-addressed nodes and answers fetch requests by checksum.

use crate::checksum::Checksum;
use crate::error::{ReplicaError, ReplicaResult};
use crate::snapshot::node::Node;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Node kind for regular files
pub const KIND_FILE: &str = "file";

/// Node kind for directories
pub const KIND_DIR: &str = "dir";

/// Checksum-addressed payloads held by the host
#[derive(Default)]
pub struct AssetStore {
    payloads: RwLock<HashMap<Checksum, Arc<[u8]>>>,
}

impl AssetStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a payload under its own checksum
    pub fn insert(&self, payload: impl Into<Arc<[u8]>>) -> Checksum {
        let payload = payload.into();
        let checksum = Checksum::compute(&payload);
        self.payloads.write().entry(checksum).or_insert(payload);
        checksum
    }

    /// Store a payload under an arbitrary checksum, bypassing hashing
    ///
    /// Lets tests model a host that serves corrupted content.
    pub fn insert_unchecked(&self, checksum: Checksum, payload: impl Into<Arc<[u8]>>) {
        self.payloads.write().insert(checksum, payload.into());
    }

    /// Encode and store a node
    pub fn put_node(&self, node: &Node) -> ReplicaResult<Checksum> {
        Ok(self.insert(node.encode()?))
    }

    /// Store a file or directory tree, returning the root checksum
    ///
    /// Directory entries are sorted by name so equal trees hash equally.
    pub fn put_path(&self, path: &Path) -> ReplicaResult<Checksum> {
        if !path.exists() {
            return Err(ReplicaError::PathNotFound(path.to_path_buf()));
        }

        if path.is_file() {
            let contents = fs::read(path)
                .map_err(|e| ReplicaError::io(format!("reading {}", path.display()), e))?;
            return self.put_node(&Node::leaf(KIND_FILE, contents));
        }

        let mut entries = fs::read_dir(path)
            .map_err(|e| ReplicaError::io(format!("reading directory {}", path.display()), e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ReplicaError::io(format!("reading entry in {}", path.display()), e))?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut names = Vec::with_capacity(entries.len());
        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry.file_name().into_string().map_err(|raw| {
                ReplicaError::io(
                    format!("reading entry in {}", path.display()),
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("file name {:?} is not valid UTF-8", raw),
                    ),
                )
            })?;
            children.push(self.put_path(&entry.path())?);
            names.push(name);
        }

        let data = serde_json::to_vec(&names)?;
        let checksum = self.put_node(&Node::branch(KIND_DIR, data, children))?;
        debug!("Stored directory {} as {}", path.display(), checksum.short());
        Ok(checksum)
    }

    /// Decode the node stored under `checksum`
    pub fn node(&self, checksum: &Checksum) -> ReplicaResult<Node> {
        let payload = self
            .get(checksum)
            .ok_or(ReplicaError::AssetNotFound(*checksum))?;
        Node::decode(*checksum, &payload)
    }

    /// Look up a payload
    pub fn get(&self, checksum: &Checksum) -> Option<Arc<[u8]>> {
        self.payloads.read().get(checksum).cloned()
    }

    /// Number of stored payloads
    pub fn len(&self) -> usize {
        self.payloads.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.payloads.read().is_empty()
    }
}

/// Entry names of a directory node, in child order
pub fn dir_entries(node: &Node) -> ReplicaResult<Vec<String>> {
    let checksum = node.checksum()?;
    if node.kind != KIND_DIR {
        return Err(ReplicaError::Decode {
            checksum,
            reason: format!("expected a {} node, found {}", KIND_DIR, node.kind),
        });
    }
    serde_json::from_slice(&node.data).map_err(|e| ReplicaError::Decode {
        checksum,
        reason: format!("directory entries: {}", e),
    })
}
