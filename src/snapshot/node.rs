//! Node payload format
//!
//! A node is the payload of one asset. Interior nodes list the checksums of
//! their children, so a node's checksum covers its whole subtree.

use crate::checksum::Checksum;
use crate::error::{ReplicaError, ReplicaResult};
use serde::{Deserialize, Serialize};

/// One content-addressed node of a snapshot tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node kind, e.g. "dir" or "file"
    pub kind: String,

    /// Opaque node data
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,

    /// Child node checksums, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Checksum>,
}

impl Node {
    /// Create a node without children
    pub fn leaf(kind: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
            children: vec![],
        }
    }

    /// Create a node with children
    pub fn branch(
        kind: impl Into<String>,
        data: impl Into<Vec<u8>>,
        children: Vec<Checksum>,
    ) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
            children,
        }
    }

    /// Encode to the canonical payload bytes
    pub fn encode(&self) -> ReplicaResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Checksum of the canonical encoding
    pub fn checksum(&self) -> ReplicaResult<Checksum> {
        Ok(Checksum::compute(&self.encode()?))
    }

    /// Decode the payload of the asset identified by `checksum`
    pub fn decode(checksum: Checksum, payload: &[u8]) -> ReplicaResult<Self> {
        serde_json::from_slice(payload).map_err(|e| ReplicaError::Decode {
            checksum,
            reason: e.to_string(),
        })
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
