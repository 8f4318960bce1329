//! Content-addressed assets
//!
//! An asset is an immutable payload fragment identified by the checksum of
//! its bytes. Assets fetched from a host are verified before they are ever
//! published to the [`AssetCache`].

pub mod cache;

pub use cache::{AssetCache, CacheStats};

use crate::checksum::Checksum;
use crate::error::{ReplicaError, ReplicaResult};
use std::fmt;
use std::sync::Arc;

/// Immutable, checksum-addressed payload
#[derive(Clone, PartialEq, Eq)]
pub struct Asset {
    checksum: Checksum,
    payload: Arc<[u8]>,
}

impl Asset {
    /// Create an asset, computing its checksum from the payload
    pub fn new(payload: impl Into<Arc<[u8]>>) -> Self {
        let payload = payload.into();
        Self {
            checksum: Checksum::compute(&payload),
            payload,
        }
    }

    /// Create an asset that must hash to `expected`
    pub fn verified(expected: Checksum, payload: impl Into<Arc<[u8]>>) -> ReplicaResult<Self> {
        let asset = Self::new(payload);
        if asset.checksum != expected {
            return Err(ReplicaError::Integrity {
                expected,
                actual: asset.checksum,
            });
        }
        Ok(asset)
    }

    /// Checksum of the payload
    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Asset")
            .field("checksum", &self.checksum)
            .field("len", &self.payload.len())
            .finish()
    }
}
