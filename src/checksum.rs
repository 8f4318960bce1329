//! Content checksums
//!
//! A `Checksum` is the SHA-256 digest of a payload and the only identity
//! snapshots and assets have. Equal content always yields an equal checksum.

use crate::error::{ReplicaError, ReplicaResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of a checksum in bytes
pub const CHECKSUM_LEN: usize = 32;

/// Fixed-width content hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum([u8; CHECKSUM_LEN]);

impl Checksum {
    /// Create a checksum from raw digest bytes
    pub const fn from_bytes(bytes: [u8; CHECKSUM_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a checksum from a byte slice received over a channel
    ///
    /// Fails unless the slice is exactly `CHECKSUM_LEN` bytes long.
    pub fn from_slice(bytes: &[u8]) -> ReplicaResult<Self> {
        let array: [u8; CHECKSUM_LEN] =
            bytes
                .try_into()
                .map_err(|_| ReplicaError::InvalidChecksumLength {
                    expected: CHECKSUM_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self::from_bytes(array))
    }

    /// Hash a payload
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self::from_bytes(hasher.finalize().into())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; CHECKSUM_LEN] {
        &self.0
    }

    /// Encode as lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64 character hex string
    pub fn from_hex(s: &str) -> ReplicaResult<Self> {
        let bytes = hex::decode(s).map_err(|e| ReplicaError::InvalidChecksum(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.short())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Checksum {
    type Err = ReplicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for Checksum {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
