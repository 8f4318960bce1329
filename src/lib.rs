//! Replica - content-addressed snapshot synchronization
//!
//! Worker-side building blocks for services that mirror a host's state:
//! checksummed assets behind a shared single-flight cache, snapshot trees
//! materialized from a root checksum, and an RPC service base that turns
//! channel disconnects into cancellation.

pub mod asset;
pub mod channel;
pub mod checksum;
pub mod cli;
pub mod config;
pub mod error;
pub mod service;
pub mod session;
pub mod snapshot;

pub use error::{ReplicaError, ReplicaResult};
