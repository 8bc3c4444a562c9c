//! Coordination store client interface
//!
//! The controller talks to a hierarchical, watchable key-value store and to
//! that store's native membership API through [`CoordinationStore`]. The
//! production client lives outside this crate; [`memory::MemoryStore`] is the
//! in-process implementation used by tests and the simulator.
//!
//! Paths are opaque slash-delimited strings. Values are UTF-8 strings.

pub mod memory;

use crate::common::{peer_url, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use memory::{MemoryStore, StoreCall};

/// An entry in the live consensus membership list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterMember {
    pub node_id: String,
    pub address: String,
    pub port: u16,
}

impl ClusterMember {
    pub fn new(node_id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
            port,
        }
    }

    pub fn peer_url(&self) -> String {
        peer_url(&self.address, self.port)
    }
}

/// Client to the coordination store.
///
/// Every method may fail with [`crate::Error::StoreUnavailable`].
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Value stored at `path`, if any
    async fn get(&self, path: &str) -> Result<Option<String>>;

    async fn set(&self, path: &str, value: &str) -> Result<()>;

    /// Delete `path` and everything below it. Deleting a missing path is not
    /// an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Names of the immediate children of `prefix`
    async fn list_children(&self, prefix: &str) -> Result<BTreeSet<String>>;

    /// Wait for the next value written at `path`.
    ///
    /// Resolves with `None` when the watch is closed without a value. Callers
    /// bound the wait themselves.
    async fn watch(&self, path: &str) -> Result<Option<String>>;

    /// Current live membership list
    async fn list_members(&self) -> Result<Vec<ClusterMember>>;

    async fn add_member(&self, member: ClusterMember) -> Result<()>;

    async fn remove_member(&self, node_id: &str) -> Result<()>;
}
