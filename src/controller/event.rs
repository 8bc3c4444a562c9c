//! Cluster events and the inventory they carry

use crate::store::CoordinationStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A node known to the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub ip_address: String,
}

impl NodeRecord {
    pub fn new(node_id: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ip_address: ip_address.into(),
        }
    }
}

/// Node inventory snapshot, kept in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    nodes: Vec<NodeRecord>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, or update its address in place if already known
    pub fn insert(&mut self, node: NodeRecord) {
        match self.nodes.iter_mut().find(|n| n.node_id == node.node_id) {
            Some(existing) => existing.ip_address = node.ip_address,
            None => self.nodes.push(node),
        }
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.get(node_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<NodeRecord> for Inventory {
    fn from_iter<I: IntoIterator<Item = NodeRecord>>(iter: I) -> Self {
        let mut inventory = Inventory::new();
        for node in iter {
            inventory.insert(node);
        }
        inventory
    }
}

/// A node reported unhealthy, with how long it has been so
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhealthyNode {
    pub node_id: String,
    pub age_seconds: u64,
}

impl UnhealthyNode {
    pub fn new(node_id: impl Into<String>, age_seconds: u64) -> Self {
        Self {
            node_id: node_id.into(),
            age_seconds,
        }
    }

    pub fn age(&self) -> Duration {
        Duration::from_secs(self.age_seconds)
    }
}

/// Store client and inventory valid while one event is processed
#[derive(Clone)]
pub struct EventContext {
    pub store: Arc<dyn CoordinationStore>,
    pub inventory: Arc<Inventory>,
}

impl EventContext {
    pub fn new(store: Arc<dyn CoordinationStore>, inventory: Inventory) -> Self {
        Self {
            store,
            inventory: Arc::new(inventory),
        }
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("inventory", &self.inventory)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClusterEventKind {
    AddNode { node_id: String },
    UnhealthyNodes { nodes: Vec<UnhealthyNode> },
}

impl ClusterEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            ClusterEventKind::AddNode { .. } => "add_node",
            ClusterEventKind::UnhealthyNodes { .. } => "unhealthy_nodes",
        }
    }
}

/// An event queued for the controller
#[derive(Debug, Clone)]
pub struct ClusterEvent {
    pub id: Uuid,
    pub context: EventContext,
    pub kind: ClusterEventKind,
}

impl ClusterEvent {
    pub fn new(context: EventContext, kind: ClusterEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            context,
            kind,
        }
    }

    pub fn add_node(context: EventContext, node_id: impl Into<String>) -> Self {
        Self::new(
            context,
            ClusterEventKind::AddNode {
                node_id: node_id.into(),
            },
        )
    }

    pub fn unhealthy_nodes(context: EventContext, nodes: Vec<UnhealthyNode>) -> Self {
        Self::new(context, ClusterEventKind::UnhealthyNodes { nodes })
    }
}
