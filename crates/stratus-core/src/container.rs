//! Containers, resource requests, and request priorities.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{ContainerId, NodeId};
use crate::resources::Resources;

/// Request priority. Lower values are served first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a container grant.
///
/// A container occupies capacity on its node from the moment it is
/// allocated until it is reported (or forced) complete, at which point the
/// node's and queue's used-capacity counters are given back exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    Allocated,
    Running,
    Completed,
}

/// A bound grant of capacity on one node to one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub node_id: NodeId,
    pub resources: Resources,
    pub status: ContainerStatus,
    /// Opaque token material minted at grant time and carried through
    /// untouched; the scheduler never inspects it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Vec<u8>>,
}

impl Container {
    pub fn new(id: ContainerId, node_id: NodeId, resources: Resources) -> Self {
        Self {
            id,
            node_id,
            resources,
            status: ContainerStatus::Allocated,
            token: None,
        }
    }
}

/// Per-container status carried by a node heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerReport {
    pub container_id: ContainerId,
    pub status: ContainerStatus,
}

/// One entry of an application's desired state: "I currently want `count`
/// containers of `resources` at `priority`".
///
/// Requests are declarative, not deltas — a fresh request for the same
/// (priority, resources) key replaces the previous count, and a zero count
/// withdraws the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub priority: Priority,
    pub resources: Resources,
    pub count: u32,
}

/// Mints opaque per-container token material at grant time.
pub trait ContainerTokenFactory: Send + Sync {
    fn mint(&self, container: &Container) -> Vec<u8>;
}
