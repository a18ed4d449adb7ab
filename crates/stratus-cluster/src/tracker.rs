//! Cluster tracker — live inventory of worker nodes and the containers
//! resident on them.
//!
//! The tracker owns node capacity accounting: a container charges its node
//! from allocation until it completes, and exactly one of the completion
//! paths (heartbeat report, explicit release, node loss) gives the capacity
//! back. Queue-side accounting belongs to the scheduler; the tracker never
//! touches it.
//!
//! The tracker is plain data. The scheduler serializes access to it under
//! its own coarse lock, so nothing here locks.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use stratus_core::{ApplicationId, Container, ContainerId, ContainerReport, ContainerStatus};
use stratus_core::{NodeId, Resources};

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("node already registered: {0}")]
    NodeAlreadyRegistered(NodeId),
}

/// One worker node: total capacity and the containers charged against it,
/// grouped by owning application.
#[derive(Debug, Clone)]
pub struct TrackedNode {
    node_id: NodeId,
    hostname: String,
    total: Resources,
    used: Resources,
    running: HashMap<ApplicationId, HashMap<ContainerId, Container>>,
}

impl TrackedNode {
    fn new(node_id: NodeId, hostname: String, total: Resources) -> Self {
        Self {
            node_id,
            hostname,
            total,
            used: Resources::zero(),
            running: HashMap::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn total(&self) -> Resources {
        self.total
    }

    pub fn used(&self) -> Resources {
        self.used
    }

    /// Capacity not currently charged by any container.
    pub fn available(&self) -> Resources {
        let mut avail = self.total;
        avail.subtract(self.used);
        avail
    }

    pub fn container_count(&self) -> usize {
        self.running.values().map(HashMap::len).sum()
    }

    fn take_container(&mut self, id: &ContainerId) -> Option<Container> {
        let per_app = self.running.get_mut(&id.app_id)?;
        let container = per_app.remove(id)?;
        if per_app.is_empty() {
            self.running.remove(&id.app_id);
        }
        self.used.subtract(container.resources);
        Some(container)
    }
}

/// The cluster-wide node inventory.
#[derive(Debug, Default)]
pub struct ClusterTracker {
    nodes: HashMap<NodeId, TrackedNode>,
    cluster_capacity: Resources,
}

impl ClusterTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and its total capacity.
    pub fn add_node(
        &mut self,
        node_id: NodeId,
        hostname: &str,
        capability: Resources,
    ) -> TrackerResult<&TrackedNode> {
        if self.nodes.contains_key(&node_id) {
            return Err(TrackerError::NodeAlreadyRegistered(node_id));
        }
        self.cluster_capacity.add(capability);
        info!(%node_id, hostname, capability = %capability, "node registered");
        Ok(self
            .nodes
            .entry(node_id.clone())
            .or_insert_with(|| TrackedNode::new(node_id, hostname.to_string(), capability)))
    }

    /// Deregister a node.
    ///
    /// Containers still resident on it are returned marked complete: a lost
    /// node is a batch of abnormal completions, and the caller reconciles
    /// queue and application accounting through the same path as a normal
    /// heartbeat completion. The node entry itself is gone afterwards, so no
    /// node-side capacity remains charged.
    pub fn remove_node(&mut self, node_id: &NodeId) -> TrackerResult<Vec<Container>> {
        let node = self
            .nodes
            .remove(node_id)
            .ok_or_else(|| TrackerError::UnknownNode(node_id.clone()))?;
        self.cluster_capacity.subtract(node.total);

        let mut orphaned: Vec<Container> = node
            .running
            .into_values()
            .flat_map(HashMap::into_values)
            .collect();
        for container in &mut orphaned {
            container.status = ContainerStatus::Completed;
        }
        if !orphaned.is_empty() {
            warn!(
                %node_id,
                containers = orphaned.len(),
                "node removed with resident containers; treating them as completed"
            );
        } else {
            info!(%node_id, "node removed");
        }
        Ok(orphaned)
    }

    /// Apply a heartbeat's container reports to the node's view and return
    /// the containers that are newly complete.
    ///
    /// Returns `None` for an unknown node (a heartbeat racing a removal),
    /// which the caller treats as benign. Queue state is not touched here.
    pub fn node_update(
        &mut self,
        node_id: &NodeId,
        reports: &[ContainerReport],
    ) -> Option<Vec<Container>> {
        let node = self.nodes.get_mut(node_id)?;

        let mut completed = Vec::new();
        for report in reports {
            match report.status {
                ContainerStatus::Completed => {
                    if let Some(mut container) = node.take_container(&report.container_id) {
                        container.status = ContainerStatus::Completed;
                        completed.push(container);
                    }
                    // Already gone: released or reported complete earlier.
                }
                ContainerStatus::Running => {
                    if let Some(container) = node
                        .running
                        .get_mut(&report.container_id.app_id)
                        .and_then(|per_app| per_app.get_mut(&report.container_id))
                    {
                        container.status = ContainerStatus::Running;
                    }
                }
                ContainerStatus::Allocated => {}
            }
        }
        debug!(
            %node_id,
            reports = reports.len(),
            completed = completed.len(),
            used = %node.used,
            "node update applied"
        );
        Some(completed)
    }

    /// Charge a freshly granted container against its node.
    pub fn allocate_container(&mut self, container: Container) -> TrackerResult<()> {
        let node = self
            .nodes
            .get_mut(&container.node_id)
            .ok_or_else(|| TrackerError::UnknownNode(container.node_id.clone()))?;
        node.used.add(container.resources);
        node.running
            .entry(container.id.app_id)
            .or_default()
            .insert(container.id, container);
        Ok(())
    }

    /// Remove a container that its application is giving back.
    ///
    /// Returns `true` if it was still charged here, in which case the caller
    /// must reclaim queue capacity exactly once. `false` means it was
    /// already gone (a release racing a heartbeat completion, or a node that
    /// was lost) and nothing may be decremented again.
    pub fn release_container(&mut self, app_id: ApplicationId, container: &Container) -> bool {
        debug_assert_eq!(app_id, container.id.app_id);
        let Some(node) = self.nodes.get_mut(&container.node_id) else {
            return false;
        };
        node.take_container(&container.id).is_some()
    }

    /// Tell every node the application touched that it is gone, so
    /// node-local per-application state can be dropped. Fire-and-forget:
    /// nothing here feeds back into capacity accounting.
    pub fn finished_application(&mut self, app_id: ApplicationId, nodes: &[NodeId]) {
        for node_id in nodes {
            if let Some(node) = self.nodes.get_mut(node_id) {
                if node.running.remove(&app_id).is_some() {
                    warn!(%app_id, %node_id, "dropped stale container state for finished application");
                }
            }
        }
        debug!(%app_id, nodes = nodes.len(), "application cleanup fanned out");
    }

    /// Sum of all registered nodes' total capacity.
    pub fn cluster_capacity(&self) -> Resources {
        self.cluster_capacity
    }

    pub fn node(&self, node_id: &NodeId) -> Option<&TrackedNode> {
        self.nodes.get(node_id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TrackedNode> {
        self.nodes.values()
    }
}
