//! The capacity scheduler.
//!
//! `CapacityScheduler` owns the queue tree, the application index, and the
//! cluster tracker, and serializes every mutating entry point behind one
//! coarse lock: assignment walks many queues and applications as a single
//! transaction, and no caller may observe a container granted twice against
//! the same node capacity. Nothing inside the lock touches I/O; every call
//! is in-memory accounting that completes synchronously.
//!
//! Two flows converge here. Application masters call [`allocate`]: declare
//! outstanding requests, give back finished containers, pick up new grants.
//! Node heartbeats call [`node_update`]: report completions, then trigger
//! assignment of the node's free capacity — completions first, so capacity
//! freed by this heartbeat is reusable within it.
//!
//! [`allocate`]: CapacityScheduler::allocate
//! [`node_update`]: CapacityScheduler::node_update

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use stratus_cluster::{ClusterTracker, TrackedNode};
use stratus_core::config::ROOT_QUEUE;
use stratus_core::{
    ApplicationId, Container, ContainerId, ContainerReport, ContainerTokenFactory, NodeId,
    Priority, ResourceRequest, Resources, SchedulerConfig,
};

use crate::application::Application;
use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::QueueTree;

/// Read-only view of one queue, for introspection surfaces and tests.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub path: String,
    pub name: String,
    pub leaf: bool,
    pub capacity_percent: f64,
    pub absolute_capacity: f64,
    pub used: Resources,
    pub utilization: f64,
    pub applications: usize,
}

/// Read-only view of one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub hostname: String,
    pub total: Resources,
    pub used: Resources,
    pub available: Resources,
    pub containers: usize,
}

impl From<&TrackedNode> for NodeSnapshot {
    fn from(node: &TrackedNode) -> Self {
        Self {
            node_id: node.node_id().clone(),
            hostname: node.hostname().to_string(),
            total: node.total(),
            used: node.used(),
            available: node.available(),
            containers: node.container_count(),
        }
    }
}

/// The scheduler facade. Cheap to share behind an `Arc`; every entry point
/// takes `&self` and locks internally.
pub struct CapacityScheduler {
    state: Mutex<SchedulerState>,
}

struct SchedulerState {
    minimum_allocation: Resources,
    maximum_allocation: Resources,
    queues: QueueTree,
    applications: BTreeMap<ApplicationId, Application>,
    tracker: ClusterTracker,
    token_factory: Option<Arc<dyn ContainerTokenFactory>>,
}

impl CapacityScheduler {
    /// Build the queue tree from configuration.
    ///
    /// Configuration errors are fatal: on failure nothing is installed.
    pub fn new(config: &SchedulerConfig) -> SchedulerResult<Self> {
        let queues = QueueTree::build(config)?;
        Ok(Self {
            state: Mutex::new(SchedulerState {
                minimum_allocation: config.minimum_allocation(),
                maximum_allocation: config.maximum_allocation(),
                queues,
                applications: BTreeMap::new(),
                tracker: ClusterTracker::new(),
                token_factory: None,
            }),
        })
    }

    /// Attach a factory for the opaque per-container token material.
    pub fn with_token_factory(self, factory: Arc<dyn ContainerTokenFactory>) -> Self {
        self.state.lock().token_factory = Some(factory);
        self
    }

    /// Reload capacities and allocation bounds from a new configuration.
    /// Queue topology is frozen after construction; a config that changes
    /// it is rejected and the running tree stays untouched.
    pub fn reinitialize(&self, config: &SchedulerConfig) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        state.queues.reinitialize(config)?;
        state.minimum_allocation = config.minimum_allocation();
        state.maximum_allocation = config.maximum_allocation();
        Ok(())
    }

    /// Register an application with a leaf queue.
    ///
    /// Fails on an unknown queue, a parent queue, a duplicate id, or an ACL
    /// rejection — in every failure case no state has changed.
    pub fn add_application(
        &self,
        app_id: ApplicationId,
        user: &str,
        queue: &str,
        priority: Priority,
    ) -> SchedulerResult<()> {
        self.state.lock().add_application(app_id, user, queue, priority)
    }

    /// Remove an application, force-releasing everything it still holds.
    ///
    /// Idempotent: removing an unknown (already removed) application logs
    /// and returns.
    pub fn remove_application(&self, app_id: ApplicationId) {
        self.state.lock().remove_application(app_id)
    }

    /// The allocate protocol: declare desired requests, release finished
    /// containers, and pick up every container granted since the last call.
    ///
    /// Never assigns anything itself — assignment happens on heartbeats.
    /// An unknown application (a call racing its own removal) gets an empty
    /// grant list, not an error.
    pub fn allocate(
        &self,
        app_id: ApplicationId,
        asks: Vec<ResourceRequest>,
        releases: &[ContainerId],
    ) -> Vec<Container> {
        self.state.lock().allocate(app_id, asks, releases)
    }

    /// Process one node heartbeat: account reported completions, then offer
    /// the node's free capacity to the queue tree. Returns the ids of
    /// containers that completed with this heartbeat.
    pub fn node_update(&self, node_id: &NodeId, reports: &[ContainerReport]) -> Vec<ContainerId> {
        self.state.lock().node_update(node_id, reports)
    }

    /// Register a worker node.
    pub fn add_node(
        &self,
        node_id: NodeId,
        hostname: &str,
        capability: Resources,
    ) -> SchedulerResult<NodeSnapshot> {
        let mut state = self.state.lock();
        let node = state.tracker.add_node(node_id, hostname, capability)?;
        Ok(NodeSnapshot::from(node))
    }

    /// Deregister a node. Containers still resident on it complete
    /// abnormally through the same accounting path as a normal heartbeat.
    pub fn remove_node(&self, node_id: &NodeId) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        let orphaned = state.tracker.remove_node(node_id)?;
        state.process_completed(orphaned);
        Ok(())
    }

    pub fn minimum_allocation(&self) -> Resources {
        self.state.lock().minimum_allocation
    }

    pub fn application_count(&self) -> usize {
        self.state.lock().applications.len()
    }

    /// Per-queue view, sorted by path.
    pub fn queue_snapshots(&self) -> Vec<QueueSnapshot> {
        let state = self.state.lock();
        let cluster = state.tracker.cluster_capacity();
        let mut snapshots: Vec<QueueSnapshot> = state
            .queues
            .iter()
            .map(|queue| QueueSnapshot {
                path: queue.path().to_string(),
                name: queue.name().to_string(),
                leaf: queue.is_leaf(),
                capacity_percent: queue.capacity_percent(),
                absolute_capacity: queue.absolute_capacity(),
                used: queue.used(),
                utilization: queue.utilization(cluster),
                applications: queue.application_count(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.path.cmp(&b.path));
        snapshots
    }

    /// Per-node view, sorted by id.
    pub fn node_snapshots(&self) -> Vec<NodeSnapshot> {
        let state = self.state.lock();
        let mut snapshots: Vec<NodeSnapshot> =
            state.tracker.nodes().map(NodeSnapshot::from).collect();
        snapshots.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        snapshots
    }
}

impl SchedulerState {
    fn add_application(
        &mut self,
        app_id: ApplicationId,
        user: &str,
        queue_name: &str,
        priority: Priority,
    ) -> SchedulerResult<()> {
        let path = self
            .queues
            .resolve(queue_name)
            .map(str::to_string)
            .ok_or_else(|| SchedulerError::UnknownQueue(queue_name.to_string()))?;

        let queue = self.queues.get_mut(&path).expect("resolved path exists");
        if !queue.is_leaf() {
            return Err(SchedulerError::NotLeafQueue(path));
        }
        if self.applications.contains_key(&app_id) {
            return Err(SchedulerError::ApplicationExists(app_id));
        }

        queue.submit_application(app_id, user)?;
        self.applications
            .insert(app_id, Application::new(app_id, user, &path, priority));
        info!(
            %app_id,
            user,
            queue = %path,
            active = self.applications.len(),
            "application submitted"
        );
        Ok(())
    }

    fn remove_application(&mut self, app_id: ApplicationId) {
        let Some(app) = self.applications.get_mut(&app_id) else {
            info!(%app_id, "removal of unknown application ignored");
            return;
        };
        let path = app.queue_path().to_string();
        let drained = app.drain_all();
        let touched = app.touched_nodes();

        // Queue bookkeeping first, so its active-application view is
        // consistent before any capacity flows back.
        if let Some(queue) = self.queues.get_mut(&path) {
            queue.finish_application(app_id);
        }

        for container in &drained {
            if self.tracker.release_container(app_id, container) {
                self.queues.credit(&path, container.resources);
            }
        }

        self.tracker.finished_application(app_id, &touched);
        self.applications.remove(&app_id);
        info!(%app_id, queue = %path, released = drained.len(), "application removed");
    }

    fn allocate(
        &mut self,
        app_id: ApplicationId,
        asks: Vec<ResourceRequest>,
        releases: &[ContainerId],
    ) -> Vec<Container> {
        if !self.applications.contains_key(&app_id) {
            // Normal race with removal, not a fault.
            info!(%app_id, "allocate for unknown or finished application");
            return Vec::new();
        }

        let (minimum, maximum) = (self.minimum_allocation, self.maximum_allocation);
        let asks: Vec<ResourceRequest> = asks
            .into_iter()
            .map(|mut ask| {
                ask.resources = ask.resources.normalized(minimum, maximum);
                ask
            })
            .collect();

        let app = self.applications.get_mut(&app_id).expect("checked above");
        app.update_requests(&asks);
        let path = app.queue_path().to_string();
        let released = app.release(releases);

        for container in &released {
            if self.tracker.release_container(app_id, container) {
                self.queues.credit(&path, container.resources);
                debug!(container = %container.id, %app_id, "container released");
            }
        }

        let acquired = self
            .applications
            .get_mut(&app_id)
            .expect("checked above")
            .acquire();
        debug!(
            %app_id,
            asks = asks.len(),
            releases = releases.len(),
            granted = acquired.len(),
            "allocate"
        );
        acquired
    }

    fn node_update(&mut self, node_id: &NodeId, reports: &[ContainerReport]) -> Vec<ContainerId> {
        let Some(completed) = self.tracker.node_update(node_id, reports) else {
            warn!(%node_id, "heartbeat from unknown node ignored");
            return Vec::new();
        };
        let completed_ids: Vec<ContainerId> = completed.iter().map(|c| c.id).collect();

        // Completions first: capacity freed by this heartbeat is available
        // to the assignment pass below.
        self.process_completed(completed);
        self.assign_containers(node_id);
        completed_ids
    }

    fn process_completed(&mut self, completed: Vec<Container>) {
        for container in completed {
            let app_id = container.id.app_id;
            match self.applications.get_mut(&app_id) {
                Some(app) => {
                    app.remove_container(&container.id);
                    let path = app.queue_path().to_string();
                    self.queues.credit(&path, container.resources);
                    info!(container = %container.id, %app_id, "container completed");
                }
                None => {
                    // The application raced its own removal; its capacity
                    // was reclaimed on that path already.
                    debug!(container = %container.id, "completion for finished application ignored");
                }
            }
        }
    }

    fn assign_containers(&mut self, node_id: &NodeId) {
        let cluster = self.tracker.cluster_capacity();
        self.assign_queue(ROOT_QUEUE, node_id, cluster);
    }

    /// Offer `node_id`'s remaining capacity to the subtree at `path`.
    ///
    /// Parents hand the node to children in ascending-utilization order
    /// (path as tie-break), re-derived from current state on every
    /// heartbeat. Leaves walk applications oldest-first and request entries
    /// most-urgent-first, granting at most one container per entry per
    /// heartbeat — one bounded pass, never a loop to quiescence.
    fn assign_queue(&mut self, path: &str, node_id: &NodeId, cluster: Resources) {
        let Some(queue) = self.queues.get(path) else {
            return;
        };

        if !queue.is_leaf() {
            let mut ranked: Vec<(f64, String)> = queue
                .children()
                .iter()
                .map(|child| {
                    let utilization = self
                        .queues
                        .get(child)
                        .map(|q| q.utilization(cluster))
                        .unwrap_or(0.0);
                    (utilization, child.clone())
                })
                .collect();
            ranked.sort_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.1.cmp(&b.1))
            });

            for (_, child) in ranked {
                if !self.node_fits_minimum(node_id) {
                    break;
                }
                self.assign_queue(&child, node_id, cluster);
            }
            return;
        }

        'applications: for app_id in queue.applications() {
            let entries = match self.applications.get(&app_id) {
                Some(app) => app.request_entries(),
                None => continue,
            };
            for (priority, resources) in entries {
                let Some(node) = self.tracker.node(node_id) else {
                    return;
                };
                let available = node.available();
                if !self.minimum_allocation.fits_in(available) {
                    // Nothing normalized can fit anymore.
                    break 'applications;
                }
                if !resources.fits_in(available) {
                    continue;
                }

                let container = {
                    let factory = self.token_factory.as_deref();
                    let app = self.applications.get_mut(&app_id).expect("present above");
                    app.grant_one(priority, resources, node_id.clone(), factory)
                };
                self.tracker
                    .allocate_container(container.clone())
                    .expect("node present above");
                self.queues.charge(path, resources);
                info!(
                    container = %container.id,
                    app = %app_id,
                    node = %node_id,
                    queue = path,
                    %priority,
                    resources = %resources,
                    "container allocated"
                );
            }
        }
    }

    fn node_fits_minimum(&self, node_id: &NodeId) -> bool {
        self.tracker
            .node(node_id)
            .map(|node| self.minimum_allocation.fits_in(node.available()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SchedulerConfig {
        SchedulerConfig::from_toml(
            r#"
[scheduler]
minimum_allocation_mb = 1024
maximum_allocation_mb = 8192

[queues.root]
capacity = 100.0
children = ["default", "secure"]

[queues."root.default"]
capacity = 60.0

[queues."root.secure"]
capacity = 40.0
allow_users = ["alice"]
"#,
        )
        .unwrap()
    }

    fn scheduler() -> CapacityScheduler {
        CapacityScheduler::new(&config()).unwrap()
    }

    fn app(seq: u32) -> ApplicationId {
        ApplicationId::new(1000, seq)
    }

    fn ask(mb: u64, count: u32) -> ResourceRequest {
        ResourceRequest {
            priority: Priority(0),
            resources: Resources::new(mb, 1),
            count,
        }
    }

    #[test]
    fn add_application_resolves_name_or_path() {
        let scheduler = scheduler();
        scheduler
            .add_application(app(1), "alice", "default", Priority(0))
            .unwrap();
        scheduler
            .add_application(app(2), "alice", "root.secure", Priority(0))
            .unwrap();
        assert_eq!(scheduler.application_count(), 2);
    }

    #[test]
    fn add_application_to_unknown_queue_fails() {
        let scheduler = scheduler();
        let err = scheduler
            .add_application(app(1), "alice", "nope", Priority(0))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownQueue(_)));
    }

    #[test]
    fn add_application_to_parent_queue_fails() {
        let scheduler = scheduler();
        let err = scheduler
            .add_application(app(1), "alice", "root", Priority(0))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotLeafQueue(_)));
    }

    #[test]
    fn acl_rejection_leaves_no_state_behind() {
        let scheduler = scheduler();
        let err = scheduler
            .add_application(app(1), "mallory", "secure", Priority(0))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::AccessDenied { .. }));
        assert_eq!(scheduler.application_count(), 0);

        let secure = scheduler
            .queue_snapshots()
            .into_iter()
            .find(|q| q.path == "root.secure")
            .unwrap();
        assert_eq!(secure.applications, 0);
    }

    #[test]
    fn duplicate_application_is_rejected() {
        let scheduler = scheduler();
        scheduler
            .add_application(app(1), "alice", "default", Priority(0))
            .unwrap();
        let err = scheduler
            .add_application(app(1), "alice", "default", Priority(0))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ApplicationExists(_)));
    }

    #[test]
    fn allocate_for_unknown_application_returns_empty() {
        let scheduler = scheduler();
        let granted = scheduler.allocate(app(9), vec![ask(1024, 1)], &[]);
        assert!(granted.is_empty());
    }

    #[test]
    fn allocate_normalizes_asks_up() {
        let scheduler = scheduler();
        scheduler
            .add_application(app(1), "alice", "default", Priority(0))
            .unwrap();
        scheduler
            .add_node(NodeId::from("n1"), "host1", Resources::new(4096, 4))
            .unwrap();

        // 100 MB rounds up to one full 1024 MB increment.
        scheduler.allocate(app(1), vec![ask(100, 1)], &[]);
        scheduler.node_update(&NodeId::from("n1"), &[]);

        let granted = scheduler.allocate(app(1), vec![], &[]);
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].resources, Resources::new(1024, 1));
    }

    #[test]
    fn heartbeat_from_unknown_node_is_benign() {
        let scheduler = scheduler();
        let completed = scheduler.node_update(&NodeId::from("ghost"), &[]);
        assert!(completed.is_empty());
    }

    #[test]
    fn reinitialize_rejects_topology_change() {
        let scheduler = scheduler();
        let err = scheduler
            .reinitialize(
                &SchedulerConfig::from_toml(
                    r#"
[queues.root]
capacity = 100.0
children = ["default"]

[queues."root.default"]
capacity = 100.0
"#,
                )
                .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::TopologyChanged(_)));
    }
}
