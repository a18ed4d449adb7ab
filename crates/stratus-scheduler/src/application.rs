//! Per-application resource ledger.
//!
//! Each submitted application owns one ledger: the outstanding requests it
//! has declared, the containers granted to it that its master has not yet
//! picked up, and the containers it currently holds. The ledger belongs to
//! exactly one leaf queue for the application's lifetime.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use stratus_core::{
    ApplicationId, Container, ContainerId, ContainerStatus, ContainerTokenFactory, NodeId,
    Priority, ResourceRequest, Resources,
};

/// Scheduler-side view of one application.
pub struct Application {
    app_id: ApplicationId,
    user: String,
    queue_path: String,
    priority: Priority,
    /// Outstanding requests: priority → profile → wanted count.
    /// Declarative state, replaced wholesale per key on every update.
    requests: BTreeMap<Priority, BTreeMap<Resources, u32>>,
    /// Granted but not yet delivered to the application master.
    granted: Vec<Container>,
    /// Delivered and currently held.
    running: HashMap<ContainerId, Container>,
    /// Every node this application ever received a container on. Used for
    /// cleanup fan-out when the application finishes.
    touched_nodes: BTreeSet<NodeId>,
    next_container_id: u32,
}

impl Application {
    pub fn new(app_id: ApplicationId, user: &str, queue_path: &str, priority: Priority) -> Self {
        Self {
            app_id,
            user: user.to_string(),
            queue_path: queue_path.to_string(),
            priority,
            requests: BTreeMap::new(),
            granted: Vec::new(),
            running: HashMap::new(),
            touched_nodes: BTreeSet::new(),
            next_container_id: 0,
        }
    }

    pub fn app_id(&self) -> ApplicationId {
        self.app_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn queue_path(&self) -> &str {
        &self.queue_path
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Replace the outstanding count for each (priority, profile) key in
    /// `asks`. A zero count withdraws the key. Keys not mentioned keep
    /// their previous counts: callers resend full desired state per key,
    /// not deltas against it.
    pub fn update_requests(&mut self, asks: &[ResourceRequest]) {
        for ask in asks {
            let per_priority = self.requests.entry(ask.priority).or_default();
            if ask.count == 0 {
                per_priority.remove(&ask.resources);
            } else {
                per_priority.insert(ask.resources, ask.count);
            }
        }
        self.requests.retain(|_, per_priority| !per_priority.is_empty());
        debug!(app_id = %self.app_id, entries = self.request_entries().len(), "requests updated");
    }

    /// Outstanding count for one key. Zero if absent.
    pub fn outstanding(&self, priority: Priority, resources: Resources) -> u32 {
        self.requests
            .get(&priority)
            .and_then(|per_priority| per_priority.get(&resources))
            .copied()
            .unwrap_or(0)
    }

    pub fn has_outstanding_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Snapshot of request keys with a non-zero count, most urgent priority
    /// first, profiles in deterministic order within a priority.
    pub fn request_entries(&self) -> Vec<(Priority, Resources)> {
        self.requests
            .iter()
            .flat_map(|(priority, per_priority)| {
                per_priority.keys().map(|resources| (*priority, *resources))
            })
            .collect()
    }

    /// Grant one container for the given request key on `node_id`.
    ///
    /// Decrements the outstanding count, constructs the container, and
    /// parks it in the granted set until the master's next `acquire`.
    /// Callers must only grant against a key with a non-zero count.
    pub fn grant_one(
        &mut self,
        priority: Priority,
        resources: Resources,
        node_id: NodeId,
        token_factory: Option<&dyn ContainerTokenFactory>,
    ) -> Container {
        debug_assert!(self.outstanding(priority, resources) > 0);

        if let Some(per_priority) = self.requests.get_mut(&priority) {
            match per_priority.get_mut(&resources) {
                Some(count) if *count > 1 => *count -= 1,
                _ => {
                    per_priority.remove(&resources);
                }
            }
            if per_priority.is_empty() {
                self.requests.remove(&priority);
            }
        }

        self.next_container_id += 1;
        let id = ContainerId::new(self.app_id, self.next_container_id);
        let mut container = Container::new(id, node_id.clone(), resources);
        if let Some(factory) = token_factory {
            container.token = Some(factory.mint(&container));
        }

        self.touched_nodes.insert(node_id);
        self.granted.push(container.clone());
        container
    }

    /// Drain the granted set, moving every container into the running set.
    ///
    /// Each container comes back from exactly one call; a second drain
    /// returns nothing until something new is granted.
    pub fn acquire(&mut self) -> Vec<Container> {
        let mut acquired = std::mem::take(&mut self.granted);
        for container in &mut acquired {
            container.status = ContainerStatus::Running;
            self.running.insert(container.id, container.clone());
        }
        acquired
    }

    /// Remove the listed containers from the running set and return the
    /// ones that were actually held. Ids not present are skipped: releasing
    /// a container that already completed naturally is a no-op.
    pub fn release(&mut self, container_ids: &[ContainerId]) -> Vec<Container> {
        container_ids
            .iter()
            .filter_map(|id| self.running.remove(id))
            .collect()
    }

    /// Forget one container, wherever it currently sits (running, or
    /// granted and never picked up). Used when a heartbeat reports it
    /// complete, so a dead grant is not delivered later.
    pub fn remove_container(&mut self, container_id: &ContainerId) -> Option<Container> {
        if let Some(container) = self.running.remove(container_id) {
            return Some(container);
        }
        let index = self.granted.iter().position(|c| &c.id == container_id)?;
        Some(self.granted.remove(index))
    }

    /// Take every container still charged to this application: the running
    /// set plus grants the master never picked up. Used when the
    /// application is removed.
    pub fn drain_all(&mut self) -> Vec<Container> {
        let mut all: Vec<Container> = self.running.drain().map(|(_, c)| c).collect();
        all.append(&mut self.granted);
        all
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn granted_count(&self) -> usize {
        self.granted.len()
    }

    pub fn touched_nodes(&self) -> Vec<NodeId> {
        self.touched_nodes.iter().cloned().collect()
    }
}
