//! The administrative queue tree.
//!
//! Queues form a capacity hierarchy: parents split their share among
//! children, leaves hold applications. The tree is built once from
//! configuration and its structure is frozen from then on; capacities can
//! be reloaded. Nodes in the tree refer to each other only by path, and
//! the whole tree lives in one flat path-indexed map, so ownership stays
//! acyclic.

use std::collections::{BTreeSet, HashMap};

use tracing::info;

use stratus_core::config::{ROOT_QUEUE, SchedulerConfig};
use stratus_core::{ApplicationId, Resources};

use crate::error::{SchedulerError, SchedulerResult};

/// Tolerance for capacity sums, to absorb float noise in configs like
/// three children at 33.333.
const CAPACITY_SUM_EPSILON: f64 = 1e-6;

/// What a queue holds: child queues or applications, never both.
#[derive(Debug)]
pub enum QueueKind {
    Parent {
        /// Child queue paths, in configured order.
        children: Vec<String>,
    },
    Leaf {
        /// Applications admitted to this leaf, kept in id order so
        /// iteration is FIFO by submission.
        applications: BTreeSet<ApplicationId>,
        /// Users allowed to submit. Absent means open.
        allow_users: Option<Vec<String>>,
    },
}

/// One queue in the tree.
#[derive(Debug)]
pub struct Queue {
    name: String,
    path: String,
    parent: Option<String>,
    /// Share of the parent's capacity, in percent.
    capacity_percent: f64,
    /// This queue's guaranteed fraction of the whole cluster: the product
    /// of capacity shares down from the root.
    absolute_capacity: f64,
    used: Resources,
    kind: QueueKind,
}

impl Queue {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn capacity_percent(&self) -> f64 {
        self.capacity_percent
    }

    pub fn absolute_capacity(&self) -> f64 {
        self.absolute_capacity
    }

    pub fn used(&self) -> Resources {
        self.used
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, QueueKind::Leaf { .. })
    }

    /// Child paths, in configured order. Empty for a leaf.
    pub fn children(&self) -> &[String] {
        match &self.kind {
            QueueKind::Parent { children } => children,
            QueueKind::Leaf { .. } => &[],
        }
    }

    /// Applications in FIFO (submission) order. Empty for a parent.
    pub fn applications(&self) -> Vec<ApplicationId> {
        match &self.kind {
            QueueKind::Leaf { applications, .. } => applications.iter().copied().collect(),
            QueueKind::Parent { .. } => Vec::new(),
        }
    }

    pub fn application_count(&self) -> usize {
        match &self.kind {
            QueueKind::Leaf { applications, .. } => applications.len(),
            QueueKind::Parent { .. } => 0,
        }
    }

    /// Used capacity relative to this queue's guaranteed share of the
    /// cluster, measured on memory, the dominant dimension. An empty
    /// cluster has utilization 0 everywhere.
    pub fn utilization(&self, cluster: Resources) -> f64 {
        let guaranteed = self.absolute_capacity * cluster.memory_mb as f64;
        if guaranteed <= 0.0 {
            return 0.0;
        }
        self.used.memory_mb as f64 / guaranteed
    }

    /// Admit an application to this leaf, enforcing the ACL.
    pub fn submit_application(
        &mut self,
        app_id: ApplicationId,
        user: &str,
    ) -> SchedulerResult<()> {
        match &mut self.kind {
            QueueKind::Leaf {
                applications,
                allow_users,
            } => {
                if let Some(allowed) = allow_users {
                    if !allowed.iter().any(|u| u == user) {
                        return Err(SchedulerError::AccessDenied {
                            queue: self.path.clone(),
                            user: user.to_string(),
                        });
                    }
                }
                applications.insert(app_id);
                Ok(())
            }
            QueueKind::Parent { .. } => Err(SchedulerError::NotLeafQueue(self.path.clone())),
        }
    }

    /// Drop an application from this leaf's active set. Safe to call once
    /// per application lifetime; a second call finds nothing.
    pub fn finish_application(&mut self, app_id: ApplicationId) -> bool {
        match &mut self.kind {
            QueueKind::Leaf { applications, .. } => applications.remove(&app_id),
            QueueKind::Parent { .. } => false,
        }
    }
}

/// The whole queue hierarchy: a flat path-indexed map plus a short-name
/// index for submissions that address a leaf by bare name.
#[derive(Debug)]
pub struct QueueTree {
    queues: HashMap<String, Queue>,
    by_name: HashMap<String, String>,
}

impl QueueTree {
    /// Build and validate the tree from configuration.
    ///
    /// Fails without installing anything if capacities are malformed,
    /// children oversubscribe a parent, or queue names collide.
    pub fn build(config: &SchedulerConfig) -> SchedulerResult<Self> {
        let mut tree = Self {
            queues: HashMap::new(),
            by_name: HashMap::new(),
        };
        let root_share = config
            .queue(ROOT_QUEUE)
            .map(|q| q.capacity / 100.0)
            .unwrap_or(1.0);
        tree.parse_queue(config, ROOT_QUEUE, None, root_share)?;
        info!(queues = tree.queues.len(), "queue tree initialized");
        Ok(tree)
    }

    fn parse_queue(
        &mut self,
        config: &SchedulerConfig,
        path: &str,
        parent: Option<&str>,
        absolute_capacity: f64,
    ) -> SchedulerResult<()> {
        let queue_config = config
            .queue(path)
            .ok_or_else(|| SchedulerError::InvalidTree(format!("queue '{path}' is not configured")))?;
        let name = path.rsplit('.').next().unwrap_or(path).to_string();

        if let Some(previous) = self.by_name.insert(name.clone(), path.to_string()) {
            return Err(SchedulerError::InvalidTree(format!(
                "queue name '{name}' is used by both '{previous}' and '{path}'"
            )));
        }

        let kind = if queue_config.children.is_empty() {
            QueueKind::Leaf {
                applications: BTreeSet::new(),
                allow_users: queue_config.allow_users.clone(),
            }
        } else {
            if queue_config.allow_users.is_some() {
                return Err(SchedulerError::InvalidTree(format!(
                    "queue '{path}' is a parent and cannot carry allow_users"
                )));
            }
            let mut sum = 0.0;
            for child in &queue_config.children {
                let child_path = format!("{path}.{child}");
                sum += config
                    .queue(&child_path)
                    .map(|c| c.capacity)
                    .unwrap_or_default();
            }
            if sum > 100.0 + CAPACITY_SUM_EPSILON {
                return Err(SchedulerError::InvalidTree(format!(
                    "children of '{path}' declare {sum}% of its capacity"
                )));
            }
            QueueKind::Parent {
                children: queue_config
                    .children
                    .iter()
                    .map(|child| format!("{path}.{child}"))
                    .collect(),
            }
        };

        self.queues.insert(
            path.to_string(),
            Queue {
                name,
                path: path.to_string(),
                parent: parent.map(str::to_string),
                capacity_percent: queue_config.capacity,
                absolute_capacity,
                used: Resources::zero(),
                kind,
            },
        );

        for child in &queue_config.children {
            let child_path = format!("{path}.{child}");
            let child_share = config
                .queue(&child_path)
                .map(|c| c.capacity / 100.0)
                .unwrap_or_default();
            self.parse_queue(config, &child_path, Some(path), absolute_capacity * child_share)?;
        }
        Ok(())
    }

    /// Resolve a submission target: a full path, or a unique bare name.
    pub fn resolve(&self, name_or_path: &str) -> Option<&str> {
        if let Some((key, _)) = self.queues.get_key_value(name_or_path) {
            return Some(key.as_str());
        }
        self.by_name.get(name_or_path).map(String::as_str)
    }

    pub fn get(&self, path: &str) -> Option<&Queue> {
        self.queues.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Queue> {
        self.queues.get_mut(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Queue> {
        self.queues.values()
    }

    /// Charge an allocation against a leaf and every ancestor up to the
    /// root, so utilization is visible at every level.
    pub fn charge(&mut self, leaf_path: &str, amount: Resources) {
        self.walk_up(leaf_path, |queue| queue.used.add(amount));
    }

    /// Give back a completed container's capacity along the same chain.
    pub fn credit(&mut self, leaf_path: &str, amount: Resources) {
        self.walk_up(leaf_path, |queue| queue.used.subtract(amount));
    }

    fn walk_up(&mut self, leaf_path: &str, mut apply: impl FnMut(&mut Queue)) {
        let mut current = Some(leaf_path.to_string());
        while let Some(path) = current {
            match self.queues.get_mut(&path) {
                Some(queue) => {
                    apply(queue);
                    current = queue.parent.clone();
                }
                None => break,
            }
        }
    }

    /// Reload capacities from a new configuration.
    ///
    /// The new config must describe the same topology: same paths, same
    /// parent/leaf split, same child order. Utilization and admitted
    /// applications carry over untouched.
    pub fn reinitialize(&mut self, config: &SchedulerConfig) -> SchedulerResult<()> {
        let fresh = Self::build(config)?;

        if fresh.queues.len() != self.queues.len() {
            return Err(SchedulerError::TopologyChanged(format!(
                "queue count changed from {} to {}",
                self.queues.len(),
                fresh.queues.len()
            )));
        }
        for (path, queue) in &self.queues {
            let replacement = fresh
                .queues
                .get(path)
                .ok_or_else(|| SchedulerError::TopologyChanged(format!("queue '{path}' removed")))?;
            if queue.is_leaf() != replacement.is_leaf() || queue.children() != replacement.children()
            {
                return Err(SchedulerError::TopologyChanged(format!(
                    "queue '{path}' changed shape"
                )));
            }
        }

        for (path, replacement) in fresh.queues {
            let queue = self.queues.get_mut(&path).expect("validated above");
            queue.capacity_percent = replacement.capacity_percent;
            queue.absolute_capacity = replacement.absolute_capacity;
            if let (
                QueueKind::Leaf { allow_users, .. },
                QueueKind::Leaf {
                    allow_users: new_users,
                    ..
                },
            ) = (&mut queue.kind, replacement.kind)
            {
                *allow_users = new_users;
            }
        }
        info!("queue capacities reloaded");
        Ok(())
    }
}
