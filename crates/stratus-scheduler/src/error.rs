//! Scheduler error taxonomy.
//!
//! Only request-level and configuration-level failures surface as errors.
//! Races that are part of normal operation (an allocate or a heartbeat
//! referencing an application that already finished) are not represented
//! here at all; those paths return empty results.

use stratus_core::ApplicationId;
use stratus_cluster::TrackerError;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The submission named a queue that does not exist.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// The submission named a parent queue; applications live in leaves.
    #[error("queue '{0}' is not a leaf queue")]
    NotLeafQueue(String),

    /// The leaf queue's ACL does not list the submitting user.
    #[error("user '{user}' may not submit to queue '{queue}'")]
    AccessDenied { queue: String, user: String },

    /// An application with this id is already registered.
    #[error("application already registered: {0}")]
    ApplicationExists(ApplicationId),

    /// The queue configuration does not describe a valid tree. Fatal at
    /// startup; no partial tree is installed.
    #[error("invalid queue tree: {0}")]
    InvalidTree(String),

    /// A reinitialize attempted to change queue topology, which is frozen
    /// after startup. Capacities may change, structure may not.
    #[error("queue topology changed across reinitialize: {0}")]
    TopologyChanged(String),

    #[error(transparent)]
    Node(#[from] TrackerError),
}
