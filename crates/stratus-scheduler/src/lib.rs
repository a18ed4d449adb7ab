pub mod application;
pub mod error;
pub mod queue;
pub mod scheduler;

pub use application::Application;
pub use error::{SchedulerError, SchedulerResult};
pub use queue::{Queue, QueueKind, QueueTree};
pub use scheduler::{CapacityScheduler, NodeSnapshot, QueueSnapshot};
