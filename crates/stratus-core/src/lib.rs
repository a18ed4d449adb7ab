pub mod config;
pub mod container;
pub mod id;
pub mod lifecycle;
pub mod resources;

pub use config::{ConfigError, QueueConfig, SchedulerConfig};
pub use container::{
    Container, ContainerReport, ContainerStatus, ContainerTokenFactory, Priority, ResourceRequest,
};
pub use id::{ApplicationId, ContainerId, NodeId, ParseIdError};
pub use lifecycle::{Service, ServiceFuture, ServiceStack};
pub use resources::Resources;
