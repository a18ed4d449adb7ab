pub mod tracker;

pub use tracker::{ClusterTracker, TrackedNode, TrackerError, TrackerResult};
