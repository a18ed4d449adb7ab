//! stratus.toml configuration parser.
//!
//! The configuration names a queue tree and the cluster-wide allocation
//! bounds. Each queue is keyed by its dot-separated path; a queue with a
//! `children` list is a parent, anything else is a leaf:
//!
//! ```toml
//! [scheduler]
//! minimum_allocation_mb = 1024
//! maximum_allocation_mb = 8192
//!
//! [queues.root]
//! capacity = 100.0
//! children = ["default", "batch"]
//!
//! [queues."root.default"]
//! capacity = 60.0
//! ```
//!
//! Field-level validation (allocation bounds, capacity ranges) happens at
//! load; structural validation (children sums, name uniqueness) happens once
//! at queue-tree build time and leaves no partial tree behind on failure.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::resources::Resources;

/// The root queue path. Every other queue path is `root.`-prefixed.
pub const ROOT_QUEUE: &str = "root";

/// Result of loading or validating configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub scheduler: AllocationConfig,
    #[serde(default)]
    pub queues: HashMap<String, QueueConfig>,
}

/// Cluster-wide allocation increment and ceiling, per dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    #[serde(default = "default_min_mb")]
    pub minimum_allocation_mb: u64,
    #[serde(default = "default_min_vcores")]
    pub minimum_allocation_vcores: u32,
    #[serde(default = "default_max_mb")]
    pub maximum_allocation_mb: u64,
    #[serde(default = "default_max_vcores")]
    pub maximum_allocation_vcores: u32,
}

fn default_min_mb() -> u64 {
    1024
}
fn default_min_vcores() -> u32 {
    1
}
fn default_max_mb() -> u64 {
    8192
}
fn default_max_vcores() -> u32 {
    4
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            minimum_allocation_mb: default_min_mb(),
            minimum_allocation_vcores: default_min_vcores(),
            maximum_allocation_mb: default_max_mb(),
            maximum_allocation_vcores: default_max_vcores(),
        }
    }
}

/// Per-queue configuration, keyed by the queue's full path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Share of the parent's capacity, in percent.
    pub capacity: f64,
    /// Child queue names, in order. Empty for a leaf.
    #[serde(default)]
    pub children: Vec<String>,
    /// Users allowed to submit to this leaf. Absent means open to all.
    #[serde(default)]
    pub allow_users: Option<Vec<String>>,
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: SchedulerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn minimum_allocation(&self) -> Resources {
        Resources::new(
            self.scheduler.minimum_allocation_mb,
            self.scheduler.minimum_allocation_vcores,
        )
    }

    pub fn maximum_allocation(&self) -> Resources {
        Resources::new(
            self.scheduler.maximum_allocation_mb,
            self.scheduler.maximum_allocation_vcores,
        )
    }

    pub fn queue(&self, path: &str) -> Option<&QueueConfig> {
        self.queues.get(path)
    }

    /// Child queue names declared for `path`, in declaration order.
    pub fn children(&self, path: &str) -> &[String] {
        self.queues
            .get(path)
            .map(|q| q.children.as_slice())
            .unwrap_or(&[])
    }

    fn validate(&self) -> ConfigResult<()> {
        let min = self.minimum_allocation();
        let max = self.maximum_allocation();

        if min.memory_mb == 0 || min.vcores == 0 {
            return Err(ConfigError::Invalid(
                "minimum allocation must be non-zero in every dimension".into(),
            ));
        }
        if !min.fits_in(max) {
            return Err(ConfigError::Invalid(format!(
                "maximum allocation ({max}) is below the minimum ({min})"
            )));
        }
        // Keep normalize-then-clamp idempotent.
        if max.memory_mb % min.memory_mb != 0 || max.vcores % min.vcores != 0 {
            return Err(ConfigError::Invalid(format!(
                "maximum allocation ({max}) must be a whole multiple of the minimum ({min})"
            )));
        }

        if !self.queues.contains_key(ROOT_QUEUE) {
            return Err(ConfigError::Invalid("queue 'root' is not declared".into()));
        }
        for (path, queue) in &self.queues {
            if queue.capacity <= 0.0 || queue.capacity > 100.0 {
                return Err(ConfigError::Invalid(format!(
                    "queue '{path}' capacity {} is outside (0, 100]",
                    queue.capacity
                )));
            }
            for child in &queue.children {
                let child_path = format!("{path}.{child}");
                if !self.queues.contains_key(&child_path) {
                    return Err(ConfigError::Invalid(format!(
                        "queue '{path}' declares child '{child}' but '{child_path}' is not configured"
                    )));
                }
            }
        }
        Ok(())
    }
}
