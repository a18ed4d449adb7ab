//! Typed identifiers for applications, containers, and nodes.
//!
//! The string forms (`app_<ts>_<seq>`, `container_<ts>_<aseq>_<cseq>`) are
//! produced by plain `Display` impls and parsed by `FromStr`; formatting is
//! deterministic and carries no per-call state.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifies one application for the lifetime of the cluster.
///
/// `cluster_timestamp` is the cluster start time; `id` is a monotonically
/// increasing sequence number. Ordering is by sequence number, which gives
/// submission order and is what leaf queues use for FIFO tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId {
    pub cluster_timestamp: u64,
    pub id: u32,
}

impl ApplicationId {
    pub const fn new(cluster_timestamp: u64, id: u32) -> Self {
        Self {
            cluster_timestamp,
            id,
        }
    }
}

impl Ord for ApplicationId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then(self.cluster_timestamp.cmp(&other.cluster_timestamp))
    }
}

impl PartialOrd for ApplicationId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app_{}_{}", self.cluster_timestamp, self.id)
    }
}

impl FromStr for ApplicationId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('_');
        if parts.next() != Some("app") {
            return Err(ParseIdError::new("app", s));
        }
        let cluster_timestamp = next_number(&mut parts, "app", s)?;
        let id = next_number(&mut parts, "app", s)? as u32;
        if parts.next().is_some() {
            return Err(ParseIdError::new("app", s));
        }
        Ok(Self {
            cluster_timestamp,
            id,
        })
    }
}

/// Identifies one container: the owning application plus a per-application
/// sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId {
    pub app_id: ApplicationId,
    pub id: u32,
}

impl ContainerId {
    pub const fn new(app_id: ApplicationId, id: u32) -> Self {
        Self { app_id, id }
    }
}

impl Ord for ContainerId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.app_id
            .cmp(&other.app_id)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for ContainerId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "container_{}_{}_{}",
            self.app_id.cluster_timestamp, self.app_id.id, self.id
        )
    }
}

impl FromStr for ContainerId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('_');
        if parts.next() != Some("container") {
            return Err(ParseIdError::new("container", s));
        }
        let cluster_timestamp = next_number(&mut parts, "container", s)?;
        let app = next_number(&mut parts, "container", s)? as u32;
        let id = next_number(&mut parts, "container", s)? as u32;
        if parts.next().is_some() {
            return Err(ParseIdError::new("container", s));
        }
        Ok(Self {
            app_id: ApplicationId::new(cluster_timestamp, app),
            id,
        })
    }
}

/// Identifies a worker node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An id string did not match the expected `<prefix>_..._...` form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {kind} id: {input:?}")]
pub struct ParseIdError {
    kind: &'static str,
    input: String,
}

impl ParseIdError {
    fn new(kind: &'static str, input: &str) -> Self {
        Self {
            kind,
            input: input.to_string(),
        }
    }
}

fn next_number<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    kind: &'static str,
    input: &str,
) -> Result<u64, ParseIdError> {
    parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| ParseIdError::new(kind, input))
}
