//! Domain types shared by the collaborators and the lifecycle controller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How long Nomad gives running allocations before force-stopping them
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(60);

/// Identity of the local instance, as reported by the metadata source.
///
/// The scheduler registers the node under the same name, which is what
/// membership resolution matches on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceIdentity(String);

impl InstanceIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Comparison against a scheduler node name, ignoring ASCII case only.
    /// EC2 instance ids are ASCII, so non-ASCII letters are compared exactly.
    pub fn matches(&self, node_name: &str) -> bool {
        self.0.eq_ignore_ascii_case(node_name)
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node as known to the cluster scheduler
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ClusterNode {
    #[serde(rename = "ID")]
    pub node_id: String,
    #[serde(rename = "Name")]
    pub name: String,
}

/// Interruption notice published by the metadata source
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InterruptionNotice {
    pub action: String,
    pub time: DateTime<Utc>,
}

/// Result of a single interruption poll
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// No notice published yet; the steady state
    NotMarked,
    /// The instance has been scheduled for interruption
    Marked(InterruptionNotice),
}

/// Drain parameters for a resolved node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrainRequest {
    pub node_id: String,
    pub deadline: Duration,
    pub ignore_system_jobs: bool,
}

impl DrainRequest {
    /// Fixed drain policy: 60s deadline, system jobs keep running
    pub fn for_node(node: &ClusterNode) -> Self {
        Self {
            node_id: node.node_id.clone(),
            deadline: DRAIN_DEADLINE,
            ignore_system_jobs: true,
        }
    }
}

/// Severity of an emitted event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
}

/// Observability event describing the interruption
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationEvent {
    pub title: String,
    pub body: String,
    pub host: String,
    pub tags: Vec<String>,
    pub severity: Severity,
}
