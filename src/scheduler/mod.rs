//! Cluster scheduler: membership resolution and node drain

mod nomad;

pub use nomad::{NomadClient, NomadTls};

use crate::error::{Error, Result};
use crate::types::{ClusterNode, DrainRequest, InstanceIdentity};
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait NodeScheduler: Send + Sync {
    /// All nodes registered with the scheduler, in API order
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>>;

    /// Start draining a node. Must only be called once per process.
    async fn drain_node(&self, request: &DrainRequest) -> Result<()>;
}

/// Find the scheduler node registered under this instance's identity.
///
/// Names are compared case-insensitively. `Ok(None)` means the instance is
/// not a member of the cluster. Several matches are ambiguous and rejected.
pub async fn resolve_node(
    scheduler: &dyn NodeScheduler,
    identity: &InstanceIdentity,
) -> Result<Option<ClusterNode>> {
    let mut matches: Vec<ClusterNode> = scheduler
        .list_nodes()
        .await?
        .into_iter()
        .filter(|node| identity.matches(&node.name))
        .collect();

    match matches.len() {
        0 => {
            info!("Could not find instance {} registered in Nomad", identity);
            Ok(None)
        }
        1 => {
            let node = matches.remove(0);
            info!(
                "Instance {} is registered in Nomad as node {}",
                identity, node.node_id
            );
            Ok(Some(node))
        }
        _ => Err(Error::DuplicateNode {
            name: identity.to_string(),
            ids: matches.into_iter().map(|n| n.node_id).collect(),
        }),
    }
}

/// Drain the resolved node with the fixed drain policy
pub async fn drain(scheduler: &dyn NodeScheduler, node: &ClusterNode) -> Result<()> {
    let request = DrainRequest::for_node(node);
    scheduler.drain_node(&request).await?;
    info!(
        "Triggered Nomad node drain for {} (deadline {:?}, system jobs ignored: {})",
        request.node_id, request.deadline, request.ignore_system_jobs
    );
    Ok(())
}
