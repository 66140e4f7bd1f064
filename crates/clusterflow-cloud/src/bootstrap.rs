//! Hand-off to the Kubernetes bootstrap layer
//!
//! Installing and joining Kubernetes happens outside this crate. The
//! collaborator receives the resource snapshot once infrastructure exists.

use crate::error::Result;
use crate::state::ClusterResourceSnapshot;
use async_trait::async_trait;

#[async_trait]
pub trait BootstrapCollaborator: Send + Sync {
    /// Install Kubernetes on a freshly provisioned cluster
    async fn configure_cluster(&self, snapshot: &ClusterResourceSnapshot) -> Result<()>;

    /// Join workers at `[first_new_index, ..)` to the running cluster
    async fn join_workers(
        &self,
        snapshot: &ClusterResourceSnapshot,
        first_new_index: usize,
    ) -> Result<()>;

    /// Remove the Node objects of deleted workers
    async fn drain_nodes(&self, snapshot: &ClusterResourceSnapshot, hostnames: &[String]) -> Result<()>;
}

/// Logs every request and reports success
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBootstrap;

#[async_trait]
impl BootstrapCollaborator for NoopBootstrap {
    async fn configure_cluster(&self, snapshot: &ClusterResourceSnapshot) -> Result<()> {
        tracing::info!(
            "Skipping Kubernetes bootstrap for {} ({} control planes, {} workers)",
            snapshot.cluster_name,
            snapshot.ipv4_control_planes.len(),
            snapshot.ipv4_worker_planes.len()
        );
        Ok(())
    }

    async fn join_workers(
        &self,
        snapshot: &ClusterResourceSnapshot,
        first_new_index: usize,
    ) -> Result<()> {
        let joining = snapshot
            .worker_hostnames
            .get(first_new_index..)
            .unwrap_or_default();
        tracing::info!("Skipping worker join for {:?}", joining);
        Ok(())
    }

    async fn drain_nodes(&self, snapshot: &ClusterResourceSnapshot, hostnames: &[String]) -> Result<()> {
        tracing::info!(
            "Skipping node removal on {} for {:?}",
            snapshot.cluster_name,
            hostnames
        );
        Ok(())
    }
}
