//! Cluster-level operations
//!
//! [`ClusterManager`] is the entry point used by the CLI. Each mutating
//! operation takes the per-cluster lock, opens the state document for the
//! intended operation and drives an [`Orchestrator`] over it. Failed creates
//! are rolled back here.

use crate::bootstrap::BootstrapCollaborator;
use crate::confirm::Confirmation;
use crate::document::SharedState;
use crate::error::{CloudError, Result};
use crate::orchestrator::{EngineStatus, Orchestrator, OrchestratorSettings, Topology};
use crate::params::{ManagedClusterParams, validate_name};
use crate::plan::ProvisionPlan;
use crate::provider::ProviderAdapter;
use crate::scale::{ScaleDown, ScaleUp};
use crate::state::{
    ClusterKey, ClusterResourceSnapshot, ClusterState, ClusterType, LifecyclePhase, Operation,
    Role,
};
use crate::store::{ClusterFilter, StateLock, StateStore};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// What to build for a cluster
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterShape {
    SelfManaged(Topology),
    Managed(ManagedClusterParams),
}

impl ClusterShape {
    pub fn cluster_type(&self) -> ClusterType {
        match self {
            ClusterShape::SelfManaged(_) => ClusterType::SelfManaged,
            ClusterShape::Managed(_) => ClusterType::Managed,
        }
    }
}

/// A cluster to create
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSpec {
    pub key: ClusterKey,
    pub owner: Option<String>,
    pub shape: ClusterShape,
}

impl ClusterSpec {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.key.name)?;
        if self.key.region.trim().is_empty() {
            return Err(CloudError::InvalidParameter("region is required".to_string()));
        }
        if self.shape.cluster_type() != self.key.cluster_type {
            return Err(CloudError::InvalidParameter(format!(
                "cluster {} is {} but its shape describes a {} cluster",
                self.key.name,
                self.key.cluster_type,
                self.shape.cluster_type()
            )));
        }
        match &self.shape {
            ClusterShape::SelfManaged(topology) => topology.validate(),
            ClusterShape::Managed(params) => params.validate(),
        }
    }
}

/// Errors raised before any resource was touched need no rollback
fn is_validation_error(err: &CloudError) -> bool {
    matches!(
        err,
        CloudError::InvalidTopology { .. }
            | CloudError::InvalidParameter(_)
            | CloudError::InvalidName(_)
            | CloudError::UninitializedRole(_)
    )
}

pub struct ClusterManager {
    store: Arc<dyn StateStore>,
    adapter: Arc<dyn ProviderAdapter>,
    bootstrap: Arc<dyn BootstrapCollaborator>,
    settings: OrchestratorSettings,
    status: Arc<watch::Sender<EngineStatus>>,
    cancel: CancellationToken,
}

impl ClusterManager {
    pub fn new(
        store: Arc<dyn StateStore>,
        adapter: Arc<dyn ProviderAdapter>,
        bootstrap: Arc<dyn BootstrapCollaborator>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (status, _) = watch::channel(EngineStatus::Idle);
        Self {
            store,
            adapter,
            bootstrap,
            settings,
            status: Arc::new(status),
            cancel: CancellationToken::new(),
        }
    }

    /// Status of whichever operation is running
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Cancelling this token aborts the running operation
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn orchestrator(&self, state: SharedState) -> Orchestrator {
        Orchestrator::new(self.adapter.clone(), Arc::new(state), self.settings.clone())
            .with_status_channel(self.status.clone())
            .with_cancellation(self.cancel.child_token())
    }

    fn check_provider(&self, key: &ClusterKey) -> Result<()> {
        if self.adapter.kind() != key.provider {
            return Err(CloudError::ProviderNotFound(format!(
                "{} adapter cannot manage {} clusters",
                self.adapter.display_name(),
                key.provider
            )));
        }
        Ok(())
    }

    /// Provision a cluster and hand it to the bootstrap collaborator.
    ///
    /// A failed provisioning run is rolled back; rollback failures are logged
    /// and the original error is returned. When the infrastructure already
    /// exists but bootstrap never finished, only the bootstrap is retried.
    pub async fn create_cluster(&self, spec: &ClusterSpec) -> Result<ClusterResourceSnapshot> {
        spec.validate()?;
        self.check_provider(&spec.key)?;

        let auth = self.adapter.check_auth().await?;
        if !auth.authenticated {
            return Err(CloudError::ApiError(format!(
                "{} authentication failed: {}",
                self.adapter.display_name(),
                auth.error.unwrap_or_default()
            )));
        }

        let lock = self.store.acquire_lock(&spec.key).await?;
        let state = SharedState::open(
            self.store.clone(),
            &spec.key,
            Operation::Create,
            spec.owner.clone(),
        )
        .await?;
        let infrastructure_done = state.read(|s| s.completed).await;
        let orchestrator = self.orchestrator(state);

        let provisioned = if infrastructure_done {
            tracing::info!("Infrastructure of {} exists, retrying bootstrap", spec.key);
            Ok(orchestrator.state().resource_snapshot().await)
        } else {
            tracing::info!("Creating cluster {}", spec.key);
            match &spec.shape {
                ClusterShape::SelfManaged(topology) => {
                    orchestrator.create_ha_cluster(topology).await
                }
                ClusterShape::Managed(params) => orchestrator.create_managed_cluster(params).await,
            }
        };

        let snapshot = match provisioned {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("Cluster {} failed to provision: {}", spec.key, e);
                if !is_validation_error(&e)
                    && let Err(rb) = orchestrator.rollback().await
                {
                    tracing::error!("{}", CloudError::Rollback(rb.to_string()));
                }
                return Err(e);
            }
        };

        if spec.key.cluster_type == ClusterType::SelfManaged
            && let Err(e) = self.bootstrap.configure_cluster(&snapshot).await
        {
            tracing::error!(
                "Kubernetes bootstrap of {} failed, infrastructure is kept (control planes {:?}): {}",
                spec.key,
                snapshot.ipv4_control_planes,
                e
            );
            return Err(e);
        }
        orchestrator.state().set_phase(LifecyclePhase::Ready).await?;

        lock.release().await?;
        tracing::info!("Cluster {} is ready", spec.key);
        Ok(snapshot)
    }

    /// Tear down a cluster. Returns `false` when the operator declined.
    pub async fn delete_cluster(
        &self,
        key: &ClusterKey,
        confirmation: &dyn Confirmation,
    ) -> Result<bool> {
        self.check_provider(key)?;
        let lock = self.store.acquire_lock(key).await?;
        let state = SharedState::open(self.store.clone(), key, Operation::Delete, None).await?;

        if !confirmation.confirm(&format!("Delete cluster {} and all of its resources?", key)) {
            tracing::info!("Deletion of {} declined", key);
            lock.release().await?;
            return Ok(false);
        }

        let orchestrator = self.orchestrator(state);
        match key.cluster_type {
            ClusterType::SelfManaged => orchestrator.delete_ha_cluster().await?,
            ClusterType::Managed => orchestrator.delete_managed_cluster().await?,
        }

        lock.release().await?;
        tracing::info!("Cluster {} deleted", key);
        Ok(true)
    }

    /// Current record for `key`
    pub async fn get_cluster(&self, key: &ClusterKey) -> Result<ClusterState> {
        let state = SharedState::open(self.store.clone(), key, Operation::Get, None).await?;
        Ok(state.snapshot().await)
    }

    pub async fn list_clusters(&self, filter: &ClusterFilter) -> Result<Vec<ClusterState>> {
        self.store.list(filter).await
    }

    /// Grow the worker plane and join the new nodes
    pub async fn add_workers(&self, key: &ClusterKey, desired: usize, vm_type: &str) -> Result<ScaleUp> {
        let (lock, orchestrator) = self.open_for_scale(key).await?;
        let current = orchestrator.provisioner().get_count(Role::WorkerPlane).await?;

        let up = match orchestrator.add_worker_nodes(desired, vm_type).await {
            Ok(up) => up,
            Err(e) => {
                if !is_validation_error(&e)
                    && let Err(rb) = orchestrator.revert_worker_growth(current).await
                {
                    tracing::error!("{}", CloudError::Rollback(rb.to_string()));
                }
                return Err(e);
            }
        };

        if up.first_new_index < up.snapshot.worker_hostnames.len() {
            self.bootstrap
                .join_workers(&up.snapshot, up.first_new_index)
                .await?;
        }

        lock.release().await?;
        Ok(up)
    }

    /// Shrink the worker plane after confirmation, then drain the removed nodes
    pub async fn remove_workers(
        &self,
        key: &ClusterKey,
        desired: usize,
        confirmation: &dyn Confirmation,
    ) -> Result<ScaleDown> {
        let (lock, orchestrator) = self.open_for_scale(key).await?;
        let down = orchestrator.remove_worker_nodes(desired, confirmation).await?;

        if let ScaleDown::Removed { hostnames, snapshot } = &down
            && !hostnames.is_empty()
        {
            self.bootstrap.drain_nodes(snapshot, hostnames).await?;
        }

        lock.release().await?;
        Ok(down)
    }

    async fn open_for_scale(&self, key: &ClusterKey) -> Result<(StateLock, Orchestrator)> {
        self.check_provider(key)?;
        if key.cluster_type != ClusterType::SelfManaged {
            return Err(CloudError::InvalidParameter(format!(
                "worker scaling is only supported for self-managed clusters, {} is {}",
                key.name, key.cluster_type
            )));
        }
        let lock = self.store.acquire_lock(key).await?;
        let state = SharedState::open(self.store.clone(), key, Operation::Scale, None).await?;
        Ok((lock, self.orchestrator(state)))
    }

    /// What `create_cluster` would do for `spec` right now
    pub async fn plan_create(&self, spec: &ClusterSpec) -> Result<ProvisionPlan> {
        spec.validate()?;
        let state = self.store.load(&spec.key).await?;
        if let Some(state) = &state
            && state.completed
            && state.meta.phase != LifecyclePhase::Configuring
        {
            return Err(CloudError::DuplicateCluster(spec.key.clone()));
        }
        ProvisionPlan::for_create(&spec.key, state.as_ref(), &spec.shape)
    }

    /// What `delete_cluster` would remove for `key`
    pub async fn plan_delete(&self, key: &ClusterKey) -> Result<ProvisionPlan> {
        let state = self
            .store
            .load(key)
            .await?
            .ok_or_else(|| CloudError::ClusterNotFound(key.clone()))?;
        Ok(ProvisionPlan::for_delete(&state))
    }
}
