//! Provisioning orchestrator
//!
//! Sequences the provisioner verbs for whole-cluster operations. Shared
//! infrastructure (network, key pair, firewalls) is created one step at a
//! time; VMs are fanned out one task each.

use crate::counter::validate_count;
use crate::document::SharedState;
use crate::error::{CloudError, Result};
use crate::fanout::{FanOutJob, FanOutReport, fan_out};
use crate::params::{ManagedClusterParams, VmParams, names};
use crate::provider::ProviderAdapter;
use crate::provisioner::{DEFAULT_SSH_USER, Provisioner};
use crate::state::{ClusterResourceSnapshot, ClusterType, LifecyclePhase, Role};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Pause between VM teardown and firewall teardown
pub const DEFAULT_SETTLE_COOLDOWN: Duration = Duration::from_secs(20);

/// Firewalls are torn down in this order once every VM is gone
const FIREWALL_TEARDOWN_ORDER: [Role; 4] = [
    Role::DataStore,
    Role::ControlPlane,
    Role::WorkerPlane,
    Role::LoadBalancer,
];

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Wait after VM deletion before touching firewalls
    pub cooldown: Duration,
    /// Upper bound for each VM fan-out
    pub deadline: Option<Duration>,
    /// Login user for the generated key pair
    pub ssh_user: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_SETTLE_COOLDOWN,
            deadline: None,
            ssh_user: DEFAULT_SSH_USER.to_string(),
        }
    }
}

/// Observable engine status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Provisioning,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
    PartiallyRolledBack,
    Deprovisioning,
    Deprovisioned,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineStatus::Idle => "idle",
            EngineStatus::Provisioning => "provisioning",
            EngineStatus::Completed => "completed",
            EngineStatus::Failed => "failed",
            EngineStatus::RollingBack => "rolling back",
            EngineStatus::RolledBack => "rolled back",
            EngineStatus::PartiallyRolledBack => "partially rolled back",
            EngineStatus::Deprovisioning => "deprovisioning",
            EngineStatus::Deprovisioned => "deprovisioned",
        };
        f.write_str(s)
    }
}

/// Node count and machine size for one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePool {
    pub count: usize,
    pub vm_type: String,
}

/// Desired shape of a self-managed cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub control_plane: NodePool,
    pub worker_plane: NodePool,
    pub data_store: NodePool,
    pub load_balancer_vm_type: String,
}

impl Topology {
    pub fn count(&self, role: Role) -> usize {
        match role {
            Role::ControlPlane => self.control_plane.count,
            Role::WorkerPlane => self.worker_plane.count,
            Role::DataStore => self.data_store.count,
            Role::LoadBalancer => 1,
        }
    }

    pub fn vm_type(&self, role: Role) -> &str {
        match role {
            Role::ControlPlane => &self.control_plane.vm_type,
            Role::WorkerPlane => &self.worker_plane.vm_type,
            Role::DataStore => &self.data_store.vm_type,
            Role::LoadBalancer => &self.load_balancer_vm_type,
        }
    }

    /// Check every count before anything is written
    pub fn validate(&self) -> Result<()> {
        for role in Role::ALL {
            validate_count(role, self.count(role))?;
        }
        Ok(())
    }
}

pub struct Orchestrator {
    provisioner: Provisioner,
    settings: OrchestratorSettings,
    status: Arc<watch::Sender<EngineStatus>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        state: Arc<SharedState>,
        settings: OrchestratorSettings,
    ) -> Self {
        let cancel = CancellationToken::new();
        let provisioner = Provisioner::new(adapter, state)
            .with_ssh_user(settings.ssh_user.clone())
            .with_cancellation(cancel.clone());
        let (status, _) = watch::channel(EngineStatus::Idle);
        Self {
            provisioner,
            settings,
            status: Arc::new(status),
            cancel,
        }
    }

    /// Publish status changes on a channel owned by the caller
    pub fn with_status_channel(mut self, status: Arc<watch::Sender<EngineStatus>>) -> Self {
        self.status = status;
        self
    }

    /// Abort every step when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.provisioner = self.provisioner.with_cancellation(token.clone());
        self.cancel = token;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> EngineStatus {
        *self.status.borrow()
    }

    pub(crate) fn set_status(&self, status: EngineStatus) {
        tracing::debug!("Engine status: {}", status);
        self.status.send_replace(status);
    }

    /// Cancelling this token aborts every in-flight and future step
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn state(&self) -> &Arc<SharedState> {
        self.provisioner.state()
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Provision every resource of a self-managed cluster.
    ///
    /// Resumable: slots filled by an earlier attempt are skipped. Rollback on
    /// failure is left to the caller.
    pub async fn create_ha_cluster(&self, topology: &Topology) -> Result<ClusterResourceSnapshot> {
        topology.validate()?;
        self.set_status(EngineStatus::Provisioning);

        match self.provision_ha(topology).await {
            Ok(snapshot) => {
                self.set_status(EngineStatus::Completed);
                Ok(snapshot)
            }
            Err(e) => {
                self.set_status(EngineStatus::Failed);
                Err(e)
            }
        }
    }

    async fn provision_ha(&self, topology: &Topology) -> Result<ClusterResourceSnapshot> {
        let p = &self.provisioner;
        for role in Role::INVENTORIED {
            p.set_count(role, topology.count(role)).await?;
        }

        p.new_network().await?;
        p.create_upload_ssh_key_pair().await?;
        for role in Role::ALL {
            p.new_firewall(role).await?;
        }

        let slots = self.state().read(|s| s.vm_slots()).await;
        let report = self
            .create_vms(slots, |role| topology.vm_type(role).to_string())
            .await?;
        tracing::info!(
            "VM fan-out finished: {} created, {} already present",
            report.applied,
            report.skipped
        );

        self.mark_completed().await
    }

    /// Fan out `new_vm` over `slots`. Every parameter value is validated
    /// before the first task starts.
    pub(crate) async fn create_vms<T>(
        &self,
        slots: Vec<(Role, usize)>,
        vm_type: T,
    ) -> Result<FanOutReport>
    where
        T: Fn(Role) -> String,
    {
        let cluster = self.state().key().name.clone();
        let mut params = Vec::with_capacity(slots.len());
        for (role, index) in slots {
            params.push(
                VmParams::builder()
                    .name(names::vm(&cluster, role, index))
                    .role(role)
                    .vm_type(vm_type(role))
                    .index(index)
                    .build()?,
            );
        }

        let batch = self.cancel.child_token();
        let jobs: Vec<_> = params
            .into_iter()
            .map(|params| {
                let p = self.provisioner.with_cancellation(batch.clone());
                FanOutJob::new(params.role, params.index, async move {
                    p.new_vm(&params).await
                })
            })
            .collect();
        fan_out(jobs, &batch, self.settings.deadline).await
    }

    /// Fan out `del_vm` over `slots`
    pub(crate) async fn delete_vms(&self, slots: Vec<(Role, usize)>) -> Result<FanOutReport> {
        let batch = self.cancel.child_token();
        let jobs: Vec<_> = slots
            .into_iter()
            .map(|(role, index)| {
                let p = self.provisioner.with_cancellation(batch.clone());
                FanOutJob::new(role, index, async move { p.del_vm(role, index).await })
            })
            .collect();
        fan_out(jobs, &batch, self.settings.deadline).await
    }

    /// Flip `completed` once every slot is filled and hand over to bootstrap
    pub(crate) async fn mark_completed(&self) -> Result<ClusterResourceSnapshot> {
        self.state()
            .try_mutate(|s| {
                if !s.is_fully_provisioned() {
                    return Err(CloudError::StateError(
                        "provisioning finished with empty slots".to_string(),
                    ));
                }
                s.completed = true;
                if s.meta.phase == LifecyclePhase::Creating {
                    s.meta.phase = LifecyclePhase::Configuring;
                }
                Ok(s.resource_snapshot())
            })
            .await
    }

    /// Tear down every resource of a self-managed cluster and drop its record
    pub async fn delete_ha_cluster(&self) -> Result<()> {
        self.set_status(EngineStatus::Deprovisioning);
        match self.teardown_ha().await {
            Ok(()) => {
                self.set_status(EngineStatus::Deprovisioned);
                Ok(())
            }
            Err(e) => {
                self.set_status(EngineStatus::Failed);
                Err(e)
            }
        }
    }

    /// Undo a failed create. Removes whatever exists, in teardown order.
    pub async fn rollback(&self) -> Result<()> {
        self.set_status(EngineStatus::RollingBack);
        let res = match self.state().key().cluster_type {
            ClusterType::SelfManaged => self.teardown_ha().await,
            ClusterType::Managed => self.teardown_managed().await,
        };
        match res {
            Ok(()) => {
                self.set_status(EngineStatus::RolledBack);
                Ok(())
            }
            Err(e) => {
                self.set_status(EngineStatus::PartiallyRolledBack);
                Err(e)
            }
        }
    }

    /// Mark the record as being deleted so it can no longer be resumed as a create
    async fn begin_teardown(&self) -> Result<()> {
        self.state()
            .mutate(|s| {
                s.meta.phase = LifecyclePhase::Deleting;
                s.completed = false;
            })
            .await
    }

    async fn teardown_ha(&self) -> Result<()> {
        let p = &self.provisioner;
        self.begin_teardown().await?;

        let slots = self.state().read(|s| s.vm_slots()).await;
        let report = self.delete_vms(slots).await?;
        tracing::debug!(
            "VM teardown finished: {} deleted, {} already gone",
            report.applied,
            report.skipped
        );

        // a resumed teardown cannot tell how long ago its VMs went away
        if !self.settings.cooldown.is_zero() {
            tracing::info!("Waiting {:?} for VM deletion to settle", self.settings.cooldown);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(CloudError::Cancelled("teardown aborted during cooldown".to_string()));
                }
                _ = tokio::time::sleep(self.settings.cooldown) => {}
            }
        }

        for role in FIREWALL_TEARDOWN_ORDER {
            p.del_firewall(role).await?;
        }
        p.del_ssh_key_pair().await?;
        p.del_network().await?;

        self.state().remove_record().await?;
        tracing::info!("Removed state for {}", self.state().key());
        Ok(())
    }

    /// Provision network and managed cluster
    pub async fn create_managed_cluster(
        &self,
        params: &ManagedClusterParams,
    ) -> Result<ClusterResourceSnapshot> {
        params.validate()?;
        self.set_status(EngineStatus::Provisioning);

        let res = self.provision_managed(params).await;
        self.set_status(if res.is_ok() {
            EngineStatus::Completed
        } else {
            EngineStatus::Failed
        });
        res
    }

    async fn provision_managed(
        &self,
        params: &ManagedClusterParams,
    ) -> Result<ClusterResourceSnapshot> {
        self.provisioner.new_network().await?;
        self.provisioner.new_managed_cluster(params).await?;
        self.mark_completed().await
    }

    pub async fn delete_managed_cluster(&self) -> Result<()> {
        self.set_status(EngineStatus::Deprovisioning);
        let res = self.teardown_managed().await;
        self.set_status(if res.is_ok() {
            EngineStatus::Deprovisioned
        } else {
            EngineStatus::Failed
        });
        res
    }

    async fn teardown_managed(&self) -> Result<()> {
        self.begin_teardown().await?;
        self.provisioner.del_managed_cluster().await?;
        self.provisioner.del_network().await?;
        self.state().remove_record().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ClusterKey, ClusterState, ClusterType, Operation, ProviderKind};
    use crate::store::MemoryStateStore;
    use crate::testing::{Call, RecordingAdapter};

    fn pool(count: usize) -> NodePool {
        NodePool {
            count,
            vm_type: "small".to_string(),
        }
    }

    fn topology(cp: usize, wp: usize, db: usize) -> Topology {
        Topology {
            control_plane: pool(cp),
            worker_plane: pool(wp),
            data_store: pool(db),
            load_balancer_vm_type: "small".to_string(),
        }
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            cooldown: Duration::ZERO,
            ..Default::default()
        }
    }

    fn setup(cluster_type: ClusterType) -> (Arc<RecordingAdapter>, Arc<MemoryStateStore>, Orchestrator) {
        let adapter = Arc::new(RecordingAdapter::new());
        let store = Arc::new(MemoryStateStore::new());
        let key = ClusterKey::new(ProviderKind::Local, "local-1", "demo", cluster_type);
        let state = Arc::new(SharedState::new(ClusterState::new(&key, None), store.clone()));
        let orchestrator = Orchestrator::new(adapter.clone(), state, settings());
        (adapter, store, orchestrator)
    }

    #[tokio::test]
    async fn test_invalid_topology_touches_nothing() {
        let (adapter, store, o) = setup(ClusterType::SelfManaged);
        let err = o.create_ha_cluster(&topology(3, 1, 4)).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidTopology { role: Role::DataStore, .. }));
        assert!(adapter.calls().is_empty());
        assert_eq!(store.save_count(), 0);
        assert_eq!(o.status(), EngineStatus::Idle);
    }

    #[tokio::test]
    async fn test_create_ha_cluster() {
        let (adapter, _, o) = setup(ClusterType::SelfManaged);
        let status = o.subscribe();

        let snapshot = o.create_ha_cluster(&topology(3, 2, 3)).await.unwrap();
        assert_eq!(snapshot.ipv4_control_planes.len(), 3);
        assert_eq!(snapshot.worker_hostnames, vec!["demo-vm-wp-0", "demo-vm-wp-1"]);
        assert!(!snapshot.ipv4_load_balancer.is_empty());
        assert_eq!(*status.borrow(), EngineStatus::Completed);

        let state = o.state().snapshot().await;
        assert!(state.completed);
        assert_eq!(state.meta.phase, LifecyclePhase::Configuring);

        // network, key, 4 firewalls, 1 + 3 + 3 + 2 vms
        assert_eq!(adapter.calls().len(), 15);
        let calls = adapter.calls();
        let first_vm = calls.iter().position(|c| matches!(c, Call::NewVm(..))).unwrap();
        assert!(calls[..first_vm].contains(&Call::NewFirewall(Role::WorkerPlane)));
    }

    #[tokio::test]
    async fn test_managed_lifecycle() {
        let (adapter, store, o) = setup(ClusterType::Managed);
        let params = ManagedClusterParams {
            name: "demo".to_string(),
            node_count: 2,
            node_size: "medium".to_string(),
            kubernetes_version: "1.30".to_string(),
        };

        o.create_managed_cluster(&params).await.unwrap();
        assert!(o.state().read(|s| s.completed).await);
        assert_eq!(adapter.calls(), vec![Call::NewNetwork, Call::NewManagedCluster]);

        o.delete_managed_cluster().await.unwrap();
        assert_eq!(
            adapter.calls()[2..],
            [Call::DelManagedCluster, Call::DelNetwork]
        );
        assert_eq!(o.status(), EngineStatus::Deprovisioned);
        assert_eq!(adapter.live_resources(), 0);
        assert!(store.get(o.state().key()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_waits_for_cooldown() {
        let adapter = Arc::new(RecordingAdapter::new());
        let store = Arc::new(MemoryStateStore::new());
        let key = ClusterKey::new(ProviderKind::Local, "local-1", "demo", ClusterType::SelfManaged);
        let state = Arc::new(SharedState::new(ClusterState::new(&key, None), store));
        let o = Orchestrator::new(adapter.clone(), state, OrchestratorSettings::default());

        o.create_ha_cluster(&topology(3, 0, 3)).await.unwrap();

        let started = tokio::time::Instant::now();
        o.delete_ha_cluster().await.unwrap();
        assert!(started.elapsed() >= DEFAULT_SETTLE_COOLDOWN);
        assert_eq!(adapter.live_resources(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumed_delete_still_waits_for_cooldown() {
        let adapter = Arc::new(RecordingAdapter::new());
        let store = Arc::new(MemoryStateStore::new());
        let key = ClusterKey::new(ProviderKind::Local, "local-1", "demo", ClusterType::SelfManaged);
        let state = Arc::new(SharedState::new(ClusterState::new(&key, None), store.clone()));
        let first = Orchestrator::new(adapter.clone(), state, OrchestratorSettings::default());
        first.create_ha_cluster(&topology(3, 1, 3)).await.unwrap();

        // interrupted one second into the cooldown
        let token = first.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });
        let err = first.delete_ha_cluster().await.unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(adapter.count(|c| matches!(c, Call::DelFirewall(_))), 0);

        let reopened = SharedState::open(store.clone(), &key, Operation::Delete, None)
            .await
            .unwrap();
        let live_vms = reopened
            .read(|s| s.inventory(Role::ControlPlane).map(|inv| inv.provisioned_count()))
            .await;
        assert_eq!(live_vms, Some(0));
        let second = Orchestrator::new(
            adapter.clone(),
            Arc::new(reopened),
            OrchestratorSettings::default(),
        );

        let resumed = tokio::time::Instant::now();
        second.delete_ha_cluster().await.unwrap();
        assert!(resumed.elapsed() >= DEFAULT_SETTLE_COOLDOWN);
        assert_eq!(adapter.count(|c| matches!(c, Call::DelFirewall(_))), 4);
        assert!(store.get(&key).is_none());
    }
}
