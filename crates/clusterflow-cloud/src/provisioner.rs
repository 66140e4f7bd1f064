//! State-aware provisioning verbs
//!
//! Every verb follows the same shape: look at the slot, skip when it already
//! reflects the desired end state, otherwise call the adapter (outside the
//! document lock) and record the returned identifiers (inside it, together
//! with the save).

use crate::document::SharedState;
use crate::error::{CloudError, Result, Verb};
use crate::params::{
    DEFAULT_NETWORK_CIDR, FirewallParams, ManagedClusterParams, NetworkParams, SshKeyParams,
    VmParams,
};
use crate::provider::{ProviderAdapter, VmPlacement};
use crate::state::{ClusterResourceSnapshot, NodeRecord, Role};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SSH_USER: &str = "ubuntu";
const NETWORK_CIDR_KEY: &str = "cidr";

/// What a verb did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbOutcome {
    /// The adapter was called and the slot updated
    Applied,
    /// The slot already matched, nothing was called
    Skipped,
}

/// Provisioning verbs bound to one adapter and one state document
#[derive(Clone)]
pub struct Provisioner {
    adapter: Arc<dyn ProviderAdapter>,
    state: Arc<SharedState>,
    cancel: CancellationToken,
    ssh_user: String,
}

impl Provisioner {
    pub fn new(adapter: Arc<dyn ProviderAdapter>, state: Arc<SharedState>) -> Self {
        Self {
            adapter,
            state,
            cancel: CancellationToken::new(),
            ssh_user: DEFAULT_SSH_USER.to_string(),
        }
    }

    pub fn with_ssh_user(mut self, user: impl Into<String>) -> Self {
        self.ssh_user = user.into();
        self
    }

    /// Same verbs, aborted when `token` is cancelled
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..self.clone()
        }
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    /// Run one adapter call, wrapping its error and racing it against
    /// cancellation. A call aborted mid-flight may leave an unrecorded
    /// resource behind at the provider.
    async fn call<T, F>(&self, verb: Verb, role: Option<Role>, index: Option<usize>, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CloudError::provider(
                verb,
                role,
                index,
                CloudError::Cancelled("operation aborted".to_string()),
            )),
            res = fut => res.map_err(|e| CloudError::provider(verb, role, index, e)),
        }
    }

    pub async fn new_network(&self) -> Result<VerbOutcome> {
        let (provisioned, cluster) = self
            .state
            .read(|s| (s.network.is_provisioned(), s.meta.name.clone()))
            .await;
        if provisioned {
            tracing::info!("Skip creating network, already exists");
            return Ok(VerbOutcome::Skipped);
        }

        let params = NetworkParams::for_cluster(&cluster);
        let key = self.state.key();
        let mut network = self
            .call(Verb::NewNetwork, None, None, self.adapter.new_network(key, &params))
            .await?;
        network
            .extra
            .entry(NETWORK_CIDR_KEY.to_string())
            .or_insert_with(|| params.cidr.clone());

        let id = network.id.clone();
        self.state.mutate(|s| s.network = network).await?;
        tracing::info!(id = %id, name = %params.name, "Created network");
        Ok(VerbOutcome::Applied)
    }

    pub async fn del_network(&self) -> Result<VerbOutcome> {
        let network = self.state.read(|s| s.network.clone()).await;
        if !network.is_provisioned() {
            tracing::info!("Skip deleting network, already deleted");
            return Ok(VerbOutcome::Skipped);
        }

        self.call(
            Verb::DelNetwork,
            None,
            None,
            self.adapter.del_network(self.state.key(), &network),
        )
        .await?;

        self.state.mutate(|s| s.network = Default::default()).await?;
        tracing::info!(id = %network.id, "Deleted network");
        Ok(VerbOutcome::Applied)
    }

    pub async fn new_firewall(&self, role: Role) -> Result<VerbOutcome> {
        let (existing, network, cluster) = self
            .state
            .read(|s| {
                (
                    s.firewalls.get(role).to_string(),
                    s.network.clone(),
                    s.meta.name.clone(),
                )
            })
            .await;
        if !existing.is_empty() {
            tracing::info!(role = %role, "Skip creating firewall, already exists");
            return Ok(VerbOutcome::Skipped);
        }
        if !network.is_provisioned() {
            return Err(CloudError::StateError(format!(
                "network must exist before the {} firewall",
                role
            )));
        }

        let cidr = network
            .extra
            .get(NETWORK_CIDR_KEY)
            .map(String::as_str)
            .unwrap_or(DEFAULT_NETWORK_CIDR);
        let params = FirewallParams::for_role(&cluster, role, cidr);
        let id = self
            .call(
                Verb::NewFirewall,
                Some(role),
                None,
                self.adapter.new_firewall(self.state.key(), &network, &params),
            )
            .await?;

        self.state.mutate(|s| s.firewalls.set(role, id.clone())).await?;
        tracing::info!(role = %role, id = %id, "Created firewall");
        Ok(VerbOutcome::Applied)
    }

    pub async fn del_firewall(&self, role: Role) -> Result<VerbOutcome> {
        let id = self.state.read(|s| s.firewalls.get(role).to_string()).await;
        if id.is_empty() {
            tracing::info!(role = %role, "Skip deleting firewall, already deleted");
            return Ok(VerbOutcome::Skipped);
        }

        self.call(
            Verb::DelFirewall,
            Some(role),
            None,
            self.adapter.del_firewall(self.state.key(), role, &id),
        )
        .await?;

        self.state.mutate(|s| s.firewalls.set(role, "")).await?;
        tracing::info!(role = %role, id = %id, "Deleted firewall");
        Ok(VerbOutcome::Applied)
    }

    pub async fn create_upload_ssh_key_pair(&self) -> Result<VerbOutcome> {
        let (provisioned, cluster) = self
            .state
            .read(|s| (s.ssh_key.is_provisioned(), s.meta.name.clone()))
            .await;
        if provisioned {
            tracing::info!("Skip creating ssh key pair, already exists");
            return Ok(VerbOutcome::Skipped);
        }

        let params = SshKeyParams::for_cluster(&cluster, &self.ssh_user);
        let ssh_key = self
            .call(
                Verb::CreateSshKeyPair,
                None,
                None,
                self.adapter.create_upload_ssh_key_pair(self.state.key(), &params),
            )
            .await?;

        let id = ssh_key.id.clone();
        self.state.mutate(|s| s.ssh_key = ssh_key).await?;
        tracing::info!(id = %id, name = %params.name, "Uploaded ssh key pair");
        Ok(VerbOutcome::Applied)
    }

    pub async fn del_ssh_key_pair(&self) -> Result<VerbOutcome> {
        let ssh_key = self.state.read(|s| s.ssh_key.clone()).await;
        if !ssh_key.is_provisioned() {
            tracing::info!("Skip deleting ssh key pair, already deleted");
            return Ok(VerbOutcome::Skipped);
        }

        self.call(
            Verb::DelSshKeyPair,
            None,
            None,
            self.adapter.del_ssh_key_pair(self.state.key(), &ssh_key),
        )
        .await?;

        self.state.mutate(|s| s.ssh_key = Default::default()).await?;
        tracing::info!(id = %ssh_key.id, "Deleted ssh key pair");
        Ok(VerbOutcome::Applied)
    }

    /// Create the VM at `(params.role, params.index)` unless the slot is filled
    pub async fn new_vm(&self, params: &VmParams) -> Result<VerbOutcome> {
        let role = params.role;
        let index = params.index;

        let (slot, placement) = self
            .state
            .read(|s| {
                let slot = if role == Role::LoadBalancer {
                    Ok(s.load_balancer.clone())
                } else {
                    match s.inventory(role) {
                        None => Err(CloudError::UninitializedRole(role)),
                        Some(inv) => inv.get(index).ok_or_else(|| CloudError::InvalidTopology {
                            role,
                            reason: format!("index {} is outside {} slots", index, inv.len()),
                        }),
                    }
                };
                let placement = VmPlacement {
                    network: s.network.clone(),
                    firewall_id: s.firewalls.get(role).to_string(),
                    ssh_key_name: s.ssh_key.name.clone(),
                };
                (slot, placement)
            })
            .await;

        if slot?.is_provisioned() {
            tracing::info!(role = %role, index, "Skip creating vm, already exists");
            return Ok(VerbOutcome::Skipped);
        }
        if !placement.network.is_provisioned() || placement.firewall_id.is_empty() {
            return Err(CloudError::StateError(format!(
                "network and {} firewall must exist before {}",
                role, params.name
            )));
        }

        let record = self
            .call(
                Verb::NewVm,
                Some(role),
                Some(index),
                self.adapter.new_vm(self.state.key(), params, &placement),
            )
            .await?;

        let id = record.instance_id.clone();
        self.state
            .try_mutate(|s| {
                if s.set_node(role, index, record) {
                    Ok(())
                } else {
                    Err(CloudError::StateError(format!(
                        "{}[{}] vanished while {} was being created",
                        role, index, id
                    )))
                }
            })
            .await?;
        tracing::info!(role = %role, index, id = %id, name = %params.name, "Created vm");
        Ok(VerbOutcome::Applied)
    }

    /// Delete the VM at `(role, index)` and clear its whole row
    pub async fn del_vm(&self, role: Role, index: usize) -> Result<VerbOutcome> {
        let node = self.state.read(|s| s.node(role, index)).await;
        let Some(node) = node.filter(NodeRecord::is_provisioned) else {
            tracing::info!(role = %role, index, "Skip deleting vm, already deleted");
            return Ok(VerbOutcome::Skipped);
        };

        self.call(
            Verb::DelVm,
            Some(role),
            Some(index),
            self.adapter.del_vm(self.state.key(), role, &node),
        )
        .await?;

        self.state
            .mutate(|s| s.set_node(role, index, NodeRecord::default()))
            .await?;
        tracing::info!(role = %role, index, id = %node.instance_id, "Deleted vm");
        Ok(VerbOutcome::Applied)
    }

    pub async fn new_managed_cluster(&self, params: &ManagedClusterParams) -> Result<VerbOutcome> {
        let (managed, network) = self
            .state
            .read(|s| (s.managed.clone(), s.network.clone()))
            .await;
        if managed.is_provisioned() {
            tracing::info!("Skip creating managed cluster, already exists");
            return Ok(VerbOutcome::Skipped);
        }
        if !network.is_provisioned() {
            return Err(CloudError::StateError(
                "network must exist before the managed cluster".to_string(),
            ));
        }

        let info = self
            .call(
                Verb::NewManagedCluster,
                None,
                None,
                self.adapter
                    .new_managed_cluster(self.state.key(), &network, params),
            )
            .await?;

        let id = info.id.clone();
        self.state.mutate(|s| s.managed = info).await?;
        tracing::info!(id = %id, name = %params.name, "Created managed cluster");
        Ok(VerbOutcome::Applied)
    }

    pub async fn del_managed_cluster(&self) -> Result<VerbOutcome> {
        let managed = self.state.read(|s| s.managed.clone()).await;
        if !managed.is_provisioned() {
            tracing::info!("Skip deleting managed cluster, already deleted");
            return Ok(VerbOutcome::Skipped);
        }

        self.call(
            Verb::DelManagedCluster,
            None,
            None,
            self.adapter.del_managed_cluster(self.state.key(), &managed),
        )
        .await?;

        self.state.mutate(|s| s.managed = Default::default()).await?;
        tracing::info!(id = %managed.id, "Deleted managed cluster");
        Ok(VerbOutcome::Applied)
    }

    pub async fn get_state_for_cluster(&self) -> ClusterResourceSnapshot {
        self.state.resource_snapshot().await
    }

    pub async fn get_count(&self, role: Role) -> Result<usize> {
        self.state.get_count(role).await
    }

    pub async fn set_count(&self, role: Role, desired: usize) -> Result<()> {
        self.state.set_count(role, desired).await
    }

    pub async fn worker_hostnames(&self) -> Option<Vec<String>> {
        self.state.read(|s| s.worker_hostnames()).await
    }
}
