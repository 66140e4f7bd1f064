//! Scriptable in-memory adapter for tests
//!
//! [`RecordingAdapter`] logs every call in the order it started, can be told
//! to fail or stall specific calls, and tracks which resources are alive so
//! tests can assert that nothing leaked.

use crate::error::{CloudError, Result};
use crate::params::{FirewallParams, ManagedClusterParams, NetworkParams, SshKeyParams, VmParams};
use crate::provider::{AuthStatus, ProviderAdapter, VmPlacement};
use crate::state::{
    ClusterKey, ManagedClusterInfo, NetworkInfo, NodeRecord, ProviderKind, Role, SshKeyInfo,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One adapter invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Call {
    NewNetwork,
    DelNetwork,
    NewFirewall(Role),
    DelFirewall(Role),
    NewSshKeyPair,
    DelSshKeyPair,
    NewVm(Role, usize),
    DelVm(Role, usize),
    NewManagedCluster,
    DelManagedCluster,
}

impl Call {
    pub fn is_vm_delete(&self) -> bool {
        matches!(self, Call::DelVm(..))
    }

    pub fn is_firewall_delete(&self) -> bool {
        matches!(self, Call::DelFirewall(_))
    }
}

#[derive(Default)]
pub struct RecordingAdapter {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashSet<Call>>,
    delays: Mutex<HashMap<Call, Duration>>,
    live: Mutex<HashSet<String>>,
    seq: AtomicUsize,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `call` fail with an API error
    pub fn fail_on(&self, call: Call) {
        self.failures.lock().unwrap().insert(call);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Sleep before answering `call`
    pub fn delay_on(&self, call: Call, delay: Duration) {
        self.delays.lock().unwrap().insert(call, delay);
    }

    /// Calls in the order they started
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// Identifiers created and not yet deleted
    pub fn live_resources(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    async fn enter(&self, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call.clone());
        let delay = self.delays.lock().unwrap().get(&call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures.lock().unwrap().contains(&call) {
            return Err(CloudError::ApiError(format!("scripted failure for {:?}", call)));
        }
        Ok(())
    }

    fn create(&self, prefix: &str) -> String {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{}", prefix, n);
        self.live.lock().unwrap().insert(id.clone());
        id
    }

    fn destroy(&self, id: &str) {
        self.live.lock().unwrap().remove(id);
    }
}

/// Slot index encoded in a generated vm hostname
fn index_from_hostname(hostname: &str) -> usize {
    hostname
        .rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl ProviderAdapter for RecordingAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn display_name(&self) -> &str {
        "Recording"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok("recording"))
    }

    async fn new_network(&self, _key: &ClusterKey, params: &NetworkParams) -> Result<NetworkInfo> {
        self.enter(Call::NewNetwork).await?;
        Ok(NetworkInfo {
            id: self.create("net"),
            name: params.name.clone(),
            ..Default::default()
        })
    }

    async fn del_network(&self, _key: &ClusterKey, network: &NetworkInfo) -> Result<()> {
        self.enter(Call::DelNetwork).await?;
        self.destroy(&network.id);
        Ok(())
    }

    async fn new_firewall(
        &self,
        _key: &ClusterKey,
        _network: &NetworkInfo,
        params: &FirewallParams,
    ) -> Result<String> {
        self.enter(Call::NewFirewall(params.role)).await?;
        Ok(self.create(&format!("fw-{}", params.role.short_name())))
    }

    async fn del_firewall(&self, _key: &ClusterKey, role: Role, firewall_id: &str) -> Result<()> {
        self.enter(Call::DelFirewall(role)).await?;
        self.destroy(firewall_id);
        Ok(())
    }

    async fn create_upload_ssh_key_pair(
        &self,
        _key: &ClusterKey,
        params: &SshKeyParams,
    ) -> Result<SshKeyInfo> {
        self.enter(Call::NewSshKeyPair).await?;
        Ok(SshKeyInfo {
            id: self.create("key"),
            name: params.name.clone(),
            user: params.user.clone(),
            private_key: "PRIVATE KEY".to_string(),
        })
    }

    async fn del_ssh_key_pair(&self, _key: &ClusterKey, ssh_key: &SshKeyInfo) -> Result<()> {
        self.enter(Call::DelSshKeyPair).await?;
        self.destroy(&ssh_key.id);
        Ok(())
    }

    async fn new_vm(
        &self,
        _key: &ClusterKey,
        params: &VmParams,
        _placement: &VmPlacement,
    ) -> Result<NodeRecord> {
        self.enter(Call::NewVm(params.role, params.index)).await?;
        let id = self.create("vm");
        let n = self.seq.load(Ordering::SeqCst) % 250 + 1;
        Ok(NodeRecord {
            nic_id: format!("{}-nic", id),
            instance_id: id,
            hostname: params.name.clone(),
            public_ip: format!("192.0.2.{}", n),
            private_ip: format!("10.0.0.{}", n),
            vm_size: params.vm_type.clone(),
        })
    }

    async fn del_vm(&self, _key: &ClusterKey, role: Role, node: &NodeRecord) -> Result<()> {
        self.enter(Call::DelVm(role, index_from_hostname(&node.hostname)))
            .await?;
        self.destroy(&node.instance_id);
        Ok(())
    }

    async fn new_managed_cluster(
        &self,
        _key: &ClusterKey,
        _network: &NetworkInfo,
        params: &ManagedClusterParams,
    ) -> Result<ManagedClusterInfo> {
        self.enter(Call::NewManagedCluster).await?;
        Ok(ManagedClusterInfo {
            id: self.create("mc"),
            name: params.name.clone(),
            node_count: params.node_count,
            node_size: params.node_size.clone(),
            kubernetes_version: params.kubernetes_version.clone(),
        })
    }

    async fn del_managed_cluster(
        &self,
        _key: &ClusterKey,
        cluster: &ManagedClusterInfo,
    ) -> Result<()> {
        self.enter(Call::DelManagedCluster).await?;
        self.destroy(&cluster.id);
        Ok(())
    }
}
