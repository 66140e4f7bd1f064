//! Provider adapter trait definition

use crate::error::Result;
use crate::params::{
    FirewallParams, ManagedClusterParams, NetworkParams, SshKeyParams, VmParams,
};
use crate::state::{
    ClusterKey, ManagedClusterInfo, NetworkInfo, NodeRecord, ProviderKind, Role, SshKeyInfo,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Stateless resource verbs for one cloud backend
///
/// Adapters never read or write cluster state. They receive every input they
/// need as arguments and return the identifiers of what they created; the
/// provisioner decides whether a call is needed at all and records the
/// result.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Backend this adapter talks to
    fn kind(&self) -> ProviderKind;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    async fn new_network(&self, key: &ClusterKey, params: &NetworkParams) -> Result<NetworkInfo>;

    async fn del_network(&self, key: &ClusterKey, network: &NetworkInfo) -> Result<()>;

    /// Create a security group for one role and return its id
    async fn new_firewall(
        &self,
        key: &ClusterKey,
        network: &NetworkInfo,
        params: &FirewallParams,
    ) -> Result<String>;

    async fn del_firewall(&self, key: &ClusterKey, role: Role, firewall_id: &str) -> Result<()>;

    /// Generate a key pair, register the public half and return both
    async fn create_upload_ssh_key_pair(
        &self,
        key: &ClusterKey,
        params: &SshKeyParams,
    ) -> Result<SshKeyInfo>;

    async fn del_ssh_key_pair(&self, key: &ClusterKey, ssh_key: &SshKeyInfo) -> Result<()>;

    async fn new_vm(
        &self,
        key: &ClusterKey,
        params: &VmParams,
        placement: &VmPlacement,
    ) -> Result<NodeRecord>;

    async fn del_vm(&self, key: &ClusterKey, role: Role, node: &NodeRecord) -> Result<()>;

    async fn new_managed_cluster(
        &self,
        key: &ClusterKey,
        network: &NetworkInfo,
        params: &ManagedClusterParams,
    ) -> Result<ManagedClusterInfo>;

    async fn del_managed_cluster(
        &self,
        key: &ClusterKey,
        cluster: &ManagedClusterInfo,
    ) -> Result<()>;
}

/// Where a new VM is attached: network, role firewall and login key
#[derive(Debug, Clone, PartialEq)]
pub struct VmPlacement {
    pub network: NetworkInfo,
    pub firewall_id: String,
    pub ssh_key_name: String,
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}
