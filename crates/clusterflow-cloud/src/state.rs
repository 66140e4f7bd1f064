//! Persisted cluster state
//!
//! One [`ClusterState`] document exists per `(provider, region, name,
//! cluster type)`. Every slot in it is either empty (the resource does not
//! exist) or holds the identifier of a live cloud resource. That emptiness is
//! the only signal the provisioning verbs use to decide whether to act.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::CloudError;

pub const STATE_VERSION: u32 = 1;

/// Functional class of a node in the cluster topology.
///
/// The declaration order is the fan-in priority order used when several
/// roles report errors from the same batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    LoadBalancer,
    DataStore,
    ControlPlane,
    WorkerPlane,
}

impl Role {
    /// All roles in fan-in priority order.
    pub const ALL: [Role; 4] = [
        Role::LoadBalancer,
        Role::DataStore,
        Role::ControlPlane,
        Role::WorkerPlane,
    ];

    /// Roles backed by a resizable inventory.
    pub const INVENTORIED: [Role; 3] = [Role::ControlPlane, Role::WorkerPlane, Role::DataStore];

    /// Short tag used in generated resource names.
    pub fn short_name(self) -> &'static str {
        match self {
            Role::LoadBalancer => "lb",
            Role::DataStore => "db",
            Role::ControlPlane => "cp",
            Role::WorkerPlane => "wp",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::LoadBalancer => write!(f, "load-balancer"),
            Role::DataStore => write!(f, "data-store"),
            Role::ControlPlane => write!(f, "control-plane"),
            Role::WorkerPlane => write!(f, "worker-plane"),
        }
    }
}

/// Cloud backend a cluster lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Aws,
    Azure,
    Local,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Aws => write!(f, "aws"),
            ProviderKind::Azure => write!(f, "azure"),
            ProviderKind::Local => write!(f, "local"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aws" => Ok(ProviderKind::Aws),
            "azure" => Ok(ProviderKind::Azure),
            "local" => Ok(ProviderKind::Local),
            other => Err(CloudError::ProviderNotFound(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterType {
    Managed,
    SelfManaged,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterType::Managed => write!(f, "managed"),
            ClusterType::SelfManaged => write!(f, "self-managed"),
        }
    }
}

impl FromStr for ClusterType {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "managed" => Ok(ClusterType::Managed),
            "self-managed" | "selfmanaged" | "ha" => Ok(ClusterType::SelfManaged),
            other => Err(CloudError::InvalidParameter(format!(
                "unknown cluster type: {}",
                other
            ))),
        }
    }
}

/// Identity of a persisted cluster record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterKey {
    pub provider: ProviderKind,
    pub region: String,
    pub name: String,
    pub cluster_type: ClusterType,
}

impl ClusterKey {
    pub fn new(
        provider: ProviderKind,
        region: impl Into<String>,
        name: impl Into<String>,
        cluster_type: ClusterType,
    ) -> Self {
        Self {
            provider,
            region: region.into(),
            name: name.into(),
            cluster_type,
        }
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}@{}",
            self.provider, self.cluster_type, self.name, self.region
        )
    }
}

/// Lifecycle phase of a cluster record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Infrastructure is being provisioned (or a previous attempt is resumable)
    Creating,
    /// Infrastructure is being torn down
    Deleting,
    /// Infrastructure is complete, Kubernetes bootstrap is pending
    Configuring,
    /// Cluster is usable
    Ready,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Creating => write!(f, "creating"),
            LifecyclePhase::Deleting => write!(f, "deleting"),
            LifecyclePhase::Configuring => write!(f, "configuring"),
            LifecyclePhase::Ready => write!(f, "ready"),
        }
    }
}

/// Operation a caller intends to run against a cluster record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Delete,
    Get,
    Scale,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Delete => write!(f, "delete"),
            Operation::Get => write!(f, "get"),
            Operation::Scale => write!(f, "scale"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMeta {
    pub name: String,
    pub region: String,
    pub provider: ProviderKind,
    pub cluster_type: ClusterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub phase: LifecyclePhase,
}

/// Virtual network and its satellites. Provider specific extras are opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    #[serde(default)]
    pub subnet_names: Vec<String>,
    #[serde(default)]
    pub gateway_id: String,
    #[serde(default)]
    pub route_table_id: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl NetworkInfo {
    pub fn is_provisioned(&self) -> bool {
        !self.id.is_empty()
    }
}

/// One VM row. An empty `instance_id` means the VM does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub instance_id: String,
    pub hostname: String,
    pub public_ip: String,
    pub private_ip: String,
    pub vm_size: String,
    pub nic_id: String,
}

impl NodeRecord {
    pub fn is_provisioned(&self) -> bool {
        !self.instance_id.is_empty()
    }
}

/// Parallel per-role sequences, all indexed by node position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInventory {
    pub instance_ids: Vec<String>,
    pub hostnames: Vec<String>,
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
    pub vm_sizes: Vec<String>,
    pub nic_ids: Vec<String>,
}

impl RoleInventory {
    pub fn with_len(len: usize) -> Self {
        Self {
            instance_ids: vec![String::new(); len],
            hostnames: vec![String::new(); len],
            public_ips: vec![String::new(); len],
            private_ips: vec![String::new(); len],
            vm_sizes: vec![String::new(); len],
            nic_ids: vec![String::new(); len],
        }
    }

    pub fn len(&self) -> usize {
        self.instance_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_ids.is_empty()
    }

    /// Whether every parallel sequence has the same length
    pub fn is_consistent(&self) -> bool {
        let n = self.len();
        [
            &self.hostnames,
            &self.public_ips,
            &self.private_ips,
            &self.vm_sizes,
            &self.nic_ids,
        ]
        .iter()
        .all(|seq| seq.len() == n)
    }

    pub fn get(&self, index: usize) -> Option<NodeRecord> {
        if index >= self.len() {
            return None;
        }
        Some(NodeRecord {
            instance_id: self.instance_ids[index].clone(),
            hostname: self.hostnames[index].clone(),
            public_ip: self.public_ips[index].clone(),
            private_ip: self.private_ips[index].clone(),
            vm_size: self.vm_sizes[index].clone(),
            nic_id: self.nic_ids[index].clone(),
        })
    }

    /// Overwrite one row. Returns `false` when `index` is out of range.
    pub fn set(&mut self, index: usize, record: NodeRecord) -> bool {
        if index >= self.len() {
            return false;
        }
        self.instance_ids[index] = record.instance_id;
        self.hostnames[index] = record.hostname;
        self.public_ips[index] = record.public_ip;
        self.private_ips[index] = record.private_ip;
        self.vm_sizes[index] = record.vm_size;
        self.nic_ids[index] = record.nic_id;
        true
    }

    pub fn is_provisioned(&self, index: usize) -> bool {
        self.instance_ids
            .get(index)
            .is_some_and(|id| !id.is_empty())
    }

    pub fn provisioned_count(&self) -> usize {
        self.instance_ids.iter().filter(|id| !id.is_empty()).count()
    }

    pub fn all_provisioned(&self) -> bool {
        self.instance_ids.iter().all(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKeyInfo {
    pub id: String,
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub private_key: String,
}

impl SshKeyInfo {
    pub fn is_provisioned(&self) -> bool {
        !self.id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallIds {
    pub load_balancer: String,
    pub data_store: String,
    pub control_plane: String,
    pub worker_plane: String,
}

impl FirewallIds {
    pub fn get(&self, role: Role) -> &str {
        match role {
            Role::LoadBalancer => &self.load_balancer,
            Role::DataStore => &self.data_store,
            Role::ControlPlane => &self.control_plane,
            Role::WorkerPlane => &self.worker_plane,
        }
    }

    pub fn set(&mut self, role: Role, id: impl Into<String>) {
        let slot = match role {
            Role::LoadBalancer => &mut self.load_balancer,
            Role::DataStore => &mut self.data_store,
            Role::ControlPlane => &mut self.control_plane,
            Role::WorkerPlane => &mut self.worker_plane,
        };
        *slot = id.into();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedClusterInfo {
    pub id: String,
    pub name: String,
    pub node_count: usize,
    pub node_size: String,
    #[serde(default)]
    pub kubernetes_version: String,
}

impl ManagedClusterInfo {
    pub fn is_provisioned(&self) -> bool {
        !self.id.is_empty()
    }
}

/// The persisted provisioning document for one cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    pub meta: ClusterMeta,

    #[serde(default)]
    pub network: NetworkInfo,

    pub control_plane: Option<RoleInventory>,
    pub worker_plane: Option<RoleInventory>,
    pub data_store: Option<RoleInventory>,

    #[serde(default)]
    pub load_balancer: NodeRecord,

    #[serde(default)]
    pub ssh_key: SshKeyInfo,

    #[serde(default)]
    pub firewalls: FirewallIds,

    #[serde(default)]
    pub managed: ManagedClusterInfo,

    /// True only once every resource of the topology exists
    pub completed: bool,
}

impl ClusterState {
    /// Fresh document for a cluster that has never been provisioned
    pub fn new(key: &ClusterKey, owner: Option<String>) -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            meta: ClusterMeta {
                name: key.name.clone(),
                region: key.region.clone(),
                provider: key.provider,
                cluster_type: key.cluster_type,
                owner,
                phase: LifecyclePhase::Creating,
            },
            network: NetworkInfo::default(),
            control_plane: None,
            worker_plane: None,
            data_store: None,
            load_balancer: NodeRecord::default(),
            ssh_key: SshKeyInfo::default(),
            firewalls: FirewallIds::default(),
            managed: ManagedClusterInfo::default(),
            completed: false,
        }
    }

    pub fn key(&self) -> ClusterKey {
        ClusterKey {
            provider: self.meta.provider,
            region: self.meta.region.clone(),
            name: self.meta.name.clone(),
            cluster_type: self.meta.cluster_type,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Inventory of a resizable role. Always `None` for the load balancer.
    pub fn inventory(&self, role: Role) -> Option<&RoleInventory> {
        match role {
            Role::ControlPlane => self.control_plane.as_ref(),
            Role::WorkerPlane => self.worker_plane.as_ref(),
            Role::DataStore => self.data_store.as_ref(),
            Role::LoadBalancer => None,
        }
    }

    pub(crate) fn inventory_slot_mut(&mut self, role: Role) -> Option<&mut Option<RoleInventory>> {
        match role {
            Role::ControlPlane => Some(&mut self.control_plane),
            Role::WorkerPlane => Some(&mut self.worker_plane),
            Role::DataStore => Some(&mut self.data_store),
            Role::LoadBalancer => None,
        }
    }

    /// Row at `(role, index)`, if that slot exists
    pub fn node(&self, role: Role, index: usize) -> Option<NodeRecord> {
        match role {
            Role::LoadBalancer if index == 0 => Some(self.load_balancer.clone()),
            Role::LoadBalancer => None,
            _ => self.inventory(role).and_then(|inv| inv.get(index)),
        }
    }

    /// Overwrite the row at `(role, index)`. Returns `false` for a missing slot.
    pub fn set_node(&mut self, role: Role, index: usize, record: NodeRecord) -> bool {
        match role {
            Role::LoadBalancer if index == 0 => {
                self.load_balancer = record;
                true
            }
            Role::LoadBalancer => false,
            _ => match self.inventory_slot_mut(role) {
                Some(Some(inv)) => inv.set(index, record),
                _ => false,
            },
        }
    }

    /// Whether every resource of this cluster's topology has an identifier
    pub fn is_fully_provisioned(&self) -> bool {
        if !self.network.is_provisioned() {
            return false;
        }
        match self.meta.cluster_type {
            ClusterType::Managed => self.managed.is_provisioned(),
            ClusterType::SelfManaged => {
                self.ssh_key.is_provisioned()
                    && Role::ALL
                        .iter()
                        .all(|role| !self.firewalls.get(*role).is_empty())
                    && self.load_balancer.is_provisioned()
                    && Role::INVENTORIED.iter().all(|role| {
                        self.inventory(*role)
                            .is_some_and(|inv| inv.all_provisioned())
                    })
            }
        }
    }

    /// Every VM slot: the load balancer, then each inventoried role in
    /// fan-in order
    pub fn vm_slots(&self) -> Vec<(Role, usize)> {
        let mut slots = vec![(Role::LoadBalancer, 0)];
        for role in [Role::DataStore, Role::ControlPlane, Role::WorkerPlane] {
            if let Some(inv) = self.inventory(role) {
                slots.extend((0..inv.len()).map(|i| (role, i)));
            }
        }
        slots
    }

    /// Worker hostnames in index order
    pub fn worker_hostnames(&self) -> Option<Vec<String>> {
        self.worker_plane.as_ref().map(|inv| inv.hostnames.clone())
    }

    /// Data handed to the Kubernetes bootstrap collaborator
    pub fn resource_snapshot(&self) -> ClusterResourceSnapshot {
        let ips = |role: Role, public: bool| -> Vec<String> {
            self.inventory(role)
                .map(|inv| {
                    if public {
                        inv.public_ips.clone()
                    } else {
                        inv.private_ips.clone()
                    }
                })
                .unwrap_or_default()
        };

        ClusterResourceSnapshot {
            ssh_user: self.ssh_key.user.clone(),
            ssh_private_key: self.ssh_key.private_key.clone(),
            ipv4_control_planes: ips(Role::ControlPlane, true),
            ipv4_worker_planes: ips(Role::WorkerPlane, true),
            ipv4_data_stores: ips(Role::DataStore, true),
            ipv4_load_balancer: self.load_balancer.public_ip.clone(),
            private_ipv4_control_planes: ips(Role::ControlPlane, false),
            private_ipv4_worker_planes: ips(Role::WorkerPlane, false),
            private_ipv4_data_stores: ips(Role::DataStore, false),
            private_ipv4_load_balancer: self.load_balancer.private_ip.clone(),
            worker_hostnames: self.worker_hostnames().unwrap_or_default(),
            cluster_name: self.meta.name.clone(),
            region: self.meta.region.clone(),
            cluster_type: self.meta.cluster_type,
            provider: self.meta.provider,
        }
    }
}

/// Read-only view of a provisioned cluster, shipped to the bootstrap layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResourceSnapshot {
    pub ssh_user: String,
    pub ssh_private_key: String,
    pub ipv4_control_planes: Vec<String>,
    pub ipv4_worker_planes: Vec<String>,
    pub ipv4_data_stores: Vec<String>,
    pub ipv4_load_balancer: String,
    pub private_ipv4_control_planes: Vec<String>,
    pub private_ipv4_worker_planes: Vec<String>,
    pub private_ipv4_data_stores: Vec<String>,
    pub private_ipv4_load_balancer: String,
    pub worker_hostnames: Vec<String>,
    pub cluster_name: String,
    pub region: String,
    pub cluster_type: ClusterType,
    pub provider: ProviderKind,
}
