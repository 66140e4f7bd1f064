//! Immutable parameter values for provider calls
//!
//! Each provisioning task builds its own value and hands it to the
//! provisioner, so concurrent tasks never share hand-off state.

use crate::error::{CloudError, Result};
use crate::state::Role;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

pub const MAX_NAME_LEN: usize = 50;
pub const DEFAULT_NETWORK_CIDR: &str = "172.31.0.0/16";
const ANY_CIDR: &str = "0.0.0.0/0";

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").expect("name pattern is a valid regex")
});

/// Validate a cluster or resource name
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(CloudError::InvalidName(format!(
            "{} is longer than {} characters",
            name, MAX_NAME_LEN
        )));
    }
    if !NAME_PATTERN.is_match(name) {
        return Err(CloudError::InvalidName(format!(
            "{} must start with a lowercase letter and contain only lowercase letters, digits and '-'",
            name
        )));
    }
    Ok(())
}

/// Generated resource names, all derived from the cluster name
pub mod names {
    use crate::state::Role;

    pub fn network(cluster: &str) -> String {
        format!("{}-net", cluster)
    }

    pub fn ssh_key(cluster: &str) -> String {
        format!("{}-ssh", cluster)
    }

    pub fn firewall(cluster: &str, role: Role) -> String {
        format!("{}-fw-{}", cluster, role.short_name())
    }

    pub fn vm(cluster: &str, role: Role, index: usize) -> String {
        match role {
            Role::LoadBalancer => format!("{}-vm-lb", cluster),
            _ => format!("{}-vm-{}-{}", cluster, role.short_name(), index),
        }
    }

    pub fn managed_cluster(cluster: &str) -> String {
        format!("{}-managed", cluster)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Private => write!(f, "private"),
        }
    }
}

/// Everything an adapter needs to create one VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmParams {
    pub name: String,
    pub role: Role,
    pub vm_type: String,
    pub visibility: Visibility,
    pub index: usize,
}

impl VmParams {
    pub fn builder() -> VmParamsBuilder {
        VmParamsBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct VmParamsBuilder {
    name: Option<String>,
    role: Option<Role>,
    vm_type: Option<String>,
    visibility: Visibility,
    index: usize,
}

impl VmParamsBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn vm_type(mut self, vm_type: impl Into<String>) -> Self {
        self.vm_type = Some(vm_type.into());
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    pub fn build(self) -> Result<VmParams> {
        let name = self
            .name
            .ok_or_else(|| CloudError::InvalidParameter("vm name is required".to_string()))?;
        validate_name(&name)?;

        let role = self
            .role
            .ok_or_else(|| CloudError::InvalidParameter(format!("role is required for {}", name)))?;

        let vm_type = self.vm_type.unwrap_or_default();
        if vm_type.trim().is_empty() {
            return Err(CloudError::InvalidParameter(format!(
                "vm type is required for {}",
                name
            )));
        }

        if role == Role::LoadBalancer && self.index != 0 {
            return Err(CloudError::InvalidParameter(format!(
                "load balancer index must be 0, got {}",
                self.index
            )));
        }

        Ok(VmParams {
            name,
            role,
            vm_type,
            visibility: self.visibility,
            index: self.index,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub protocol: Protocol,
    pub direction: Direction,
    pub cidr: String,
    pub start_port: u16,
    pub end_port: u16,
}

impl FirewallRule {
    fn ingress(name: &str, cidr: &str, start_port: u16, end_port: u16) -> Self {
        Self {
            name: name.to_string(),
            protocol: Protocol::Tcp,
            direction: Direction::Ingress,
            cidr: cidr.to_string(),
            start_port,
            end_port,
        }
    }

    fn egress_all(protocol: Protocol) -> Self {
        let name = match protocol {
            Protocol::Tcp => "all_tcp_outgoing",
            Protocol::Udp => "all_udp_outgoing",
        };
        Self {
            name: name.to_string(),
            protocol,
            direction: Direction::Egress,
            cidr: ANY_CIDR.to_string(),
            start_port: 1,
            end_port: 65535,
        }
    }
}

/// Baseline rules for `role`. `cidr` is the cluster's internal network.
pub fn base_firewall_rules(role: Role, cidr: &str) -> Vec<FirewallRule> {
    let mut rules = match role {
        Role::ControlPlane => vec![
            FirewallRule::ingress("kubernetes_api_server", cidr, 6443, 6443),
            FirewallRule::ingress("kubelet_api", cidr, 10250, 10250),
            FirewallRule::ingress("kubernetes_nodeport", cidr, 30000, 35000),
        ],
        Role::WorkerPlane => vec![FirewallRule::ingress("kubelet_api", cidr, 10250, 10250)],
        Role::LoadBalancer => vec![
            FirewallRule::ingress("kubernetes_api_server", ANY_CIDR, 6443, 6443),
            FirewallRule::ingress("kubernetes_nodeport", ANY_CIDR, 30000, 35000),
        ],
        Role::DataStore => vec![FirewallRule::ingress("etcd", cidr, 2379, 2380)],
    };
    rules.push(FirewallRule::ingress("ssh", ANY_CIDR, 22, 22));
    rules.push(FirewallRule::egress_all(Protocol::Udp));
    rules.push(FirewallRule::egress_all(Protocol::Tcp));
    rules
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallParams {
    pub name: String,
    pub role: Role,
    pub rules: Vec<FirewallRule>,
}

impl FirewallParams {
    /// Named `<cluster>-fw-<role>` with the baseline rule set
    pub fn for_role(cluster: &str, role: Role, cidr: &str) -> Self {
        Self {
            name: names::firewall(cluster, role),
            role,
            rules: base_firewall_rules(role, cidr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParams {
    pub name: String,
    pub cidr: String,
}

impl NetworkParams {
    pub fn for_cluster(cluster: &str) -> Self {
        Self {
            name: names::network(cluster),
            cidr: DEFAULT_NETWORK_CIDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKeyParams {
    pub name: String,
    pub user: String,
}

impl SshKeyParams {
    pub fn for_cluster(cluster: &str, user: impl Into<String>) -> Self {
        Self {
            name: names::ssh_key(cluster),
            user: user.into(),
        }
    }
}

/// Desired shape of a provider managed Kubernetes cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedClusterParams {
    pub name: String,
    pub node_count: usize,
    pub node_size: String,
    #[serde(default)]
    pub kubernetes_version: String,
}

impl ManagedClusterParams {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        if self.node_count == 0 {
            return Err(CloudError::InvalidParameter(
                "managed cluster needs at least one node".to_string(),
            ));
        }
        if self.node_size.trim().is_empty() {
            return Err(CloudError::InvalidParameter(
                "managed cluster node size is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        for ok in ["a", "demo", "demo-1", "prod-eu-west-2"] {
            assert!(validate_name(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "1demo", "Demo", "demo-", "demo_1", "-demo", "demo.net"] {
            assert!(validate_name(bad).is_err(), "{}", bad);
        }
        assert!(validate_name(&"a".repeat(50)).is_ok());
        assert!(validate_name(&"a".repeat(51)).is_err());
    }

    #[test]
    fn test_generated_names() {
        assert_eq!(names::network("demo"), "demo-net");
        assert_eq!(names::ssh_key("demo"), "demo-ssh");
        assert_eq!(names::firewall("demo", Role::DataStore), "demo-fw-db");
        assert_eq!(names::vm("demo", Role::LoadBalancer, 0), "demo-vm-lb");
        assert_eq!(names::vm("demo", Role::WorkerPlane, 4), "demo-vm-wp-4");
    }

    #[test]
    fn test_vm_params_builder() {
        let params = VmParams::builder()
            .name("demo-vm-cp-2")
            .role(Role::ControlPlane)
            .vm_type("small")
            .index(2)
            .build()
            .unwrap();
        assert_eq!(params.visibility, Visibility::Public);
        assert_eq!(params.index, 2);

        let missing_type = VmParams::builder()
            .name("demo-vm-cp-2")
            .role(Role::ControlPlane)
            .build();
        assert!(matches!(missing_type, Err(CloudError::InvalidParameter(_))));

        let bad_name = VmParams::builder()
            .name("Demo")
            .role(Role::ControlPlane)
            .vm_type("small")
            .build();
        assert!(matches!(bad_name, Err(CloudError::InvalidName(_))));

        let lb = VmParams::builder()
            .name("demo-vm-lb")
            .role(Role::LoadBalancer)
            .vm_type("small")
            .index(1)
            .build();
        assert!(lb.is_err());
    }

    #[test]
    fn test_base_firewall_rules() {
        let cp = base_firewall_rules(Role::ControlPlane, "10.0.0.0/16");
        assert!(cp.iter().any(|r| r.start_port == 6443 && r.cidr == "10.0.0.0/16"));
        assert!(cp.iter().any(|r| r.name == "ssh"));

        let lb = FirewallParams::for_role("demo", Role::LoadBalancer, "10.0.0.0/16");
        assert_eq!(lb.name, "demo-fw-lb");
        assert!(lb.rules.iter().any(|r| r.start_port == 6443 && r.cidr == ANY_CIDR));

        let db = base_firewall_rules(Role::DataStore, "10.0.0.0/16");
        assert!(db.iter().any(|r| r.start_port == 2379 && r.end_port == 2380));
    }

    #[test]
    fn test_managed_params_validation() {
        let mut params = ManagedClusterParams {
            name: "demo".to_string(),
            node_count: 3,
            node_size: "medium".to_string(),
            kubernetes_version: String::new(),
        };
        assert!(params.validate().is_ok());
        params.node_count = 0;
        assert!(params.validate().is_err());
    }
}
