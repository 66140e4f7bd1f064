//! Provisioning plans (dry run)

use crate::cluster::ClusterShape;
use crate::error::{CloudError, Result};
use crate::orchestrator::Topology;
use crate::params::{ManagedClusterParams, names};
use crate::state::{ClusterKey, ClusterState, ClusterType, Role};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of cloud resource an action touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    SshKeyPair,
    Firewall,
    Vm,
    ManagedCluster,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::SshKeyPair => write!(f, "ssh-key"),
            ResourceKind::Firewall => write!(f, "firewall"),
            ResourceKind::Vm => write!(f, "vm"),
            ResourceKind::ManagedCluster => write!(f, "managed-cluster"),
        }
    }
}

/// Type of action to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Delete a resource
    Delete,
    /// No changes needed
    NoOp,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// One planned step against one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action_type: ActionType,
    pub resource: ResourceKind,
    /// Generated resource name
    pub name: String,
    /// Identifier of the existing resource, if any
    pub id: Option<String>,
    pub role: Option<Role>,
    pub index: Option<usize>,
}

impl PlannedAction {
    fn new(action_type: ActionType, resource: ResourceKind, name: String, existing: &str) -> Self {
        Self {
            action_type,
            resource,
            name,
            id: (!existing.is_empty()).then(|| existing.to_string()),
            role: None,
            index: None,
        }
    }

    /// Create unless `existing` already names the resource
    fn ensure(resource: ResourceKind, name: String, existing: &str) -> Self {
        let action_type = if existing.is_empty() {
            ActionType::Create
        } else {
            ActionType::NoOp
        };
        Self::new(action_type, resource, name, existing)
    }

    fn at(mut self, role: Role, index: Option<usize>) -> Self {
        self.role = Some(role);
        self.index = index;
        self
    }
}

/// Plan containing all actions an operation would perform, in order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionPlan {
    pub cluster: ClusterKey,

    /// List of actions to perform
    pub actions: Vec<PlannedAction>,

    /// Whether the plan has any changes
    pub has_changes: bool,
}

impl ProvisionPlan {
    pub fn new(cluster: ClusterKey, actions: Vec<PlannedAction>) -> Self {
        let has_changes = actions.iter().any(|a| a.action_type != ActionType::NoOp);
        Self {
            cluster,
            actions,
            has_changes,
        }
    }

    /// Actions a create (or resume) of `shape` would take given `state`
    pub fn for_create(
        key: &ClusterKey,
        state: Option<&ClusterState>,
        shape: &ClusterShape,
    ) -> Result<Self> {
        let fresh;
        let state = match state {
            Some(state) => state,
            None => {
                fresh = ClusterState::new(key, None);
                &fresh
            }
        };

        let actions = match shape {
            ClusterShape::SelfManaged(topology) => plan_ha_create(state, topology)?,
            ClusterShape::Managed(params) => plan_managed_create(state, params),
        };
        Ok(Self::new(key.clone(), actions))
    }

    /// Deletions a teardown of `state` would perform
    pub fn for_delete(state: &ClusterState) -> Self {
        let cluster = &state.meta.name;
        let mut actions = Vec::new();
        let delete = |resource, name: String, id: &str| {
            PlannedAction::new(ActionType::Delete, resource, name, id)
        };

        if state.meta.cluster_type == ClusterType::Managed {
            if state.managed.is_provisioned() {
                actions.push(delete(
                    ResourceKind::ManagedCluster,
                    state.managed.name.clone(),
                    &state.managed.id,
                ));
            }
        } else {
            for (role, index) in state.vm_slots() {
                if let Some(node) = state.node(role, index).filter(|n| n.is_provisioned()) {
                    actions.push(
                        delete(ResourceKind::Vm, names::vm(cluster, role, index), &node.instance_id)
                            .at(role, (role != Role::LoadBalancer).then_some(index)),
                    );
                }
            }
            for role in [
                Role::DataStore,
                Role::ControlPlane,
                Role::WorkerPlane,
                Role::LoadBalancer,
            ] {
                let id = state.firewalls.get(role);
                if !id.is_empty() {
                    actions.push(
                        delete(ResourceKind::Firewall, names::firewall(cluster, role), id)
                            .at(role, None),
                    );
                }
            }
            if state.ssh_key.is_provisioned() {
                actions.push(delete(
                    ResourceKind::SshKeyPair,
                    names::ssh_key(cluster),
                    &state.ssh_key.id,
                ));
            }
        }

        if state.network.is_provisioned() {
            actions.push(delete(
                ResourceKind::Network,
                names::network(cluster),
                &state.network.id,
            ));
        }

        Self::new(state.key(), actions)
    }

    /// Get actions by type
    pub fn actions_by_type(&self, action_type: ActionType) -> Vec<&PlannedAction> {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .collect()
    }

    /// Summary of the plan
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            delete: self.actions_by_type(ActionType::Delete).len(),
            no_change: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

fn plan_ha_create(state: &ClusterState, topology: &Topology) -> Result<Vec<PlannedAction>> {
    topology.validate()?;
    let cluster = &state.meta.name;
    let mut actions = vec![
        PlannedAction::ensure(ResourceKind::Network, names::network(cluster), &state.network.id),
        PlannedAction::ensure(ResourceKind::SshKeyPair, names::ssh_key(cluster), &state.ssh_key.id),
    ];
    for role in Role::ALL {
        actions.push(
            PlannedAction::ensure(
                ResourceKind::Firewall,
                names::firewall(cluster, role),
                state.firewalls.get(role),
            )
            .at(role, None),
        );
    }

    actions.push(
        PlannedAction::ensure(
            ResourceKind::Vm,
            names::vm(cluster, Role::LoadBalancer, 0),
            &state.load_balancer.instance_id,
        )
        .at(Role::LoadBalancer, None),
    );
    for role in [Role::DataStore, Role::ControlPlane, Role::WorkerPlane] {
        let desired = topology.count(role);
        let existing = state.inventory(role);
        if let Some(inv) = existing
            && let Some(index) = (desired..inv.len()).find(|i| inv.is_provisioned(*i))
        {
            return Err(CloudError::InvalidTopology {
                role,
                reason: format!("slot {} beyond the desired {} nodes still holds a vm", index, desired),
            });
        }
        for index in 0..desired {
            let id = existing
                .and_then(|inv| inv.instance_ids.get(index))
                .map(String::as_str)
                .unwrap_or_default();
            actions.push(
                PlannedAction::ensure(ResourceKind::Vm, names::vm(cluster, role, index), id)
                    .at(role, Some(index)),
            );
        }
    }
    Ok(actions)
}

fn plan_managed_create(state: &ClusterState, params: &ManagedClusterParams) -> Vec<PlannedAction> {
    let cluster = &state.meta.name;
    vec![
        PlannedAction::ensure(ResourceKind::Network, names::network(cluster), &state.network.id),
        PlannedAction::ensure(ResourceKind::ManagedCluster, params.name.clone(), &state.managed.id),
    ]
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to delete, {} unchanged",
            self.create, self.delete, self.no_change
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::NodePool;
    use crate::state::{NodeRecord, ProviderKind, RoleInventory};

    fn key() -> ClusterKey {
        ClusterKey::new(ProviderKind::Local, "local-1", "demo", ClusterType::SelfManaged)
    }

    fn topology(wp: usize) -> ClusterShape {
        let pool = |count| NodePool {
            count,
            vm_type: "small".to_string(),
        };
        ClusterShape::SelfManaged(Topology {
            control_plane: pool(3),
            worker_plane: pool(wp),
            data_store: pool(3),
            load_balancer_vm_type: "small".to_string(),
        })
    }

    fn vm(id: &str) -> NodeRecord {
        NodeRecord {
            instance_id: id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_fresh_plan_creates_everything() {
        let plan = ProvisionPlan::for_create(&key(), None, &topology(2)).unwrap();
        assert!(plan.has_changes);
        // network, key, 4 firewalls, lb + 3 + 3 + 2
        assert_eq!(plan.summary().create, 15);
        assert_eq!(plan.summary().to_string(), "15 to create, 0 to delete, 0 unchanged");
        assert_eq!(plan.actions[0].name, "demo-net");
    }

    #[test]
    fn test_resume_plan_skips_existing() {
        let mut state = ClusterState::new(&key(), None);
        state.network.id = "net-1".to_string();
        state.worker_plane = Some(RoleInventory::with_len(2));
        state.set_node(Role::WorkerPlane, 0, vm("vm-0"));

        let plan = ProvisionPlan::for_create(&key(), Some(&state), &topology(2)).unwrap();
        let summary = plan.summary();
        assert_eq!(summary.no_change, 2);
        assert_eq!(summary.create, 13);

        let wp0 = plan
            .actions
            .iter()
            .find(|a| a.role == Some(Role::WorkerPlane) && a.index == Some(0))
            .unwrap();
        assert_eq!(wp0.action_type, ActionType::NoOp);
        assert_eq!(wp0.id.as_deref(), Some("vm-0"));
    }

    #[test]
    fn test_plan_rejects_shrink_over_live_vm() {
        let mut state = ClusterState::new(&key(), None);
        state.worker_plane = Some(RoleInventory::with_len(3));
        state.set_node(Role::WorkerPlane, 2, vm("vm-2"));

        let err = ProvisionPlan::for_create(&key(), Some(&state), &topology(1)).unwrap_err();
        assert!(matches!(err, CloudError::InvalidTopology { .. }));
    }

    #[test]
    fn test_delete_plan_order() {
        let mut state = ClusterState::new(&key(), None);
        state.network.id = "net-1".to_string();
        state.ssh_key.id = "key-1".to_string();
        state.firewalls.set(Role::ControlPlane, "fw-cp");
        state.firewalls.set(Role::LoadBalancer, "fw-lb");
        state.control_plane = Some(RoleInventory::with_len(3));
        state.set_node(Role::ControlPlane, 1, vm("vm-1"));
        state.load_balancer = vm("vm-lb");

        let plan = ProvisionPlan::for_delete(&state);
        let names: Vec<_> = plan.actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "demo-vm-lb",
                "demo-vm-cp-1",
                "demo-fw-cp",
                "demo-fw-lb",
                "demo-ssh",
                "demo-net"
            ]
        );
        assert_eq!(plan.summary().delete, 6);
    }
}
