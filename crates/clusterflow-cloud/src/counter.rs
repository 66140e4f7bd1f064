//! Resource counter negotiation
//!
//! Node counts per role live in the state document as the length of that
//! role's inventory. Changing a count validates the topology rules, resizes
//! the inventory in place and persists it.

use crate::document::SharedState;
use crate::error::{CloudError, Result};
use crate::state::{Role, RoleInventory};

/// Check `desired` against the topology rules of `role`
pub fn validate_count(role: Role, desired: usize) -> Result<()> {
    match role {
        Role::ControlPlane | Role::DataStore => {
            if desired < 3 {
                return Err(CloudError::InvalidTopology {
                    role,
                    reason: format!("at least 3 nodes are required, got {}", desired),
                });
            }
            if desired % 2 == 0 {
                return Err(CloudError::InvalidTopology {
                    role,
                    reason: format!("an odd number of nodes is required for quorum, got {}", desired),
                });
            }
            Ok(())
        }
        Role::WorkerPlane => Ok(()),
        Role::LoadBalancer if desired == 1 => Ok(()),
        Role::LoadBalancer => Err(CloudError::InvalidTopology {
            role,
            reason: format!("exactly one load balancer is supported, got {}", desired),
        }),
    }
}

impl RoleInventory {
    /// Grow with empty rows or shrink from the tail.
    ///
    /// Shrinking over a row that still names a live instance is refused and
    /// leaves the inventory untouched.
    pub fn resize(&mut self, role: Role, desired: usize) -> Result<()> {
        let current = self.len();
        if desired < current
            && let Some(index) = (desired..current).find(|i| self.is_provisioned(*i))
        {
            return Err(CloudError::InvalidTopology {
                role,
                reason: format!(
                    "cannot shrink to {} while slot {} still holds {}",
                    desired, index, self.instance_ids[index]
                ),
            });
        }

        for seq in [
            &mut self.instance_ids,
            &mut self.hostnames,
            &mut self.public_ips,
            &mut self.private_ips,
            &mut self.vm_sizes,
            &mut self.nic_ids,
        ] {
            seq.resize(desired, String::new());
        }
        Ok(())
    }
}

impl SharedState {
    /// Current number of slots for `role`
    pub async fn get_count(&self, role: Role) -> Result<usize> {
        if role == Role::LoadBalancer {
            return Ok(1);
        }
        self.read(|state| {
            state
                .inventory(role)
                .map(RoleInventory::len)
                .ok_or(CloudError::UninitializedRole(role))
        })
        .await
    }

    /// Resize `role` to `desired` slots and persist the document.
    ///
    /// Setting the current length again returns without saving.
    pub async fn set_count(&self, role: Role, desired: usize) -> Result<()> {
        validate_count(role, desired)?;
        if role == Role::LoadBalancer {
            return Ok(());
        }

        let mut state = self.lock().await;
        let Some(slot) = state.inventory_slot_mut(role) else {
            return Ok(());
        };

        let grew = match slot {
            Some(inventory) if inventory.len() == desired => return Ok(()),
            Some(inventory) => {
                let from = inventory.len();
                inventory.resize(role, desired)?;
                tracing::info!(role = %role, from, to = desired, "Resized inventory");
                desired > from
            }
            None => {
                *slot = Some(RoleInventory::with_len(desired));
                tracing::info!(role = %role, to = desired, "Initialized inventory");
                desired > 0
            }
        };

        // new slots are empty, so the cluster is no longer complete
        if grew {
            state.completed = false;
        }
        state.touch();
        self.store().save(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ClusterKey, ClusterState, ClusterType, NodeRecord, ProviderKind};
    use crate::store::MemoryStateStore;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn shared() -> (Arc<MemoryStateStore>, SharedState) {
        let store = Arc::new(MemoryStateStore::new());
        let key = ClusterKey::new(ProviderKind::Local, "local-1", "demo", ClusterType::SelfManaged);
        let shared = SharedState::new(ClusterState::new(&key, None), store.clone());
        (store, shared)
    }

    #[test]
    fn test_quorum_rules() {
        for n in [0, 1, 2, 4, 6] {
            assert!(validate_count(Role::ControlPlane, n).is_err(), "cp {}", n);
            assert!(validate_count(Role::DataStore, n).is_err(), "db {}", n);
        }
        for n in [3, 5, 7] {
            assert!(validate_count(Role::ControlPlane, n).is_ok());
            assert!(validate_count(Role::DataStore, n).is_ok());
        }
        assert!(validate_count(Role::WorkerPlane, 0).is_ok());
        assert!(validate_count(Role::LoadBalancer, 1).is_ok());
        assert!(validate_count(Role::LoadBalancer, 2).is_err());
    }

    #[tokio::test]
    async fn test_uninitialized_role() {
        let (_, shared) = shared();
        let err = shared.get_count(Role::WorkerPlane).await.unwrap_err();
        assert!(matches!(err, CloudError::UninitializedRole(Role::WorkerPlane)));
        assert_eq!(shared.get_count(Role::LoadBalancer).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zero_workers_is_distinct_from_uninitialized() {
        let (store, shared) = shared();
        shared.set_count(Role::WorkerPlane, 0).await.unwrap();
        assert_eq!(shared.get_count(Role::WorkerPlane).await.unwrap(), 0);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_counter_keeps_sequences_in_step() {
        let (store, shared) = shared();
        shared.set_count(Role::ControlPlane, 3).await.unwrap();
        shared
            .mutate(|s| {
                s.set_node(
                    Role::ControlPlane,
                    1,
                    NodeRecord {
                        instance_id: "vm-1".to_string(),
                        hostname: "demo-vm-cp-1".to_string(),
                        ..Default::default()
                    },
                )
            })
            .await
            .unwrap();

        shared.set_count(Role::ControlPlane, 7).await.unwrap();
        let inv = shared
            .read(|s| s.inventory(Role::ControlPlane).cloned())
            .await
            .unwrap();
        assert_eq!(inv.len(), 7);
        assert!(inv.is_consistent());
        assert_eq!(inv.hostnames[1], "demo-vm-cp-1");

        shared.set_count(Role::ControlPlane, 3).await.unwrap();
        assert_eq!(shared.get_count(Role::ControlPlane).await.unwrap(), 3);

        // equal length neither resizes nor saves
        let saves = store.save_count();
        shared.set_count(Role::ControlPlane, 3).await.unwrap();
        assert_eq!(store.save_count(), saves);
    }

    #[tokio::test]
    async fn test_invalid_count_leaves_state_untouched() {
        let (store, shared) = shared();
        shared.set_count(Role::DataStore, 3).await.unwrap();

        let err = shared.set_count(Role::DataStore, 4).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidTopology { role: Role::DataStore, .. }));
        assert_eq!(shared.get_count(Role::DataStore).await.unwrap(), 3);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_growing_completed_document_clears_completed() {
        let (store, shared) = shared();
        assert_ok!(shared.set_count(Role::WorkerPlane, 1).await);
        shared
            .mutate(|s| {
                s.set_node(
                    Role::WorkerPlane,
                    0,
                    NodeRecord {
                        instance_id: "vm-0".to_string(),
                        ..Default::default()
                    },
                );
                s.completed = true;
            })
            .await
            .unwrap();

        assert_ok!(shared.set_count(Role::WorkerPlane, 3).await);
        let persisted = store.get(shared.key()).unwrap();
        assert!(!persisted.completed);
        assert_eq!(persisted.worker_plane.unwrap().instance_ids, vec!["vm-0", "", ""]);
    }

    #[tokio::test]
    async fn test_shrinking_empty_tail_keeps_completed() {
        let (store, shared) = shared();
        assert_ok!(shared.set_count(Role::WorkerPlane, 2).await);
        shared.mutate(|s| s.completed = true).await.unwrap();

        assert_ok!(shared.set_count(Role::WorkerPlane, 0).await);
        assert!(store.get(shared.key()).unwrap().completed);
    }

    #[tokio::test]
    async fn test_shrink_over_live_slot_is_refused() {
        let (_, shared) = shared();
        shared.set_count(Role::WorkerPlane, 3).await.unwrap();
        shared
            .mutate(|s| {
                s.set_node(
                    Role::WorkerPlane,
                    2,
                    NodeRecord {
                        instance_id: "vm-2".to_string(),
                        ..Default::default()
                    },
                )
            })
            .await
            .unwrap();

        let err = shared.set_count(Role::WorkerPlane, 1).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidTopology { .. }));
        assert_eq!(shared.get_count(Role::WorkerPlane).await.unwrap(), 3);
    }
}
