//! Worker scale controller

use crate::confirm::Confirmation;
use crate::error::{CloudError, Result};
use crate::orchestrator::{EngineStatus, Orchestrator};
use crate::state::{ClusterResourceSnapshot, Role};

/// Result of growing the worker plane
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleUp {
    pub snapshot: ClusterResourceSnapshot,
    /// Index of the first worker created by this call. Equals the worker
    /// count when nothing was added.
    pub first_new_index: usize,
}

/// Result of shrinking the worker plane
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleDown {
    /// Operator said no, nothing changed
    Declined,
    Removed {
        /// Hostnames of the deleted workers in index order
        hostnames: Vec<String>,
        snapshot: ClusterResourceSnapshot,
    },
}

impl Orchestrator {
    /// Grow the worker plane to `desired` nodes of `vm_type`
    pub async fn add_worker_nodes(&self, desired: usize, vm_type: &str) -> Result<ScaleUp> {
        let current = self.provisioner().get_count(Role::WorkerPlane).await?;
        if desired < current {
            return Err(CloudError::InvalidTopology {
                role: Role::WorkerPlane,
                reason: format!(
                    "cannot add workers: desired {} is below current {}",
                    desired, current
                ),
            });
        }
        if desired == current {
            tracing::info!("Worker plane already has {} nodes", current);
            return Ok(ScaleUp {
                snapshot: self.state().resource_snapshot().await,
                first_new_index: current,
            });
        }

        self.set_status(EngineStatus::Provisioning);
        match self.grow_workers(current, desired, vm_type).await {
            Ok(snapshot) => {
                self.set_status(EngineStatus::Completed);
                Ok(ScaleUp {
                    snapshot,
                    first_new_index: current,
                })
            }
            Err(e) => {
                self.set_status(EngineStatus::Failed);
                Err(e)
            }
        }
    }

    async fn grow_workers(
        &self,
        current: usize,
        desired: usize,
        vm_type: &str,
    ) -> Result<ClusterResourceSnapshot> {
        self.state().mutate(|s| s.completed = false).await?;
        self.provisioner().set_count(Role::WorkerPlane, desired).await?;

        let slots = (current..desired).map(|i| (Role::WorkerPlane, i)).collect();
        self.create_vms(slots, |_| vm_type.to_string()).await?;
        self.mark_completed().await
    }

    /// Undo a partially applied scale-up: drop the workers at
    /// `[first_new_index, ..)` and shrink back.
    pub async fn revert_worker_growth(&self, first_new_index: usize) -> Result<()> {
        self.set_status(EngineStatus::RollingBack);
        match self.shrink_workers(first_new_index).await {
            Ok(_) => {
                self.set_status(EngineStatus::RolledBack);
                Ok(())
            }
            Err(e) => {
                self.set_status(EngineStatus::PartiallyRolledBack);
                Err(e)
            }
        }
    }

    /// Shrink the worker plane to `desired` nodes after asking `confirmation`
    pub async fn remove_worker_nodes(
        &self,
        desired: usize,
        confirmation: &dyn Confirmation,
    ) -> Result<ScaleDown> {
        let current = self.provisioner().get_count(Role::WorkerPlane).await?;
        if desired > current {
            return Err(CloudError::InvalidTopology {
                role: Role::WorkerPlane,
                reason: format!(
                    "cannot remove workers: desired {} is above current {}",
                    desired, current
                ),
            });
        }
        if desired == current {
            tracing::info!("Worker plane already has {} nodes", current);
            return Ok(ScaleDown::Removed {
                hostnames: Vec::new(),
                snapshot: self.state().resource_snapshot().await,
            });
        }

        let hostnames: Vec<String> = self
            .provisioner()
            .worker_hostnames()
            .await
            .unwrap_or_default()
            .into_iter()
            .skip(desired)
            .take(current - desired)
            .collect();

        let prompt = format!(
            "Delete {} worker node(s): {}?",
            hostnames.len(),
            hostnames.join(", ")
        );
        if !confirmation.confirm(&prompt) {
            tracing::info!("Worker removal declined");
            return Ok(ScaleDown::Declined);
        }

        self.set_status(EngineStatus::Deprovisioning);
        match self.shrink_workers(desired).await {
            Ok(snapshot) => {
                self.set_status(EngineStatus::Deprovisioned);
                Ok(ScaleDown::Removed {
                    hostnames,
                    snapshot,
                })
            }
            Err(e) => {
                self.set_status(EngineStatus::Failed);
                Err(e)
            }
        }
    }

    async fn shrink_workers(&self, desired: usize) -> Result<ClusterResourceSnapshot> {
        let current = self.provisioner().get_count(Role::WorkerPlane).await?;
        self.state().mutate(|s| s.completed = false).await?;

        let slots = (desired..current).map(|i| (Role::WorkerPlane, i)).collect();
        self.delete_vms(slots).await?;
        self.provisioner().set_count(Role::WorkerPlane, desired).await?;
        self.mark_completed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::{AutoConfirm, Decline};
    use crate::document::SharedState;
    use crate::orchestrator::{NodePool, OrchestratorSettings, Topology};
    use crate::state::{ClusterKey, ClusterState, ClusterType, ProviderKind};
    use crate::store::MemoryStateStore;
    use crate::testing::{Call, RecordingAdapter};
    use std::sync::Arc;
    use std::time::Duration;

    async fn cluster_with_workers(workers: usize) -> (Arc<RecordingAdapter>, Orchestrator) {
        let adapter = Arc::new(RecordingAdapter::new());
        let store = Arc::new(MemoryStateStore::new());
        let key = ClusterKey::new(ProviderKind::Local, "local-1", "demo", ClusterType::SelfManaged);
        let state = Arc::new(SharedState::new(ClusterState::new(&key, None), store));
        let settings = OrchestratorSettings {
            cooldown: Duration::ZERO,
            ..Default::default()
        };
        let o = Orchestrator::new(adapter.clone(), state, settings);
        let pool = |count| NodePool {
            count,
            vm_type: "small".to_string(),
        };
        o.create_ha_cluster(&Topology {
            control_plane: pool(3),
            worker_plane: pool(workers),
            data_store: pool(3),
            load_balancer_vm_type: "small".to_string(),
        })
        .await
        .unwrap();
        (adapter, o)
    }

    #[tokio::test]
    async fn test_add_workers_only_creates_new_range() {
        let (adapter, o) = cluster_with_workers(1).await;
        let before = adapter.count(|c| matches!(c, Call::NewVm(..)));

        let up = o.add_worker_nodes(3, "medium").await.unwrap();
        assert_eq!(up.first_new_index, 1);
        assert_eq!(up.snapshot.worker_hostnames.len(), 3);

        let new_calls: Vec<_> = adapter
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::NewVm(..)))
            .skip(before)
            .collect();
        assert_eq!(new_calls.len(), 2);
        assert!(new_calls.contains(&Call::NewVm(Role::WorkerPlane, 1)));
        assert!(new_calls.contains(&Call::NewVm(Role::WorkerPlane, 2)));

        let state = o.state().snapshot().await;
        assert!(state.completed);
        assert_eq!(state.worker_plane.unwrap().vm_sizes[2], "medium");
    }

    #[tokio::test]
    async fn test_add_workers_rejects_shrink() {
        let (_, o) = cluster_with_workers(2).await;
        let err = o.add_worker_nodes(1, "small").await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidTopology { .. }));

        let same = o.add_worker_nodes(2, "small").await.unwrap();
        assert_eq!(same.first_new_index, 2);
    }

    #[tokio::test]
    async fn test_remove_workers_selects_tail() {
        let (adapter, o) = cluster_with_workers(5).await;

        let down = o.remove_worker_nodes(2, &AutoConfirm).await.unwrap();
        let ScaleDown::Removed { hostnames, snapshot } = down else {
            panic!("removal was not applied");
        };
        assert_eq!(hostnames, vec!["demo-vm-wp-2", "demo-vm-wp-3", "demo-vm-wp-4"]);
        assert_eq!(snapshot.worker_hostnames, vec!["demo-vm-wp-0", "demo-vm-wp-1"]);
        assert_eq!(o.provisioner().get_count(Role::WorkerPlane).await.unwrap(), 2);

        let mut deleted: Vec<_> = adapter
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::DelVm(Role::WorkerPlane, i) => Some(i),
                _ => None,
            })
            .collect();
        deleted.sort();
        assert_eq!(deleted, vec![2, 3, 4]);
        assert!(o.state().read(|s| s.completed).await);
    }

    #[tokio::test]
    async fn test_remove_workers_declined_is_noop() {
        let (adapter, o) = cluster_with_workers(3).await;
        let calls = adapter.calls().len();

        let down = o.remove_worker_nodes(0, &Decline).await.unwrap();
        assert_eq!(down, ScaleDown::Declined);
        assert_eq!(adapter.calls().len(), calls);
        assert_eq!(o.provisioner().get_count(Role::WorkerPlane).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_remove_workers_rejects_growth() {
        let (_, o) = cluster_with_workers(1).await;
        let err = o.remove_worker_nodes(4, &AutoConfirm).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidTopology { .. }));
    }

    #[tokio::test]
    async fn test_revert_failed_growth() {
        let (adapter, o) = cluster_with_workers(1).await;
        adapter.fail_on(Call::NewVm(Role::WorkerPlane, 2));

        assert!(o.add_worker_nodes(3, "small").await.is_err());
        o.revert_worker_growth(1).await.unwrap();

        assert_eq!(o.status(), EngineStatus::RolledBack);
        assert_eq!(o.provisioner().get_count(Role::WorkerPlane).await.unwrap(), 1);
        assert!(o.state().read(|s| s.completed).await);
    }
}
