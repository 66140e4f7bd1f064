//! Shared state document
//!
//! Every provisioning task mutates the same [`ClusterState`]. Mutations and
//! the `save` that follows them run inside one critical section, so the
//! persisted document is never observed half-written even when tasks touch
//! disjoint slots.

use crate::error::{CloudError, Result};
use crate::state::{
    ClusterKey, ClusterResourceSnapshot, ClusterState, LifecyclePhase, Operation,
};
use crate::store::StateStore;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct SharedState {
    key: ClusterKey,
    inner: Mutex<ClusterState>,
    store: Arc<dyn StateStore>,
}

impl SharedState {
    /// Wrap an already loaded (or freshly built) document
    pub fn new(state: ClusterState, store: Arc<dyn StateStore>) -> Self {
        Self {
            key: state.key(),
            inner: Mutex::new(state),
            store,
        }
    }

    /// Load the record for `key` and decide how `operation` may proceed.
    ///
    /// For `Create` a missing record yields a fresh document (not yet saved),
    /// an incomplete record is resumed, a provisioned record still waiting
    /// for bootstrap is reopened and a ready one is a duplicate.
    /// Every other operation requires an existing record.
    pub async fn open(
        store: Arc<dyn StateStore>,
        key: &ClusterKey,
        operation: Operation,
        owner: Option<String>,
    ) -> Result<Self> {
        let loaded = store.load(key).await?;

        let state = match (operation, loaded) {
            (Operation::Create, None) => {
                tracing::debug!("Fresh state for {}", key);
                ClusterState::new(key, owner)
            }
            (Operation::Create, Some(state)) => {
                if state.completed && state.meta.phase == LifecyclePhase::Configuring {
                    tracing::warn!("Cluster {} was never bootstrapped, resuming", key);
                    return Ok(Self::new(state, store));
                }
                if state.completed {
                    return Err(CloudError::DuplicateCluster(key.clone()));
                }
                if state.meta.phase != LifecyclePhase::Creating {
                    return Err(CloudError::OperationNotAllowed {
                        key: key.clone(),
                        operation,
                        phase: state.meta.phase,
                    });
                }
                tracing::warn!("Cluster state found but not completed, resuming {}", key);
                state
            }
            (Operation::Scale, Some(state)) => {
                if !matches!(
                    state.meta.phase,
                    LifecyclePhase::Configuring | LifecyclePhase::Ready
                ) {
                    return Err(CloudError::OperationNotAllowed {
                        key: key.clone(),
                        operation,
                        phase: state.meta.phase,
                    });
                }
                state
            }
            (Operation::Delete | Operation::Get, Some(state)) => state,
            (_, None) => return Err(CloudError::ClusterNotFound(key.clone())),
        };

        Ok(Self::new(state, store))
    }

    pub fn key(&self) -> &ClusterKey {
        &self.key
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Apply `f` and persist the result before releasing the lock.
    ///
    /// When `save` fails the in-memory document keeps the mutation; the
    /// caller sees the error and the next successful save catches up.
    pub async fn mutate<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut ClusterState) -> R,
    {
        let mut state = self.inner.lock().await;
        let out = f(&mut *state);
        state.touch();
        self.store.save(&state).await?;
        Ok(out)
    }

    /// Like [`mutate`](Self::mutate) but lets `f` veto the change. Nothing is
    /// saved when `f` returns an error.
    pub async fn try_mutate<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut ClusterState) -> Result<R>,
    {
        let mut state = self.inner.lock().await;
        let out = f(&mut *state)?;
        state.touch();
        self.store.save(&state).await?;
        Ok(out)
    }

    pub async fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ClusterState) -> R,
    {
        let state = self.inner.lock().await;
        f(&state)
    }

    /// Lock the document for a multi-step critical section
    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, ClusterState> {
        self.inner.lock().await
    }

    pub async fn snapshot(&self) -> ClusterState {
        self.inner.lock().await.clone()
    }

    pub async fn resource_snapshot(&self) -> ClusterResourceSnapshot {
        self.inner.lock().await.resource_snapshot()
    }

    pub async fn set_phase(&self, phase: LifecyclePhase) -> Result<()> {
        self.mutate(|state| state.meta.phase = phase).await
    }

    /// Remove the persisted record. Used only after a full teardown.
    pub async fn remove_record(&self) -> Result<()> {
        let _state = self.inner.lock().await;
        self.store.delete(&self.key).await
    }
}
