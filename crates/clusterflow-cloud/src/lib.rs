//! ClusterFlow provisioning engine
//!
//! Turns a desired Kubernetes topology into cloud resources. Every mutation
//! is persisted before the next one starts, so an interrupted run can be
//! resumed and a failed one rolled back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  ClusterFlow CLI                 │
//! │          (cflow create / delete / workers)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               clusterflow-cloud                  │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │   ClusterManager  (lock, rollback)        │   │
//! │  │   Orchestrator    (fan-out / fan-in)      │   │
//! │  │   Provisioner     (idempotent verbs)      │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ SharedState  │  │  StateStore  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────┬─────────────────────────────────────────┘
//!         │ trait ProviderAdapter
//! ┌───────▼───────┐
//! │     local     │
//! │   provider    │
//! └───────────────┘
//! ```

pub mod bootstrap;
pub mod cluster;
pub mod confirm;
pub mod counter;
pub mod document;
pub mod error;
pub mod fanout;
pub mod orchestrator;
pub mod params;
pub mod plan;
pub mod provider;
pub mod provisioner;
pub mod scale;
pub mod state;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-exports
pub use bootstrap::{BootstrapCollaborator, NoopBootstrap};
pub use cluster::{ClusterManager, ClusterShape, ClusterSpec};
pub use confirm::{AutoConfirm, Confirmation, Decline};
pub use counter::validate_count;
pub use document::SharedState;
pub use error::{CloudError, Result, Verb};
pub use fanout::{FanOutJob, FanOutReport, fan_out};
pub use orchestrator::{
    DEFAULT_SETTLE_COOLDOWN, EngineStatus, NodePool, Orchestrator, OrchestratorSettings, Topology,
};
pub use params::{
    FirewallParams, FirewallRule, ManagedClusterParams, NetworkParams, SshKeyParams, VmParams,
    Visibility, validate_name,
};
pub use plan::{ActionType, PlanSummary, PlannedAction, ProvisionPlan, ResourceKind};
pub use provider::{AuthStatus, ProviderAdapter, VmPlacement};
pub use provisioner::{Provisioner, VerbOutcome};
pub use scale::{ScaleDown, ScaleUp};
pub use state::{
    ClusterKey, ClusterMeta, ClusterResourceSnapshot, ClusterState, ClusterType, FirewallIds,
    LifecyclePhase, ManagedClusterInfo, NetworkInfo, NodeRecord, Operation, ProviderKind, Role,
    RoleInventory, SshKeyInfo,
};
pub use store::{ClusterFilter, FileStateStore, MemoryStateStore, StateLock, StateStore};
