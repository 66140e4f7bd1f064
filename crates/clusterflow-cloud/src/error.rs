//! Provisioning engine error types

use crate::state::{ClusterKey, LifecyclePhase, Operation, Role};
use std::fmt;
use thiserror::Error;

/// Resource verb executed against a provider adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    NewNetwork,
    DelNetwork,
    NewFirewall,
    DelFirewall,
    CreateSshKeyPair,
    DelSshKeyPair,
    NewVm,
    DelVm,
    NewManagedCluster,
    DelManagedCluster,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::NewNetwork => "create network",
            Verb::DelNetwork => "delete network",
            Verb::NewFirewall => "create firewall",
            Verb::DelFirewall => "delete firewall",
            Verb::CreateSshKeyPair => "upload ssh key pair",
            Verb::DelSshKeyPair => "delete ssh key pair",
            Verb::NewVm => "create vm",
            Verb::DelVm => "delete vm",
            Verb::NewManagedCluster => "create managed cluster",
            Verb::DelManagedCluster => "delete managed cluster",
        };
        f.write_str(s)
    }
}

fn describe_target(role: &Option<Role>, index: &Option<usize>) -> String {
    match (role, index) {
        (Some(role), Some(index)) => format!("{}[{}]", role, index),
        (Some(role), None) => role.to_string(),
        _ => "cluster".to_string(),
    }
}

/// Provisioning engine errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Invalid topology for {role}: {reason}")]
    InvalidTopology { role: Role, reason: String },

    #[error("{0} inventory has not been initialized")]
    UninitializedRole(Role),

    #[error("Cluster already exists: {0}")]
    DuplicateCluster(ClusterKey),

    #[error("Cluster not found: {0}")]
    ClusterNotFound(ClusterKey),

    #[error("Cannot {operation} cluster {key} while it is {phase}")]
    OperationNotAllowed {
        key: ClusterKey,
        operation: Operation,
        phase: LifecyclePhase,
    },

    #[error("{verb} failed for {}: {source}", describe_target(.role, .index))]
    ProviderOperation {
        verb: Verb,
        role: Option<Role>,
        index: Option<usize>,
        #[source]
        source: Box<CloudError>,
    },

    #[error("Rollback failed: {0}")]
    Rollback(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn provider(verb: Verb, role: Option<Role>, index: Option<usize>, source: CloudError) -> Self {
        CloudError::ProviderOperation {
            verb,
            role,
            index,
            source: Box::new(source),
        }
    }

    /// True for errors produced because a sibling failed or a deadline fired,
    /// as opposed to a failure of the operation itself.
    pub fn is_cancellation(&self) -> bool {
        match self {
            CloudError::Cancelled(_) => true,
            CloudError::ProviderOperation { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_operation_display() {
        let err = CloudError::provider(
            Verb::NewVm,
            Some(Role::ControlPlane),
            Some(2),
            CloudError::ApiError("quota exceeded".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "create vm failed for control-plane[2]: API error: quota exceeded"
        );

        let err = CloudError::provider(
            Verb::DelNetwork,
            None,
            None,
            CloudError::ApiError("in use".to_string()),
        );
        assert_eq!(err.to_string(), "delete network failed for cluster: API error: in use");
    }

    #[test]
    fn test_cancellation_is_detected_through_wrapping() {
        let err = CloudError::provider(
            Verb::DelVm,
            Some(Role::WorkerPlane),
            Some(0),
            CloudError::Cancelled("sibling failed".to_string()),
        );
        assert!(err.is_cancellation());
        assert!(!CloudError::Timeout("deadline".to_string()).is_cancellation());
    }
}
