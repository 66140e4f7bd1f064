//! Local provider error types

use clusterflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("Address space exhausted in {0}")]
    AddressExhausted(String),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Resource creation failed: {0}")]
    CreationFailed(String),
}

impl From<LocalError> for CloudError {
    fn from(err: LocalError) -> Self {
        match err {
            LocalError::InvalidCidr(_) => CloudError::InvalidParameter(err.to_string()),
            other => CloudError::ApiError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocalError>;
