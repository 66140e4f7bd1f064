//! Local provider for ClusterFlow
//!
//! Implements [`ProviderAdapter`](clusterflow_cloud::ProviderAdapter)
//! without talking to any cloud. Every verb succeeds immediately and hands
//! back synthetic identifiers and addresses, which makes the backend useful
//! for demos and for exercising the engine end to end.
//!
//! Private addresses are carved out of the cluster network CIDR; public
//! addresses come from the `198.18.0.0/15` benchmarking range.
//!
//! # Example
//!
//! ```ignore
//! use clusterflow_cloud_local::LocalProvider;
//! use clusterflow_cloud::ProviderAdapter;
//!
//! let provider = LocalProvider::new();
//! let auth = provider.check_auth().await?;
//! assert!(auth.authenticated);
//! ```

pub mod error;
pub mod provider;

pub use error::{LocalError, Result};
pub use provider::LocalProvider;
