//! Lease lock errors

use thiserror::Error;

/// Errors that can occur when talking to the lock's backing store
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The lease object came back without a resourceVersion, so it cannot be
    /// written atomically
    #[error("Lease {0} is missing metadata.resourceVersion")]
    MissingResourceVersion(String),

    /// The lock could not be constructed (e.g., empty name or namespace)
    #[error("Invalid lock configuration: {0}")]
    InvalidConfig(String),

    /// The backing store is unreachable
    #[error("Backing store unavailable: {0}")]
    Unavailable(String),
}
