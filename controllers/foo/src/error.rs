//! Controller-specific error types.
//!
//! This module defines error types specific to the Foo Controller
//! that are not covered by upstream library errors.

use thiserror::Error;
use kube::Error as KubeError;

/// Exit status used whenever leadership cannot be established or is lost.
///
/// The supervisor (Deployment/ReplicaSet) restarts the pod, which re-enters
/// the election cleanly.
pub const LEADERSHIP_EXIT_CODE: i32 = 200;

/// Exit status for every other fatal error.
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Fatal leader election failures. Every variant terminates the process.
#[derive(Debug, Error)]
pub enum ElectionError {
    /// The lease lock client could not be created
    #[error("Could not make the lease lock: {0}")]
    LockInit(String),

    /// Retry period, renew deadline and lease duration are inconsistent
    #[error("Invalid leader election timing: {0}")]
    InvalidTiming(String),

    /// Renewal failed while holding the lease
    #[error("Leadership lost by {identity}: {reason}")]
    LeadershipLost { identity: String, reason: String },
}

/// Errors from the cluster state store (Foo and Deployment reads/writes).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object is missing a field the store needs to address it
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Failure injected by the in-memory test store
    #[cfg(test)]
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur in the Foo Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster store error during reconciliation
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Leader election failure
    #[error("Leader election error: {0}")]
    Election(#[from] ElectionError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Foo cannot be rendered into a Deployment
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe/metrics server failed
    #[error("Probe server failed: {0}")]
    Probe(String),
}

impl ControllerError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Election(_) => LEADERSHIP_EXIT_CODE,
            _ => FAILURE_EXIT_CODE,
        }
    }
}
