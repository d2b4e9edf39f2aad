//! LeaseLock trait for mocking
//!
//! Abstracts the distributed lock so the election loop can be exercised
//! against an in-memory implementation in unit tests.

use crate::error::LeaseError;
use crate::models::{LeaseObservation, LeaseParams};

/// Operations of a compare-and-swap protected lease.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait LeaseLock: Send + Sync {
    /// Human readable location of the lock, used in logs
    fn describe(&self) -> String;

    /// Acquires the lease if it has no live holder, or renews it if
    /// `identity` already holds it.
    ///
    /// Losing a write race is not an error: the returned observation has
    /// `acquired == false` and names the holder that won, when known.
    async fn try_acquire_or_renew(
        &self,
        identity: &str,
        params: &LeaseParams,
    ) -> Result<LeaseObservation, LeaseError>;

    /// Returns the current holder, if the lease exists and names one.
    async fn observed_holder(&self) -> Result<Option<String>, LeaseError>;

    /// Clears the holder if `identity` still holds the lease.
    ///
    /// Returns `true` if the lease was released by this call.
    async fn release(&self, identity: &str) -> Result<bool, LeaseError>;
}
