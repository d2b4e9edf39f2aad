//! Lease Lock
//!
//! A compare-and-swap lock stored in the Kubernetes API server, used by
//! controller replicas to elect a single active writer.
//!
//! # Example
//!
//! ```no_run
//! use lease_lock::{KubeLeaseLock, LeaseLock, LeaseParams};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let lock = KubeLeaseLock::new(client, "default", "foocontrollerelection")?;
//!
//! let params = LeaseParams::new(Duration::from_secs(18));
//! let observation = lock.try_acquire_or_renew("replica-a", &params).await?;
//! if observation.acquired {
//!     // this replica holds the lease until it stops renewing
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Optimistic concurrency**: every write carries the `resourceVersion`
//!   that was read, so two replicas can never both win the same round
//! - **Expiry**: a holder that stops renewing for `leaseDurationSeconds`
//!   can be replaced
//! - **Release**: a holder may hand the lease back for fast failover
//! - **Mocking**: `MockLeaseLock` (feature `test-util`) for unit tests

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod lock_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeLeaseLock;
pub use error::LeaseError;
pub use lock_trait::LeaseLock;
pub use models::*;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockLeaseLock;
