//! Mock LeaseLock for unit testing
//!
//! Keeps the lease in memory so several electors in one test can compete
//! for it. Time is measured with `tokio::time::Instant`, so tests running
//! with a paused clock see expiry deterministically.

use crate::error::LeaseError;
use crate::lock_trait::LeaseLock;
use crate::models::{LeaseObservation, LeaseParams};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct MockLease {
    holder: Option<String>,
    lease_duration: Duration,
    renew_time: Instant,
    transitions: u32,
}

impl MockLease {
    fn expired(&self, now: Instant) -> bool {
        now > self.renew_time + self.lease_duration
    }
}

/// In-memory lease shared by every clone of the mock
#[derive(Debug, Clone, Default)]
pub struct MockLeaseLock {
    lease: Arc<Mutex<Option<MockLease>>>,
    unavailable: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl MockLeaseLock {
    /// Create a mock with no lease object yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock whose lease is already held (and freshly renewed) by `holder`
    pub fn held_by(holder: &str, lease_duration: Duration) -> Self {
        let mock = Self::new();
        *mock.state() = Some(MockLease {
            holder: Some(holder.to_string()),
            lease_duration,
            renew_time: Instant::now(),
            transitions: 0,
        });
        mock
    }

    fn state(&self) -> MutexGuard<'_, Option<MockLease>> {
        self.lease.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every call fail as if the backing store were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Overwrite the holder, simulating another replica winning a race
    pub fn force_holder(&self, holder: &str) {
        let mut state = self.state();
        let lease_duration = state
            .as_ref()
            .map_or(Duration::from_secs(15), |l| l.lease_duration);
        let transitions = state.as_ref().map_or(0, |l| l.transitions + 1);
        *state = Some(MockLease {
            holder: Some(holder.to_string()),
            lease_duration,
            renew_time: Instant::now(),
            transitions,
        });
    }

    /// Current holder without going through the availability check
    pub fn holder(&self) -> Option<String> {
        self.state().as_ref().and_then(|l| l.holder.clone())
    }

    /// Number of holder changes recorded on the lease
    pub fn transitions(&self) -> u32 {
        self.state().as_ref().map_or(0, |l| l.transitions)
    }

    /// Number of acquire-or-renew calls received
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), LeaseError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LeaseError::Unavailable("mock lease store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LeaseLock for MockLeaseLock {
    fn describe(&self) -> String {
        "mock/lease".to_string()
    }

    async fn try_acquire_or_renew(
        &self,
        identity: &str,
        params: &LeaseParams,
    ) -> Result<LeaseObservation, LeaseError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let now = Instant::now();
        let mut state = self.state();

        match state.as_mut() {
            None => {
                *state = Some(MockLease {
                    holder: Some(identity.to_string()),
                    lease_duration: params.lease_duration,
                    renew_time: now,
                    transitions: 0,
                });
                Ok(LeaseObservation::acquired(identity))
            }
            Some(lease) if lease.holder.as_deref() == Some(identity) => {
                lease.renew_time = now;
                lease.lease_duration = params.lease_duration;
                Ok(LeaseObservation::acquired(identity))
            }
            Some(lease) if lease.holder.is_none() || lease.expired(now) => {
                lease.holder = Some(identity.to_string());
                lease.renew_time = now;
                lease.lease_duration = params.lease_duration;
                lease.transitions += 1;
                Ok(LeaseObservation::acquired(identity))
            }
            Some(lease) => Ok(LeaseObservation::held_by(lease.holder.clone())),
        }
    }

    async fn observed_holder(&self) -> Result<Option<String>, LeaseError> {
        self.check_available()?;
        Ok(self.holder())
    }

    async fn release(&self, identity: &str) -> Result<bool, LeaseError> {
        self.check_available()?;

        let mut state = self.state();
        match state.as_mut() {
            Some(lease) if lease.holder.as_deref() == Some(identity) => {
                lease.holder = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
