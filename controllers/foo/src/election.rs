//! Leader election.
//!
//! Runs the acquire/renew loop against a `LeaseLock` in a background task
//! and publishes every newly observed leader into `LeadershipState`.
//!
//! # Failure policy
//!
//! Losing the lease while leading is fatal. The election task ends with
//! `ElectionError::LeadershipLost` and the supervisor exits the process, so
//! no code path keeps running on leadership that has silently lapsed. A
//! restarted pod re-enters the race with a fresh identity.

use crate::error::ElectionError;
use crate::leadership::LeadershipState;
use crate::metrics::Metrics;
use lease_lock::{LeaseLock, LeaseParams};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default interval between acquire attempts and between renewals
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Generates a fresh election identity for this process.
pub fn generate_identity() -> String {
    format!("foo-controller-election-{}", uuid::Uuid::new_v4())
}

/// Leader election timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionConfig {
    /// Interval between acquire attempts, and between renewals while leading
    pub retry_period: Duration,
    /// How long a renewal may keep failing before leadership is given up
    pub renew_deadline: Duration,
    /// How long other replicas wait after the last renewal before claiming
    pub lease_duration: Duration,
}

impl ElectionConfig {
    /// Derives `renew_deadline = 3 × retry_period` and `lease_duration = 3 × renew_deadline`.
    pub fn from_retry_period(retry_period: Duration) -> Self {
        let renew_deadline = retry_period.saturating_mul(3);
        Self {
            retry_period,
            renew_deadline,
            lease_duration: renew_deadline.saturating_mul(3),
        }
    }

    /// Checks `retry_period < renew_deadline < lease_duration` with a non-zero retry period.
    pub fn validate(&self) -> Result<(), ElectionError> {
        if self.retry_period.is_zero() {
            return Err(ElectionError::InvalidTiming("retry period must be greater than zero".to_string()));
        }
        if self.renew_deadline <= self.retry_period {
            return Err(ElectionError::InvalidTiming(format!(
                "renew deadline {:?} must be greater than retry period {:?}",
                self.renew_deadline, self.retry_period
            )));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(ElectionError::InvalidTiming(format!(
                "lease duration {:?} must be greater than renew deadline {:?}",
                self.lease_duration, self.renew_deadline
            )));
        }
        Ok(())
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self::from_retry_period(DEFAULT_RETRY_PERIOD)
    }
}

/// Competes for the election lease on behalf of this process.
pub struct LeaderElector {
    lock: Arc<dyn LeaseLock>,
    state: Arc<LeadershipState>,
    config: ElectionConfig,
    metrics: Arc<Metrics>,
}

impl fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaderElector")
            .field("lock", &self.lock.describe())
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LeaderElector {
    /// Creates an elector; fails if the timing is inconsistent.
    pub fn new(
        lock: Arc<dyn LeaseLock>,
        state: Arc<LeadershipState>,
        config: ElectionConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ElectionError> {
        config.validate()?;
        Ok(Self {
            lock,
            state,
            config,
            metrics,
        })
    }

    /// This replica's election identity.
    pub fn identity(&self) -> &str {
        self.state.identity()
    }

    fn params(&self) -> LeaseParams {
        LeaseParams::new(self.config.lease_duration)
    }

    /// Launches the election loop in a background task.
    ///
    /// The task only finishes when leadership is lost.
    pub fn start(self: Arc<Self>) -> JoinHandle<ElectionError> {
        tokio::spawn(async move { self.run().await })
    }

    /// Acquires the lease, then renews it until that fails.
    pub async fn run(&self) -> ElectionError {
        info!(
            identity = %self.identity(),
            lease = %self.lock.describe(),
            "Leader Elector: waiting for leadership..."
        );

        let mut observed = None;
        self.acquire(&mut observed).await;

        info!(identity = %self.identity(), "Leader Elector: leading...");
        let error = self.renew(&mut observed).await;

        self.metrics.set_leading(false);
        warn!(identity = %self.identity(), error = %error, "Leader Elector: stopped leading.");
        error
    }

    /// Polls every retry period until the lease is ours.
    async fn acquire(&self, observed: &mut Option<String>) {
        let params = self.params();
        loop {
            match self.lock.try_acquire_or_renew(self.identity(), &params).await {
                Ok(observation) => {
                    self.observe(observation.holder.as_deref(), observed);
                    if observation.acquired {
                        return;
                    }
                    debug!(
                        identity = %self.identity(),
                        holder = observation.holder.as_deref().unwrap_or("<none>"),
                        "Lease held by another replica, waiting..."
                    );
                }
                Err(e) => {
                    warn!(
                        identity = %self.identity(),
                        error = %e,
                        retry_secs = self.config.retry_period.as_secs(),
                        "Failed to acquire lease, retrying..."
                    );
                }
            }
            tokio::time::sleep(self.config.retry_period).await;
        }
    }

    /// Renews every retry period; returns once a renewal round fails.
    async fn renew(&self, observed: &mut Option<String>) -> ElectionError {
        loop {
            tokio::time::sleep(self.config.retry_period).await;

            match tokio::time::timeout(self.config.renew_deadline, self.renew_round(observed)).await {
                Ok(true) => {}
                Ok(false) => {
                    return self.lost(format!(
                        "lease taken over by {}",
                        observed.as_deref().unwrap_or("<unknown>")
                    ));
                }
                Err(_) => {
                    return self.lost(format!(
                        "failed to renew within {:?}",
                        self.config.renew_deadline
                    ));
                }
            }
        }
    }

    /// One renewal: transient errors are retried until the caller's deadline.
    ///
    /// Returns `false` if another replica holds the lease.
    async fn renew_round(&self, observed: &mut Option<String>) -> bool {
        let params = self.params();
        loop {
            match self.lock.try_acquire_or_renew(self.identity(), &params).await {
                Ok(observation) => {
                    self.observe(observation.holder.as_deref(), observed);
                    return observation.acquired;
                }
                Err(e) => {
                    warn!(identity = %self.identity(), error = %e, "Failed to renew lease, retrying...");
                    tokio::time::sleep(self.config.retry_period).await;
                }
            }
        }
    }

    /// Publishes `holder` if it differs from the last observed holder.
    fn observe(&self, holder: Option<&str>, observed: &mut Option<String>) {
        let Some(holder) = holder else {
            return;
        };
        if observed.as_deref() == Some(holder) {
            return;
        }

        *observed = Some(holder.to_string());
        info!(identity = %self.identity(), leader = %holder, "Leader Elector: new leader");
        self.state.set_leader(holder);
        self.metrics.record_leader_change(holder == self.identity());
    }

    fn lost(&self, reason: String) -> ElectionError {
        ElectionError::LeadershipLost {
            identity: self.identity().to_string(),
            reason,
        }
    }

    /// Hands the lease back if this replica holds it, so a standby can take
    /// over without waiting for expiry. Used on graceful shutdown.
    pub async fn release(&self) {
        if !self.state.is_leader() {
            return;
        }
        match self.lock.release(self.identity()).await {
            Ok(true) => {
                self.metrics.set_leading(false);
                info!(identity = %self.identity(), "Released leadership");
            }
            Ok(false) => debug!(identity = %self.identity(), "Lease no longer held, nothing to release"),
            Err(e) => warn!(identity = %self.identity(), error = %e, "Failed to release lease"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lease_lock::MockLeaseLock;

    const POLL: Duration = Duration::from_millis(100);

    fn elector(lock: &MockLeaseLock, identity: &str) -> (Arc<LeaderElector>, Arc<LeadershipState>) {
        let state = Arc::new(LeadershipState::new(identity));
        let elector = LeaderElector::new(
            Arc::new(lock.clone()),
            state.clone(),
            ElectionConfig::default(),
            Arc::new(Metrics::new().unwrap()),
        )
        .unwrap();
        (Arc::new(elector), state)
    }

    #[test]
    fn test_default_timing_ratios() {
        let config = ElectionConfig::default();
        assert_eq!(config.retry_period, Duration::from_secs(2));
        assert_eq!(config.renew_deadline, Duration::from_secs(6));
        assert_eq!(config.lease_duration, Duration::from_secs(18));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inconsistent_timing_is_rejected() {
        let zero = ElectionConfig::from_retry_period(Duration::ZERO);
        assert!(matches!(zero.validate(), Err(ElectionError::InvalidTiming(_))));

        let short_lease = ElectionConfig {
            retry_period: Duration::from_secs(2),
            renew_deadline: Duration::from_secs(10),
            lease_duration: Duration::from_secs(10),
        };
        assert!(matches!(short_lease.validate(), Err(ElectionError::InvalidTiming(_))));

        let lock = MockLeaseLock::new();
        let result = LeaderElector::new(
            Arc::new(lock),
            Arc::new(LeadershipState::new("a")),
            short_lease,
            Arc::new(Metrics::new().unwrap()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_identities_are_unique() {
        let a = generate_identity();
        let b = generate_identity();
        assert!(a.starts_with("foo-controller-election-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_debug_names_lock_and_identity() {
        let lock = MockLeaseLock::new();
        let (elector, _) = elector(&lock, "a");

        let rendered = format!("{:?}", elector);
        assert!(rendered.contains("mock/lease"), "{}", rendered);
        assert!(rendered.contains("identity: \"a\""), "{}", rendered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sole_candidate_becomes_leader() {
        let lock = MockLeaseLock::new();
        let (elector, state) = elector(&lock, "a");

        let handle = elector.start();
        assert_eq!(state.wait_for_leader(POLL).await, "a");
        assert!(state.is_leader());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!handle.is_finished());
        assert_eq!(lock.holder().as_deref(), Some("a"));
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loser_observes_winner_and_stays_follower() {
        let lock = MockLeaseLock::new();
        let (elector_a, state_a) = elector(&lock, "a");
        let (elector_b, state_b) = elector(&lock, "b");

        let handle_a = elector_a.start();
        assert_eq!(state_a.wait_for_leader(POLL).await, "a");

        let handle_b = elector_b.start();
        assert_eq!(state_b.wait_for_leader(POLL).await, "a");
        assert!(!state_b.is_leader());

        // A keeps renewing, so B never gets past the acquire phase
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(state_b.leader().as_deref(), Some("a"));
        assert!(!state_b.is_leader());
        assert!(!handle_a.is_finished());
        assert!(!handle_b.is_finished());

        handle_a.abort();
        handle_b.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_takes_over_after_leader_stops_renewing() {
        let lock = MockLeaseLock::new();
        let (elector_a, state_a) = elector(&lock, "a");
        let (elector_b, state_b) = elector(&lock, "b");

        let handle_a = elector_a.start();
        assert_eq!(state_a.wait_for_leader(POLL).await, "a");
        let handle_b = elector_b.start();
        assert_eq!(state_b.wait_for_leader(POLL).await, "a");

        // Simulate A's process dying
        handle_a.abort();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(state_b.leader().as_deref(), Some("b"));
        assert!(state_b.is_leader());
        assert_eq!(lock.transitions(), 1);

        handle_b.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_failure_is_fatal() {
        let lock = MockLeaseLock::new();
        let (elector, state) = elector(&lock, "a");

        let handle = elector.start();
        assert_eq!(state.wait_for_leader(POLL).await, "a");

        lock.set_unavailable(true);
        let error = tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .expect("election should stop once renewal fails")
            .unwrap();

        match error {
            ElectionError::LeadershipLost { identity, reason } => {
                assert_eq!(identity, "a");
                assert!(reason.contains("renew"), "reason: {}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_outraced_leader_stops_and_observes_new_holder() {
        let lock = MockLeaseLock::new();
        let (elector, state) = elector(&lock, "a");

        let handle = elector.start();
        assert_eq!(state.wait_for_leader(POLL).await, "a");

        lock.force_holder("intruder");
        let error = tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .expect("election should stop once outraced")
            .unwrap();

        assert!(matches!(error, ElectionError::LeadershipLost { .. }));
        assert_eq!(state.leader().as_deref(), Some("intruder"));
        assert!(!state.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_renew_error_within_deadline_is_tolerated() {
        let lock = MockLeaseLock::new();
        let (elector, state) = elector(&lock, "a");

        let handle = elector.start();
        assert_eq!(state.wait_for_leader(POLL).await, "a");

        // Renewal at t=2s fails and is retried at t=4s, inside the 6s deadline
        lock.set_unavailable(true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        lock.set_unavailable(false);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!handle.is_finished());
        assert!(state.is_leader());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_retries_through_store_outage() {
        let lock = MockLeaseLock::new();
        lock.set_unavailable(true);
        let (elector, state) = elector(&lock, "a");

        let handle = elector.start();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(state.leader(), None);
        assert!(lock.attempts() >= 5);

        lock.set_unavailable(false);
        assert_eq!(state.wait_for_leader(POLL).await, "a");
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_hands_lease_back() {
        let lock = MockLeaseLock::new();
        let (elector, state) = elector(&lock, "a");

        let handle = elector.clone().start();
        assert_eq!(state.wait_for_leader(POLL).await, "a");
        handle.abort();

        elector.release().await;
        assert_eq!(lock.holder(), None);
    }
}
