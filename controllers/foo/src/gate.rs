//! Reconciliation gate.
//!
//! Every reconcile passes through here first: it waits for the first leader
//! observation and only lets the leader through.

use crate::leadership::LeadershipState;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What a reconcile should do given the current leadership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadershipDecision {
    /// This replica is the leader; converge.
    Lead,
    /// Another replica leads; skip without error or requeue.
    Follow { leader: String },
}

/// Blocks reconciliation until a leader is known, then admits only the leader.
#[derive(Debug, Clone)]
pub struct ReconcileGate {
    state: Arc<LeadershipState>,
    poll_interval: Duration,
}

impl ReconcileGate {
    /// Creates a gate over `state` that re-checks every `poll_interval`.
    pub fn new(state: Arc<LeadershipState>, poll_interval: Duration) -> Self {
        Self {
            state,
            poll_interval,
        }
    }

    /// Waits (without deadline) until a leader has been observed.
    ///
    /// Callers that need bounded latency must wrap this in their own timeout.
    pub async fn await_leadership_decision(&self) -> LeadershipDecision {
        if self.state.leader().is_none() {
            debug!("No leader observed yet, waiting before reconciling");
        }
        let leader = self.state.wait_for_leader(self.poll_interval).await;

        if leader == self.state.identity() {
            LeadershipDecision::Lead
        } else {
            LeadershipDecision::Follow { leader }
        }
    }
}
