//! Prometheus metrics for the Foo Controller.

use crate::reconciler::ReconcileOutcome;
use std::fmt;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metrics registry and the collectors registered in it.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_errors_total: IntCounter,
    is_leader: IntGauge,
    leader_changes_total: IntCounter,
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("is_leader", &self.is_leader.get())
            .field("leader_changes_total", &self.leader_changes_total.get())
            .field("reconcile_errors_total", &self.reconcile_errors_total.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates the collectors and registers them in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("foo_reconcile_total", "Completed reconciliations by outcome"),
            &["outcome"],
        )?;
        let reconcile_errors_total = IntCounter::new(
            "foo_reconcile_errors_total",
            "Reconciliations that failed and were requeued",
        )?;
        let is_leader = IntGauge::new("foo_is_leader", "1 while this replica holds the election lease")?;
        let leader_changes_total = IntCounter::new(
            "foo_leader_changes_total",
            "Distinct leaders observed by this replica",
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;
        registry.register(Box::new(is_leader.clone()))?;
        registry.register(Box::new(leader_changes_total.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_errors_total,
            is_leader,
            leader_changes_total,
        })
    }

    /// Counts a completed reconciliation.
    pub fn record_outcome(&self, outcome: &ReconcileOutcome) {
        self.reconcile_total.with_label_values(&[outcome.as_str()]).inc();
    }

    /// Counts a failed reconciliation.
    pub fn record_error(&self) {
        self.reconcile_errors_total.inc();
    }

    /// Counts a newly observed leader and updates the leader gauge.
    pub fn record_leader_change(&self, is_self: bool) {
        self.leader_changes_total.inc();
        self.set_leading(is_self);
    }

    /// Sets the leader gauge.
    pub fn set_leading(&self, leading: bool) {
        self.is_leader.set(i64::from(leading));
    }

    /// Renders all metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
