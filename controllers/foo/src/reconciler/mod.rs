//! Reconciliation logic for Foo resources.
//!
//! Each pass goes through the reconciliation gate first. Only the leader
//! converges: it renders the desired Deployment, creates or corrects the
//! actual one, then mirrors the Deployment's availability into the Foo's
//! status.

pub mod deployment;


use crate::error::ControllerError;
use crate::gate::{LeadershipDecision, ReconcileGate};
use crate::metrics::Metrics;
use crate::store::ClusterStore;
use crds::FooStatus;
use deployment::{apply_owned, available_replicas, desired_deployment, drifted};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Another replica leads; nothing was read or written
    Skipped { leader: String },
    /// The Foo no longer exists
    Deleted,
    /// The child Deployment was created
    Created,
    /// The child Deployment had drifted and was corrected
    Updated,
    /// The child Deployment already matched
    InSync,
}

impl ReconcileOutcome {
    /// Metric label for this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Deleted => "deleted",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::InSync => "in_sync",
        }
    }
}

/// Reconciles Foos into Deployments.
pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    gate: ReconcileGate,
    metrics: Arc<Metrics>,
    child_image: String,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("gate", &self.gate)
            .field("child_image", &self.child_image)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler that converges through `store`.
    pub fn new(
        store: Arc<dyn ClusterStore>,
        gate: ReconcileGate,
        metrics: Arc<Metrics>,
        child_image: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gate,
            metrics,
            child_image: child_image.into(),
        }
    }

    /// Reconciles the Foo `namespace/name`.
    ///
    /// Errors are transient from the caller's point of view: the pass is
    /// retried from scratch, and every write it makes is idempotent.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        info!(namespace = %namespace, name = %name, "Request received");

        let outcome = match self.gate.await_leadership_decision().await {
            LeadershipDecision::Lead => self.converge(namespace, name).await?,
            LeadershipDecision::Follow { leader } => {
                debug!(namespace = %namespace, name = %name, leader = %leader, "Not the leader, skipping");
                ReconcileOutcome::Skipped { leader }
            }
        };

        self.metrics.record_outcome(&outcome);
        Ok(outcome)
    }

    async fn converge(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        let Some(foo) = self.store.get_foo(namespace, name).await? else {
            debug!(namespace = %namespace, name = %name, "Foo not found, assuming it was deleted");
            return Ok(ReconcileOutcome::Deleted);
        };

        let target = desired_deployment(&foo, &self.child_image)?;
        let deployment_name = &foo.spec.deployment_name;

        let (outcome, current) = match self.store.get_deployment(namespace, deployment_name).await? {
            None => {
                info!(
                    namespace = %namespace,
                    deployment = %deployment_name,
                    replicas = foo.spec.replicas,
                    "Creating Deployment"
                );
                let created = self.store.create_deployment(&target).await?;
                (ReconcileOutcome::Created, created)
            }
            Some(mut actual) if drifted(&target, &actual) => {
                info!(
                    namespace = %namespace,
                    deployment = %deployment_name,
                    replicas = foo.spec.replicas,
                    "Deployment has drifted, updating"
                );
                apply_owned(&target, &mut actual);
                let updated = self.store.update_deployment(&actual).await?;
                (ReconcileOutcome::Updated, updated)
            }
            Some(actual) => {
                debug!(namespace = %namespace, deployment = %deployment_name, "Deployment in sync");
                (ReconcileOutcome::InSync, actual)
            }
        };

        let status = FooStatus {
            available_replicas: available_replicas(&current),
        };
        self.store.update_foo_status(&foo, &status).await?;
        debug!(
            namespace = %namespace,
            name = %name,
            available_replicas = status.available_replicas,
            "Status updated"
        );

        Ok(outcome)
    }
}
