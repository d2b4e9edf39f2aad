//! Kubernetes Lease lock
//!
//! Implements `LeaseLock` on top of a `coordination.k8s.io/v1` Lease.
//!
//! # Atomicity
//!
//! Every write is a merge patch carrying the `resourceVersion` that was read.
//! If the Lease changed in between, the API server rejects the patch with
//! 409 Conflict and the round is reported as lost rather than failed.

use crate::error::LeaseError;
use crate::lock_trait::LeaseLock;
use crate::models::{LeaseObservation, LeaseParams, lease_expired};
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use std::fmt;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

const FIELD_MANAGER: &str = "foo-controller";

/// Distributed lock backed by a Kubernetes Lease object
pub struct KubeLeaseLock {
    api: Api<Lease>,
    namespace: String,
    name: String,
}

impl fmt::Debug for KubeLeaseLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeLeaseLock")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// What one acquire-or-renew round writes, given the Lease as read.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RoundPlan {
    /// The caller holds the Lease; refresh `renewTime`
    Renew,
    /// The Lease is free or lapsed; claim it
    TakeOver {
        previous: Option<String>,
        transitions: i32,
    },
    /// Another replica holds a live Lease
    Wait { holder: String },
}

fn plan_round(lease: &Lease, identity: &str, now: DateTime<Utc>) -> RoundPlan {
    let spec = lease.spec.as_ref();
    let holder = spec
        .and_then(|s| s.holder_identity.clone())
        .filter(|h| !h.is_empty());

    if holder.as_deref() == Some(identity) {
        return RoundPlan::Renew;
    }

    let renewed = parse_micro_time(spec.and_then(|s| s.renew_time.as_ref()));
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    match holder {
        Some(holder) if !lease_expired(renewed, duration, now) => RoundPlan::Wait { holder },
        previous => RoundPlan::TakeOver {
            previous,
            transitions: spec
                .and_then(|s| s.lease_transitions)
                .unwrap_or(0)
                .saturating_add(1),
        },
    }
}

impl KubeLeaseLock {
    /// Create a lock on the Lease `namespace/name`.
    ///
    /// The Lease itself is created lazily by the first successful acquire.
    pub fn new(client: Client, namespace: &str, name: &str) -> Result<Self, LeaseError> {
        if namespace.trim().is_empty() {
            return Err(LeaseError::InvalidConfig("lease namespace must not be empty".to_string()));
        }
        if name.trim().is_empty() {
            return Err(LeaseError::InvalidConfig("lease name must not be empty".to_string()));
        }

        Ok(Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    /// Create the Lease with `identity` as its first holder
    async fn create_lease(
        &self,
        identity: &str,
        params: &LeaseParams,
        now: DateTime<Utc>,
    ) -> Result<LeaseObservation, LeaseError> {
        let lease: Lease = serde_json::from_value(json!({
            "apiVersion": "coordination.k8s.io/v1",
            "kind": "Lease",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
            },
            "spec": {
                "holderIdentity": identity,
                "leaseDurationSeconds": params.lease_duration_seconds(),
                "acquireTime": micro_time(now),
                "renewTime": micro_time(now),
                "leaseTransitions": 0,
            }
        }))?;

        match self.api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %identity, lease = %self.describe(), "Created new lease");
                Ok(LeaseObservation::acquired(identity))
            }
            Err(e) if is_conflict(&e) => {
                debug!(identity = %identity, "Lease creation conflict, another replica created it first");
                Ok(LeaseObservation::held_by(self.observed_holder().await?))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Patch the Lease guarded by `resource_version`.
    ///
    /// A conflict means another replica wrote first; the round is lost and
    /// the winner is re-read.
    async fn conditional_patch(
        &self,
        identity: &str,
        patch: serde_json::Value,
    ) -> Result<LeaseObservation, LeaseError> {
        match self
            .api
            .patch(&self.name, &Self::patch_params(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(LeaseObservation::acquired(identity)),
            Err(e) if is_conflict(&e) => {
                debug!(identity = %identity, lease = %self.describe(), "Lease write conflict");
                Ok(LeaseObservation::held_by(self.observed_holder().await?))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl LeaseLock for KubeLeaseLock {
    fn describe(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    async fn try_acquire_or_renew(
        &self,
        identity: &str,
        params: &LeaseParams,
    ) -> Result<LeaseObservation, LeaseError> {
        let now = Utc::now();

        let Some(lease) = self.api.get_opt(&self.name).await? else {
            return self.create_lease(identity, params, now).await;
        };
        let plan = plan_round(&lease, identity, now);
        let resource_version = lease
            .metadata
            .resource_version
            .ok_or_else(|| LeaseError::MissingResourceVersion(self.describe()))?;

        match plan {
            RoundPlan::Wait { holder } => Ok(LeaseObservation::held_by(Some(holder))),
            RoundPlan::Renew => {
                let patch = json!({
                    "metadata": { "resourceVersion": resource_version },
                    "spec": {
                        "leaseDurationSeconds": params.lease_duration_seconds(),
                        "renewTime": micro_time(now),
                    }
                });
                let observation = self.conditional_patch(identity, patch).await?;
                if observation.acquired {
                    debug!(identity = %identity, "Lease renewed");
                }
                Ok(observation)
            }
            RoundPlan::TakeOver { previous, transitions } => {
                let patch = json!({
                    "metadata": { "resourceVersion": resource_version },
                    "spec": {
                        "holderIdentity": identity,
                        "leaseDurationSeconds": params.lease_duration_seconds(),
                        "acquireTime": micro_time(now),
                        "renewTime": micro_time(now),
                        "leaseTransitions": transitions,
                    }
                });
                let observation = self.conditional_patch(identity, patch).await?;
                if observation.acquired {
                    info!(
                        identity = %identity,
                        previous = previous.as_deref().unwrap_or("<none>"),
                        transitions,
                        "Took over lease"
                    );
                }
                Ok(observation)
            }
        }
    }

    async fn observed_holder(&self) -> Result<Option<String>, LeaseError> {
        let lease = self.api.get_opt(&self.name).await?;
        Ok(lease
            .and_then(|l| l.spec)
            .and_then(|s| s.holder_identity)
            .filter(|h| !h.is_empty()))
    }

    async fn release(&self, identity: &str) -> Result<bool, LeaseError> {
        let Some(lease) = self.api.get_opt(&self.name).await? else {
            debug!(identity = %identity, "Lease not found, nothing to release");
            return Ok(false);
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(identity) {
            debug!(identity = %identity, "Not the lease holder, nothing to release");
            return Ok(false);
        }

        let resource_version = lease
            .metadata
            .resource_version
            .clone()
            .ok_or_else(|| LeaseError::MissingResourceVersion(self.describe()))?;

        // Backdate renewTime so the lease is immediately acquirable
        let past = Utc::now() - chrono::Duration::seconds(60);
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "spec": {
                "holderIdentity": null,
                "renewTime": micro_time(past),
            }
        });

        let released = self.conditional_patch(identity, patch).await?.acquired;
        if released {
            info!(identity = %identity, lease = %self.describe(), "Lease released for fast failover");
        }
        Ok(released)
    }
}

fn is_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == 409)
}

/// Formats a timestamp the way `metav1.MicroTime` is serialized.
fn micro_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Reads a `MicroTime` field through its RFC 3339 wire form.
fn parse_micro_time<T: Serialize>(value: Option<&T>) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(value?).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
