//! Kubernetes resource watchers.
//!
//! Watches Foos and the Deployments they own, and feeds changes into the
//! reconciler through `kube_runtime::Controller`, which handles
//! reconnection, deduplication and per-object serialization.
//!
//! Followers skip every reconcile and wait for the next change, so when this
//! replica takes over the lease every Foo is reconciled again.

use crate::backoff::RequeueBackoff;
use crate::error::ControllerError;
use crate::leadership::LeadershipState;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crds::Foo;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, ResourceExt};
use kube_runtime::{Controller, controller::{Action, Config as RuntimeConfig}, watcher};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Shared state handed to every reconcile call.
#[derive(Debug)]
pub struct Context {
    reconciler: Arc<Reconciler>,
    backoff: RequeueBackoff,
    metrics: Arc<Metrics>,
}

impl Context {
    /// Creates the context with empty backoff state.
    pub fn new(reconciler: Arc<Reconciler>, metrics: Arc<Metrics>) -> Self {
        Self {
            reconciler,
            backoff: RequeueBackoff::new(),
            metrics,
        }
    }
}

fn object_key(foo: &Foo) -> String {
    format!("{}/{}", foo.namespace().unwrap_or_default(), foo.name_any())
}

async fn reconcile(foo: Arc<Foo>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let namespace = foo
        .namespace()
        .ok_or_else(|| ControllerError::InvalidResource(format!("Foo {} has no namespace", foo.name_any())))?;
    let name = foo.name_any();

    let outcome = ctx.reconciler.reconcile(&namespace, &name).await?;
    debug!(namespace = %namespace, name = %name, outcome = outcome.as_str(), "Reconcile finished");

    ctx.backoff.reset(&object_key(&foo));
    // Changes to the Foo or its Deployment trigger the next pass
    Ok(Action::await_change())
}

fn error_policy(foo: Arc<Foo>, error: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = object_key(&foo);
    let delay = ctx.backoff.next(&key);
    ctx.metrics.record_error();
    error!(
        "Reconciliation error for Foo {}: {} (retrying in {}s)",
        key,
        error,
        delay.as_secs()
    );
    Action::requeue(delay)
}

/// Watches Foos and owned Deployments.
pub struct Watcher {
    foos: Api<Foo>,
    deployments: Api<Deployment>,
    leadership: Arc<LeadershipState>,
    context: Arc<Context>,
    concurrency: u16,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("identity", &self.leadership.identity())
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a watcher over `foos` and the `deployments` they own.
    pub fn new(
        foos: Api<Foo>,
        deployments: Api<Deployment>,
        leadership: Arc<LeadershipState>,
        context: Arc<Context>,
        concurrency: u16,
    ) -> Self {
        Self {
            foos,
            deployments,
            leadership,
            context,
            concurrency,
        }
    }

    /// Runs the watch loop. Only returns if the underlying watch stream ends.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("Starting Foo watcher (concurrency {})", self.concurrency);

        let config = RuntimeConfig::default().concurrency(self.concurrency);
        let identity = self.leadership.identity().to_string();
        let takeovers = self.leadership.leadership_acquired().map(move |()| {
            info!(identity = %identity, "Became leader, reconciling all Foos");
        });

        Controller::new(self.foos, watcher::Config::default())
            .owns(self.deployments, watcher::Config::default())
            .reconcile_all_on(takeovers)
            .with_config(config)
            .run(reconcile, error_policy, self.context)
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled Foo {}/{}", obj.namespace.as_deref().unwrap_or(""), obj.name),
                    Err(e) => error!("Controller error: {}", e),
                }
            })
            .await;

        Err(ControllerError::Watch("Foo watch stream ended".to_string()))
    }
}
