//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the election,
//! the Foo watcher and the probe server together and supervises them.

use crate::config::ControllerConfig;
use crate::election::{LeaderElector, generate_identity};
use crate::error::{ControllerError, ElectionError};
use crate::gate::ReconcileGate;
use crate::leadership::LeadershipState;
use crate::metrics::Metrics;
use crate::probes::{self, ProbeState};
use crate::reconciler::Reconciler;
use crate::store::KubeStore;
use crate::watcher::{Context, Watcher};
use crds::Foo;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use lease_lock::KubeLeaseLock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for Foo resources.
#[derive(Debug)]
pub struct Controller {
    elector: Arc<LeaderElector>,
    election: JoinHandle<ElectionError>,
    watcher: JoinHandle<Result<(), ControllerError>>,
    probes: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates the controller and starts its background tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Foo Controller");

        let identity = generate_identity();
        info!("Election identity: {}", identity);

        // Without a client there is no lock, and without a lock this replica can never lead
        let kube_client = Client::try_default()
            .await
            .map_err(|e| ElectionError::LockInit(format!("failed to create Kubernetes client: {}", e)))?;
        let lock = KubeLeaseLock::new(kube_client.clone(), &config.lease_namespace, &config.lease_name)
            .map_err(|e| ElectionError::LockInit(e.to_string()))?;

        let metrics = Arc::new(
            Metrics::new().map_err(|e| ControllerError::Probe(format!("failed to register metrics: {}", e)))?,
        );
        let leadership = Arc::new(LeadershipState::new(identity));

        let elector = Arc::new(LeaderElector::new(
            Arc::new(lock),
            leadership.clone(),
            config.election,
            metrics.clone(),
        )?);
        let election = elector.clone().start();

        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeStore::new(kube_client.clone())),
            ReconcileGate::new(leadership.clone(), config.leader_poll_interval),
            metrics.clone(),
            config.child_image.clone(),
        ));

        let (foos, deployments): (Api<Foo>, Api<Deployment>) = match config.watch_namespace.as_deref() {
            Some(ns) => (
                Api::namespaced(kube_client.clone(), ns),
                Api::namespaced(kube_client, ns),
            ),
            None => (Api::all(kube_client.clone()), Api::all(kube_client)),
        };

        let watcher_instance = Watcher::new(
            foos,
            deployments,
            leadership.clone(),
            Arc::new(Context::new(reconciler, metrics.clone())),
            config.reconcile_concurrency,
        );
        let watcher = tokio::spawn(async move { watcher_instance.run().await });

        let probe_state = ProbeState::new(leadership, metrics);
        let probe_addr = config.probe_addr;
        let probes = tokio::spawn(async move { probes::serve(probe_addr, probe_state).await });

        Ok(Self {
            elector,
            election,
            watcher,
            probes,
        })
    }

    /// Runs the controller until leadership is lost, a task fails, or the
    /// process is asked to stop.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Foo Controller running");

        tokio::select! {
            result = &mut self.election => {
                let error = result.unwrap_or_else(|e| ElectionError::LeadershipLost {
                    identity: self.elector.identity().to_string(),
                    reason: format!("election task panicked: {}", e),
                });
                Err(error.into())
            }
            result = &mut self.watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Foo watcher panicked: {}", e)))??;
                Err(ControllerError::Watch("Foo watcher exited".to_string()))
            }
            result = &mut self.probes => {
                result.map_err(|e| ControllerError::Probe(format!("probe server panicked: {}", e)))??;
                Err(ControllerError::Probe("probe server exited".to_string()))
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received");
                self.election.abort();
                self.elector.release().await;
                Ok(())
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
