//! Foo Controller
//!
//! Keeps a Deployment converged with every `Foo` custom resource.
//!
//! Several replicas can run at once; a Lease-based election picks the one
//! that writes. The others watch and skip reconciles until they take over.
//! Losing leadership exits the process with status 200 so the pod restarts
//! and rejoins the election.

mod backoff;
mod config;
mod controller;
mod election;
mod error;
mod gate;
mod leadership;
mod metrics;
mod probes;
mod reconciler;
mod store;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Foo Controller");

    match run().await {
        Ok(()) => info!("Foo Controller stopped"),
        Err(e) => {
            error!("Foo Controller failed: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run() -> Result<(), ControllerError> {
    let config = ControllerConfig::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run().await
}
