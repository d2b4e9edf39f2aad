//! Controller configuration.
//!
//! All settings come from environment variables, read once at startup.

use crate::election::ElectionConfig;
use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const DEFAULT_LEASE_NAMESPACE: &str = "default";
const DEFAULT_LEASE_NAME: &str = "foocontrollerelection";
const DEFAULT_RETRY_PERIOD_SECS: u64 = 2;
const DEFAULT_LEADER_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_CHILD_IMAGE: &str = "nginx";
const DEFAULT_RECONCILE_CONCURRENCY: u16 = 3;
const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:8080";

/// Runtime configuration of the Foo Controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace to watch for Foos (`None` = all namespaces)
    pub watch_namespace: Option<String>,
    /// Namespace of the election Lease
    pub lease_namespace: String,
    /// Name of the election Lease
    pub lease_name: String,
    /// Election timing
    pub election: ElectionConfig,
    /// Upper bound on how long the reconciliation gate sleeps between checks
    pub leader_poll_interval: Duration,
    /// Image of the managed container in each child Deployment
    pub child_image: String,
    /// Maximum concurrent reconciliations
    pub reconcile_concurrency: u16,
    /// Listen address of the probe/metrics server
    pub probe_addr: SocketAddr,
}

impl ControllerConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through `lookup`, which returns the value of a variable if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let retry_secs: u64 = parse_or(&non_empty, "ELECTION_RETRY_PERIOD_SECS", DEFAULT_RETRY_PERIOD_SECS)?;
        if retry_secs == 0 {
            return Err(ControllerError::InvalidConfig(
                "ELECTION_RETRY_PERIOD_SECS must be greater than zero".to_string(),
            ));
        }

        let poll_ms: u64 = parse_or(&non_empty, "LEADER_POLL_INTERVAL_MS", DEFAULT_LEADER_POLL_INTERVAL_MS)?;
        if poll_ms == 0 {
            return Err(ControllerError::InvalidConfig(
                "LEADER_POLL_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let reconcile_concurrency: u16 =
            parse_or(&non_empty, "RECONCILE_CONCURRENCY", DEFAULT_RECONCILE_CONCURRENCY)?;
        if reconcile_concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "RECONCILE_CONCURRENCY must be greater than zero".to_string(),
            ));
        }

        let probe_addr_raw = non_empty("PROBE_ADDR").unwrap_or_else(|| DEFAULT_PROBE_ADDR.to_string());
        let probe_addr = probe_addr_raw.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("PROBE_ADDR '{}' is not a socket address: {}", probe_addr_raw, e))
        })?;

        Ok(Self {
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            lease_namespace: non_empty("LEASE_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_LEASE_NAMESPACE.to_string()),
            lease_name: non_empty("LEASE_NAME").unwrap_or_else(|| DEFAULT_LEASE_NAME.to_string()),
            election: ElectionConfig::from_retry_period(Duration::from_secs(retry_secs)),
            leader_poll_interval: Duration::from_millis(poll_ms),
            child_image: non_empty("CHILD_IMAGE").unwrap_or_else(|| DEFAULT_CHILD_IMAGE.to_string()),
            reconcile_concurrency,
            probe_addr,
        })
    }

    /// Logs the effective configuration.
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Namespace: {}", self.watch_namespace.as_deref().unwrap_or("all namespaces"));
        info!("  Lease: {}/{}", self.lease_namespace, self.lease_name);
        info!(
            "  Election timing: retry {:?}, renew deadline {:?}, lease duration {:?}",
            self.election.retry_period, self.election.renew_deadline, self.election.lease_duration
        );
        info!("  Child image: {}", self.child_image);
        info!("  Reconcile concurrency: {}", self.reconcile_concurrency);
        info!("  Probe address: {}", self.probe_addr);
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{} '{}' is invalid: {}", key, raw, e))
        }),
        None => Ok(default),
    }
}
