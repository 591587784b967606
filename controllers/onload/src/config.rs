//! Operator configuration
//!
//! Read once at startup from environment variables. Every setting has a
//! default except `WATCH_NAMESPACE`, whose absence means all namespaces.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings for the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch for Onload resources; `None` watches all
    pub namespace: Option<String>,
    /// Delay used whenever a pass has to wait for the cluster
    pub requeue_delay: Duration,
    /// Upper bound on every single API call
    pub api_timeout: Duration,
    /// First retry delay after a failed reconciliation, in seconds
    pub error_backoff_min_secs: u64,
    /// Cap on the retry delay after failed reconciliations, in seconds
    pub error_backoff_max_secs: u64,
    /// Listen address for health probes and metrics
    pub probe_addr: SocketAddr,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            requeue_delay: Duration::from_secs(5),
            api_timeout: Duration::from_secs(10),
            error_backoff_min_secs: 5,
            error_backoff_max_secs: 300,
            probe_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}

impl ControllerConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, falling back to defaults
    /// for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());
        let requeue_delay = parse_var(&lookup, "REQUEUE_DELAY_SECS")?
            .map_or(defaults.requeue_delay, Duration::from_secs);
        let api_timeout = parse_var(&lookup, "API_TIMEOUT_SECS")?
            .map_or(defaults.api_timeout, Duration::from_secs);
        let error_backoff_min_secs =
            parse_var(&lookup, "ERROR_BACKOFF_MIN_SECS")?.unwrap_or(defaults.error_backoff_min_secs);
        let error_backoff_max_secs =
            parse_var(&lookup, "ERROR_BACKOFF_MAX_SECS")?.unwrap_or(defaults.error_backoff_max_secs);
        let probe_addr = parse_var(&lookup, "PROBE_ADDR")?.unwrap_or(defaults.probe_addr);

        if api_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "API_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if error_backoff_min_secs == 0 || error_backoff_min_secs > error_backoff_max_secs {
            return Err(ControllerError::InvalidConfig(format!(
                "error backoff bounds are inconsistent: min {}s, max {}s",
                error_backoff_min_secs, error_backoff_max_secs
            )));
        }

        Ok(Self {
            namespace,
            requeue_delay,
            api_timeout,
            error_backoff_min_secs,
            error_backoff_max_secs,
            probe_addr,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ControllerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            ControllerError::InvalidConfig(format!("{} has invalid value '{}': {}", key, raw, e))
        }),
    }
}
