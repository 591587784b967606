//! Onload Operator
//!
//! Rolls the Onload kernel-bypass stack out across cluster nodes:
//! - labels selected nodes so that KMM loads the Onload (and SFC) kernel
//!   modules
//! - runs the Onload control plane and device plugin on nodes whose
//!   modules are loaded
//! - upgrades one node at a time when the declared version changes,
//!   draining workloads that use `amd.com/onload` first

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod probes;
mod reconciler;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Onload Operator");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Requeue delay: {}s", config.requeue_delay.as_secs());
    info!("  API timeout: {}s", config.api_timeout.as_secs());
    info!(
        "  Error backoff: {}s to {}s",
        config.error_backoff_min_secs, config.error_backoff_max_secs
    );
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
