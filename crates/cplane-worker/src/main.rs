//! Onload control plane worker binary

use anyhow::{Context, Result};
use cplane_worker::{check_device, configure, wait_for_container_id, KubePods, SysfsParameters, WorkerConfig, ONLOAD_DEVICE};
use std::time::Duration;
use tracing::{info, warn};

/// Time allowed for the API server to report this container as running
const LOOKUP_DEADLINE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    let config = WorkerConfig::from_env().context("Failed to read worker configuration")?;
    check_device(ONLOAD_DEVICE)?;

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let pods = KubePods::new(client);
    let container = wait_for_container_id(
        &pods,
        &config.pod_namespace,
        &config.pod_name,
        &config.container_name,
        LOOKUP_DEADLINE,
    )
    .await
    .context("Failed to get container ID")?;
    info!("Found container {} running under {}", container.id, container.runtime);

    configure(
        &SysfsParameters::default(),
        &container,
        &config.server_path,
        &config.server_params,
    )
    .context("Failed to configure the Onload control plane")?;

    // The server runs in this container for as long as the pod does
    std::future::pending::<()>().await;
    Ok(())
}
