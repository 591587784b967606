//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the reconciler,
//! the resource watchers and the probe server together.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::probes::{self, ProbeState};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use cluster_client::KubeClusterClient;
use crds::{Module, Onload};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use prometheus::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for Onload resources.
#[derive(Debug)]
pub struct Controller {
    onload_watcher: JoinHandle<Result<(), ControllerError>>,
    deletion_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Onload Operator");

        let kube_client = Client::try_default().await?;

        let onload_api: Api<Onload> = namespaced_or_all(&kube_client, config.namespace.as_deref());
        let module_api: Api<Module> = namespaced_or_all(&kube_client, config.namespace.as_deref());
        let daemonset_api: Api<DaemonSet> = namespaced_or_all(&kube_client, config.namespace.as_deref());
        let node_api: Api<Node> = Api::all(kube_client.clone());

        let registry = Registry::new();
        let metrics = Metrics::new(&registry)?;
        let probe_state = ProbeState::new(registry);

        let cluster_client = KubeClusterClient::new(kube_client, config.api_timeout);
        let reconciler = Arc::new(Reconciler::new(cluster_client, &config, metrics));

        let watcher_instance = Arc::new(Watcher::new(reconciler, onload_api, module_api, daemonset_api, node_api));

        let onload_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_onloads().await })
        };

        let deletion_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_deletions().await })
        };

        let probe_server = {
            let state = probe_state.clone();
            let addr = config.probe_addr;
            tokio::spawn(async move { probes::serve(addr, state).await })
        };

        probe_state.set_ready(true);

        Ok(Self {
            onload_watcher,
            deletion_watcher,
            probe_server,
        })
    }

    /// Runs the controller until shutdown.
    ///
    /// The Onload watcher returns when a termination signal arrives; any
    /// other task finishing first is an error.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Onload Operator running");

        tokio::select! {
            result = &mut self.onload_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Onload watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Onload watcher error: {}", e)))?;
            }
            result = &mut self.deletion_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Deletion watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Deletion watcher error: {}", e)))?;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))??;
                return Err(ControllerError::Watch("Probe server exited".to_string()));
            }
        }

        info!("Onload Operator stopped");
        Ok(())
    }
}

fn namespaced_or_all<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}
