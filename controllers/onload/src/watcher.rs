//! Kubernetes resource watchers.
//!
//! `watch_onloads` drives reconciliation through `kube_runtime::Controller`:
//! Onload changes, changes to the Modules and DaemonSets they own, and any
//! Node change (which re-enqueues every known Onload) trigger a pass.
//!
//! The controller never sees objects that are already gone, so
//! `watch_deletions` follows Onload delete events separately and runs the
//! entry point by identity, which clears the resource's node labels.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{Module, Onload};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{watcher, Controller, WatchStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reconcile entry for the controller: runs one pass by identity.
async fn reconcile(onload: Arc<Onload>, reconciler: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let namespace = onload
        .namespace()
        .ok_or_else(|| ControllerError::MissingField(format!("Onload {} metadata.namespace", onload.name_any())))?;
    let name = onload.name_any();
    let key = format!("{}/{}", namespace, name);

    debug!("Reconciling Onload {}", key);
    let outcome = reconciler.reconcile(&namespace, &name).await?;
    reconciler.error_backoff.clear(&key);
    Ok(outcome.into_action())
}

/// Error policy: requeue with Fibonacci backoff per resource
fn error_policy(onload: Arc<Onload>, error: &ControllerError, reconciler: Arc<Reconciler>) -> Action {
    let key = format!("{}/{}", onload.namespace().unwrap_or_default(), onload.name_any());
    let (backoff, error_count) = reconciler.error_backoff.record_failure(&key);
    error!(
        "Reconciliation failed for Onload {} (error #{}), retrying in {}s: {}",
        key,
        error_count,
        backoff.as_secs(),
        error
    );
    Action::requeue(backoff)
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    onload_api: Api<Onload>,
    module_api: Api<Module>,
    daemonset_api: Api<DaemonSet>,
    node_api: Api<Node>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish_non_exhaustive()
    }
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        onload_api: Api<Onload>,
        module_api: Api<Module>,
        daemonset_api: Api<DaemonSet>,
        node_api: Api<Node>,
    ) -> Self {
        Self {
            reconciler,
            onload_api,
            module_api,
            daemonset_api,
            node_api,
        }
    }

    /// Runs the Onload controller until shutdown.
    pub async fn watch_onloads(&self) -> Result<(), ControllerError> {
        info!("Starting Onload watcher");

        let controller = Controller::new(self.onload_api.clone(), watcher::Config::default())
            .owns(self.module_api.clone(), watcher::Config::default())
            .owns(self.daemonset_api.clone(), watcher::Config::default());

        // Node labels are the rollout state, so any node change concerns
        // every Onload resource
        let store = controller.store();
        let controller = controller.watches(self.node_api.clone(), watcher::Config::default(), move |_node: Node| {
            store
                .state()
                .into_iter()
                .map(|onload| ObjectRef::from_obj(&*onload))
                .collect::<Vec<_>>()
        });

        // A short debounce batches the burst of node events each pass causes
        let controller_config = ControllerConfig::default().debounce(Duration::from_secs(1));

        controller
            .with_config(controller_config)
            .shutdown_on_signal()
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                match res {
                    Ok((obj, _)) => debug!("Reconciled Onload {}", obj),
                    Err(e) => warn!("Onload controller error: {}", e),
                }
            })
            .await;

        info!("Onload watcher stopped");
        Ok(())
    }

    /// Clears node labels for every deleted Onload resource.
    pub async fn watch_deletions(&self) -> Result<(), ControllerError> {
        info!("Starting Onload deletion watcher");

        let mut events = watcher(self.onload_api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();
        while let Some(event) = events.next().await {
            match event {
                Ok(watcher::Event::Delete(onload)) => {
                    let Some(namespace) = onload.namespace() else {
                        continue;
                    };
                    let name = onload.name_any();
                    info!("Onload {}/{} deleted", namespace, name);
                    if let Err(e) = self.reconciler.reconcile(&namespace, &name).await {
                        error!("Failed to clean up after Onload {}/{}: {}", namespace, name, e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Onload deletion watch error: {}", e),
            }
        }

        Err(ControllerError::Watch("Onload deletion stream ended".to_string()))
    }
}
