//! Rolling upgrade
//!
//! Brings existing operands to the declared version, then moves one node
//! at a time from the old module to the new one:
//!
//! 1. remove the ready marker, which takes the operand pods off the node
//! 2. wait for the device plugin pod to leave
//! 3. evict workloads using `amd.com/onload` and wait for them to go
//! 4. remove the SFC marker, so KMM unloads SFC first
//! 5. remove the loader marker, so KMM unloads Onload
//!
//! The labeling passes then bring the node back at the new version before
//! the next node is picked. Each pass takes at most one of these steps.

use super::labels::{label_value, node_name, ONLOAD_RESOURCE, OPERAND_NAME_LABEL};
use super::manifests::{self, operand_version};
use super::module_kind::ModuleKind;
use super::{Reconciler, StepOutcome, Target};
use crate::error::ControllerError;
use cluster_client::{ClusterError, LabelQuery, PodQuery};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::{debug, info, warn};

impl Reconciler {
    /// Runs the upgrade pass.
    pub(crate) async fn upgrade(&self, target: &Target<'_>) -> Result<StepOutcome, ControllerError> {
        let outcome = self.update_operands(target).await?;
        if outcome != StepOutcome::NothingToDo {
            return Ok(outcome);
        }

        let Some(node) = self.select_stale_node(target).await? else {
            debug!("Onload {}/{} is at version {} on every node", target.namespace, target.name, target.version());
            return Ok(StepOutcome::NothingToDo);
        };
        self.drain_node(target, &node).await
    }

    /// Replaces the first operand whose version differs from the declared
    /// one: the device plugin DaemonSet, then the Modules, then the control
    /// plane DaemonSet.
    async fn update_operands(&self, target: &Target<'_>) -> Result<StepOutcome, ControllerError> {
        let plugin = manifests::device_plugin_daemonset(target)?;
        if self.update_daemonset(target, plugin).await? {
            return Ok(StepOutcome::RequeueNow);
        }

        let version = target.version();
        for kind in ModuleKind::ALL {
            let name = kind.resource_name(target.name);
            let Some(mut current) = self.client.get_module(target.namespace, &name).await? else {
                continue;
            };
            if !kind.is_wanted(&target.onload.spec) {
                self.client.delete_module(target.namespace, &name).await?;
                info!("Deleted Module {}/{}, no kernel mapping requests it", target.namespace, name);
                return Ok(StepOutcome::RequeueNow);
            }
            if current.loader_version() == Some(version) {
                continue;
            }
            current.spec = manifests::build_module(target, kind)?.spec;
            self.client.replace_module(&current).await?;
            info!("Updated Module {}/{} to version {}", target.namespace, name, version);
            return Ok(StepOutcome::RequeueNow);
        }

        let cplane = manifests::cplane_daemonset(target)?;
        if self.update_daemonset(target, cplane).await? {
            return Ok(StepOutcome::RequeueNow);
        }
        Ok(StepOutcome::NothingToDo)
    }

    /// Copies the labels and spec of `desired` onto the live DaemonSet if its
    /// version differs. Returns true if it was replaced.
    async fn update_daemonset(&self, target: &Target<'_>, desired: DaemonSet) -> Result<bool, ControllerError> {
        let name = desired.metadata.name.clone().unwrap_or_default();
        let Some(mut current) = self.client.get_daemonset(target.namespace, &name).await? else {
            return Ok(false);
        };
        if operand_version(&current) == Some(target.version()) {
            return Ok(false);
        }
        current.metadata.labels = desired.metadata.labels;
        current.spec = desired.spec;
        self.client.replace_daemonset(&current).await?;
        info!("Updated DaemonSet {}/{} to version {}", target.namespace, name, target.version());
        Ok(true)
    }

    /// The selected node with an outdated loader marker that sorts first
    /// by name, if any.
    async fn select_stale_node(&self, target: &Target<'_>) -> Result<Option<Node>, ControllerError> {
        let loader_key = ModuleKind::Onload.marker_key(target.name, target.namespace);
        let nodes = self
            .client
            .list_nodes(&target.selector().and_exists(loader_key.clone()))
            .await?;
        Ok(nodes
            .into_iter()
            .filter(|n| label_value(n, &loader_key) != Some(target.version()))
            .min_by(|a, b| node_name(a).cmp(node_name(b))))
    }

    /// Takes the next drain step on `node`.
    async fn drain_node(&self, target: &Target<'_>, node: &Node) -> Result<StepOutcome, ControllerError> {
        let name = node_name(node);
        let ready_key = target.ready_key();
        let sfc_key = ModuleKind::Sfc.marker_key(target.name, target.namespace);
        let loader_key = ModuleKind::Onload.marker_key(target.name, target.namespace);

        if label_value(node, &ready_key).is_some() {
            info!("Draining node {} for Onload {}", name, target.version());
            self.unset_label(node, &ready_key).await?;
            self.metrics.record_drain_action("remove_ready");
            return Ok(StepOutcome::RequeueNow);
        }

        let plugin_pods = PodQuery::on_node(name)
            .in_namespace(target.namespace)
            .with_labels(LabelQuery::everything().and_equals(
                OPERAND_NAME_LABEL,
                manifests::device_plugin_daemonset_name(target.name),
            ));
        if !self.client.list_pods(&plugin_pods).await?.is_empty() {
            info!("Waiting for the device plugin to leave node {}", name);
            return Ok(StepOutcome::RequeueAfter(self.requeue_delay));
        }

        let users: Vec<Pod> = self
            .client
            .list_pods(&PodQuery::on_node(name))
            .await?
            .into_iter()
            .filter(|p| is_active(p) && requests_onload(p))
            .collect();
        if !users.is_empty() {
            for pod in users.iter().filter(|p| p.metadata.deletion_timestamp.is_none()) {
                self.evict(pod).await?;
            }
            info!("Waiting for {} pod(s) using {} to leave node {}", users.len(), ONLOAD_RESOURCE, name);
            return Ok(StepOutcome::RequeueAfter(self.requeue_delay));
        }

        if label_value(node, &sfc_key).is_some() {
            self.unset_label(node, &sfc_key).await?;
            self.metrics.record_drain_action("remove_sfc");
            return Ok(StepOutcome::RequeueNow);
        }

        self.unset_label(node, &loader_key).await?;
        self.metrics.record_drain_action("remove_loader");
        Ok(StepOutcome::RequeueNow)
    }

    /// Requests eviction of one pod. A refusal leaves the pod pending for
    /// the next pass.
    async fn evict(&self, pod: &Pod) -> Result<(), ControllerError> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        match self.client.evict_pod(namespace, name).await {
            Ok(()) => {
                info!("Evicted pod {}/{}", namespace, name);
                self.metrics.record_drain_action("evict");
                Ok(())
            }
            Err(ClusterError::EvictionBlocked(reason)) => {
                warn!("Eviction of pod {}/{} refused: {}", namespace, name, reason);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Pods that have finished no longer hold their resources
fn is_active(pod: &Pod) -> bool {
    !matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded" | "Failed")
    )
}

/// True if the pod asks for a nonzero amount of `amd.com/onload` in any
/// container. Requests fall back to limits, as they do for extended
/// resources.
pub(crate) fn requests_onload(pod: &Pod) -> bool {
    let Some(spec) = &pod.spec else {
        return false;
    };
    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .filter_map(|c| c.resources.as_ref())
        .any(|resources| {
            resources
                .requests
                .as_ref()
                .and_then(|q| q.get(ONLOAD_RESOURCE))
                .or_else(|| resources.limits.as_ref().and_then(|q| q.get(ONLOAD_RESOURCE)))
                .is_some_and(|quantity| {
                    let numeric: String = quantity
                        .0
                        .trim()
                        .chars()
                        .take_while(|c| c.is_ascii_digit() || *c == '.')
                        .collect();
                    numeric.parse::<f64>().is_ok_and(|amount| amount > 0.0)
                })
        })
}
