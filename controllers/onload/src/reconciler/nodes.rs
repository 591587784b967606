//! Marker labeling passes
//!
//! The loader pass asks KMM for the module on each selected node by writing
//! the loader marker (and the SFC marker once the loader marker is current).
//! The ready pass then opens each node whose module is current to the
//! operand DaemonSets. Both passes finish by dropping their markers from
//! nodes that no longer match the selector.

use super::labels::{label_value, node_name, MODULE_LOADER_POD_LABEL};
use super::module_kind::ModuleKind;
use super::{Reconciler, StepOutcome, Target};
use crate::error::ControllerError;
use cluster_client::{LabelChanges, LabelQuery, PodQuery};
use k8s_openapi::api::core::v1::Node;
use tracing::info;

impl Reconciler {
    /// Writes missing loader and SFC markers on selected nodes.
    ///
    /// A node whose previous module loader pod is still around is left
    /// alone until the pod is gone; labeling it now would make KMM load the
    /// new module while the old one is still being unloaded.
    pub(crate) async fn label_loader_markers(&self, target: &Target<'_>) -> Result<StepOutcome, ControllerError> {
        let version = target.version();
        let loader_key = ModuleKind::Onload.marker_key(target.name, target.namespace);
        let sfc_key = ModuleKind::Sfc.marker_key(target.name, target.namespace);
        let sfc_wanted = ModuleKind::Sfc.is_wanted(&target.onload.spec);

        let mut changed = false;
        for mut node in self.selected_nodes(target).await? {
            if label_value(&node, &loader_key).is_none() {
                if self.loader_pods_linger(target, ModuleKind::Onload, node_name(&node)).await? {
                    info!("Waiting for Onload module loader pods to leave node {}", node_name(&node));
                    return Ok(StepOutcome::RequeueAfter(self.requeue_delay));
                }
                node = self.set_label(&node, &loader_key, version).await?;
                changed = true;
            }

            // Load SFC only on top of the current Onload module
            if sfc_wanted
                && label_value(&node, &sfc_key).is_none()
                && label_value(&node, &loader_key) == Some(version)
            {
                if self.loader_pods_linger(target, ModuleKind::Sfc, node_name(&node)).await? {
                    info!("Waiting for SFC module loader pods to leave node {}", node_name(&node));
                    return Ok(StepOutcome::RequeueAfter(self.requeue_delay));
                }
                self.set_label(&node, &sfc_key, version).await?;
                changed = true;
            }
        }
        if changed {
            return Ok(StepOutcome::RequeueNow);
        }

        // Markers go in the reverse of the order they were added. A node
        // whose ready marker could not be removed keeps its module markers.
        let ready_key = target.ready_key();
        let keep_modules = |n: &Node| target.selects(n) || label_value(n, &ready_key).is_some();
        let mut removed = self.remove_label_where(&ready_key, |n| target.selects(n)).await?;
        removed |= if sfc_wanted {
            self.remove_label_where(&sfc_key, keep_modules).await?
        } else {
            self.remove_label_where(&sfc_key, |_| false).await?
        };
        removed |= self.remove_label_where(&loader_key, keep_modules).await?;
        Ok(if removed { StepOutcome::RequeueNow } else { StepOutcome::NothingToDo })
    }

    /// Writes the ready marker on selected nodes whose loader marker is
    /// current and whose ready marker is not.
    pub(crate) async fn label_ready_markers(&self, target: &Target<'_>) -> Result<StepOutcome, ControllerError> {
        let version = target.version();
        let loader_key = ModuleKind::Onload.marker_key(target.name, target.namespace);
        let ready_key = target.ready_key();

        let mut changed = false;
        for node in self.selected_nodes(target).await? {
            if label_value(&node, &loader_key) == Some(version) && label_value(&node, &ready_key) != Some(version) {
                self.set_label(&node, &ready_key, version).await?;
                changed = true;
            }
        }
        if changed {
            return Ok(StepOutcome::RequeueNow);
        }

        let removed = self.remove_label_where(&ready_key, |n| target.selects(n)).await?;
        Ok(if removed { StepOutcome::RequeueNow } else { StepOutcome::NothingToDo })
    }

    /// Nodes matching the selector, ordered by name
    pub(crate) async fn selected_nodes(&self, target: &Target<'_>) -> Result<Vec<Node>, ControllerError> {
        let mut nodes = self.client.list_nodes(&target.selector()).await?;
        nodes.sort_by(|a, b| node_name(a).cmp(node_name(b)));
        Ok(nodes)
    }

    async fn loader_pods_linger(
        &self,
        target: &Target<'_>,
        kind: ModuleKind,
        node: &str,
    ) -> Result<bool, ControllerError> {
        let query = PodQuery::on_node(node)
            .in_namespace(target.namespace)
            .with_labels(LabelQuery::everything().and_equals(MODULE_LOADER_POD_LABEL, kind.resource_name(target.name)));
        Ok(!self.client.list_pods(&query).await?.is_empty())
    }

    /// Sets one label and returns the updated node.
    pub(crate) async fn set_label(&self, node: &Node, key: &str, value: &str) -> Result<Node, ControllerError> {
        let changes: LabelChanges = [(key.to_string(), Some(value.to_string()))].into_iter().collect();
        let updated = self.client.patch_node_labels(node, &changes).await?;
        info!("Labeled node {} with {}={}", node_name(node), key, value);
        Ok(updated)
    }

    /// Removes one label and returns the updated node.
    pub(crate) async fn unset_label(&self, node: &Node, key: &str) -> Result<Node, ControllerError> {
        let changes: LabelChanges = [(key.to_string(), None)].into_iter().collect();
        let updated = self.client.patch_node_labels(node, &changes).await?;
        info!("Removed label {} from node {}", key, node_name(node));
        Ok(updated)
    }
}
