//! Node label removal
//!
//! Used for stale markers on nodes that left the selector and for the full
//! sweep once an Onload resource is deleted. Removal is best effort per
//! node: a failed patch is logged and the sweep moves on.

use super::labels::{self, node_name};
use super::Reconciler;
use crate::error::ControllerError;
use cluster_client::{LabelChanges, LabelQuery};
use k8s_openapi::api::core::v1::Node;
use tracing::{info, warn};

impl Reconciler {
    /// Removes `key` from every node carrying it unless `keep` holds for the
    /// node. Returns true if any node changed.
    pub(crate) async fn remove_label_where<F>(&self, key: &str, keep: F) -> Result<bool, ControllerError>
    where
        F: Fn(&Node) -> bool,
    {
        let nodes = self.client.list_nodes(&LabelQuery::has_key(key)).await?;
        let changes: LabelChanges = [(key.to_string(), None)].into_iter().collect();

        let mut changed = false;
        for node in nodes.iter().filter(|n| !keep(n)) {
            match self.client.patch_node_labels(node, &changes).await {
                Ok(_) => {
                    info!("Removed label {} from node {}", key, node_name(node));
                    changed = true;
                }
                Err(e) => warn!("Failed to remove label {} from node {}: {}", key, node_name(node), e),
            }
        }
        Ok(changed)
    }

    /// Removes every marker the Onload resource `namespace/name` may have
    /// left on any node.
    pub(crate) async fn remove_all_labels(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let keys = [
            labels::ready_marker_key(name, namespace),
            labels::sfc_marker_key(name, namespace),
            labels::loader_marker_key(name, namespace),
        ];
        for key in &keys {
            self.remove_label_where(key, |_| false).await?;
        }
        Ok(())
    }
}
