//! ClusterClient trait for mocking
//!
//! Every Kubernetes read and write the operator performs goes through this
//! trait. The concrete `KubeClusterClient` implements it against the API
//! server, and tests use `MockClusterClient`.

use crate::error::ClusterError;
use crate::selector::{LabelQuery, PodQuery};
use crds::{Module, Onload, OnloadStatus};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use std::collections::BTreeMap;

/// Label edits for a node: `Some(value)` sets the label, `None` removes it.
pub type LabelChanges = BTreeMap<String, Option<String>>;

/// Trait for cluster API operations
///
/// Gets return `Ok(None)` for objects that do not exist. Node label patches
/// are optimistic: they carry the `resourceVersion` of the node passed in
/// and fail with `ClusterError::Conflict` if the node changed since.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    // Onload
    async fn get_onload(&self, namespace: &str, name: &str) -> Result<Option<Onload>, ClusterError>;
    async fn patch_onload_status(&self, namespace: &str, name: &str, status: &OnloadStatus) -> Result<(), ClusterError>;

    // Nodes
    async fn list_nodes(&self, query: &LabelQuery) -> Result<Vec<Node>, ClusterError>;
    /// Applies `changes` to the node's labels and returns the updated node.
    async fn patch_node_labels(&self, node: &Node, changes: &LabelChanges) -> Result<Node, ClusterError>;

    // Pods
    async fn list_pods(&self, query: &PodQuery) -> Result<Vec<Pod>, ClusterError>;
    /// Requests eviction. A pod that is already gone counts as evicted.
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    // KMM modules
    async fn get_module(&self, namespace: &str, name: &str) -> Result<Option<Module>, ClusterError>;
    async fn create_module(&self, module: &Module) -> Result<Module, ClusterError>;
    /// Replaces the module. Fails with a conflict if its `resourceVersion` is stale.
    async fn replace_module(&self, module: &Module) -> Result<Module, ClusterError>;
    async fn delete_module(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    // DaemonSets
    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ClusterError>;
    async fn create_daemonset(&self, daemonset: &DaemonSet) -> Result<DaemonSet, ClusterError>;
    /// Replaces the DaemonSet. Fails with a conflict if its `resourceVersion` is stale.
    async fn replace_daemonset(&self, daemonset: &DaemonSet) -> Result<DaemonSet, ClusterError>;
}
