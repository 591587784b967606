//! Mock ClusterClient for unit testing
//!
//! In-memory stand-in for the API server implementing `ClusterClientTrait`.
//! Objects live in one shared state so a test can seed the cluster, run a
//! reconciliation pass, then inspect or mutate what the pass left behind.
//!
//! - `nodes.rs` - nodes, pods and evictions
//! - `operands.rs` - Onload resources, KMM modules and DaemonSets
//! - `helpers.rs` - builders for test objects

mod nodes;
pub mod helpers;
mod operands;


use crate::cluster_trait::{ClusterClientTrait, LabelChanges};
use crate::error::ClusterError;
use crate::selector::{LabelQuery, PodQuery};
use crds::{Module, Onload, OnloadStatus};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::Resource;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Namespace/name key for namespaced objects
pub(crate) type ObjectKey = (String, String);

#[derive(Debug, Default)]
pub(crate) struct MockState {
    pub(crate) onloads: BTreeMap<ObjectKey, Onload>,
    pub(crate) nodes: BTreeMap<String, Node>,
    pub(crate) pods: BTreeMap<ObjectKey, Pod>,
    pub(crate) modules: BTreeMap<ObjectKey, Module>,
    pub(crate) daemonsets: BTreeMap<ObjectKey, DaemonSet>,
    /// Nodes whose label patches fail
    pub(crate) failing_nodes: BTreeSet<String>,
    /// Pods whose evictions are refused
    pub(crate) blocked_evictions: BTreeSet<ObjectKey>,
    /// Log of mutating calls, in order
    pub(crate) actions: Vec<String>,
    next_version: u64,
}

impl MockState {
    /// Next value for `metadata.resourceVersion`
    pub(crate) fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    /// Stamps uid and resourceVersion on a newly stored object.
    pub(crate) fn admit<K: Resource>(&mut self, obj: &mut K) {
        let version = self.bump_version();
        let meta = obj.meta_mut();
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{:06}", version));
        }
        meta.resource_version = Some(version);
    }
}

/// Mock cluster client for testing
///
/// Cheap to clone; clones share the same cluster state.
#[derive(Debug, Clone, Default)]
pub struct MockClusterClient {
    pub(crate) state: Arc<Mutex<MockState>>,
}

impl MockClusterClient {
    /// Create a new, empty cluster
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace an Onload resource (for test setup)
    pub fn put_onload(&self, mut onload: Onload) {
        let mut state = self.state();
        state.admit(&mut onload);
        let key = key_of(&onload);
        state.onloads.insert(key, onload);
    }

    /// Delete an Onload resource, as a user would
    pub fn remove_onload(&self, namespace: &str, name: &str) -> Option<Onload> {
        self.state().onloads.remove(&(namespace.to_string(), name.to_string()))
    }

    /// Current Onload resource
    #[must_use]
    pub fn onload(&self, namespace: &str, name: &str) -> Option<Onload> {
        self.state().onloads.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Add or replace a node (for test setup)
    pub fn put_node(&self, mut node: Node) {
        let mut state = self.state();
        state.admit(&mut node);
        let name = node.meta().name.clone().unwrap_or_default();
        state.nodes.insert(name, node);
    }

    /// Current labels of a node, empty if the node does not exist
    #[must_use]
    pub fn node_labels(&self, name: &str) -> BTreeMap<String, String> {
        self.state()
            .nodes
            .get(name)
            .and_then(|n| n.metadata.labels.clone())
            .unwrap_or_default()
    }

    /// Overwrite a node's labels out of band, as an administrator would
    pub fn set_node_labels(&self, name: &str, labels: BTreeMap<String, String>) {
        let mut state = self.state();
        let version = state.bump_version();
        if let Some(node) = state.nodes.get_mut(name) {
            node.metadata.labels = Some(labels);
            node.metadata.resource_version = Some(version);
        }
    }

    /// Add or replace a pod (for test setup)
    pub fn put_pod(&self, mut pod: Pod) {
        let mut state = self.state();
        state.admit(&mut pod);
        let key = key_of(&pod);
        state.pods.insert(key, pod);
    }

    /// Remove a pod, as the kubelet would once it has stopped
    pub fn remove_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state().pods.remove(&(namespace.to_string(), name.to_string()))
    }

    /// True if the pod exists, terminating or not
    #[must_use]
    pub fn has_pod(&self, namespace: &str, name: &str) -> bool {
        self.state().pods.contains_key(&(namespace.to_string(), name.to_string()))
    }

    /// True if the pod exists and has been evicted
    #[must_use]
    pub fn is_terminating(&self, namespace: &str, name: &str) -> bool {
        self.state()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .is_some_and(|p| p.metadata.deletion_timestamp.is_some())
    }

    /// Remove every terminating pod, completing outstanding evictions
    pub fn finish_terminations(&self) -> usize {
        let mut state = self.state();
        let before = state.pods.len();
        state.pods.retain(|_, p| p.metadata.deletion_timestamp.is_none());
        before - state.pods.len()
    }

    /// Add or replace a KMM module (for test setup)
    pub fn put_module(&self, mut module: Module) {
        let mut state = self.state();
        state.admit(&mut module);
        let key = key_of(&module);
        state.modules.insert(key, module);
    }

    #[must_use]
    pub fn module(&self, namespace: &str, name: &str) -> Option<Module> {
        self.state().modules.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// All modules in a namespace
    #[must_use]
    pub fn modules(&self, namespace: &str) -> Vec<Module> {
        self.state()
            .modules
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Add or replace a DaemonSet (for test setup)
    pub fn put_daemonset(&self, mut daemonset: DaemonSet) {
        let mut state = self.state();
        state.admit(&mut daemonset);
        let key = key_of(&daemonset);
        state.daemonsets.insert(key, daemonset);
    }

    #[must_use]
    pub fn daemonset(&self, namespace: &str, name: &str) -> Option<DaemonSet> {
        self.state().daemonsets.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// All DaemonSets in a namespace
    #[must_use]
    pub fn daemonsets(&self, namespace: &str) -> Vec<DaemonSet> {
        self.state()
            .daemonsets
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// Make every label patch on `node` fail
    pub fn fail_node_patches(&self, node: &str) {
        self.state().failing_nodes.insert(node.to_string());
    }

    /// Make evictions of a pod fail as if a disruption budget refused them
    pub fn block_eviction(&self, namespace: &str, name: &str) {
        self.state().blocked_evictions.insert((namespace.to_string(), name.to_string()));
    }

    /// Mutating calls issued so far, oldest first
    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        self.state().actions.clone()
    }

    /// Number of mutating calls issued so far
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.state().actions.len()
    }

    /// Forget the recorded actions
    pub fn clear_actions(&self) {
        self.state().actions.clear();
    }
}

pub(crate) fn key_of<K: Resource>(obj: &K) -> ObjectKey {
    let meta = obj.meta();
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get_onload(&self, namespace: &str, name: &str) -> Result<Option<Onload>, ClusterError> {
        Ok(self.onload(namespace, name))
    }

    async fn patch_onload_status(&self, namespace: &str, name: &str, status: &OnloadStatus) -> Result<(), ClusterError> {
        operands::patch_onload_status(self, namespace, name, status)
    }

    // Nodes and pods - delegated to nodes module
    async fn list_nodes(&self, query: &LabelQuery) -> Result<Vec<Node>, ClusterError> {
        Ok(nodes::list_nodes(self, query))
    }

    async fn patch_node_labels(&self, node: &Node, changes: &LabelChanges) -> Result<Node, ClusterError> {
        nodes::patch_node_labels(self, node, changes)
    }

    async fn list_pods(&self, query: &PodQuery) -> Result<Vec<Pod>, ClusterError> {
        Ok(nodes::list_pods(self, query))
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        nodes::evict_pod(self, namespace, name)
    }

    // Operands - delegated to operands module
    async fn get_module(&self, namespace: &str, name: &str) -> Result<Option<Module>, ClusterError> {
        Ok(self.module(namespace, name))
    }

    async fn create_module(&self, module: &Module) -> Result<Module, ClusterError> {
        operands::create(self, module, "module", |s| &mut s.modules)
    }

    async fn replace_module(&self, module: &Module) -> Result<Module, ClusterError> {
        operands::replace(self, module, "module", |s| &mut s.modules)
    }

    async fn delete_module(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        operands::delete(self, namespace, name, "module", |s| &mut s.modules);
        Ok(())
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ClusterError> {
        Ok(self.daemonset(namespace, name))
    }

    async fn create_daemonset(&self, daemonset: &DaemonSet) -> Result<DaemonSet, ClusterError> {
        operands::create(self, daemonset, "daemonset", |s| &mut s.daemonsets)
    }

    async fn replace_daemonset(&self, daemonset: &DaemonSet) -> Result<DaemonSet, ClusterError> {
        operands::replace(self, daemonset, "daemonset", |s| &mut s.daemonsets)
    }
}
