//! Kubernetes-backed cluster client
//!
//! Thin wrapper over `kube::Api` that bounds every call with a timeout and
//! maps API failures onto `ClusterError`.

use crate::cluster_trait::{ClusterClientTrait, LabelChanges};
use crate::error::ClusterError;
use crate::selector::{LabelQuery, PodQuery};
use crds::{Module, Onload, OnloadStatus};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Cluster client talking to the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    timeout: Duration,
}

impl KubeClusterClient {
    /// Creates a client whose calls each give up after `timeout`.
    #[must_use]
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Runs one API call under the per-call timeout.
    async fn bounded<T, F>(&self, operation: &str, object: &str, call: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        self.bounded_with(operation, object, call, ClusterError::from_kube).await
    }

    async fn bounded_with<T, F>(
        &self,
        operation: &str,
        object: &str,
        call: F,
        map_err: fn(kube::Error, &str) -> ClusterError,
    ) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_err(e, object)),
            Err(_) => Err(ClusterError::Timeout {
                operation: format!("{} {}", operation, object),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }

    fn namespace_of<K: Resource>(obj: &K) -> Result<String, ClusterError> {
        obj.meta()
            .namespace
            .clone()
            .ok_or_else(|| ClusterError::Api(format!("{} has no namespace", obj.meta().name.as_deref().unwrap_or("<unnamed>"))))
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    async fn get_onload(&self, namespace: &str, name: &str) -> Result<Option<Onload>, ClusterError> {
        let api: Api<Onload> = Api::namespaced(self.client.clone(), namespace);
        let object = format!("Onload {}/{}", namespace, name);
        self.bounded("get", &object, api.get_opt(name)).await
    }

    async fn patch_onload_status(&self, namespace: &str, name: &str, status: &OnloadStatus) -> Result<(), ClusterError> {
        let api: Api<Onload> = Api::namespaced(self.client.clone(), namespace);
        let object = format!("Onload {}/{}", namespace, name);
        let patch = serde_json::json!({ "status": status });
        self.bounded("patch status", &object, api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await?;
        Ok(())
    }

    async fn list_nodes(&self, query: &LabelQuery) -> Result<Vec<Node>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let selector = query.to_selector_string();
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector);
        }
        debug!("Listing nodes with selector '{}'", selector);
        let list = self.bounded("list", "nodes", api.list(&params)).await?;
        Ok(list.items)
    }

    async fn patch_node_labels(&self, node: &Node, changes: &LabelChanges) -> Result<Node, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let name = node.name_any();
        let mut patch = serde_json::json!({ "metadata": { "labels": changes } });
        if let Some(rv) = node.resource_version() {
            // Turns the merge patch into a compare-and-swap against the snapshot
            patch["metadata"]["resourceVersion"] = serde_json::Value::String(rv);
        }
        let object = format!("Node {}", name);
        self.bounded("patch labels", &object, api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await
    }

    async fn list_pods(&self, query: &PodQuery) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = match &query.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let selector = query.labels.to_selector_string();
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector);
        }
        if let Some(fields) = query.field_selector() {
            params = params.fields(&fields);
        }
        let list = self.bounded("list", "pods", api.list(&params)).await?;
        Ok(list.items)
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let object = format!("Pod {}/{}", namespace, name);
        let evict_params = EvictParams::default();
        let eviction = api.evict(name, &evict_params);
        match self.bounded_with("evict", &object, eviction, ClusterError::from_eviction).await {
            Ok(_) | Err(ClusterError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_module(&self, namespace: &str, name: &str) -> Result<Option<Module>, ClusterError> {
        let api: Api<Module> = Api::namespaced(self.client.clone(), namespace);
        let object = format!("Module {}/{}", namespace, name);
        self.bounded("get", &object, api.get_opt(name)).await
    }

    async fn create_module(&self, module: &Module) -> Result<Module, ClusterError> {
        let namespace = Self::namespace_of(module)?;
        let api: Api<Module> = Api::namespaced(self.client.clone(), &namespace);
        let object = format!("Module {}/{}", namespace, module.name_any());
        self.bounded("create", &object, api.create(&PostParams::default(), module)).await
    }

    async fn replace_module(&self, module: &Module) -> Result<Module, ClusterError> {
        let namespace = Self::namespace_of(module)?;
        let api: Api<Module> = Api::namespaced(self.client.clone(), &namespace);
        let name = module.name_any();
        let object = format!("Module {}/{}", namespace, name);
        self.bounded("replace", &object, api.replace(&name, &PostParams::default(), module)).await
    }

    async fn delete_module(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Module> = Api::namespaced(self.client.clone(), namespace);
        let object = format!("Module {}/{}", namespace, name);
        match self.bounded("delete", &object, api.delete(name, &DeleteParams::default())).await {
            Ok(_) | Err(ClusterError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn get_daemonset(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>, ClusterError> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        let object = format!("DaemonSet {}/{}", namespace, name);
        self.bounded("get", &object, api.get_opt(name)).await
    }

    async fn create_daemonset(&self, daemonset: &DaemonSet) -> Result<DaemonSet, ClusterError> {
        let namespace = Self::namespace_of(daemonset)?;
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);
        let object = format!("DaemonSet {}/{}", namespace, daemonset.name_any());
        self.bounded("create", &object, api.create(&PostParams::default(), daemonset)).await
    }

    async fn replace_daemonset(&self, daemonset: &DaemonSet) -> Result<DaemonSet, ClusterError> {
        let namespace = Self::namespace_of(daemonset)?;
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &namespace);
        let name = daemonset.name_any();
        let object = format!("DaemonSet {}/{}", namespace, name);
        self.bounded("replace", &object, api.replace(&name, &PostParams::default(), daemonset)).await
    }
}
