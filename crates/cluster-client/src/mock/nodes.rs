//! Node and pod operations for MockClusterClient

use super::MockClusterClient;
use crate::cluster_trait::LabelChanges;
use crate::error::ClusterError;
use crate::selector::{LabelQuery, PodQuery};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

pub fn list_nodes(client: &MockClusterClient, query: &LabelQuery) -> Vec<Node> {
    client
        .state()
        .nodes
        .values()
        .filter(|n| query.matches(n.metadata.labels.as_ref()))
        .cloned()
        .collect()
}

pub fn patch_node_labels(client: &MockClusterClient, node: &Node, changes: &LabelChanges) -> Result<Node, ClusterError> {
    let name = node.metadata.name.clone().unwrap_or_default();
    let mut state = client.state();

    if state.failing_nodes.contains(&name) {
        return Err(ClusterError::Api(format!("InternalError (500) on Node {}: injected failure", name)));
    }
    let current_version = state
        .nodes
        .get(&name)
        .ok_or_else(|| ClusterError::NotFound(format!("Node {}", name)))?
        .metadata
        .resource_version
        .clone();
    if node.metadata.resource_version.is_some() && node.metadata.resource_version != current_version {
        return Err(ClusterError::Conflict(format!(
            "Node {}: resourceVersion {:?} is stale, current is {:?}",
            name, node.metadata.resource_version, current_version
        )));
    }

    let version = state.bump_version();
    let summary = changes
        .iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{}={}", k, v),
            None => format!("-{}", k),
        })
        .collect::<Vec<_>>()
        .join(",");
    state.actions.push(format!("patch node/{} {}", name, summary));

    let stored = state
        .nodes
        .get_mut(&name)
        .ok_or_else(|| ClusterError::NotFound(format!("Node {}", name)))?;
    let labels = stored.metadata.labels.get_or_insert_with(Default::default);
    for (key, value) in changes {
        match value {
            Some(v) => {
                labels.insert(key.clone(), v.clone());
            }
            None => {
                labels.remove(key);
            }
        }
    }
    stored.metadata.resource_version = Some(version);
    Ok(stored.clone())
}

pub fn list_pods(client: &MockClusterClient, query: &PodQuery) -> Vec<Pod> {
    client
        .state()
        .pods
        .iter()
        .filter(|((ns, _), _)| query.namespace.as_ref().is_none_or(|q| q == ns))
        .filter(|(_, p)| query.labels.matches(p.metadata.labels.as_ref()))
        .filter(|(_, p)| {
            query.node_name.as_ref().is_none_or(|node| {
                p.spec.as_ref().and_then(|s| s.node_name.as_ref()) == Some(node)
            })
        })
        .map(|(_, p)| p.clone())
        .collect()
}

pub fn evict_pod(client: &MockClusterClient, namespace: &str, name: &str) -> Result<(), ClusterError> {
    let key = (namespace.to_string(), name.to_string());
    let mut state = client.state();

    if state.blocked_evictions.contains(&key) {
        return Err(ClusterError::EvictionBlocked(format!(
            "Pod {}/{}: Cannot evict pod as it would violate the pod's disruption budget",
            namespace, name
        )));
    }
    let Some(pod) = state.pods.get(&key) else {
        return Ok(());
    };
    if pod.metadata.deletion_timestamp.is_some() {
        return Ok(());
    }

    let version = state.bump_version();
    state.actions.push(format!("evict pod/{}/{}", namespace, name));
    if let Some(pod) = state.pods.get_mut(&key) {
        pod.metadata.deletion_timestamp = eviction_time();
        pod.metadata.resource_version = Some(version);
    }
    Ok(())
}

/// Fixed deletion timestamp stamped on evicted pods
fn eviction_time() -> Option<Time> {
    serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).ok()
}
