//! Builders for objects seeded into the mock cluster

use k8s_openapi::api::core::v1::{Container, Node, Pod, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Node with the given labels
#[must_use]
pub fn node(name: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(label_map(labels)),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Pod bound to `node_name` with a single container
#[must_use]
pub fn pod(namespace: &str, name: &str, node_name: &str, labels: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(label_map(labels)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node_name.to_string()),
            containers: vec![Container {
                name: "main".to_string(),
                image: Some("busybox".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod whose container requests `amount` of an extended resource
#[must_use]
pub fn pod_requesting(namespace: &str, name: &str, node_name: &str, resource: &str, amount: &str) -> Pod {
    let mut pod = pod(namespace, name, node_name, &[]);
    if let Some(container) = pod.spec.as_mut().and_then(|s| s.containers.first_mut()) {
        let quantities: BTreeMap<String, Quantity> =
            [(resource.to_string(), Quantity(amount.to_string()))].into_iter().collect();
        container.resources = Some(ResourceRequirements {
            requests: Some(quantities.clone()),
            limits: Some(quantities),
            ..Default::default()
        });
    }
    pod
}

fn label_map(labels: &[(&str, &str)]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}
