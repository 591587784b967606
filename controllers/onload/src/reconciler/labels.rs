//! Node label codec
//!
//! Node labels are the only durable record of where each node is in a
//! rollout. Keys are derived from the Onload resource's namespace and name,
//! so several Onload resources never share a key.

use k8s_openapi::api::core::v1::Node;

/// Prefix KMM watches for ordered module upgrades
pub const LOADER_LABEL_PREFIX: &str = "kmm.node.kubernetes.io/version-module";

/// Prefix of the ready marker. The device plugin and control plane
/// DaemonSets schedule only onto nodes carrying the ready marker.
pub const READY_LABEL_PREFIX: &str = "onload.amd.com/";

/// Label on loader pods naming the KMM Module that created them
pub const MODULE_LOADER_POD_LABEL: &str = "kmm.node.kubernetes.io/module.name";

/// Pod label selecting the pods of an operand DaemonSet
pub const OPERAND_NAME_LABEL: &str = "onload.amd.com/name";

/// Version label on operand DaemonSets
pub const OPERAND_VERSION_LABEL: &str = "onload.amd.com/version";

/// Extended resource advertised by the device plugin
pub const ONLOAD_RESOURCE: &str = "amd.com/onload";

/// Kernel module version requested on a node.
#[must_use]
pub fn loader_marker_key(name: &str, namespace: &str) -> String {
    format!("{}.{}.{}-module", LOADER_LABEL_PREFIX, namespace, name)
}

/// SFC module version requested on a node.
#[must_use]
pub fn sfc_marker_key(name: &str, namespace: &str) -> String {
    format!("{}.{}.{}-sfcmodule", LOADER_LABEL_PREFIX, namespace, name)
}

/// Userland version confirmed usable on a node.
#[must_use]
pub fn ready_marker_key(name: &str, namespace: &str) -> String {
    format!("{}{}.{}", READY_LABEL_PREFIX, namespace, name)
}

/// Value of a node label, if present.
#[must_use]
pub fn label_value<'a>(node: &'a Node, key: &str) -> Option<&'a str> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}

#[must_use]
pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}
