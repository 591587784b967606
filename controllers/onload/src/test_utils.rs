//! Test utilities for unit testing the reconciler
//!
//! Builds Onload resources and a reconciler over `MockClusterClient`, and
//! drives passes until the reconciler has nothing left to do, standing in
//! for the kubelet and DaemonSet controller between passes.

use crate::config::ControllerConfig;
use crate::metrics::Metrics;
use crate::reconciler::labels::{self, label_value, OPERAND_NAME_LABEL};
use crate::reconciler::manifests::device_plugin_daemonset_name;
use crate::reconciler::{Reconciler, StepOutcome};
use cluster_client::mock_helpers::{node, pod};
use cluster_client::{ClusterClientTrait, LabelQuery, MockClusterClient, PodQuery};
use crds::{
    DevicePluginSpec, Onload, OnloadKernelMapping, OnloadReleaseSpec, OnloadSpec, SfcSpec,
};
use prometheus::Registry;
use std::collections::BTreeMap;

pub const NAMESPACE: &str = "onload-system";
pub const NAME: &str = "demo";
pub const WORKER_LABEL: &str = "node-role.kubernetes.io/worker";

/// Onload resource selecting worker nodes
pub fn create_test_onload(version: &str, sfc: bool) -> Onload {
    let mut onload = Onload::new(
        NAME,
        OnloadSpec {
            onload: OnloadReleaseSpec {
                kernel_mappings: vec![OnloadKernelMapping {
                    kernel_module_image: format!("registry.example/onload-module:{}", version),
                    regexp: "^.*\\.x86_64$".to_string(),
                    sfc: sfc.then_some(SfcSpec {}),
                    build: None,
                }],
                user_image: format!("registry.example/onload-user:{}", version),
                version: version.to_string(),
                image_pull_policy: Some("IfNotPresent".to_string()),
            },
            device_plugin: DevicePluginSpec {
                device_plugin_image: format!("registry.example/onload-device-plugin:{}", version),
                ..Default::default()
            },
            selector: [(WORKER_LABEL.to_string(), String::new())].into_iter().collect(),
            service_account_name: "onload-operator-sa".to_string(),
        },
    );
    onload.metadata.namespace = Some(NAMESPACE.to_string());
    onload
}

/// Reconciler over `client` with default settings
pub fn create_test_reconciler(client: &MockClusterClient) -> Reconciler {
    let metrics = Metrics::new(&Registry::new()).expect("register metrics");
    Reconciler::new(client.clone(), &ControllerConfig::default(), metrics)
}

/// Adds a node carrying the worker label
pub fn add_worker(client: &MockClusterClient, name: &str) {
    client.put_node(node(name, &[(WORKER_LABEL, "")]));
}

/// Adds a device plugin pod on `node_name`
pub fn add_device_plugin_pod(client: &MockClusterClient, node_name: &str) {
    let daemonset = device_plugin_daemonset_name(NAME);
    client.put_pod(pod(
        NAMESPACE,
        &format!("device-plugin-{}", node_name),
        node_name,
        &[(OPERAND_NAME_LABEL, daemonset.as_str())],
    ));
}

/// Replaces the stored Onload resource with one at `version`
pub fn bump_version(client: &MockClusterClient, version: &str) {
    let mut onload = client.onload(NAMESPACE, NAME).expect("onload exists");
    let sfc = onload.spec.onload.uses_sfc();
    onload.spec = create_test_onload(version, sfc).spec;
    client.put_onload(onload);
}

/// Marker values on a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Markers {
    pub loader: Option<String>,
    pub sfc: Option<String>,
    pub ready: Option<String>,
}

pub fn markers(client: &MockClusterClient, node_name: &str) -> Markers {
    let labels: BTreeMap<String, String> = client.node_labels(node_name);
    Markers {
        loader: labels.get(&labels::loader_marker_key(NAME, NAMESPACE)).cloned(),
        sfc: labels.get(&labels::sfc_marker_key(NAME, NAMESPACE)).cloned(),
        ready: labels.get(&labels::ready_marker_key(NAME, NAMESPACE)).cloned(),
    }
}

/// Markers of a node fully rolled out at `version`
pub fn rolled_out(version: &str, sfc: bool) -> Markers {
    Markers {
        loader: Some(version.to_string()),
        sfc: sfc.then(|| version.to_string()),
        ready: Some(version.to_string()),
    }
}

/// Checks the per-node ordering invariants: the ready marker only ever
/// matches the loader marker, and the SFC marker never runs ahead of it.
pub fn assert_marker_ordering(client: &MockClusterClient, nodes: &[&str]) {
    for name in nodes {
        let m = markers(client, name);
        if m.ready.is_some() {
            assert_eq!(m.ready, m.loader, "node {} is ready at a version it does not load", name);
        }
        if m.sfc.is_some() {
            assert_eq!(m.sfc, m.loader, "node {} has SFC ahead of Onload", name);
        }
    }
}

/// Number of nodes somewhere between drained and ready again
pub fn nodes_in_flight(client: &MockClusterClient, nodes: &[&str]) -> usize {
    nodes
        .iter()
        .filter(|name| {
            let m = markers(client, name);
            m.ready.is_none() || m.ready != m.loader
        })
        .count()
}

/// Stands in for the cluster between passes: device plugin pods leave
/// nodes without the ready marker, and evicted pods terminate.
pub async fn emulate_cluster(client: &MockClusterClient) {
    let ready_key = labels::ready_marker_key(NAME, NAMESPACE);
    let query = PodQuery::default()
        .in_namespace(NAMESPACE)
        .with_labels(LabelQuery::everything().and_equals(OPERAND_NAME_LABEL, device_plugin_daemonset_name(NAME)));
    let plugin_pods = client.list_pods(&query).await.expect("list pods");
    let nodes = client.list_nodes(&LabelQuery::everything()).await.expect("list nodes");

    for plugin_pod in plugin_pods {
        let node_name = plugin_pod.spec.as_ref().and_then(|s| s.node_name.clone()).unwrap_or_default();
        let still_ready = nodes
            .iter()
            .any(|n| labels::node_name(n) == node_name && label_value(n, &ready_key).is_some());
        if !still_ready {
            client.remove_pod(NAMESPACE, plugin_pod.metadata.name.as_deref().unwrap_or_default());
        }
    }
    client.finish_terminations();
}

/// Runs passes until one reports nothing to do, calling `check` after each
/// pass. Returns the number of passes.
pub async fn run_until_settled<F>(reconciler: &Reconciler, client: &MockClusterClient, check: F) -> usize
where
    F: Fn(&MockClusterClient),
{
    for pass in 1..=200 {
        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile pass");
        check(client);
        match outcome {
            StepOutcome::NothingToDo => return pass,
            StepOutcome::RequeueNow => {}
            StepOutcome::RequeueAfter(_) => emulate_cluster(client).await,
        }
    }
    panic!("reconciliation did not settle");
}

/// Sets up `nodes` as workers and rolls Onload out on them.
pub async fn converged_cluster(nodes: &[&str], version: &str, sfc: bool) -> (MockClusterClient, Reconciler) {
    let client = MockClusterClient::new();
    for name in nodes {
        add_worker(&client, name);
    }
    client.put_onload(create_test_onload(version, sfc));
    let reconciler = create_test_reconciler(&client);
    run_until_settled(&reconciler, &client, |_| {}).await;
    for name in nodes {
        assert_eq!(markers(&client, name), rolled_out(version, sfc));
    }
    (client, reconciler)
}
