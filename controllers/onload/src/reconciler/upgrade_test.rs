//! Unit tests for the rolling upgrade

#[cfg(test)]
mod tests {
    use super::super::labels::{self, ONLOAD_RESOURCE};
    use super::super::manifests::{cplane_daemonset_name, device_plugin_daemonset_name, operand_version};
    use super::super::upgrade::requests_onload;
    use super::super::{Reconciler, StepOutcome};
    use crate::test_utils::*;
    use cluster_client::mock_helpers::{pod, pod_requesting};
    use cluster_client::MockClusterClient;
    use k8s_openapi::api::core::v1::{Container, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    const WORKERS: [&str; 3] = ["worker-1", "worker-2", "worker-3"];

    /// Runs passes while they ask to be requeued immediately
    async fn step_until_waiting(reconciler: &Reconciler) -> StepOutcome {
        for _ in 0..50 {
            let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile pass");
            if outcome != StepOutcome::RequeueNow {
                return outcome;
            }
        }
        panic!("reconciler never waited");
    }

    /// Runs passes until `done` holds
    async fn step_until<F>(reconciler: &Reconciler, client: &MockClusterClient, done: F)
    where
        F: Fn(&MockClusterClient) -> bool,
    {
        for _ in 0..50 {
            reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile pass");
            if done(client) {
                return;
            }
        }
        panic!("condition never reached");
    }

    fn node_patches(actions: &[String], node: &str) -> Vec<String> {
        let prefix = format!("patch node/{} ", node);
        actions
            .iter()
            .filter_map(|a| a.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn test_rolling_upgrade_moves_one_node_at_a_time() {
        let (client, reconciler) = converged_cluster(&WORKERS, "1", true).await;
        for name in WORKERS {
            add_device_plugin_pod(&client, name);
        }
        client.put_pod(pod_requesting("apps", "latency-sensitive", "worker-2", ONLOAD_RESOURCE, "1"));
        client.clear_actions();

        bump_version(&client, "2");
        run_until_settled(&reconciler, &client, |c| {
            assert_marker_ordering(c, &WORKERS);
            assert!(nodes_in_flight(c, &WORKERS) <= 1, "more than one node drained at once");
        })
        .await;

        for name in WORKERS {
            assert_eq!(markers(&client, name), rolled_out("2", true), "node {}", name);
        }
        assert!(!client.has_pod("apps", "latency-sensitive"));
        for name in [cplane_daemonset_name(NAME), device_plugin_daemonset_name(NAME)] {
            let daemonset = client.daemonset(NAMESPACE, &name).expect("daemonset exists");
            assert_eq!(operand_version(&daemonset), Some("2"), "daemonset {}", name);
        }
        for name in ["demo-onload-module", "demo-sfc-module"] {
            let module = client.module(NAMESPACE, name).expect("module exists");
            assert_eq!(module.loader_version(), Some("2"), "module {}", name);
        }

        assert_eq!(reconciler.metrics.drain_action_count("remove_ready"), 3);
        assert_eq!(reconciler.metrics.drain_action_count("evict"), 1);
        assert_eq!(reconciler.metrics.drain_action_count("remove_sfc"), 3);
        assert_eq!(reconciler.metrics.drain_action_count("remove_loader"), 3);
    }

    #[tokio::test]
    async fn test_drain_steps_are_ordered() {
        let (client, reconciler) = converged_cluster(&WORKERS, "1", true).await;
        client.clear_actions();

        bump_version(&client, "2");
        run_until_settled(&reconciler, &client, |_| {}).await;

        let actions = client.actions();
        let loader = labels::loader_marker_key(NAME, NAMESPACE);
        let sfc = labels::sfc_marker_key(NAME, NAMESPACE);
        let ready = labels::ready_marker_key(NAME, NAMESPACE);
        let expected = vec![
            format!("-{}", ready),
            format!("-{}", sfc),
            format!("-{}", loader),
            format!("{}=2", loader),
            format!("{}=2", sfc),
            format!("{}=2", ready),
        ];
        for name in WORKERS {
            assert_eq!(node_patches(&actions, name), expected, "node {}", name);
        }

        // Operands move to the new version before any node is touched
        let first_node_patch = actions
            .iter()
            .position(|a| a.starts_with("patch node/"))
            .expect("nodes were patched");
        let operand_updates: Vec<&String> = actions[..first_node_patch].iter().collect();
        assert_eq!(
            operand_updates,
            vec![
                "replace daemonset/onload-system/demo-onload-device-plugin-ds",
                "replace module/onload-system/demo-onload-module",
                "replace module/onload-system/demo-sfc-module",
                "replace daemonset/onload-system/demo-onload-cplane-ds",
            ]
        );

        // Nodes are finished one after another
        let last_of_first = actions
            .iter()
            .rposition(|a| a == &format!("patch node/worker-1 {}=2", ready))
            .expect("worker-1 came back");
        let first_of_second = actions
            .iter()
            .position(|a| a.starts_with("patch node/worker-2 "))
            .expect("worker-2 was drained");
        assert!(last_of_first < first_of_second);
    }

    #[tokio::test]
    async fn test_drain_waits_for_device_plugin_pod() {
        let (client, reconciler) = converged_cluster(&WORKERS[..2], "1", false).await;
        add_device_plugin_pod(&client, "worker-1");
        bump_version(&client, "2");

        let outcome = step_until_waiting(&reconciler).await;
        assert!(matches!(outcome, StepOutcome::RequeueAfter(_)));
        let waiting = markers(&client, "worker-1");
        assert_eq!(waiting.ready, None);
        assert_eq!(waiting.loader.as_deref(), Some("1"));

        client.clear_actions();
        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile");
        assert!(matches!(outcome, StepOutcome::RequeueAfter(_)));
        assert_eq!(client.mutation_count(), 0);

        client.remove_pod(NAMESPACE, "device-plugin-worker-1");
        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile");
        assert_eq!(outcome, StepOutcome::RequeueNow);
        assert_eq!(markers(&client, "worker-1").loader, None);
        assert_eq!(markers(&client, "worker-2"), rolled_out("1", false));
    }

    #[tokio::test]
    async fn test_blocked_eviction_keeps_node_waiting() {
        let (client, reconciler) = converged_cluster(&["worker-1"], "1", false).await;
        client.put_pod(pod_requesting("apps", "guarded", "worker-1", ONLOAD_RESOURCE, "2"));
        client.block_eviction("apps", "guarded");
        bump_version(&client, "2");

        let outcome = step_until_waiting(&reconciler).await;
        assert!(matches!(outcome, StepOutcome::RequeueAfter(_)));
        assert!(!client.is_terminating("apps", "guarded"));

        client.clear_actions();
        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("refusal is not an error");
        assert!(matches!(outcome, StepOutcome::RequeueAfter(_)));
        assert_eq!(client.mutation_count(), 0);
        assert_eq!(markers(&client, "worker-1").loader.as_deref(), Some("1"));

        client.remove_pod("apps", "guarded");
        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile");
        assert_eq!(outcome, StepOutcome::RequeueNow);
        assert_eq!(markers(&client, "worker-1").loader, None);
        assert_eq!(reconciler.metrics.drain_action_count("evict"), 0);
    }

    #[tokio::test]
    async fn test_finished_pods_do_not_block_drain() {
        let (client, reconciler) = converged_cluster(&["worker-1"], "1", false).await;
        let mut finished = pod_requesting("apps", "batch", "worker-1", ONLOAD_RESOURCE, "1");
        finished.status = Some(k8s_openapi::api::core::v1::PodStatus {
            phase: Some("Succeeded".to_string()),
            ..Default::default()
        });
        client.put_pod(finished);
        bump_version(&client, "2");

        run_until_settled(&reconciler, &client, |_| {}).await;

        assert_eq!(markers(&client, "worker-1"), rolled_out("2", false));
        assert!(!client.is_terminating("apps", "batch"));
    }

    #[tokio::test]
    async fn test_node_leaving_selector_mid_upgrade() {
        let (client, reconciler) = converged_cluster(&WORKERS, "1", false).await;
        bump_version(&client, "2");
        step_until(&reconciler, &client, |c| markers(c, "worker-1").ready.is_none()).await;

        let mut labels = client.node_labels("worker-1");
        labels.remove(WORKER_LABEL);
        client.set_node_labels("worker-1", labels);

        run_until_settled(&reconciler, &client, |c| {
            assert_marker_ordering(c, &WORKERS);
            assert!(nodes_in_flight(c, &WORKERS[1..]) <= 1);
        })
        .await;

        assert_eq!(markers(&client, "worker-1"), Markers::default());
        assert_eq!(markers(&client, "worker-2"), rolled_out("2", false));
        assert_eq!(markers(&client, "worker-3"), rolled_out("2", false));
    }

    #[tokio::test]
    async fn test_stale_nodes_are_drained_by_name() {
        let (client, reconciler) = converged_cluster(&["node-b", "node-c", "node-a"], "1", false).await;
        bump_version(&client, "2");

        step_until(&reconciler, &client, |c| {
            ["node-a", "node-b", "node-c"].iter().any(|n| markers(c, n).ready.is_none())
        })
        .await;

        assert_eq!(markers(&client, "node-a").ready, None);
        assert_eq!(markers(&client, "node-b").ready.as_deref(), Some("1"));
        assert_eq!(markers(&client, "node-c").ready.as_deref(), Some("1"));
    }

    #[test]
    fn test_requests_onload() {
        assert!(requests_onload(&pod_requesting("apps", "a", "n", ONLOAD_RESOURCE, "1")));
        assert!(requests_onload(&pod_requesting("apps", "a", "n", ONLOAD_RESOURCE, "500m")));
        assert!(!requests_onload(&pod_requesting("apps", "a", "n", ONLOAD_RESOURCE, "0")));
        assert!(!requests_onload(&pod_requesting("apps", "a", "n", "nvidia.com/gpu", "1")));
        assert!(!requests_onload(&pod("apps", "a", "n", &[])));
    }

    #[test]
    fn test_requests_onload_from_limits_and_init_containers() {
        let limits_only = {
            let mut p = pod("apps", "limits", "n", &[]);
            if let Some(container) = p.spec.as_mut().and_then(|s| s.containers.first_mut()) {
                container.resources = Some(ResourceRequirements {
                    limits: Some([(ONLOAD_RESOURCE.to_string(), Quantity("1".to_string()))].into_iter().collect()),
                    ..Default::default()
                });
            }
            p
        };
        assert!(requests_onload(&limits_only));

        let init_only = {
            let mut p = pod("apps", "init", "n", &[]);
            if let Some(spec) = p.spec.as_mut() {
                spec.init_containers = Some(vec![Container {
                    name: "setup".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(
                            [(ONLOAD_RESOURCE.to_string(), Quantity("1".to_string()))].into_iter().collect(),
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]);
            }
            p
        };
        assert!(requests_onload(&init_only));
    }
}
