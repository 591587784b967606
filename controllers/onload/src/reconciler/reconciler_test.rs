//! Unit tests for the reconciliation entry point and labeling passes

#[cfg(test)]
mod tests {
    use super::super::labels::{self, MODULE_LOADER_POD_LABEL};
    use super::super::{StepOutcome, READY_CONDITION};
    use crate::error::ControllerError;
    use crate::test_utils::*;
    use cluster_client::mock_helpers::{node, pod};
    use cluster_client::MockClusterClient;
    use std::time::Duration;

    const WORKERS: [&str; 3] = ["worker-1", "worker-2", "worker-3"];

    fn position(actions: &[String], action: &str) -> usize {
        actions
            .iter()
            .position(|a| a == action)
            .unwrap_or_else(|| panic!("action '{}' not found in {:?}", action, actions))
    }

    #[tokio::test]
    async fn test_fresh_onload_converges() {
        let client = MockClusterClient::new();
        for name in WORKERS {
            add_worker(&client, name);
        }
        client.put_node(node("infra-1", &[("node-role.kubernetes.io/infra", "")]));
        client.put_onload(create_test_onload("1", false));
        let reconciler = create_test_reconciler(&client);

        run_until_settled(&reconciler, &client, |c| assert_marker_ordering(c, &WORKERS)).await;

        for name in WORKERS {
            assert_eq!(markers(&client, name), rolled_out("1", false), "node {}", name);
        }
        assert_eq!(markers(&client, "infra-1"), Markers::default());

        let module = client.module(NAMESPACE, "demo-onload-module").expect("onload module created");
        assert_eq!(module.loader_version(), Some("1"));
        assert!(client.module(NAMESPACE, "demo-sfc-module").is_none());
        assert_eq!(client.daemonsets(NAMESPACE).len(), 2);

        let onload = client.onload(NAMESPACE, NAME).expect("onload exists");
        let ready = onload
            .status
            .as_ref()
            .and_then(|s| s.condition(READY_CONDITION))
            .expect("ready condition reported");
        assert_eq!(ready.status, "True");
    }

    #[tokio::test]
    async fn test_labels_and_operands_are_created_in_order() {
        let client = MockClusterClient::new();
        add_worker(&client, "worker-1");
        client.put_onload(create_test_onload("1", false));
        let reconciler = create_test_reconciler(&client);

        run_until_settled(&reconciler, &client, |_| {}).await;

        let actions = client.actions();
        let loader = position(
            &actions,
            &format!("patch node/worker-1 {}=1", labels::loader_marker_key(NAME, NAMESPACE)),
        );
        let module = position(&actions, "create module/onload-system/demo-onload-module");
        let ready = position(
            &actions,
            &format!("patch node/worker-1 {}=1", labels::ready_marker_key(NAME, NAMESPACE)),
        );
        let cplane = position(&actions, "create daemonset/onload-system/demo-onload-cplane-ds");
        let plugin = position(&actions, "create daemonset/onload-system/demo-onload-device-plugin-ds");

        assert!(loader < module);
        assert!(module < ready);
        assert!(ready < cplane);
        assert!(cplane < plugin);
    }

    #[tokio::test]
    async fn test_sfc_follows_the_onload_module() {
        let client = MockClusterClient::new();
        for name in WORKERS {
            add_worker(&client, name);
        }
        client.put_onload(create_test_onload("1", true));
        let reconciler = create_test_reconciler(&client);

        run_until_settled(&reconciler, &client, |c| assert_marker_ordering(c, &WORKERS)).await;

        for name in WORKERS {
            assert_eq!(markers(&client, name), rolled_out("1", true), "node {}", name);
        }
        let sfc = client.module(NAMESPACE, "demo-sfc-module").expect("sfc module created");
        let container = &sfc.spec.module_loader.container;
        assert_eq!(container.modprobe.module_name, "sfc");
        assert_eq!(container.in_tree_module_to_remove.as_deref(), Some("sfc"));

        let actions = client.actions();
        let loader = position(
            &actions,
            &format!("patch node/worker-2 {}=1", labels::loader_marker_key(NAME, NAMESPACE)),
        );
        let sfc_label = position(
            &actions,
            &format!("patch node/worker-2 {}=1", labels::sfc_marker_key(NAME, NAMESPACE)),
        );
        assert!(loader < sfc_label);
    }

    #[tokio::test]
    async fn test_converged_pass_is_a_noop() {
        for sfc in [false, true] {
            let (client, reconciler) = converged_cluster(&WORKERS, "1", sfc).await;
            client.clear_actions();

            let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile");

            assert_eq!(outcome, StepOutcome::NothingToDo);
            assert_eq!(client.mutation_count(), 0, "unexpected actions: {:?}", client.actions());
        }
    }

    #[tokio::test]
    async fn test_lingering_loader_pod_delays_labeling() {
        let client = MockClusterClient::new();
        add_worker(&client, "worker-1");
        add_worker(&client, "worker-2");
        client.put_pod(pod(
            NAMESPACE,
            "demo-onload-module-unload-worker-1",
            "worker-1",
            &[(MODULE_LOADER_POD_LABEL, "demo-onload-module")],
        ));
        client.put_onload(create_test_onload("1", false));
        let reconciler = create_test_reconciler(&client);

        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile");
        assert_eq!(outcome, StepOutcome::RequeueAfter(Duration::from_secs(5)));
        assert_eq!(markers(&client, "worker-1"), Markers::default());
        assert_eq!(client.mutation_count(), 0);

        client.remove_pod(NAMESPACE, "demo-onload-module-unload-worker-1");
        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile");
        assert_eq!(outcome, StepOutcome::RequeueNow);
        assert_eq!(markers(&client, "worker-1").loader.as_deref(), Some("1"));
        assert_eq!(markers(&client, "worker-2").loader.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_reported_without_mutation() {
        let client = MockClusterClient::new();
        add_worker(&client, "worker-1");
        let mut onload = create_test_onload("1", false);
        onload.spec.device_plugin.set_preload = Some(true);
        onload.spec.device_plugin.mount_onload = Some(true);
        client.put_onload(onload);
        let reconciler = create_test_reconciler(&client);

        let result = reconciler.reconcile(NAMESPACE, NAME).await;
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
        assert_eq!(client.actions(), vec!["patch onload-status/onload-system/demo".to_string()]);
        assert_eq!(markers(&client, "worker-1"), Markers::default());

        let onload = client.onload(NAMESPACE, NAME).expect("onload exists");
        let ready = onload
            .status
            .as_ref()
            .and_then(|s| s.condition(READY_CONDITION))
            .expect("ready condition reported");
        assert_eq!(ready.status, "False");
        assert_eq!(ready.reason.as_deref(), Some("InvalidConfig"));

        // The condition is already set, so a retry writes nothing
        let result = reconciler.reconcile(NAMESPACE, NAME).await;
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
        assert_eq!(client.mutation_count(), 1);
        assert_eq!(reconciler.metrics.reconcile_count("invalid_config"), 2);
    }

    #[tokio::test]
    async fn test_empty_version_is_rejected() {
        let client = MockClusterClient::new();
        add_worker(&client, "worker-1");
        client.put_onload(create_test_onload("", false));
        let reconciler = create_test_reconciler(&client);

        let result = reconciler.reconcile(NAMESPACE, NAME).await;

        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
        assert_eq!(markers(&client, "worker-1"), Markers::default());
        assert!(client.modules(NAMESPACE).is_empty());
    }

    #[tokio::test]
    async fn test_deletion_removes_labels_despite_failing_node() {
        let (client, reconciler) = converged_cluster(&WORKERS, "1", true).await;
        client.fail_node_patches("worker-2");
        client.remove_onload(NAMESPACE, NAME);

        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("cleanup is best effort");

        assert_eq!(outcome, StepOutcome::NothingToDo);
        assert_eq!(markers(&client, "worker-1"), Markers::default());
        assert_eq!(markers(&client, "worker-3"), Markers::default());
        assert_eq!(markers(&client, "worker-2"), rolled_out("1", true));
    }

    #[tokio::test]
    async fn test_missing_onload_without_labels_is_a_noop() {
        let client = MockClusterClient::new();
        add_worker(&client, "worker-1");
        let reconciler = create_test_reconciler(&client);

        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile");

        assert_eq!(outcome, StepOutcome::NothingToDo);
        assert_eq!(client.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_unselected_node_loses_markers() {
        let (client, reconciler) = converged_cluster(&WORKERS, "1", true).await;
        let mut labels = client.node_labels("worker-3");
        labels.remove(WORKER_LABEL);
        client.set_node_labels("worker-3", labels);

        run_until_settled(&reconciler, &client, |c| assert_marker_ordering(c, &WORKERS)).await;

        assert_eq!(markers(&client, "worker-3"), Markers::default());
        assert_eq!(markers(&client, "worker-1"), rolled_out("1", true));
        assert_eq!(markers(&client, "worker-2"), rolled_out("1", true));
    }

    #[tokio::test]
    async fn test_unselected_node_drops_ready_before_loader() {
        let (client, reconciler) = converged_cluster(&["worker-1", "worker-2"], "1", false).await;
        let mut node_labels = client.node_labels("worker-2");
        node_labels.remove(WORKER_LABEL);
        client.set_node_labels("worker-2", node_labels);
        client.clear_actions();

        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile");

        assert_eq!(outcome, StepOutcome::RequeueNow);
        assert_eq!(markers(&client, "worker-2"), Markers::default());
        assert_eq!(markers(&client, "worker-1"), rolled_out("1", false));
        assert_eq!(
            client.actions(),
            vec![
                format!("patch node/worker-2 -{}", labels::ready_marker_key(NAME, NAMESPACE)),
                format!("patch node/worker-2 -{}", labels::loader_marker_key(NAME, NAMESPACE)),
            ]
        );
    }

    #[tokio::test]
    async fn test_new_node_joins_the_rollout() {
        let (client, reconciler) = converged_cluster(&WORKERS[..2], "1", false).await;
        add_worker(&client, "worker-3");

        run_until_settled(&reconciler, &client, |c| assert_marker_ordering(c, &WORKERS)).await;

        assert_eq!(markers(&client, "worker-3"), rolled_out("1", false));
    }

    #[tokio::test]
    async fn test_dropping_sfc_removes_module_and_markers() {
        let (client, reconciler) = converged_cluster(&WORKERS, "1", true).await;
        let mut onload = client.onload(NAMESPACE, NAME).expect("onload exists");
        for mapping in &mut onload.spec.onload.kernel_mappings {
            mapping.sfc = None;
        }
        client.put_onload(onload);

        run_until_settled(&reconciler, &client, |c| assert_marker_ordering(c, &WORKERS)).await;

        assert!(client.module(NAMESPACE, "demo-sfc-module").is_none());
        assert!(client.module(NAMESPACE, "demo-onload-module").is_some());
        for name in WORKERS {
            assert_eq!(markers(&client, name), rolled_out("1", false), "node {}", name);
        }
    }

    #[tokio::test]
    async fn test_deleted_onload_drops_its_failure_count() {
        let (client, reconciler) = converged_cluster(&["worker-1"], "1", false).await;
        let (delay, failures) = reconciler.error_backoff.record_failure("onload-system/demo");
        assert_eq!((delay, failures), (Duration::from_secs(5), 1));
        reconciler.error_backoff.record_failure("onload-system/demo");
        reconciler.error_backoff.record_failure("onload-system/other");

        client.remove_onload(NAMESPACE, NAME);
        let outcome = reconciler.reconcile(NAMESPACE, NAME).await.expect("reconcile");

        assert_eq!(outcome, StepOutcome::NothingToDo);
        assert_eq!(markers(&client, "worker-1"), Markers::default());
        // Only the resource that is gone is forgotten
        assert_eq!(reconciler.error_backoff.tracked(), 1);
        assert_eq!(
            reconciler.error_backoff.record_failure("onload-system/demo"),
            (Duration::from_secs(5), 1)
        );
    }
}
