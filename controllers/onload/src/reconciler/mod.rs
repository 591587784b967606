//! Reconciliation logic for Onload resources.
//!
//! A pass re-reads the cluster and performs the first step that still has
//! work to do, in this order:
//!
//! 1. `nodes`: label selected nodes with module loader markers
//! 2. `operands`: create the KMM Module resources
//! 3. `nodes`: label nodes whose module is loaded with the ready marker
//! 4. `operands`: create the control plane and device plugin DaemonSets
//! 5. `upgrade`: roll a version change out, one node at a time
//!
//! All state lives in node labels and the created objects, so a pass can be
//! interrupted anywhere and the next one picks up from what it observes.
//! `cleanup` removes every label an Onload resource left once it is gone.

pub mod cleanup;
pub mod labels;
pub mod manifests;
pub mod module_kind;
pub mod nodes;
pub mod operands;
pub mod upgrade;

#[cfg(test)]
mod reconciler_test;
#[cfg(test)]
mod upgrade_test;

use crate::backoff::ErrorBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use cluster_client::{ClusterClientTrait, LabelQuery};
use crds::{Onload, OnloadCondition, OnloadStatus};
use kube_runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Condition type reported in the Onload status
pub const READY_CONDITION: &str = "Ready";

/// Result of one reconciliation step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing left to do for this step
    NothingToDo,
    /// Something changed; run another pass immediately
    RequeueNow,
    /// Waiting on the cluster; run another pass after the delay
    RequeueAfter(Duration),
}

impl StepOutcome {
    #[must_use]
    pub fn into_action(self) -> Action {
        match self {
            Self::NothingToDo => Action::await_change(),
            Self::RequeueNow => Action::requeue(Duration::ZERO),
            Self::RequeueAfter(delay) => Action::requeue(delay),
        }
    }

    fn metric_label(self) -> &'static str {
        match self {
            Self::NothingToDo => "done",
            Self::RequeueNow => "requeue",
            Self::RequeueAfter(_) => "wait",
        }
    }
}

/// Onload resource being reconciled, with its identity resolved
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub onload: &'a Onload,
    pub namespace: &'a str,
    pub name: &'a str,
}

impl<'a> Target<'a> {
    pub fn new(onload: &'a Onload) -> Result<Self, ControllerError> {
        let name = onload
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::MissingField("Onload metadata.name".to_string()))?;
        let namespace = onload.metadata.namespace.as_deref().ok_or_else(|| {
            ControllerError::MissingField(format!("Onload {} metadata.namespace", name))
        })?;
        Ok(Self { onload, namespace, name })
    }

    /// Release version every selected node converges on
    #[must_use]
    pub fn version(&self) -> &'a str {
        &self.onload.spec.onload.version
    }

    #[must_use]
    pub fn selector(&self) -> LabelQuery {
        LabelQuery::from_map(&self.onload.spec.selector)
    }

    #[must_use]
    pub fn selects(&self, node: &k8s_openapi::api::core::v1::Node) -> bool {
        self.selector().matches(node.metadata.labels.as_ref())
    }

    #[must_use]
    pub fn ready_key(&self) -> String {
        labels::ready_marker_key(self.name, self.namespace)
    }
}

/// Rejects Onload resources that cannot be rolled out as written.
pub fn validate(onload: &Onload) -> Result<(), ControllerError> {
    let spec = &onload.spec;
    if spec.onload.version.trim().is_empty() {
        return Err(ControllerError::InvalidConfig(
            "spec.onload.version must not be empty".to_string(),
        ));
    }
    let plugin = &spec.device_plugin;
    if plugin.set_preload == Some(true) && plugin.mount_onload == Some(true) {
        return Err(ControllerError::InvalidConfig(
            "spec.devicePlugin.setPreload and spec.devicePlugin.mountOnload are mutually exclusive".to_string(),
        ));
    }
    Ok(())
}

/// Reconciles Onload resources.
pub struct Reconciler {
    pub(crate) client: Box<dyn ClusterClientTrait>,
    pub(crate) metrics: Metrics,
    /// Delay returned while waiting on pods
    pub(crate) requeue_delay: Duration,
    pub(crate) error_backoff: ErrorBackoff,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("requeue_delay", &self.requeue_delay)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(client: impl ClusterClientTrait + 'static, config: &ControllerConfig, metrics: Metrics) -> Self {
        Self {
            client: Box::new(client),
            metrics,
            requeue_delay: config.requeue_delay,
            error_backoff: ErrorBackoff::from_config(config),
        }
    }

    /// Runs one reconciliation pass for the Onload resource `namespace/name`.
    ///
    /// A resource that no longer exists has its node labels removed.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<StepOutcome, ControllerError> {
        let result = self.reconcile_inner(namespace, name).await;
        match &result {
            Ok(outcome) => self.metrics.record_reconcile(outcome.metric_label()),
            Err(ControllerError::InvalidConfig(_)) => self.metrics.record_reconcile("invalid_config"),
            Err(_) => self.metrics.record_reconcile("error"),
        }
        result
    }

    async fn reconcile_inner(&self, namespace: &str, name: &str) -> Result<StepOutcome, ControllerError> {
        let Some(onload) = self.client.get_onload(namespace, name).await? else {
            info!("Onload {}/{} not found, removing its node labels", namespace, name);
            self.remove_all_labels(namespace, name).await?;
            self.error_backoff.clear(&format!("{}/{}", namespace, name));
            return Ok(StepOutcome::NothingToDo);
        };

        if onload.metadata.deletion_timestamp.is_some() {
            debug!("Onload {}/{} is being deleted, skipping", namespace, name);
            return Ok(StepOutcome::NothingToDo);
        }

        let target = Target::new(&onload)?;
        if let Err(e) = validate(&onload) {
            warn!("Onload {}/{} is invalid: {}", namespace, name, e);
            self.report_condition(&target, false, "InvalidConfig", &e.to_string()).await;
            return Err(e);
        }

        let outcome = self.run_steps(&target).await?;
        if outcome == StepOutcome::NothingToDo {
            self.report_condition(&target, true, "Reconciled", "Onload is rolled out on every selected node")
                .await;
        }
        Ok(outcome)
    }

    async fn run_steps(&self, target: &Target<'_>) -> Result<StepOutcome, ControllerError> {
        let outcome = self.label_loader_markers(target).await?;
        if outcome != StepOutcome::NothingToDo {
            return Ok(outcome);
        }
        let outcome = self.ensure_modules(target).await?;
        if outcome != StepOutcome::NothingToDo {
            return Ok(outcome);
        }
        let outcome = self.label_ready_markers(target).await?;
        if outcome != StepOutcome::NothingToDo {
            return Ok(outcome);
        }
        let outcome = self.ensure_daemonsets(target).await?;
        if outcome != StepOutcome::NothingToDo {
            return Ok(outcome);
        }
        self.upgrade(target).await
    }

    /// Writes the Ready condition if it differs from the current one.
    /// Failures are logged only.
    async fn report_condition(&self, target: &Target<'_>, ready: bool, reason: &str, message: &str) {
        let status = if ready { "True" } else { "False" };
        let current = target
            .onload
            .status
            .as_ref()
            .and_then(|s| s.condition(READY_CONDITION));
        if current.is_some_and(|c| {
            c.status == status && c.reason.as_deref() == Some(reason) && c.message.as_deref() == Some(message)
        }) {
            return;
        }

        let now = chrono::Utc::now();
        let mut conditions: Vec<OnloadCondition> = target
            .onload
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        conditions.retain(|c| c.type_ != READY_CONDITION);
        conditions.push(OnloadCondition {
            type_: READY_CONDITION.to_string(),
            status: status.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            last_transition_time: Some(now),
        });
        let new_status = OnloadStatus {
            conditions,
            last_reconciled: Some(now),
        };

        match self.client.patch_onload_status(target.namespace, target.name, &new_status).await {
            Ok(()) => info!(
                "Set Onload {}/{} condition Ready={} ({})",
                target.namespace, target.name, status, reason
            ),
            Err(e) => warn!("Failed to update status of Onload {}/{}: {}", target.namespace, target.name, e),
        }
    }
}
