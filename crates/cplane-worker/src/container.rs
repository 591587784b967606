//! Container identity lookup
//!
//! The worker asks the API server for its own pod and waits until its
//! container is reported running, then takes the runtime-qualified
//! container ID from the status.

use crate::error::WorkerError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use std::time::Duration;
use tracing::{debug, warn};

const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Runtimes the control plane server is known to start under through crictl
pub const KNOWN_GOOD_RUNTIMES: [&str; 2] = ["cri-o", "containerd"];

/// Source of the worker's own pod object
#[async_trait]
pub trait PodSource: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, WorkerError>;
}

/// Reads pods through the Kubernetes API
#[derive(Clone)]
pub struct KubePods {
    client: kube::Client,
}

impl std::fmt::Debug for KubePods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubePods").finish_non_exhaustive()
    }
}

impl KubePods {
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodSource for KubePods {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, WorkerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }
}

/// A container ID split into runtime and runtime-local identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerId {
    pub runtime: String,
    pub id: String,
}

impl ContainerId {
    /// Parses `<runtime>://<id>` as found in container statuses.
    pub fn parse(raw: &str) -> Result<Self, WorkerError> {
        let mut parts = raw.split("://");
        match (parts.next(), parts.next(), parts.next()) {
            (Some(runtime), Some(id), None) => Ok(Self {
                runtime: runtime.to_string(),
                id: id.to_string(),
            }),
            _ => Err(WorkerError::InvalidContainerId(raw.to_string())),
        }
    }

    #[must_use]
    pub fn is_known_runtime(&self) -> bool {
        KNOWN_GOOD_RUNTIMES.contains(&self.runtime.as_str())
    }
}

/// ID of `container` if it is ready, started and running.
#[must_use]
pub fn running_container_id(pod: &Pod, container: &str) -> Option<String> {
    let status = pod
        .status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|s| s.name == container)?;
    let running = status.ready
        && status.started == Some(true)
        && status.state.as_ref().is_some_and(|s| s.running.is_some());
    if running { status.container_id.clone() } else { None }
}

/// Polls the pod until `container` is running, backing off from 100ms to
/// 1s between reads, and gives up after `deadline`.
pub async fn wait_for_container_id(
    pods: &dyn PodSource,
    namespace: &str,
    pod_name: &str,
    container: &str,
    deadline: Duration,
) -> Result<ContainerId, WorkerError> {
    let poll = async {
        let mut delay = BACKOFF_INITIAL;
        loop {
            let pod = pods.get_pod(namespace, pod_name).await?;
            if let Some(raw) = running_container_id(&pod, container) {
                return ContainerId::parse(&raw);
            }
            debug!("Container {} of pod {}/{} is not running yet", container, namespace, pod_name);
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(BACKOFF_MAX);
        }
    };

    let container_id = tokio::time::timeout(deadline, poll).await.map_err(|_elapsed| WorkerError::Timeout {
        namespace: namespace.to_string(),
        pod: pod_name.to_string(),
        container: container.to_string(),
        seconds: deadline.as_secs(),
    })??;

    if !container_id.is_known_runtime() {
        warn!(
            "Unexpected container runtime {}, a CRI-compatible runtime is required; starting the control plane may fail",
            container_id.runtime
        );
    }
    Ok(container_id)
}
