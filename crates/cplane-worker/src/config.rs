//! Worker configuration from the pod environment
//!
//! The control plane DaemonSet passes the pod identity through the downward
//! API and the server location as plain variables.

use crate::error::WorkerError;

/// Character device created by the Onload module once it is loaded
pub const ONLOAD_DEVICE: &str = "/dev/onload";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub pod_namespace: String,
    pub pod_name: String,
    pub container_name: String,
    /// Control plane server binary as seen inside this container
    pub server_path: String,
    /// Extra server arguments, possibly empty
    pub server_params: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, WorkerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, WorkerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| WorkerError::MissingEnv(key.to_string()))
        };
        Ok(Self {
            pod_namespace: required("POD_NAMESPACE")?,
            pod_name: required("POD_NAME")?,
            container_name: required("CONTAINER_NAME")?,
            server_path: required("ONLOAD_CP_SERVER_PATH")?,
            server_params: lookup("ONLOAD_CP_SERVER_PARAMS").unwrap_or_default(),
        })
    }
}

/// Fails unless the Onload device exists. The container can start while
/// the module is still loading, before the device node appears.
pub fn check_device(path: &str) -> Result<(), WorkerError> {
    std::fs::metadata(path)
        .map(|_| ())
        .map_err(|e| WorkerError::DeviceUnavailable(path.to_string(), e))
}
