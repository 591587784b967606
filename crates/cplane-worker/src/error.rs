//! Control plane worker errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("Onload device {0} is not available: {1}")]
    DeviceUnavailable(String, std::io::Error),

    #[error("Unexpected format of container ID {0}")]
    InvalidContainerId(String),

    #[error("Container {container} of pod {namespace}/{pod} did not start within {seconds}s")]
    Timeout {
        namespace: String,
        pod: String,
        container: String,
        seconds: u64,
    },

    #[error("Failed to write kernel parameter {parameter}: {source}")]
    KernelParameter {
        parameter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}
