//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write rejected because the object changed since it was read,
    /// or already exists on create
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Eviction refused, usually by a PodDisruptionBudget
    #[error("Eviction blocked: {0}")]
    EvictionBlocked(String),

    /// Call did not complete within the per-call timeout
    #[error("Timed out after {timeout_secs}s: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Configured timeout
        timeout_secs: u64,
    },

    /// API server returned an error status
    #[error("API error: {0}")]
    Api(String),

    /// Transport or client error
    #[error("Kubernetes client error: {0}")]
    Kube(#[from] kube::Error),
}

impl ClusterError {
    /// Maps a kube error to the matching variant, keeping the object name
    /// for not-found and conflict responses.
    pub(crate) fn from_kube(err: kube::Error, object: &str) -> Self {
        match err {
            kube::Error::Api(status) => Self::from_status(status.code, &status.reason, &status.message, object),
            other => Self::Kube(other),
        }
    }

    /// Like `from_kube`, but a 429 on the eviction subresource is a
    /// disruption budget refusal rather than throttling.
    pub(crate) fn from_eviction(err: kube::Error, object: &str) -> Self {
        match err {
            kube::Error::Api(status) => {
                Self::from_eviction_status(status.code, &status.reason, &status.message, object)
            }
            other => Self::Kube(other),
        }
    }

    fn from_status(code: u16, reason: &str, message: &str, object: &str) -> Self {
        match code {
            404 => Self::NotFound(object.to_string()),
            409 => Self::Conflict(format!("{}: {}", object, message)),
            _ => Self::Api(format!("{} ({}) on {}: {}", reason, code, object, message)),
        }
    }

    fn from_eviction_status(code: u16, reason: &str, message: &str, object: &str) -> Self {
        if code == 429 {
            Self::EvictionBlocked(format!("{}: {}", object, message))
        } else {
            Self::from_status(code, reason, message, object)
        }
    }
}
