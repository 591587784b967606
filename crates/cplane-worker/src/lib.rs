//! Onload Control Plane Worker
//!
//! Runs in each control plane DaemonSet pod. Once the Onload module is
//! loaded on the node, the worker finds its own container ID and writes the
//! module parameters that make the kernel launch the control plane server
//! inside that container through crictl. It then idles for the lifetime of
//! the pod.

pub mod config;
pub mod container;
pub mod error;
pub mod kernel;

pub use config::{check_device, WorkerConfig, ONLOAD_DEVICE};
pub use container::{wait_for_container_id, ContainerId, KubePods, PodSource};
pub use error::WorkerError;
pub use kernel::{configure, KernelParametersWriter, SysfsParameters};
