//! Onload module parameters
//!
//! The module starts the control plane server itself by running
//! `cplane_server_path` with `cplane_server_params`. Pointing it at crictl
//! with `exec <container id> <server>` makes the server run inside the
//! worker's container.

use crate::container::ContainerId;
use crate::error::WorkerError;
use std::path::PathBuf;
use tracing::info;

/// sysfs directory of the Onload module parameters
pub const ONLOAD_PARAMETERS_DIR: &str = "/sys/module/onload/parameters";

/// Launcher the module runs in place of the server
pub const CRICTL_PATH: &str = "/usr/bin/crictl";

pub trait KernelParametersWriter {
    fn set_server_path(&self, path: &str) -> Result<(), WorkerError>;
    fn set_server_params(&self, params: &str) -> Result<(), WorkerError>;
}

/// Writes parameters to the module's sysfs files
#[derive(Debug, Clone)]
pub struct SysfsParameters {
    dir: PathBuf,
}

impl Default for SysfsParameters {
    fn default() -> Self {
        Self::new(ONLOAD_PARAMETERS_DIR)
    }
}

impl SysfsParameters {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write(&self, parameter: &str, value: &str) -> Result<(), WorkerError> {
        std::fs::write(self.dir.join(parameter), value).map_err(|source| WorkerError::KernelParameter {
            parameter: parameter.to_string(),
            source,
        })
    }
}

impl KernelParametersWriter for SysfsParameters {
    fn set_server_path(&self, path: &str) -> Result<(), WorkerError> {
        self.write("cplane_server_path", path)
    }

    fn set_server_params(&self, params: &str) -> Result<(), WorkerError> {
        self.write("cplane_server_params", params)
    }
}

/// Parameters that make crictl exec the server in `container`
#[must_use]
pub fn server_params(container: &ContainerId, server_path: &str, extra: &str) -> String {
    if extra.is_empty() {
        format!("exec {} {}", container.id, server_path)
    } else {
        format!("exec {} {} {}", container.id, server_path, extra)
    }
}

/// Points the module at the control plane server inside `container`.
pub fn configure(
    writer: &dyn KernelParametersWriter,
    container: &ContainerId,
    server_path: &str,
    extra: &str,
) -> Result<(), WorkerError> {
    writer.set_server_path(CRICTL_PATH)?;
    info!("Set Onload control plane server path to {}", CRICTL_PATH);

    let params = server_params(container, server_path, extra);
    writer.set_server_params(&params)?;
    info!("Set Onload control plane server params to {}", params);
    Ok(())
}
