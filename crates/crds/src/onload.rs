//! Onload CRD
//!
//! Declares which Onload release (kernel modules, userland, device plugin)
//! should run on the nodes matched by `selector`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "onload.amd.com",
    version = "v1alpha1",
    kind = "Onload",
    namespaced,
    status = "OnloadStatus",
    shortname = "onload"
)]
#[serde(rename_all = "camelCase")]
pub struct OnloadSpec {
    /// Kernel modules and userland release
    pub onload: OnloadReleaseSpec,

    /// Device plugin operand settings
    pub device_plugin: DevicePluginSpec,

    /// Nodes must carry every label in this map to receive Onload
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    /// Service account used by every workload created for this resource
    #[serde(default)]
    pub service_account_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct OnloadReleaseSpec {
    /// Kernel version to module image mappings
    #[serde(default)]
    pub kernel_mappings: Vec<OnloadKernelMapping>,

    /// Image carrying the Onload userland
    pub user_image: String,

    /// Release version. Every node converges on this value.
    pub version: String,

    /// Pull policy for the kernel module images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
}

impl OnloadReleaseSpec {
    /// True when any kernel mapping asks for the SFC module.
    #[must_use]
    pub fn uses_sfc(&self) -> bool {
        self.kernel_mappings.iter().any(|m| m.sfc.is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct OnloadKernelMapping {
    /// Image containing the prebuilt (or buildable) kernel module
    pub kernel_module_image: String,

    /// Regular expression matched against the node kernel version
    pub regexp: String,

    /// Also manage the SFC network driver for matching kernels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sfc: Option<SfcSpec>,

    /// In-cluster build of the module image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<OnloadKernelBuild>,
}

/// Marker requesting the SFC module. Carries no settings yet.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct SfcSpec {}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OnloadKernelBuild {
    /// Build arguments passed to the Dockerfile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_args: Vec<BuildArg>,

    /// ConfigMap holding the Dockerfile
    pub dockerfile_config_map: ConfigMapRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildArg {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct DevicePluginSpec {
    /// Device plugin image
    pub device_plugin_image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Allocatable `amd.com/onload` units advertised per node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pods_per_node: Option<i32>,

    /// Inject `LD_PRELOAD` into pods requesting the resource.
    /// Mutually exclusive with `mountOnload`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_preload: Option<bool>,

    /// Mount the onload script into pods requesting the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_onload: Option<bool>,

    /// Host directory the userland is installed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_onload_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_mount_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_mount_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lib_mount_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnloadStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<OnloadCondition>,

    /// Last time the condition set changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}

impl OnloadStatus {
    /// Looks up a condition by type.
    #[must_use]
    pub fn condition(&self, type_: &str) -> Option<&OnloadCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnloadCondition {
    #[serde(rename = "type")]
    pub type_: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}
