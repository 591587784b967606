//! Kernel Module Management `Module`
//!
//! Only the subset of `kmm.sigs.x-k8s.io/v1beta1` that the Onload operator
//! writes is modelled here. The CRD itself is installed by KMM.

use crate::onload::{BuildArg, ConfigMapRef};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(group = "kmm.sigs.x-k8s.io", version = "v1beta1", kind = "Module", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    pub module_loader: ModuleLoaderSpec,

    /// Node selector for the module loader pods
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLoaderSpec {
    pub container: ModuleLoaderContainerSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleLoaderContainerSpec {
    pub modprobe: ModprobeSpec,

    #[serde(default)]
    pub kernel_mappings: Vec<KernelMapping>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Version used by KMM ordered upgrades; compared against the node
    /// version-module label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// In-tree module unloaded before this one is loaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_tree_module_to_remove: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModprobeSpec {
    pub module_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KernelMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<ModuleBuild>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleBuild {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_args: Vec<BuildArg>,

    pub dockerfile_config_map: ConfigMapRef,
}

impl Module {
    /// Version recorded on the module loader, if any.
    #[must_use]
    pub fn loader_version(&self) -> Option<&str> {
        self.spec.module_loader.container.version.as_deref()
    }
}
