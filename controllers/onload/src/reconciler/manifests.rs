//! Objects created for an Onload resource
//!
//! Builders for the KMM Module resources and the two operand DaemonSets.
//! The same builders serve creation and the upgrade pass, which copies the
//! freshly built spec over the live object.

use super::labels::{OPERAND_NAME_LABEL, OPERAND_VERSION_LABEL};
use super::module_kind::ModuleKind;
use super::Target;
use crate::error::ControllerError;
use crds::{
    DevicePluginSpec, ModprobeSpec, Module, ModuleLoaderContainerSpec, ModuleLoaderSpec, ModuleSpec,
};
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    Affinity, Container, HostPathVolumeSource, NodeAffinity, NodeSelector, NodeSelectorRequirement,
    NodeSelectorTerm, PodSpec, PodTemplateSpec, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::Resource;
use std::collections::BTreeMap;

/// Host directory the userland is copied to when the resource leaves it unset
pub const DEFAULT_HOST_ONLOAD_PATH: &str = "/opt/onload";

/// Kubelet device plugin socket directory
const DEVICE_PLUGIN_SOCKET_DIR: &str = "/var/lib/kubelet/device-plugins";

/// Onload module sysfs directory holding the control plane parameters
const ONLOAD_SYSFS_DIR: &str = "/sys/module/onload";

/// CRI-O socket used by crictl when the kernel starts the control plane server
const CRI_SOCKET: &str = "/run/crio/crio.sock";

/// Points the Onload module at crictl so that the kernel starts the control
/// plane server inside this container, then keeps the container alive.
const CPLANE_SCRIPT: &str = r#"set -e
cid=$(grep -o -m1 -E '[0-9a-f]{64}' /proc/self/cgroup)
printf %s /usr/bin/crictl > /sys/module/onload/parameters/cplane_server_path
printf %s "exec $cid /opt/onload/sbin/onload_cp_server -K" > /sys/module/onload/parameters/cplane_server_params
exec sleep infinity
"#;

/// Copies the userland from the user image onto the host
const INSTALL_USERLAND_SCRIPT: &str = "set -e; cp -TRv /opt/onload /host/onload";

#[must_use]
pub fn cplane_daemonset_name(onload_name: &str) -> String {
    format!("{}-onload-cplane-ds", onload_name)
}

#[must_use]
pub fn device_plugin_daemonset_name(onload_name: &str) -> String {
    format!("{}-onload-device-plugin-ds", onload_name)
}

/// Version label of an operand DaemonSet
#[must_use]
pub fn operand_version(daemonset: &DaemonSet) -> Option<&str> {
    daemonset
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(OPERAND_VERSION_LABEL))
        .map(String::as_str)
}

fn owner_reference(target: &Target<'_>) -> Result<OwnerReference, ControllerError> {
    target.onload.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::MissingField(format!("Onload {}/{} metadata.uid", target.namespace, target.name))
    })
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// KMM Module loading `kind` on the selected nodes.
pub fn build_module(target: &Target<'_>, kind: ModuleKind) -> Result<Module, ControllerError> {
    let spec = &target.onload.spec;
    let mut module = Module::new(
        &kind.resource_name(target.name),
        ModuleSpec {
            module_loader: ModuleLoaderSpec {
                container: ModuleLoaderContainerSpec {
                    modprobe: ModprobeSpec {
                        module_name: kind.modprobe_name().to_string(),
                        parameters: vec!["--first-time".to_string()],
                    },
                    kernel_mappings: kind.kernel_mappings(&spec.onload),
                    image_pull_policy: spec.onload.image_pull_policy.clone(),
                    version: Some(spec.onload.version.clone()),
                    in_tree_module_to_remove: kind.in_tree_module_to_remove().map(str::to_string),
                },
                service_account_name: non_empty(&spec.service_account_name),
            },
            selector: spec.selector.clone(),
        },
    );
    module.metadata.namespace = Some(target.namespace.to_string());
    module.metadata.owner_references = Some(vec![owner_reference(target)?]);
    Ok(module)
}

/// Device plugin flags for the settings the resource sets explicitly.
/// Unset settings keep the plugin's own defaults.
#[must_use]
pub fn device_plugin_args(plugin: &DevicePluginSpec) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(max_pods) = plugin.max_pods_per_node {
        args.push(format!("-maxPods={}", max_pods));
    }
    if let Some(set_preload) = plugin.set_preload {
        args.push(format!("-setPreload={}", set_preload));
    }
    if let Some(mount_onload) = plugin.mount_onload {
        args.push(format!("-mountOnload={}", mount_onload));
    }
    let paths = [
        ("-hostOnloadPath", &plugin.host_onload_path),
        ("-baseMountPath", &plugin.base_mount_path),
        ("-binMountPath", &plugin.bin_mount_path),
        ("-libMountPath", &plugin.lib_mount_path),
    ];
    for (flag, value) in paths {
        if let Some(value) = value {
            args.push(format!("{}={}", flag, value));
        }
    }
    args
}

/// Control plane DaemonSet. Runs the user image on every ready node and
/// wires the Onload module to start its control plane server there.
pub fn cplane_daemonset(target: &Target<'_>) -> Result<DaemonSet, ControllerError> {
    let spec = &target.onload.spec;
    let name = cplane_daemonset_name(target.name);

    let container = Container {
        name: "onload-cplane".to_string(),
        image: Some(spec.onload.user_image.clone()),
        image_pull_policy: spec.onload.image_pull_policy.clone(),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), CPLANE_SCRIPT.to_string()]),
        security_context: Some(privileged()),
        volume_mounts: Some(vec![
            mount("onload-sysfs", ONLOAD_SYSFS_DIR),
            mount("cri-socket", CRI_SOCKET),
        ]),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        host_network: Some(true),
        containers: vec![container],
        volumes: Some(vec![
            host_path("onload-sysfs", ONLOAD_SYSFS_DIR, None),
            host_path("cri-socket", CRI_SOCKET, None),
        ]),
        ..operand_pod_spec(target)
    };
    operand_daemonset(target, &name, pod_spec)
}

/// Device plugin DaemonSet. Installs the userland onto each ready node and
/// advertises `amd.com/onload` there.
pub fn device_plugin_daemonset(target: &Target<'_>) -> Result<DaemonSet, ControllerError> {
    let spec = &target.onload.spec;
    let plugin = &spec.device_plugin;
    let name = device_plugin_daemonset_name(target.name);
    let host_onload_path = plugin
        .host_onload_path
        .clone()
        .unwrap_or_else(|| DEFAULT_HOST_ONLOAD_PATH.to_string());

    let init = Container {
        name: "onload-userland".to_string(),
        image: Some(spec.onload.user_image.clone()),
        image_pull_policy: spec.onload.image_pull_policy.clone(),
        command: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            INSTALL_USERLAND_SCRIPT.to_string(),
        ]),
        volume_mounts: Some(vec![mount("host-onload", "/host/onload")]),
        ..Default::default()
    };

    let plugin_container = Container {
        name: "device-plugin".to_string(),
        image: Some(plugin.device_plugin_image.clone()),
        image_pull_policy: plugin.image_pull_policy.clone(),
        args: Some(device_plugin_args(plugin)),
        security_context: Some(privileged()),
        volume_mounts: Some(vec![
            mount("kubelet-socket", DEVICE_PLUGIN_SOCKET_DIR),
            mount("host-onload", &host_onload_path),
        ]),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        init_containers: Some(vec![init]),
        containers: vec![plugin_container],
        volumes: Some(vec![
            host_path("kubelet-socket", DEVICE_PLUGIN_SOCKET_DIR, None),
            host_path("host-onload", &host_onload_path, Some("DirectoryOrCreate")),
        ]),
        ..operand_pod_spec(target)
    };
    operand_daemonset(target, &name, pod_spec)
}

/// Pod settings shared by both operands: service account and scheduling
/// restricted to nodes carrying the ready marker.
fn operand_pod_spec(target: &Target<'_>) -> PodSpec {
    PodSpec {
        service_account_name: non_empty(&target.onload.spec.service_account_name),
        affinity: Some(Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm {
                        match_expressions: Some(vec![NodeSelectorRequirement {
                            key: target.ready_key(),
                            operator: "Exists".to_string(),
                            values: None,
                        }]),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn operand_daemonset(target: &Target<'_>, name: &str, pod_spec: PodSpec) -> Result<DaemonSet, ControllerError> {
    let selector: BTreeMap<String, String> =
        [(OPERAND_NAME_LABEL.to_string(), name.to_string())].into_iter().collect();
    let mut labels = selector.clone();
    labels.insert(OPERAND_VERSION_LABEL.to_string(), target.version().to_string());

    Ok(DaemonSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(target.namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(target)?]),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            // Pods are replaced when their node is drained, never in place
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("OnDelete".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn privileged() -> SecurityContext {
    SecurityContext {
        privileged: Some(true),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn host_path(name: &str, path: &str, type_: Option<&str>) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: type_.map(str::to_string),
        }),
        ..Default::default()
    }
}
