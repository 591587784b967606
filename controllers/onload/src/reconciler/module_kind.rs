//! Kernel modules managed through KMM
//!
//! The Onload module is always loaded. The SFC network driver is loaded
//! alongside it when any kernel mapping asks for it. Both follow the same
//! labeling, creation and upgrade path, parameterised by `ModuleKind`.

use super::labels;
use crds::{KernelMapping, ModuleBuild, OnloadReleaseSpec, OnloadSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Onload,
    Sfc,
}

impl ModuleKind {
    /// Every kind, in the order they are reconciled
    pub const ALL: [ModuleKind; 2] = [ModuleKind::Onload, ModuleKind::Sfc];

    /// Name of the KMM Module resource for an Onload resource.
    #[must_use]
    pub fn resource_name(self, onload_name: &str) -> String {
        match self {
            Self::Onload => format!("{}-onload-module", onload_name),
            Self::Sfc => format!("{}-sfc-module", onload_name),
        }
    }

    /// Kernel module name passed to modprobe
    #[must_use]
    pub fn modprobe_name(self) -> &'static str {
        match self {
            Self::Onload => "onload",
            Self::Sfc => "sfc",
        }
    }

    /// In-tree driver to unload first. The out-of-tree SFC driver replaces
    /// the one shipped with the kernel.
    #[must_use]
    pub fn in_tree_module_to_remove(self) -> Option<&'static str> {
        match self {
            Self::Onload => None,
            Self::Sfc => Some("sfc"),
        }
    }

    /// Node label recording the version of this module requested on a node
    #[must_use]
    pub fn marker_key(self, onload_name: &str, namespace: &str) -> String {
        match self {
            Self::Onload => labels::loader_marker_key(onload_name, namespace),
            Self::Sfc => labels::sfc_marker_key(onload_name, namespace),
        }
    }

    #[must_use]
    pub fn is_wanted(self, spec: &OnloadSpec) -> bool {
        match self {
            Self::Onload => true,
            Self::Sfc => spec.onload.uses_sfc(),
        }
    }

    /// KMM kernel mappings for this module.
    ///
    /// The Onload module takes every mapping with its build settings. The
    /// SFC module takes the mappings that request it and loads from the same
    /// image, never building.
    #[must_use]
    pub fn kernel_mappings(self, release: &OnloadReleaseSpec) -> Vec<KernelMapping> {
        release
            .kernel_mappings
            .iter()
            .filter(|m| self == Self::Onload || m.sfc.is_some())
            .map(|m| KernelMapping {
                regexp: Some(m.regexp.clone()),
                literal: None,
                container_image: Some(m.kernel_module_image.clone()),
                build: match self {
                    Self::Onload => m.build.as_ref().map(|b| ModuleBuild {
                        build_args: b.build_args.clone(),
                        dockerfile_config_map: b.dockerfile_config_map.clone(),
                    }),
                    Self::Sfc => None,
                },
            })
            .collect()
    }
}
