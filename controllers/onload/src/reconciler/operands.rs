//! Operand creation
//!
//! Creates the KMM Module resources and the operand DaemonSets when they
//! are missing, one object per pass. Version drift on existing objects is
//! left to the upgrade pass.

use super::manifests;
use super::module_kind::ModuleKind;
use super::{Reconciler, StepOutcome, Target};
use crate::error::ControllerError;
use tracing::info;

impl Reconciler {
    /// Creates wanted Module resources and deletes unwanted ones.
    pub(crate) async fn ensure_modules(&self, target: &Target<'_>) -> Result<StepOutcome, ControllerError> {
        for kind in ModuleKind::ALL {
            let name = kind.resource_name(target.name);
            let existing = self.client.get_module(target.namespace, &name).await?;
            match (existing, kind.is_wanted(&target.onload.spec)) {
                (None, true) => {
                    let module = manifests::build_module(target, kind)?;
                    self.client.create_module(&module).await?;
                    info!("Created Module {}/{}", target.namespace, name);
                    return Ok(StepOutcome::RequeueNow);
                }
                (Some(_), false) => {
                    self.client.delete_module(target.namespace, &name).await?;
                    info!("Deleted Module {}/{}, no kernel mapping requests it", target.namespace, name);
                    return Ok(StepOutcome::RequeueNow);
                }
                _ => {}
            }
        }
        Ok(StepOutcome::NothingToDo)
    }

    /// Creates the control plane and device plugin DaemonSets if missing.
    pub(crate) async fn ensure_daemonsets(&self, target: &Target<'_>) -> Result<StepOutcome, ControllerError> {
        let wanted = [
            (manifests::cplane_daemonset_name(target.name), manifests::cplane_daemonset(target)?),
            (manifests::device_plugin_daemonset_name(target.name), manifests::device_plugin_daemonset(target)?),
        ];
        for (name, daemonset) in wanted {
            if self.client.get_daemonset(target.namespace, &name).await?.is_none() {
                self.client.create_daemonset(&daemonset).await?;
                info!("Created DaemonSet {}/{}", target.namespace, name);
                return Ok(StepOutcome::RequeueNow);
            }
        }
        Ok(StepOutcome::NothingToDo)
    }
}
