//! Prefix-based teardown of managed VMs.

use tracing::{error, info, warn};
use vmforge_common::FleetError;
use vmforge_providers::inventory::VmSummary;
use vmforge_providers::{ComputeApi, DeleteOptions};

#[derive(Debug, Default)]
pub struct DecommissionReport {
    pub matched: Vec<String>,
    pub powered_off: Vec<String>,
    pub deleted: Vec<String>,
    /// `(name, error)`; each error is a [`FleetError::RemoteCall`] naming
    /// `vm.poweroff` or `vm.delete`.
    pub failures: Vec<(String, FleetError)>,
}

/// VMs whose name starts with any of `prefixes`.
pub fn select_managed<'a>(vms: &'a [VmSummary], prefixes: &[String]) -> Vec<&'a VmSummary> {
    vms.iter()
        .filter(|vm| prefixes.iter().any(|p| vm.name.starts_with(p.as_str())))
        .collect()
}

/// Power off and delete every VM matching `prefixes`.
///
/// Only the initial query is fatal. Each poweroff and delete is attempted
/// independently; a failed poweroff still gets its delete.
pub async fn destroy_managed(
    api: &dyn ComputeApi,
    prefixes: &[String],
) -> Result<DecommissionReport, FleetError> {
    let vms = api
        .query_vms()
        .await
        .map_err(|e| FleetError::Connection(format!("failed to query VMs: {:#}", e)))?;

    let managed = select_managed(&vms, prefixes);
    let mut report = DecommissionReport {
        matched: managed.iter().map(|vm| vm.name.clone()).collect(),
        ..Default::default()
    };

    if managed.is_empty() {
        info!("No managed VMs found to destroy");
        return Ok(report);
    }
    info!(count = managed.len(), "Found managed VM(s) to destroy");

    for vm in managed {
        match api.poweroff_vm(vm.id).await {
            Ok(()) => {
                info!(vm = %vm.name, vm_id = vm.id, "Powered off VM");
                report.powered_off.push(vm.name.clone());
            }
            Err(e) => {
                warn!(
                    vm = %vm.name,
                    vm_id = vm.id,
                    error = %format!("{:#}", e),
                    "Failed to power off VM"
                );
                let err = FleetError::remote("vm.poweroff", format!("{:#}", e));
                report.failures.push((vm.name.clone(), err));
            }
        }

        match api.delete_vm(vm.id, DeleteOptions::PURGE).await {
            Ok(()) => {
                info!(vm = %vm.name, vm_id = vm.id, "Deleted VM");
                report.deleted.push(vm.name.clone());
            }
            Err(e) => {
                error!(
                    vm = %vm.name,
                    vm_id = vm.id,
                    error = %format!("{:#}", e),
                    "Failed to delete VM"
                );
                let err = FleetError::remote("vm.delete", format!("{:#}", e));
                report.failures.push((vm.name.clone(), err));
            }
        }
    }

    Ok(report)
}
