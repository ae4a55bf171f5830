//! Creating every instance of a VM type, one at a time.
//!
//! A failed instance is logged and skipped; instances already created in the
//! same batch are left in place. The type is checked against the batch's VNC
//! base port before the first attempt, so every instance gets its own port.
//! There is no check for VMs that already carry
//! the computed names, so re-running against a populated fabric will attempt
//! duplicates.

use tracing::{error, info};
use vmforge_common::spec::{vm_name, vnc_port};
use vmforge_common::{ConfigError, FleetConfig, FleetError, DEFAULT_VM_TYPES};

use crate::provisioning::Provisioner;

#[derive(Debug, Default)]
pub struct BatchReport {
    pub vm_type: String,
    pub attempted: usize,
    /// `(name, id)` of every VM that came up.
    pub created: Vec<(String, i64)>,
    /// `(name, error)` of every instance that did not. Failed remote calls
    /// are [`FleetError::RemoteCall`].
    pub failed: Vec<(String, FleetError)>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Create `count` instances of `type_name`, named `{type}01..` with VNC ports
/// `vnc_base_port + 1..`.
pub async fn create_instances_of_type(
    provisioner: &Provisioner<'_>,
    config: &FleetConfig,
    type_name: &str,
    vnc_base_port: u16,
) -> Result<BatchReport, FleetError> {
    let vm_type = config.vm_type(type_name)?;
    let storage = &config.storage;

    let mut report = BatchReport {
        vm_type: type_name.to_string(),
        ..Default::default()
    };

    if vm_type.count <= 0 {
        info!(vm_type = type_name, "No VMs to create");
        return Ok(report);
    }
    vm_type.check(type_name, Some(vnc_base_port))?;
    let count = u32::try_from(vm_type.count).map_err(|_| {
        ConfigError::Invalid(vec![format!("{}.count is out of range", type_name)])
    })?;

    info!(vm_type = type_name, count, "Creating VM(s)");
    info!(pool_path = %storage.pool_path, cdrom_path = %storage.cdrom_path, "Using storage");

    for index in 1..=count {
        let name = vm_name(type_name, index);
        let port = vnc_port(vnc_base_port, index).ok_or_else(|| {
            ConfigError::Invalid(vec![format!("no VNC port left for {}", name)])
        })?;
        report.attempted += 1;

        match provisioner
            .create_instance(&name, vm_type, port, storage)
            .await
        {
            Ok(vm_id) => report.created.push((name, vm_id)),
            Err(e) => {
                error!(vm = %name, error = %e, "Failed to create VM");
                report.failed.push((name, FleetError::from(e)));
            }
        }
    }

    Ok(report)
}

/// Run [`create_instances_of_type`] for each `(type, default base port)` in
/// order. A per-type `vnc_base_port` in the configuration overrides the
/// default.
pub async fn create_fleet(
    provisioner: &Provisioner<'_>,
    config: &FleetConfig,
    types: &[(&str, u16)],
) -> Result<Vec<BatchReport>, FleetError> {
    let mut reports = Vec::with_capacity(types.len());
    for (type_name, default_port) in types {
        let base = config.vm_type(type_name)?.vnc_base_port.unwrap_or(*default_port);
        reports.push(create_instances_of_type(provisioner, config, type_name, base).await?);
    }
    Ok(reports)
}

/// [`create_fleet`] over the default managed types.
pub async fn create_default_fleet(
    provisioner: &Provisioner<'_>,
    config: &FleetConfig,
) -> Result<Vec<BatchReport>, FleetError> {
    create_fleet(provisioner, config, DEFAULT_VM_TYPES).await
}
