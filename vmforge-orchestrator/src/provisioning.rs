//! Building one VM: create, attach devices in order, start, and remove the
//! half-built VM when any step after creation fails.

use thiserror::Error;
use tracing::{debug, error, info};
use vmforge_common::spec::{gb_to_bytes, zvol_name};
use vmforge_common::{
    ConfigError, DeviceSpec, FleetError, StorageConfig, TemplateStore, VmSpec, VmTypeConfig,
};
use vmforge_providers::{ComputeApi, DeleteOptions};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid VM type configuration: {0}")]
    Invalid(ConfigError),

    #[error("VM creation failed: {0:#}")]
    Create(anyhow::Error),

    #[error("failed to add device {device} to VM {vm_id}: {cause:#}")]
    Device {
        vm_id: i64,
        device: String,
        cause: anyhow::Error,
    },

    #[error("failed to start VM {vm_id}: {cause:#}")]
    Start { vm_id: i64, cause: anyhow::Error },
}

impl ProvisionError {
    /// Id of the VM left behind by this failure, if creation got that far.
    pub fn vm_id(&self) -> Option<i64> {
        match self {
            ProvisionError::Invalid(_) | ProvisionError::Create(_) => None,
            ProvisionError::Device { vm_id, .. } | ProvisionError::Start { vm_id, .. } => {
                Some(*vm_id)
            }
        }
    }

    /// Remote method that failed; `None` when no call was at fault.
    pub fn method(&self) -> Option<&'static str> {
        match self {
            ProvisionError::Invalid(_) => None,
            ProvisionError::Create(_) => Some("vm.create"),
            ProvisionError::Device { .. } => Some("vm.device.create"),
            ProvisionError::Start { .. } => Some("vm.start"),
        }
    }
}

impl From<ProvisionError> for FleetError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::Invalid(cause) => FleetError::Config(cause),
            err @ ProvisionError::Create(_) => FleetError::remote("vm.create", err),
            err @ ProvisionError::Device { .. } => FleetError::remote("vm.device.create", err),
            err @ ProvisionError::Start { .. } => FleetError::remote("vm.start", err),
        }
    }
}

/// Devices of a new VM, in attach order: display, cdrom, one NIC per
/// declared interface, one disk per declared disk. Fails on a disk size
/// whose byte count does not fit a `u64`.
pub fn device_plan(
    vm_id: i64,
    vm_name: &str,
    vm_type: &VmTypeConfig,
    vnc_port: u16,
    vnc_password: &str,
    storage: &StorageConfig,
) -> Result<Vec<DeviceSpec>, ConfigError> {
    let mut plan = Vec::with_capacity(2 + vm_type.network.len() + vm_type.disk.len());

    plan.push(DeviceSpec::Display {
        vm_id,
        port: vnc_port,
        password: vnc_password.to_string(),
    });
    plan.push(DeviceSpec::Cdrom {
        vm_id,
        path: storage.cdrom_path.clone(),
    });
    for (_iface, attach_mode) in &vm_type.network {
        plan.push(DeviceSpec::Nic {
            vm_id,
            attach_mode: attach_mode.clone(),
            mac: None,
        });
    }
    for (disk_idx, (disk, size_gb)) in vm_type.disk.iter().enumerate() {
        let size_bytes = gb_to_bytes(*size_gb).ok_or_else(|| {
            ConfigError::Invalid(vec![format!(
                "disk {} of {}: {} GB does not fit in bytes",
                disk, vm_name, size_gb
            )])
        })?;
        plan.push(DeviceSpec::Disk {
            vm_id,
            zvol_name: zvol_name(&storage.pool_path, vm_name, disk_idx),
            size_bytes,
        });
    }
    Ok(plan)
}

pub struct Provisioner<'a> {
    api: &'a dyn ComputeApi,
    templates: &'a dyn TemplateStore,
    vnc_password: &'a str,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        api: &'a dyn ComputeApi,
        templates: &'a dyn TemplateStore,
        vnc_password: &'a str,
    ) -> Self {
        Self {
            api,
            templates,
            vnc_password,
        }
    }

    /// Create, configure and start one VM. Returns the fabric-assigned id.
    ///
    /// If anything after `vm.create` fails, one forced delete (with zvols) is
    /// attempted and the original error is returned regardless of how the
    /// delete went.
    pub async fn create_instance(
        &self,
        name: &str,
        vm_type: &VmTypeConfig,
        vnc_port: u16,
        storage: &StorageConfig,
    ) -> Result<i64, ProvisionError> {
        let spec = VmSpec {
            name: name.to_string(),
            cores: vm_type.cpu,
            threads: vm_type.cpu,
            memory: vm_type.memory,
        };

        let created = self
            .api
            .create_vm(&spec.render(self.templates))
            .await
            .map_err(ProvisionError::Create)?;
        let vm_id = created.id;
        info!(vm = name, vm_id, "Created VM");

        if let Err(err) = self.configure(vm_id, name, vm_type, vnc_port, storage).await {
            error!(vm = name, vm_id, error = %err, "Failed to configure VM, cleaning up");
            self.remove_partial(vm_id, name).await;
            return Err(err);
        }

        Ok(vm_id)
    }

    async fn configure(
        &self,
        vm_id: i64,
        name: &str,
        vm_type: &VmTypeConfig,
        vnc_port: u16,
        storage: &StorageConfig,
    ) -> Result<(), ProvisionError> {
        let plan = device_plan(vm_id, name, vm_type, vnc_port, self.vnc_password, storage)
            .map_err(ProvisionError::Invalid)?;
        for device in plan {
            let payload = device.render(self.templates);
            self.api
                .create_device(&payload)
                .await
                .map_err(|cause| ProvisionError::Device {
                    vm_id,
                    device: device.label(),
                    cause,
                })?;
            debug!(vm = name, vm_id, device = %device.label(), "Added device");
        }

        self.api
            .start_vm(vm_id)
            .await
            .map_err(|cause| ProvisionError::Start { vm_id, cause })?;
        info!(vm = name, vm_id, "Started VM");
        Ok(())
    }

    // Single attempt; a failure here is reported and the VM may leak.
    async fn remove_partial(&self, vm_id: i64, name: &str) {
        match self.api.delete_vm(vm_id, DeleteOptions::PURGE).await {
            Ok(()) => info!(vm = name, vm_id, "Removed partially configured VM"),
            Err(e) => error!(
                vm = name,
                vm_id,
                error = %format!("{:#}", e),
                "Failed to clean up VM; it may need manual removal"
            ),
        }
    }
}
