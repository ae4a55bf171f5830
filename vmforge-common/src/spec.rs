//! Per-instance VM and device specs, and the naming / sizing rules they obey.

use serde_json::{json, Map, Value};

use crate::templates::{TemplateKind, TemplateStore};

/// Bytes per GiB. Disk sizes are configured in GB and sent in bytes.
pub const BYTES_PER_GB: u64 = 1 << 30;

/// Largest disk size, in GB, whose byte count still fits a `u64`.
pub const MAX_DISK_GB: u64 = u64::MAX / BYTES_PER_GB;

/// `None` when the byte count would overflow.
pub fn gb_to_bytes(size_gb: u64) -> Option<u64> {
    size_gb.checked_mul(BYTES_PER_GB)
}

/// `"{type}{index:02}"` with a 1-based index.
pub fn vm_name(vm_type: &str, index: u32) -> String {
    format!("{}{:02}", vm_type, index)
}

/// VNC port of the `index`-th (1-based) instance of a batch, or `None` past
/// the end of the port range.
pub fn vnc_port(base_port: u16, index: u32) -> Option<u16> {
    u32::from(base_port)
        .checked_add(index)
        .and_then(|port| u16::try_from(port).ok())
}

/// `"{pool_path}/{vm_name}-disk{idx}"` with a 0-based disk index.
pub fn zvol_name(pool_path: &str, vm_name: &str, disk_index: usize) -> String {
    format!("{}/{}-disk{}", pool_path, vm_name, disk_index)
}

// --- VM ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    pub name: String,
    pub cores: u32,
    pub threads: u32,
    pub memory: u64,
}

impl VmSpec {
    /// Fresh `vm.create` payload: a copy of the vm blueprint with this spec's
    /// fields overlaid.
    pub fn render(&self, templates: &dyn TemplateStore) -> Value {
        let mut payload = templates.get_template(TemplateKind::Vm).clone();
        let obj = object_mut(&mut payload);
        obj.insert("name".into(), json!(self.name));
        obj.insert("cores".into(), json!(self.cores));
        obj.insert("threads".into(), json!(self.threads));
        obj.insert("memory".into(), json!(self.memory));
        payload
    }
}

// --- Devices ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSpec {
    Display {
        vm_id: i64,
        port: u16,
        password: String,
    },
    Cdrom {
        vm_id: i64,
        path: String,
    },
    Nic {
        vm_id: i64,
        attach_mode: String,
        mac: Option<String>,
    },
    Disk {
        vm_id: i64,
        zvol_name: String,
        size_bytes: u64,
    },
}

impl DeviceSpec {
    pub fn kind(&self) -> TemplateKind {
        match self {
            DeviceSpec::Display { .. } => TemplateKind::Display,
            DeviceSpec::Cdrom { .. } => TemplateKind::Cdrom,
            DeviceSpec::Nic { .. } => TemplateKind::Nic,
            DeviceSpec::Disk { .. } => TemplateKind::Disk,
        }
    }

    pub fn vm_id(&self) -> i64 {
        match self {
            DeviceSpec::Display { vm_id, .. }
            | DeviceSpec::Cdrom { vm_id, .. }
            | DeviceSpec::Nic { vm_id, .. }
            | DeviceSpec::Disk { vm_id, .. } => *vm_id,
        }
    }

    /// Short label for logs, e.g. `disk(tank/vms/worker01-disk0)`.
    pub fn label(&self) -> String {
        match self {
            DeviceSpec::Display { port, .. } => format!("display(:{})", port),
            DeviceSpec::Cdrom { path, .. } => format!("cdrom({})", path),
            DeviceSpec::Nic { attach_mode, .. } => format!("nic({})", attach_mode),
            DeviceSpec::Disk { zvol_name, .. } => format!("disk({})", zvol_name),
        }
    }

    /// Fresh `vm.device.create` payload built on a copy of this kind's
    /// blueprint. Runtime fields land in `attributes`; the owner id in `vm`.
    pub fn render(&self, templates: &dyn TemplateStore) -> Value {
        let mut payload = templates.get_template(self.kind()).clone();
        let obj = object_mut(&mut payload);
        obj.insert("vm".into(), json!(self.vm_id()));

        let attrs = object_mut(
            obj.entry("attributes")
                .or_insert_with(|| Value::Object(Map::new())),
        );
        match self {
            DeviceSpec::Display { port, password, .. } => {
                attrs.insert("port".into(), json!(port));
                attrs.insert("password".into(), json!(password));
            }
            DeviceSpec::Cdrom { path, .. } => {
                attrs.insert("path".into(), json!(path));
            }
            DeviceSpec::Nic {
                attach_mode, mac, ..
            } => {
                attrs.insert("nic_attach".into(), json!(attach_mode));
                if let Some(mac) = mac {
                    attrs.insert("mac".into(), json!(mac));
                }
            }
            DeviceSpec::Disk {
                zvol_name,
                size_bytes,
                ..
            } => {
                attrs.insert("zvol_name".into(), json!(zvol_name));
                attrs.insert("zvol_volsize".into(), json!(size_bytes));
            }
        }
        payload
    }
}

fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::InMemoryTemplateStore;

    #[test]
    fn size_is_gib_exact() {
        for gb in [1u64, 2, 20, 100, 4096] {
            assert_eq!(gb_to_bytes(gb), Some(gb * 1_073_741_824));
        }
    }

    #[test]
    fn size_overflow_is_refused() {
        assert_eq!(gb_to_bytes(MAX_DISK_GB), Some(MAX_DISK_GB << 30));
        assert_eq!(gb_to_bytes(MAX_DISK_GB + 1), None);
    }

    #[test]
    fn names_are_zero_padded_and_one_based() {
        assert_eq!(vm_name("worker", 1), "worker01");
        assert_eq!(vm_name("controlplane", 9), "controlplane09");
        assert_eq!(vm_name("worker", 12), "worker12");
        assert_eq!(vm_name("worker", 100), "worker100");
    }

    #[test]
    fn vnc_ports_are_distinct_within_a_batch() {
        let ports: Vec<u16> = (1..=5).filter_map(|i| vnc_port(5920, i)).collect();
        assert_eq!(ports, vec![5921, 5922, 5923, 5924, 5925]);
    }

    #[test]
    fn vnc_port_stops_at_end_of_range() {
        assert_eq!(vnc_port(65534, 1), Some(65535));
        assert_eq!(vnc_port(65534, 2), None);
        assert_eq!(vnc_port(0, u32::MAX), None);
    }

    #[test]
    fn zvol_name_embeds_disk_index() {
        assert_eq!(
            zvol_name("tank/vms", "worker02", 1),
            "tank/vms/worker02-disk1"
        );
    }

    #[test]
    fn vm_render_overrides_without_touching_blueprint() {
        let store = InMemoryTemplateStore::fixture();
        let spec = VmSpec {
            name: "worker01".into(),
            cores: 4,
            threads: 4,
            memory: 8 * 1024 * 1024 * 1024,
        };
        let payload = spec.render(&store);
        assert_eq!(payload["name"], "worker01");
        assert_eq!(payload["cores"], 4);
        assert_eq!(payload["memory"], 8u64 * 1024 * 1024 * 1024);
        assert_eq!(payload["bootloader"], "UEFI");

        let blueprint = store.get_template(TemplateKind::Vm);
        assert_eq!(blueprint["name"], "template");
        assert_eq!(blueprint["cores"], 1);
    }

    #[test]
    fn device_render_overlays_attributes() {
        let store = InMemoryTemplateStore::fixture();

        let disk = DeviceSpec::Disk {
            vm_id: 7,
            zvol_name: "tank/vms/worker01-disk0".into(),
            size_bytes: 20 << 30,
        };
        let payload = disk.render(&store);
        assert_eq!(payload["vm"], 7);
        assert_eq!(payload["attributes"]["dtype"], "DISK");
        assert_eq!(payload["attributes"]["zvol_name"], "tank/vms/worker01-disk0");
        assert_eq!(payload["attributes"]["zvol_volsize"], 20u64 << 30);

        let nic = DeviceSpec::Nic {
            vm_id: 7,
            attach_mode: "br0".into(),
            mac: None,
        };
        let payload = nic.render(&store);
        assert_eq!(payload["attributes"]["nic_attach"], "br0");
        assert!(payload["attributes"].get("mac").is_none());

        let display = DeviceSpec::Display {
            vm_id: 7,
            port: 5911,
            password: "secret".into(),
        };
        let payload = display.render(&store);
        assert_eq!(payload["attributes"]["port"], 5911);
        assert_eq!(payload["attributes"]["password"], "secret");

        // Blueprints stay pristine.
        assert!(store.get_template(TemplateKind::Disk)["attributes"]
            .get("zvol_name")
            .is_none());
        assert!(store.get_template(TemplateKind::Display).get("vm").is_none());
    }

    #[test]
    fn nic_mac_is_set_when_given() {
        let store = InMemoryTemplateStore::fixture();
        let nic = DeviceSpec::Nic {
            vm_id: 1,
            attach_mode: "eno1".into(),
            mac: Some("00:a0:98:00:00:01".into()),
        };
        assert_eq!(nic.render(&store)["attributes"]["mac"], "00:a0:98:00:00:01");
    }
}
