//! Fleet configuration document.
//!
//! ```yaml
//! storage:
//!   pool_path: tank/vms
//!   cdrom_path: /mnt/tank/iso/talos.iso
//! controlplane:
//!   count: 3
//!   cpu: 2
//!   memory: 4294967296
//!   network: { eth0: br0 }
//!   disk: { root: 20 }
//! worker:
//!   count: 2
//!   cpu: 4
//!   memory: 8589934592
//!   network: { eth0: br0, eth1: br1 }
//!   disk: { root: 20, data: 100 }
//! ```
//!
//! Everything is checked in [`FleetConfig::from_yaml_str`]; nothing is read
//! lazily once provisioning has begun.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use crate::error::ConfigError;
use crate::spec::MAX_DISK_GB;

/// Managed VM types and their default VNC base ports, in creation order.
pub const DEFAULT_VM_TYPES: &[(&str, u16)] = &[("controlplane", 5910), ("worker", 5920)];

pub fn default_type_names() -> Vec<String> {
    DEFAULT_VM_TYPES
        .iter()
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Default VNC base port of a managed type.
pub fn default_base_port(vm_type: &str) -> Option<u16> {
    DEFAULT_VM_TYPES
        .iter()
        .find(|(name, _)| *name == vm_type)
        .map(|(_, port)| *port)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    pub pool_path: String,
    pub cdrom_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VmTypeConfig {
    pub count: i64,
    pub cpu: u32,
    pub memory: u64,
    /// Interface name -> attach mode, in declared order.
    #[serde(deserialize_with = "ordered_entries")]
    pub network: Vec<(String, String)>,
    /// Disk name -> size in GB, in declared order.
    #[serde(deserialize_with = "ordered_entries")]
    pub disk: Vec<(String, u64)>,
    #[serde(default)]
    pub vnc_base_port: Option<u16>,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetConfig {
    pub storage: StorageConfig,
    types: BTreeMap<String, VmTypeConfig>,
}

impl FleetConfig {
    pub fn new(
        storage: StorageConfig,
        types: impl IntoIterator<Item = (String, VmTypeConfig)>,
    ) -> Self {
        Self {
            storage,
            types: types.into_iter().collect(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with_types(path, &default_type_names())
    }

    /// Only the sections named in `required_types` are parsed as VM types.
    /// Any other top-level section is ignored, so every type a caller will
    /// later ask [`FleetConfig::vm_type`] for must be listed here.
    pub fn load_with_types(
        path: impl AsRef<Path>,
        required_types: &[String],
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_path_buf())
            } else {
                ConfigError::Unreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            }
        })?;
        Self::from_yaml_str(&raw, required_types)
    }

    /// Parse and validate. Each required type must have a section; every
    /// problem found is reported in one [`ConfigError::Invalid`]. Sections
    /// not listed in `required_types` are not read.
    pub fn from_yaml_str(raw: &str, required_types: &[String]) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let serde_yaml::Value::Mapping(root) = doc else {
            return Err(ConfigError::Invalid(vec![
                "configuration document must be a mapping".to_string(),
            ]));
        };

        let mut problems = Vec::new();

        let storage = match root.get("storage") {
            None => {
                problems.push("missing required configuration section: storage".to_string());
                None
            }
            Some(section) => {
                for field in ["pool_path", "cdrom_path"] {
                    if section.get(field).is_none() {
                        problems.push(format!(
                            "missing required '{}' in storage configuration",
                            field
                        ));
                    }
                }
                match serde_yaml::from_value::<StorageConfig>(section.clone()) {
                    Ok(storage) => Some(storage),
                    Err(e) if problems.is_empty() => {
                        problems.push(format!("storage: {}", e));
                        None
                    }
                    Err(_) => None,
                }
            }
        };

        let mut types = BTreeMap::new();
        for name in required_types {
            let Some(section) = root.get(name.as_str()) else {
                problems.push(format!("missing required configuration section: {}", name));
                continue;
            };
            match serde_yaml::from_value::<VmTypeConfig>(section.clone()) {
                Ok(cfg) => {
                    let base = cfg.vnc_base_port.or_else(|| default_base_port(name));
                    problems.extend(cfg.problems(name, base));
                    types.insert(name.clone(), cfg);
                }
                Err(e) => problems.push(format!("{}: {}", name, e)),
            }
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems));
        }
        let Some(storage) = storage else {
            return Err(ConfigError::Invalid(vec![
                "missing required configuration section: storage".to_string(),
            ]));
        };
        if storage.pool_path.trim().is_empty() || storage.cdrom_path.trim().is_empty() {
            return Err(ConfigError::Invalid(vec![
                "storage.pool_path and storage.cdrom_path must not be empty".to_string(),
            ]));
        }

        Ok(Self { storage, types })
    }

    pub fn vm_type(&self, name: &str) -> Result<&VmTypeConfig, ConfigError> {
        self.types
            .get(name)
            .ok_or_else(|| ConfigError::UnknownType(name.to_string()))
    }
}

impl VmTypeConfig {
    /// Check this type before a batch runs with VNC ports from `base_port`.
    pub fn check(&self, name: &str, base_port: Option<u16>) -> Result<(), ConfigError> {
        let problems = self.problems(name, base_port);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    fn problems(&self, name: &str, base_port: Option<u16>) -> Vec<String> {
        let mut out = Vec::new();
        if self.count < 0 {
            out.push(format!("{}.count must be >= 0 (got {})", name, self.count));
        }
        match base_port {
            Some(base) if i64::from(base).saturating_add(self.count) > i64::from(u16::MAX) => {
                out.push(format!(
                    "{}.count of {} with VNC base port {} runs past port {}",
                    name,
                    self.count,
                    base,
                    u16::MAX
                ));
            }
            None if self.count > i64::from(u32::MAX) => {
                out.push(format!("{}.count must be <= {}", name, u32::MAX));
            }
            _ => {}
        }
        if self.cpu == 0 {
            out.push(format!("{}.cpu must be >= 1", name));
        }
        if self.memory == 0 {
            out.push(format!("{}.memory must be >= 1", name));
        }
        for (disk, size_gb) in &self.disk {
            if *size_gb == 0 {
                out.push(format!("{}.disk.{} must be >= 1 GB", name, disk));
            } else if *size_gb > MAX_DISK_GB {
                out.push(format!("{}.disk.{} must be <= {} GB", name, disk, MAX_DISK_GB));
            }
        }
        out
    }
}

/// Deserialize a mapping into its entries, keeping document order.
fn ordered_entries<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct EntriesVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping")
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((k, v)) = map.next_entry::<String, T>()? {
                out.push((k, v));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(EntriesVisitor(PhantomData))
}
