//! Blueprint documents that VM and device payloads are rendered from.
//!
//! A blueprint is an immutable JSON document. Stores hand out shared
//! references; every derivation in [`crate::spec`] clones before mutating, so
//! two instances built from the same store never share state.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TemplateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Vm,
    Nic,
    Disk,
    Display,
    Cdrom,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 5] = [
        TemplateKind::Vm,
        TemplateKind::Nic,
        TemplateKind::Disk,
        TemplateKind::Display,
        TemplateKind::Cdrom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Vm => "vm",
            TemplateKind::Nic => "nic",
            TemplateKind::Disk => "disk",
            TemplateKind::Display => "display",
            TemplateKind::Cdrom => "cdrom",
        }
    }

    pub fn is_device(&self) -> bool {
        !matches!(self, TemplateKind::Vm)
    }

    /// Location of this kind's document below a templates base directory.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            TemplateKind::Vm => Path::new("templates").join("vms").join("vm.json"),
            other => Path::new("templates")
                .join("devices")
                .join(format!("{}.json", other.as_str())),
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves a template kind to its blueprint.
///
/// Implementations are loaded eagerly and validated up front, so lookups are
/// infallible.
pub trait TemplateStore: Send + Sync {
    fn get_template(&self, kind: TemplateKind) -> &Value;
}

/// The five validated blueprints.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    documents: HashMap<TemplateKind, Value>,
}

impl TemplateSet {
    /// Build a set from already-parsed documents. All five kinds must be
    /// present and well-formed.
    pub fn from_documents(
        documents: impl IntoIterator<Item = (TemplateKind, Value)>,
    ) -> Result<Self, TemplateError> {
        let documents: HashMap<TemplateKind, Value> = documents.into_iter().collect();
        for kind in TemplateKind::ALL {
            let Some(doc) = documents.get(&kind) else {
                return Err(TemplateError::Missing { kind });
            };
            validate(kind, doc)?;
        }
        Ok(Self { documents })
    }

    fn get(&self, kind: TemplateKind) -> &Value {
        // Presence of every kind is checked in `from_documents`.
        &self.documents[&kind]
    }
}

fn validate(kind: TemplateKind, doc: &Value) -> Result<(), TemplateError> {
    if !doc.is_object() {
        return Err(TemplateError::Malformed {
            kind,
            reason: "document must be a JSON object".to_string(),
        });
    }
    if kind.is_device() && !doc.get("attributes").is_some_and(Value::is_object) {
        return Err(TemplateError::Malformed {
            kind,
            reason: "device template must contain an 'attributes' object".to_string(),
        });
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Directory-backed store
// -----------------------------------------------------------------------------

/// Reads `templates/vms/vm.json` and `templates/devices/*.json` below a base
/// directory.
#[derive(Debug, Clone)]
pub struct DirectoryTemplateStore {
    base_path: PathBuf,
    set: TemplateSet,
}

impl DirectoryTemplateStore {
    pub fn load(base_path: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        let base_path = base_path.into();
        let mut documents = Vec::with_capacity(TemplateKind::ALL.len());

        for kind in TemplateKind::ALL {
            let path = base_path.join(kind.relative_path());
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(TemplateError::NotFound { kind, path });
                }
                Err(e) => {
                    return Err(TemplateError::Unreadable {
                        path,
                        reason: e.to_string(),
                    });
                }
            };
            let doc: Value = serde_json::from_str(&raw).map_err(|e| TemplateError::Malformed {
                kind,
                reason: e.to_string(),
            })?;
            tracing::debug!(kind = %kind, path = %path.display(), "loaded template");
            documents.push((kind, doc));
        }

        Ok(Self {
            set: TemplateSet::from_documents(documents)?,
            base_path,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl TemplateStore for DirectoryTemplateStore {
    fn get_template(&self, kind: TemplateKind) -> &Value {
        self.set.get(kind)
    }
}

// -----------------------------------------------------------------------------
// In-memory store
// -----------------------------------------------------------------------------

/// Fixture store for tests and embedding.
#[derive(Debug, Clone)]
pub struct InMemoryTemplateStore {
    set: TemplateSet,
}

impl InMemoryTemplateStore {
    pub fn new(
        documents: impl IntoIterator<Item = (TemplateKind, Value)>,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            set: TemplateSet::from_documents(documents)?,
        })
    }

    /// Minimal blueprints in the shape the fabric expects.
    pub fn fixture() -> Self {
        use serde_json::json;
        let documents = [
            (
                TemplateKind::Vm,
                json!({
                    "name": "template",
                    "vcpus": 1,
                    "cores": 1,
                    "threads": 1,
                    "memory": 1024,
                    "bootloader": "UEFI",
                    "autostart": false,
                    "time": "LOCAL"
                }),
            ),
            (
                TemplateKind::Nic,
                json!({"attributes": {"dtype": "NIC", "type": "VIRTIO", "trust_guest_rx_filters": false}}),
            ),
            (
                TemplateKind::Disk,
                json!({"attributes": {"dtype": "DISK", "type": "VIRTIO", "create_zvol": true}}),
            ),
            (
                TemplateKind::Display,
                json!({"attributes": {"dtype": "DISPLAY", "type": "SPICE", "bind": "0.0.0.0", "web": true}}),
            ),
            (
                TemplateKind::Cdrom,
                json!({"attributes": {"dtype": "CDROM"}}),
            ),
        ];
        Self {
            set: TemplateSet {
                documents: HashMap::from(documents),
            },
        }
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn get_template(&self, kind: TemplateKind) -> &Value {
        self.set.get(kind)
    }
}
