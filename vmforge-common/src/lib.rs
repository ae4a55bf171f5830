//! Shared model for fleet provisioning: configuration, blueprints, specs and
//! the error taxonomy.

pub mod config;
pub mod error;
pub mod spec;
pub mod templates;

pub use config::{FleetConfig, StorageConfig, VmTypeConfig, DEFAULT_VM_TYPES};
pub use error::{ConfigError, FleetError, TemplateError};
pub use spec::{DeviceSpec, VmSpec};
pub use templates::{
    DirectoryTemplateStore, InMemoryTemplateStore, TemplateKind, TemplateStore,
};
