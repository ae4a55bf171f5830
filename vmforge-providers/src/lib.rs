use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Authenticated handle on the compute fabric's management API.
///
/// Every call blocks its caller until the fabric answers; calls are never
/// issued concurrently on one handle.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<bool>;
    async fn logout(&self) -> Result<()>;

    /// Tear down the underlying transport. Must be safe to call after a
    /// failed `logout` and more than once.
    async fn close(&self) -> Result<()>;

    /// `vm.create`; returns the id assigned by the fabric.
    async fn create_vm(&self, spec: &Value) -> Result<inventory::CreatedVm>;
    /// `vm.device.create`
    async fn create_device(&self, device: &Value) -> Result<()>;
    async fn start_vm(&self, vm_id: i64) -> Result<()>;
    async fn poweroff_vm(&self, vm_id: i64) -> Result<()>;
    async fn delete_vm(&self, vm_id: i64, options: DeleteOptions) -> Result<()>;
    /// `vm.query` with no filters.
    async fn query_vms(&self) -> Result<Vec<inventory::VmSummary>>;
}

/// Options of `vm.delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct DeleteOptions {
    pub zvols: bool,
    pub force: bool,
}

impl DeleteOptions {
    /// Remove backing zvols and skip the graceful shutdown.
    pub const PURGE: DeleteOptions = DeleteOptions {
        zvols: true,
        force: true,
    };
}

pub mod inventory {
    use serde::Deserialize;

    #[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
    pub struct CreatedVm {
        pub id: i64,
        #[serde(default)]
        pub name: Option<String>,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
    pub struct VmSummary {
        pub id: i64,
        pub name: String,
        #[serde(default, deserialize_with = "status_state")]
        pub status: Option<String>,
    }

    // `status` is `{ "state": "RUNNING", ... }` on the wire.
    fn status_state<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
        Ok(raw.and_then(|v| match v {
            serde_json::Value::String(s) => Some(s),
            other => other
                .get("state")
                .and_then(|s| s.as_str())
                .map(str::to_string),
        }))
    }
}

pub mod rpc;
pub mod truenas;

#[cfg(feature = "mock")]
pub mod mock;

pub use truenas::TrueNasClient;
