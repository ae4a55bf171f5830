use crate::{inventory, ComputeApi, DeleteOptions};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// One recorded invocation, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Login { username: String },
    Logout,
    Close,
    CreateVm { name: String },
    CreateDevice { vm_id: i64, dtype: String, payload: Value },
    Start { vm_id: i64 },
    Poweroff { vm_id: i64 },
    Delete { vm_id: i64, options: DeleteOptions },
    Query,
}

#[derive(Debug, Clone)]
pub struct MockVm {
    pub id: i64,
    pub name: String,
    /// Payload it was created from.
    pub spec: Value,
    pub running: bool,
    pub devices: Vec<Value>,
}

#[derive(Default)]
struct Failures {
    reject_login: bool,
    login_error: bool,
    logout: bool,
    close: bool,
    query: bool,
    create: HashSet<String>,
    // (vm name, dtype); dtype None fails every device of that VM.
    device: Vec<(String, Option<String>)>,
    start: HashSet<String>,
    poweroff: HashSet<String>,
    delete: HashSet<String>,
}

#[derive(Default)]
struct State {
    next_id: i64,
    vms: BTreeMap<i64, MockVm>,
    calls: Vec<Call>,
    failures: Failures,
}

/// In-memory fabric that records every call and fails on demand.
#[derive(Default)]
pub struct MockComputeApi {
    state: Mutex<State>,
}

impl MockComputeApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the recorded calls.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- seeding ---

    /// Register a VM that already exists on the fabric. Returns its id.
    pub fn with_vm(&self, name: &str) -> i64 {
        let mut st = self.state();
        st.next_id += 1;
        let id = st.next_id;
        st.vms.insert(
            id,
            MockVm {
                id,
                name: name.to_string(),
                spec: serde_json::json!({ "name": name }),
                running: true,
                devices: Vec::new(),
            },
        );
        id
    }

    // --- failure injection ---

    pub fn reject_login(&self) -> &Self {
        self.state().failures.reject_login = true;
        self
    }

    pub fn fail_login(&self) -> &Self {
        self.state().failures.login_error = true;
        self
    }

    pub fn fail_logout(&self) -> &Self {
        self.state().failures.logout = true;
        self
    }

    pub fn fail_close(&self) -> &Self {
        self.state().failures.close = true;
        self
    }

    pub fn fail_query(&self) -> &Self {
        self.state().failures.query = true;
        self
    }

    pub fn fail_create_for(&self, vm_name: &str) -> &Self {
        self.state().failures.create.insert(vm_name.to_string());
        self
    }

    /// Fail `vm.device.create` for the named VM, for one device type
    /// (`"DISPLAY"`, `"CDROM"`, `"NIC"`, `"DISK"`) or for all of them.
    pub fn fail_device_for(&self, vm_name: &str, dtype: Option<&str>) -> &Self {
        self.state()
            .failures
            .device
            .push((vm_name.to_string(), dtype.map(str::to_ascii_uppercase)));
        self
    }

    pub fn fail_start_for(&self, vm_name: &str) -> &Self {
        self.state().failures.start.insert(vm_name.to_string());
        self
    }

    pub fn fail_poweroff_for(&self, vm_name: &str) -> &Self {
        self.state().failures.poweroff.insert(vm_name.to_string());
        self
    }

    pub fn fail_delete_for(&self, vm_name: &str) -> &Self {
        self.state().failures.delete.insert(vm_name.to_string());
        self
    }

    // --- inspection ---

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn vms(&self) -> Vec<MockVm> {
        self.state().vms.values().cloned().collect()
    }

    pub fn vm_names(&self) -> Vec<String> {
        self.state().vms.values().map(|vm| vm.name.clone()).collect()
    }

    pub fn vm_by_name(&self, name: &str) -> Option<MockVm> {
        self.state().vms.values().find(|vm| vm.name == name).cloned()
    }

    /// `vm.device.create` payloads issued for `vm_id`, in order.
    pub fn device_calls(&self, vm_id: i64) -> Vec<(String, Value)> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::CreateDevice {
                    vm_id: id,
                    dtype,
                    payload,
                } if *id == vm_id => Some((dtype.clone(), payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn delete_calls(&self) -> Vec<(i64, DeleteOptions)> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Delete { vm_id, options } => Some((*vm_id, *options)),
                _ => None,
            })
            .collect()
    }

    pub fn poweroff_calls(&self) -> Vec<i64> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Poweroff { vm_id } => Some(*vm_id),
                _ => None,
            })
            .collect()
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::CreateVm { name } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

impl State {
    fn name_of(&self, vm_id: i64) -> Result<String> {
        self.vms
            .get(&vm_id)
            .map(|vm| vm.name.clone())
            .ok_or_else(|| anyhow!("[ENOENT] VM {} does not exist", vm_id))
    }
}

#[async_trait]
impl ComputeApi for MockComputeApi {
    async fn login(&self, username: &str, _password: &str) -> Result<bool> {
        let mut st = self.state();
        st.calls.push(Call::Login {
            username: username.to_string(),
        });
        if st.failures.login_error {
            bail!("connection refused");
        }
        Ok(!st.failures.reject_login)
    }

    async fn logout(&self) -> Result<()> {
        let mut st = self.state();
        st.calls.push(Call::Logout);
        if st.failures.logout {
            bail!("logout failed: session expired");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut st = self.state();
        st.calls.push(Call::Close);
        if st.failures.close {
            bail!("socket already torn down");
        }
        Ok(())
    }

    async fn create_vm(&self, spec: &Value) -> Result<inventory::CreatedVm> {
        let mut st = self.state();
        let name = spec
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        st.calls.push(Call::CreateVm { name: name.clone() });
        if st.failures.create.contains(&name) {
            bail!("[EINVAL] vm_create.name: failed to create {}", name);
        }
        st.next_id += 1;
        let id = st.next_id;
        st.vms.insert(
            id,
            MockVm {
                id,
                name: name.clone(),
                spec: spec.clone(),
                running: false,
                devices: Vec::new(),
            },
        );
        Ok(inventory::CreatedVm {
            id,
            name: Some(name),
        })
    }

    async fn create_device(&self, device: &Value) -> Result<()> {
        let mut st = self.state();
        let vm_id = device.get("vm").and_then(Value::as_i64).unwrap_or(-1);
        let dtype = device
            .get("attributes")
            .and_then(|a| a.get("dtype"))
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_ascii_uppercase();
        st.calls.push(Call::CreateDevice {
            vm_id,
            dtype: dtype.clone(),
            payload: device.clone(),
        });
        let name = st.name_of(vm_id)?;
        let fails = st
            .failures
            .device
            .iter()
            .any(|(n, t)| *n == name && t.as_deref().map_or(true, |t| t == dtype));
        if fails {
            bail!("[EINVAL] vm_device_create: {} rejected for {}", dtype, name);
        }
        if let Some(vm) = st.vms.get_mut(&vm_id) {
            vm.devices.push(device.clone());
        }
        Ok(())
    }

    async fn start_vm(&self, vm_id: i64) -> Result<()> {
        let mut st = self.state();
        st.calls.push(Call::Start { vm_id });
        let name = st.name_of(vm_id)?;
        if st.failures.start.contains(&name) {
            bail!("[EFAULT] not enough memory to start {}", name);
        }
        if let Some(vm) = st.vms.get_mut(&vm_id) {
            vm.running = true;
        }
        Ok(())
    }

    async fn poweroff_vm(&self, vm_id: i64) -> Result<()> {
        let mut st = self.state();
        st.calls.push(Call::Poweroff { vm_id });
        let name = st.name_of(vm_id)?;
        if st.failures.poweroff.contains(&name) {
            bail!("[EFAULT] failed to power off {}", name);
        }
        if let Some(vm) = st.vms.get_mut(&vm_id) {
            vm.running = false;
        }
        Ok(())
    }

    async fn delete_vm(&self, vm_id: i64, options: DeleteOptions) -> Result<()> {
        let mut st = self.state();
        st.calls.push(Call::Delete { vm_id, options });
        let name = st.name_of(vm_id)?;
        if st.failures.delete.contains(&name) {
            bail!("[EBUSY] zvol for {} is busy", name);
        }
        if st.vms.get(&vm_id).is_some_and(|vm| vm.running) && !options.force {
            bail!("[EBUSY] {} is running", name);
        }
        st.vms.remove(&vm_id);
        Ok(())
    }

    async fn query_vms(&self) -> Result<Vec<inventory::VmSummary>> {
        let mut st = self.state();
        st.calls.push(Call::Query);
        if st.failures.query {
            bail!("connection reset by peer");
        }
        Ok(st
            .vms
            .values()
            .map(|vm| inventory::VmSummary {
                id: vm.id,
                name: vm.name.clone(),
                status: Some(if vm.running { "RUNNING" } else { "STOPPED" }.to_string()),
            })
            .collect())
    }
}
