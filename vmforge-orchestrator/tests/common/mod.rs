// Shared fixtures for orchestrator tests
#![allow(dead_code)]

use vmforge_common::{FleetConfig, StorageConfig, VmTypeConfig};

pub const VNC_PASSWORD: &str = "vnc-secret";

pub fn storage() -> StorageConfig {
    StorageConfig {
        pool_path: "tank/vms".to_string(),
        cdrom_path: "/mnt/tank/iso/talos.iso".to_string(),
    }
}

pub fn vm_type(count: i64) -> VmTypeConfig {
    VmTypeConfig {
        count,
        cpu: 4,
        memory: 8 * 1024 * 1024 * 1024,
        network: vec![
            ("eth0".to_string(), "br0".to_string()),
            ("eth1".to_string(), "br1".to_string()),
        ],
        disk: vec![("root".to_string(), 20), ("data".to_string(), 100)],
        vnc_base_port: None,
    }
}

pub fn fleet(controlplane: i64, worker: i64) -> FleetConfig {
    FleetConfig::new(
        storage(),
        [
            ("controlplane".to_string(), vm_type(controlplane)),
            ("worker".to_string(), vm_type(worker)),
        ],
    )
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
