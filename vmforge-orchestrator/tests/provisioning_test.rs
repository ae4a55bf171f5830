mod common;

use common::{storage, vm_type, VNC_PASSWORD};
use vmforge_common::{InMemoryTemplateStore, TemplateKind, TemplateStore};
use vmforge_orchestrator::{ProvisionError, Provisioner};
use vmforge_providers::mock::{Call, MockComputeApi};
use vmforge_providers::DeleteOptions;

#[tokio::test]
async fn test_create_instance_attaches_devices_in_order_then_starts() {
    common::init_tracing();
    let api = MockComputeApi::new();
    let templates = InMemoryTemplateStore::fixture();
    let provisioner = Provisioner::new(&api, &templates, VNC_PASSWORD);

    let vm_id = provisioner
        .create_instance("worker01", &vm_type(1), 5921, &storage())
        .await
        .expect("provisioning should succeed");

    let dtypes: Vec<String> = api
        .device_calls(vm_id)
        .into_iter()
        .map(|(dtype, _)| dtype)
        .collect();
    assert_eq!(dtypes, vec!["DISPLAY", "CDROM", "NIC", "NIC", "DISK", "DISK"]);

    let calls = api.calls();
    assert_eq!(calls.first(), Some(&Call::CreateVm { name: "worker01".into() }));
    assert_eq!(calls.last(), Some(&Call::Start { vm_id }));
    assert!(api.delete_calls().is_empty());
    assert!(api.vm_by_name("worker01").unwrap().running);
}

#[tokio::test]
async fn test_device_payloads_carry_runtime_fields() {
    let api = MockComputeApi::new();
    let templates = InMemoryTemplateStore::fixture();
    let provisioner = Provisioner::new(&api, &templates, VNC_PASSWORD);

    let vm_id = provisioner
        .create_instance("worker02", &vm_type(2), 5922, &storage())
        .await
        .unwrap();

    let devices = api.device_calls(vm_id);
    let display = &devices[0].1;
    assert_eq!(display["vm"], vm_id);
    assert_eq!(display["attributes"]["port"], 5922);
    assert_eq!(display["attributes"]["password"], VNC_PASSWORD);

    let cdrom = &devices[1].1;
    assert_eq!(cdrom["attributes"]["path"], "/mnt/tank/iso/talos.iso");

    assert_eq!(devices[2].1["attributes"]["nic_attach"], "br0");
    assert_eq!(devices[3].1["attributes"]["nic_attach"], "br1");

    let disk0 = &devices[4].1["attributes"];
    assert_eq!(disk0["zvol_name"], "tank/vms/worker02-disk0");
    assert_eq!(disk0["zvol_volsize"], 20u64 * 1_073_741_824);
    let disk1 = &devices[5].1["attributes"];
    assert_eq!(disk1["zvol_name"], "tank/vms/worker02-disk1");
    assert_eq!(disk1["zvol_volsize"], 100u64 * 1_073_741_824);
}

#[tokio::test]
async fn test_device_failure_triggers_single_purge_and_surfaces_original_error() {
    let api = MockComputeApi::new();
    api.fail_device_for("worker01", Some("NIC"));
    let templates = InMemoryTemplateStore::fixture();
    let provisioner = Provisioner::new(&api, &templates, VNC_PASSWORD);

    let err = provisioner
        .create_instance("worker01", &vm_type(1), 5921, &storage())
        .await
        .unwrap_err();

    let ProvisionError::Device { vm_id, device, .. } = &err else {
        panic!("expected device error, got {err:?}");
    };
    assert_eq!(device, "nic(br0)");
    assert_eq!(api.delete_calls(), vec![(*vm_id, DeleteOptions::PURGE)]);
    // Nothing after the failing attach, no start.
    assert_eq!(api.device_calls(*vm_id).len(), 3);
    assert!(!api.calls().contains(&Call::Start { vm_id: *vm_id }));
    assert!(api.vm_names().is_empty());
}

#[tokio::test]
async fn test_cleanup_failure_does_not_replace_original_error() {
    let api = MockComputeApi::new();
    api.fail_device_for("worker01", Some("DISK"))
        .fail_delete_for("worker01");
    let templates = InMemoryTemplateStore::fixture();
    let provisioner = Provisioner::new(&api, &templates, VNC_PASSWORD);

    let err = provisioner
        .create_instance("worker01", &vm_type(1), 5921, &storage())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Device { .. }), "{err:?}");
    assert!(err.to_string().contains("disk(tank/vms/worker01-disk0)"));
    assert_eq!(api.delete_calls().len(), 1);
    // The half-built VM leaks and is still visible.
    assert_eq!(api.vm_names(), vec!["worker01"]);
}

#[tokio::test]
async fn test_start_failure_rolls_back() {
    let api = MockComputeApi::new();
    api.fail_start_for("controlplane01");
    let templates = InMemoryTemplateStore::fixture();
    let provisioner = Provisioner::new(&api, &templates, VNC_PASSWORD);

    let err = provisioner
        .create_instance("controlplane01", &vm_type(1), 5911, &storage())
        .await
        .unwrap_err();

    let vm_id = err.vm_id().expect("VM was created");
    assert!(matches!(err, ProvisionError::Start { .. }));
    assert_eq!(err.method(), Some("vm.start"));
    assert_eq!(api.device_calls(vm_id).len(), 6);
    assert_eq!(api.delete_calls(), vec![(vm_id, DeleteOptions::PURGE)]);
}

#[tokio::test]
async fn test_create_failure_has_nothing_to_roll_back() {
    let api = MockComputeApi::new();
    api.fail_create_for("worker01");
    let templates = InMemoryTemplateStore::fixture();
    let provisioner = Provisioner::new(&api, &templates, VNC_PASSWORD);

    let err = provisioner
        .create_instance("worker01", &vm_type(1), 5921, &storage())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisionError::Create(_)));
    assert_eq!(err.vm_id(), None);
    assert_eq!(api.calls(), vec![Call::CreateVm { name: "worker01".into() }]);
}

#[tokio::test]
async fn test_vm_spec_uses_cpu_for_cores_and_threads_without_touching_templates() {
    let api = MockComputeApi::new();
    let templates = InMemoryTemplateStore::fixture();
    let before = templates.get_template(TemplateKind::Vm).clone();
    let provisioner = Provisioner::new(&api, &templates, VNC_PASSWORD);

    let mut small = vm_type(1);
    small.cpu = 2;
    small.memory = 2 * 1024 * 1024 * 1024;
    provisioner
        .create_instance("worker01", &small, 5921, &storage())
        .await
        .unwrap();
    provisioner
        .create_instance("worker02", &vm_type(1), 5922, &storage())
        .await
        .unwrap();

    assert_eq!(templates.get_template(TemplateKind::Vm), &before);
    assert!(templates.get_template(TemplateKind::Display).get("vm").is_none());

    let vms = api.vms();
    assert_eq!(vms.len(), 2);
    assert_eq!(vms[0].spec["cores"], 2);
    assert_eq!(vms[0].spec["threads"], 2);
    assert_eq!(vms[0].spec["memory"], 2u64 * 1024 * 1024 * 1024);
    assert_eq!(vms[1].spec["cores"], 4);
    assert_eq!(vms[1].spec["name"], "worker02");
    assert_eq!(vms[1].spec["bootloader"], "UEFI");
    let first_display = &vms[0].devices[0];
    let second_display = &vms[1].devices[0];
    assert_eq!(first_display["attributes"]["port"], 5921);
    assert_eq!(second_display["attributes"]["port"], 5922);
}
