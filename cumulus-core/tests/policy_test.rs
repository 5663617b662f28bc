//! Bare-metal matching and affinity rules through the planning manager

mod common;

use common::{fixture, kvm_vm, TWO_CLUSTER_SNAPSHOT};
use cumulus_core::affinity::{AffinityGroup, AffinityGroupType};
use cumulus_core::config::CumulusConfig;
use cumulus_core::inventory::RunningVm;
use cumulus_core::types::{
    DeploymentPlan, HypervisorType, ServiceOffering, VirtualMachineProfile,
};
use cumulus_core::{CumulusError, ExcludeList};

const BARE_METAL_SNAPSHOT: &str = r#"
[[zones]]
id = 1
name = "Z1"

[[pods]]
id = 1
zone = 1
name = "P1"

[[clusters]]
id = 1
pod = 1
name = "metal"
hypervisor = "baremetal"

[[hosts]]
id = 1
cluster = 1
name = "bm-1"
cpu_cores = 8
cpu_speed_mhz = 2000
memory_mb = 16384
details = { hostTag = "db" }

[[hosts]]
id = 2
cluster = 1
name = "bm-2"
cpu_cores = 16
cpu_speed_mhz = 2000
memory_mb = 65536
details = { hostTag = "big" }
"#;

fn metal_vm(cpus: u32, ram_mb: u64, tag: Option<&str>) -> VirtualMachineProfile {
    let mut offering = ServiceOffering::new("metal", cpus, 2000, ram_mb);
    if let Some(tag) = tag {
        offering = offering.with_host_tag(tag);
    }
    VirtualMachineProfile::new(9, "metal-vm", 42, HypervisorType::BareMetal, offering)
}

#[test]
fn test_bare_metal_tag_selects_matching_machine() {
    let fx = fixture(BARE_METAL_SNAPSHOT, &CumulusConfig::default());
    let dest = fx
        .manager
        .plan_deployment(
            &metal_vm(16, 65536, Some("big")),
            &DeploymentPlan::new(1),
            &mut ExcludeList::new(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(dest.host.name, "bm-2");
}

#[test]
fn test_bare_metal_mismatch_is_an_error() {
    let fx = fixture(BARE_METAL_SNAPSHOT, &CumulusConfig::default());
    let err = fx
        .manager
        .plan_deployment(
            &metal_vm(4, 16384, Some("db")),
            &DeploymentPlan::new(1),
            &mut ExcludeList::new(),
        )
        .unwrap_err();
    match err {
        CumulusError::BareMetalCapacityMismatch { host_id, .. } => assert_eq!(host_id, 1),
        other => panic!("Expected BareMetalCapacityMismatch, got {:?}", other),
    }

    // no capacity leaked on the rejected machine
    let bm1 = fx.ledger.host_capacity(1).unwrap().unwrap();
    assert_eq!(bm1.cpu.used_capacity, 0);
}

#[test]
fn test_untagged_bare_metal_takes_first_exact_machine() {
    let fx = fixture(BARE_METAL_SNAPSHOT, &CumulusConfig::default());
    let dest = fx
        .manager
        .plan_deployment(
            &metal_vm(8, 16384, None),
            &DeploymentPlan::new(1),
            &mut ExcludeList::new(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(dest.host.name, "bm-1");
}

#[test]
fn test_untagged_bare_metal_skips_smaller_machines() {
    let fx = fixture(BARE_METAL_SNAPSHOT, &CumulusConfig::default());
    let dest = fx
        .manager
        .plan_deployment(
            &metal_vm(16, 65536, None),
            &DeploymentPlan::new(1),
            &mut ExcludeList::new(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(dest.host.name, "bm-2");

    let bm1 = fx.ledger.host_capacity(1).unwrap().unwrap();
    assert_eq!(bm1.cpu.used_capacity, 0);
}

#[test]
fn test_host_anti_affinity_spreads_group_members() {
    let fx = fixture(TWO_CLUSTER_SNAPSHOT, &CumulusConfig::default());
    fx.inventory
        .add_group(AffinityGroup::new(7, "web", AffinityGroupType::HostAntiAffinity));
    fx.inventory
        .add_vm(RunningVm::new(10, "web-1", 42, 1).with_group(7));
    fx.inventory.join_group(11, 7);

    let dest = fx
        .manager
        .plan_deployment(
            &kvm_vm(11, 1, 1000, 1024),
            &DeploymentPlan::new(1),
            &mut ExcludeList::new(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(dest.host.id, 2);
}

#[test]
fn test_cluster_affinity_follows_members() {
    let fx = fixture(TWO_CLUSTER_SNAPSHOT, &CumulusConfig::default());
    fx.inventory
        .add_group(AffinityGroup::new(8, "cache", AffinityGroupType::ClusterAffinity));
    fx.inventory
        .add_vm(RunningVm::new(20, "cache-1", 42, 2).with_group(8));
    fx.inventory.join_group(21, 8);

    let dest = fx
        .manager
        .plan_deployment(
            &kvm_vm(21, 1, 1000, 1024),
            &DeploymentPlan::new(1),
            &mut ExcludeList::new(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(dest.cluster.name, "B");
}

#[test]
fn test_split_affinity_group_conflicts() {
    let fx = fixture(TWO_CLUSTER_SNAPSHOT, &CumulusConfig::default());
    fx.inventory
        .add_group(AffinityGroup::new(9, "db", AffinityGroupType::HostAffinity));
    fx.inventory.add_vm(RunningVm::new(30, "db-1", 42, 1).with_group(9));
    fx.inventory.add_vm(RunningVm::new(31, "db-2", 42, 2).with_group(9));
    fx.inventory.join_group(32, 9);

    let err = fx
        .manager
        .plan_deployment(
            &kvm_vm(32, 1, 1000, 1024),
            &DeploymentPlan::new(1),
            &mut ExcludeList::new(),
        )
        .unwrap_err();
    assert!(matches!(err, CumulusError::AffinityConflict { .. }));
    assert!(err.is_policy_error());
    assert_eq!(fx.manager.metrics().affinity_conflicts(), 1);
}
