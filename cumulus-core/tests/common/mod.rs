// Common test fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use cumulus_core::capacity::{CapacityLedger, InMemoryCapacityLedger};
use cumulus_core::config::CumulusConfig;
use cumulus_core::inventory::InMemoryInventory;
use cumulus_core::snapshot::ClusterSnapshot;
use cumulus_core::topology::InMemoryTopology;
use cumulus_core::types::{HypervisorType, ServiceOffering, VirtualMachineProfile};
use cumulus_core::DeploymentPlanningManager;

/// Zone Z1 / pod P1 / XenServer cluster C1 with a roomy H1 and a nearly full H2
pub const Z1_SNAPSHOT: &str = r#"
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
name = "C1"
hypervisor = "xenserver"

[[hosts]]
id = 1
cluster = 1
name = "H1"
cpu_cores = 4
cpu_speed_mhz = 1000
memory_mb = 8192

[[hosts]]
id = 2
cluster = 1
name = "H2"
cpu_cores = 2
cpu_speed_mhz = 1000
memory_mb = 4096
used_cpu_mhz = 1800
used_memory_mb = 4000
"#;

/// One pod with two KVM clusters A and B of one equal host each
pub const TWO_CLUSTER_SNAPSHOT: &str = r#"
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
name = "A"
hypervisor = "kvm"

[[clusters]]
id = 2
pod = 1
name = "B"
hypervisor = "kvm"

[[hosts]]
id = 1
cluster = 1
name = "a1"
cpu_cores = 8
cpu_speed_mhz = 1000
memory_mb = 16384

[[hosts]]
id = 2
cluster = 2
name = "b1"
cpu_cores = 8
cpu_speed_mhz = 1000
memory_mb = 16384
"#;

/// Everything a test needs to place VMs and inspect the outcome
pub struct Fixture {
    pub topology: Arc<InMemoryTopology>,
    pub ledger: Arc<dyn CapacityLedger>,
    pub inventory: Arc<InMemoryInventory>,
    pub manager: DeploymentPlanningManager,
}

pub fn fixture(snapshot: &str, config: &CumulusConfig) -> Fixture {
    fixture_with_ledger(snapshot, config, Arc::new(InMemoryCapacityLedger::new()))
}

pub fn fixture_with_ledger(
    snapshot: &str,
    config: &CumulusConfig,
    ledger: Arc<dyn CapacityLedger>,
) -> Fixture {
    let snapshot = ClusterSnapshot::from_toml_str(snapshot).expect("snapshot parses");
    let topology = Arc::new(snapshot.topology().expect("topology is consistent"));
    snapshot
        .seed_ledger(ledger.as_ref(), &config.ledger.factors())
        .expect("ledger seeds");
    let inventory = Arc::new(snapshot.inventory(&topology));

    let manager = DeploymentPlanningManager::from_config(
        config,
        topology.clone(),
        ledger.clone(),
        inventory.clone(),
        inventory.clone(),
    )
    .expect("manager builds");

    Fixture {
        topology,
        ledger,
        inventory,
        manager,
    }
}

fn vm(id: u64, hypervisor: HypervisorType, cpus: u32, mhz: u64, ram_mb: u64) -> VirtualMachineProfile {
    VirtualMachineProfile::new(
        id,
        format!("vm-{}", id),
        42,
        hypervisor,
        ServiceOffering::new("test-offering", cpus, mhz, ram_mb),
    )
}

/// A KVM VM of account 42
pub fn kvm_vm(id: u64, cpus: u32, mhz: u64, ram_mb: u64) -> VirtualMachineProfile {
    vm(id, HypervisorType::Kvm, cpus, mhz, ram_mb)
}

/// A XenServer VM of account 42, for [`Z1_SNAPSHOT`]
pub fn xen_vm(id: u64, cpus: u32, mhz: u64, ram_mb: u64) -> VirtualMachineProfile {
    vm(id, HypervisorType::XenServer, cpus, mhz, ram_mb)
}
