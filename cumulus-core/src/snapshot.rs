//! Cluster snapshots
//!
//! A TOML description of a zone tree, host usage, running VMs and affinity groups.
//! The CLI plans against snapshots; tests use them to set up scenarios.
//!
//! ```toml
//! [[zones]]
//! id = 1
//! name = "Z1"
//!
//! [[pods]]
//! id = 1
//! zone = 1
//! name = "P1"
//!
//! [[clusters]]
//! id = 1
//! pod = 1
//! name = "C1"
//! hypervisor = "kvm"
//!
//! [[hosts]]
//! id = 1
//! cluster = 1
//! name = "H1"
//! cpu_cores = 4
//! cpu_speed_mhz = 1000
//! memory_mb = 8192
//! used_cpu_mhz = 500
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::affinity::{AffinityGroup, AffinityGroupId};
use crate::capacity::{CapacityLedger, OverprovisioningFactors, ResourceType};
use crate::error::CumulusResult;
use crate::inventory::{InMemoryInventory, RunningVm};
use crate::topology::InMemoryTopology;
use crate::types::{
    ClusterId, DeploymentPlan, Host, HostId, HostStatus, HypervisorType, PodId,
    VirtualMachineProfile, ZoneId, MIB,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneEntry {
    pub id: ZoneId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodEntry {
    pub id: PodId,
    pub zone: ZoneId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub id: ClusterId,
    pub pod: PodId,
    pub name: String,
    pub hypervisor: HypervisorType,
}

/// A host and, optionally, what is already allocated on it.
///
/// Usage left out is not written to the ledger, so a persistent ledger keeps
/// whatever it recorded before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub id: HostId,
    pub cluster: ClusterId,
    pub name: String,
    #[serde(default)]
    pub status: HostStatus,
    pub cpu_cores: u32,
    pub cpu_speed_mhz: u64,
    pub memory_mb: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    #[serde(default)]
    pub used_cpu_mhz: Option<u64>,
    #[serde(default)]
    pub reserved_cpu_mhz: Option<u64>,
    #[serde(default)]
    pub used_memory_mb: Option<u64>,
    #[serde(default)]
    pub reserved_memory_mb: Option<u64>,
}

impl HostEntry {
    fn to_host(&self) -> Host {
        let mut host = Host::new(self.id, self.cluster, self.name.clone())
            .with_cpu(self.cpu_cores, self.cpu_speed_mhz)
            .with_memory_mb(self.memory_mb)
            .with_status(self.status);
        host.tags = self.tags.clone();
        host.details = self.details.clone();
        host
    }

    fn cpu_usage(&self) -> Option<(u64, u64)> {
        usage(self.used_cpu_mhz, self.reserved_cpu_mhz, 1)
    }

    fn memory_usage(&self) -> Option<(u64, u64)> {
        usage(self.used_memory_mb, self.reserved_memory_mb, MIB)
    }
}

fn usage(used: Option<u64>, reserved: Option<u64>, unit: u64) -> Option<(u64, u64)> {
    if used.is_none() && reserved.is_none() {
        return None;
    }
    Some((
        used.unwrap_or_default().saturating_mul(unit),
        reserved.unwrap_or_default().saturating_mul(unit),
    ))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSnapshot {
    pub zones: Vec<ZoneEntry>,
    pub pods: Vec<PodEntry>,
    pub clusters: Vec<ClusterEntry>,
    pub hosts: Vec<HostEntry>,
    pub vms: Vec<RunningVm>,
    pub affinity_groups: Vec<AffinityGroup>,
}

impl ClusterSnapshot {
    pub fn from_toml_str(content: &str) -> CumulusResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> CumulusResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Build the topology; parents must be listed before their children
    pub fn topology(&self) -> CumulusResult<InMemoryTopology> {
        let mut builder = InMemoryTopology::builder();
        for zone in &self.zones {
            builder = builder.zone(zone.id, zone.name.clone());
        }
        for pod in &self.pods {
            builder = builder.pod(pod.id, pod.zone, pod.name.clone());
        }
        for cluster in &self.clusters {
            builder = builder.cluster(cluster.id, cluster.pod, cluster.name.clone(), cluster.hypervisor);
        }
        for host in &self.hosts {
            builder = builder.host(host.to_host());
        }
        builder.build()
    }

    /// Register every host with the ledger and write the usage the snapshot declares
    pub fn seed_ledger(
        &self,
        ledger: &dyn CapacityLedger,
        factors: &OverprovisioningFactors,
    ) -> CumulusResult<()> {
        for entry in &self.hosts {
            ledger.register_host(&entry.to_host(), factors)?;
            if let Some((used, reserved)) = entry.cpu_usage() {
                ledger.set_usage(entry.id, ResourceType::Cpu, used, reserved)?;
            }
            if let Some((used, reserved)) = entry.memory_usage() {
                ledger.set_usage(entry.id, ResourceType::Memory, used, reserved)?;
            }
        }
        debug!("Seeded capacity ledger with {} hosts", self.hosts.len());
        Ok(())
    }

    /// Running VMs and affinity groups of the snapshot
    pub fn inventory(&self, topology: &InMemoryTopology) -> InMemoryInventory {
        let inventory = InMemoryInventory::new(topology.hosts());
        for group in &self.affinity_groups {
            inventory.add_group(group.clone());
        }
        for vm in &self.vms {
            inventory.add_vm(vm.clone());
        }
        inventory
    }
}

/// The VM to place, its plan, and any affinity groups it is joining
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub vm: VirtualMachineProfile,
    pub plan: DeploymentPlan,
    #[serde(default)]
    pub affinity_groups: Vec<AffinityGroupId>,
}

impl PlacementRequest {
    pub fn from_toml_str(content: &str) -> CumulusResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> CumulusResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
