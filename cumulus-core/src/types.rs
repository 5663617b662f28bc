//! Shared domain types: topology nodes, VM profiles, deployment plans and destinations

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ZoneId = u64;
pub type PodId = u64;
pub type ClusterId = u64;
pub type HostId = u64;
pub type AccountId = u64;
pub type VmId = u64;

/// Bytes per mebibyte; offerings are declared in MB, the ledger counts bytes.
pub const MIB: u64 = 1024 * 1024;

/// Host detail key carrying the bare-metal host tag
pub const HOST_TAG_DETAIL: &str = "hostTag";

/// Hypervisor a cluster runs (and a VM requires)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypervisorType {
    XenServer,
    Kvm,
    VMware,
    HyperV,
    Lxc,
    Simulator,
    BareMetal,
}

impl std::fmt::Display for HypervisorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HypervisorType::XenServer => "XenServer",
            HypervisorType::Kvm => "KVM",
            HypervisorType::VMware => "VMware",
            HypervisorType::HyperV => "Hyperv",
            HypervisorType::Lxc => "LXC",
            HypervisorType::Simulator => "Simulator",
            HypervisorType::BareMetal => "BareMetal",
        };
        f.write_str(name)
    }
}

/// Agent-reported host status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    #[default]
    Up,
    Down,
    Disconnected,
    Connecting,
    Alert,
    Maintenance,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub id: PodId,
    pub zone_id: ZoneId,
    pub name: String,
}

/// A cluster is homogeneous: every host in it runs the same hypervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub pod_id: PodId,
    pub zone_id: ZoneId,
    pub name: String,
    pub hypervisor: HypervisorType,
}

/// A physical host, the leaf of the topology tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub cluster_id: ClusterId,
    pub pod_id: PodId,
    pub zone_id: ZoneId,
    pub name: String,
    pub status: HostStatus,
    pub cpu_cores: u32,
    pub cpu_speed_mhz: u64,
    pub total_memory_bytes: u64,
    pub tags: Vec<String>,
    pub details: BTreeMap<String, String>,
}

impl Host {
    /// Create an Up host with no resources; pod and zone are filled in when the
    /// host is attached to its cluster by the topology builder.
    pub fn new(id: HostId, cluster_id: ClusterId, name: impl Into<String>) -> Self {
        Self {
            id,
            cluster_id,
            pod_id: 0,
            zone_id: 0,
            name: name.into(),
            status: HostStatus::Up,
            cpu_cores: 0,
            cpu_speed_mhz: 0,
            total_memory_bytes: 0,
            tags: Vec::new(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_cpu(mut self, cores: u32, speed_mhz: u64) -> Self {
        self.cpu_cores = cores;
        self.cpu_speed_mhz = speed_mhz;
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.total_memory_bytes = memory_mb.saturating_mul(MIB);
        self
    }

    pub fn with_status(mut self, status: HostStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Total CPU in MHz (cores × speed)
    pub fn total_cpu_mhz(&self) -> u64 {
        (self.cpu_cores as u64).saturating_mul(self.cpu_speed_mhz)
    }

    pub fn is_up(&self) -> bool {
        self.status == HostStatus::Up
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details.get(key).map(String::as_str)
    }
}

/// Compute offering a VM was created from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub name: String,
    pub cpu_count: u32,
    pub cpu_speed_mhz: u64,
    pub ram_size_mb: u64,
    #[serde(default)]
    pub host_tag: Option<String>,
}

impl ServiceOffering {
    pub fn new(name: impl Into<String>, cpu_count: u32, cpu_speed_mhz: u64, ram_size_mb: u64) -> Self {
        Self {
            name: name.into(),
            cpu_count,
            cpu_speed_mhz,
            ram_size_mb,
            host_tag: None,
        }
    }

    pub fn with_host_tag(mut self, tag: impl Into<String>) -> Self {
        self.host_tag = Some(tag.into());
        self
    }
}

/// Resource demand and placement hints of the VM being deployed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualMachineProfile {
    pub id: VmId,
    pub name: String,
    pub account_id: AccountId,
    pub hypervisor: HypervisorType,
    pub offering: ServiceOffering,
    /// Host the VM last ran on; capacity may still be reserved for it there
    #[serde(default)]
    pub last_host_id: Option<HostId>,
}

impl VirtualMachineProfile {
    pub fn new(
        id: VmId,
        name: impl Into<String>,
        account_id: AccountId,
        hypervisor: HypervisorType,
        offering: ServiceOffering,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            account_id,
            hypervisor,
            offering,
            last_host_id: None,
        }
    }

    pub fn with_last_host(mut self, host_id: HostId) -> Self {
        self.last_host_id = Some(host_id);
        self
    }

    /// Requested CPU in MHz. A demand too large for `u64` saturates and never fits.
    pub fn cpu_mhz(&self) -> u64 {
        (self.offering.cpu_count as u64)
            .checked_mul(self.offering.cpu_speed_mhz)
            .unwrap_or(u64::MAX)
    }

    /// Requested memory in bytes, saturating like [`Self::cpu_mhz`]
    pub fn memory_bytes(&self) -> u64 {
        self.offering.ram_size_mb.checked_mul(MIB).unwrap_or(u64::MAX)
    }
}

/// Constraints narrowing the search: a zone plus optional pod/cluster/host pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub data_center_id: ZoneId,
    #[serde(default)]
    pub pod_id: Option<PodId>,
    #[serde(default)]
    pub cluster_id: Option<ClusterId>,
    #[serde(default)]
    pub host_id: Option<HostId>,
}

impl DeploymentPlan {
    pub fn new(data_center_id: ZoneId) -> Self {
        Self {
            data_center_id,
            pod_id: None,
            cluster_id: None,
            host_id: None,
        }
    }

    pub fn with_pod(mut self, pod_id: PodId) -> Self {
        self.pod_id = Some(pod_id);
        self
    }

    pub fn with_cluster(mut self, cluster_id: ClusterId) -> Self {
        self.cluster_id = Some(cluster_id);
        self
    }

    pub fn with_host(mut self, host_id: HostId) -> Self {
        self.host_id = Some(host_id);
        self
    }
}

/// Where a VM lands. Every level is populated; a failed search yields no destination at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployDestination {
    pub zone: Zone,
    pub pod: Pod,
    pub cluster: Cluster,
    pub host: Host,
}

impl std::fmt::Display for DeployDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Dest[Zone({}), Pod({}), Cluster({}), Host({})]",
            self.zone.id, self.pod.id, self.cluster.id, self.host.id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(cpus: u32, mhz: u64, ram_mb: u64) -> VirtualMachineProfile {
        VirtualMachineProfile::new(
            1,
            "vm-1",
            42,
            HypervisorType::Kvm,
            ServiceOffering::new("offering", cpus, mhz, ram_mb),
        )
    }

    #[test]
    fn test_demand_in_ledger_units() {
        let vm = profile(2, 1500, 2048);
        assert_eq!(vm.cpu_mhz(), 3000);
        assert_eq!(vm.memory_bytes(), 2048 * MIB);
    }

    #[test]
    fn test_oversized_demand_saturates() {
        let vm = profile(u32::MAX, u64::MAX / 2, (1 << 44) + 1);
        assert_eq!(vm.cpu_mhz(), u64::MAX);
        assert_eq!(vm.memory_bytes(), u64::MAX);

        let host = Host::new(1, 1, "h1")
            .with_cpu(u32::MAX, u64::MAX)
            .with_memory_mb(u64::MAX);
        assert_eq!(host.total_cpu_mhz(), u64::MAX);
        assert_eq!(host.total_memory_bytes, u64::MAX);
    }
}
