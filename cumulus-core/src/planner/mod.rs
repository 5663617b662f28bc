//! Deployment planners
//!
//! A planner walks the topology for one VM and tries to reserve capacity on a
//! candidate host. Planners share one contract ([`DeploymentPlanner`]) and differ
//! in eligibility and in the order they visit candidates:
//!
//! - [`FirstFitPlanner`]: pods, clusters and hosts in topology order
//! - random: first fit over a seeded shuffle ([`RandomOrdering`])
//! - user dispersing: first fit with pods and clusters ranked by the account's
//!   footprint and free capacity ([`UserDispersionOrdering`])
//! - user concentrated pod: pods where the account already runs VMs first
//!   ([`UserConcentratedPodOrdering`])
//! - [`SimplePlanner`]: every host of the zone in order
//! - [`BareMetalPlanner`]: host-tag matching for bare-metal offerings

pub mod bare_metal;
pub mod first_fit;
pub mod random;
pub mod simple;
pub mod user_concentrated_pod;
pub mod user_dispersion;

pub use bare_metal::BareMetalPlanner;
pub use first_fit::FirstFitPlanner;
pub use random::RandomOrdering;
pub use simple::SimplePlanner;
pub use user_concentrated_pod::UserConcentratedPodOrdering;
pub use user_dispersion::UserDispersionOrdering;

use std::sync::Arc;
use tracing::debug;

use crate::capacity::{CapacityLedger, CapacityRecord, ResourceType};
use crate::error::CumulusResult;
use crate::exclude_list::ExcludeList;
use crate::inventory::VmCountRepository;
use crate::metrics::PlacementMetrics;
use crate::topology::TopologyRepository;
use crate::types::{
    Cluster, DeployDestination, DeploymentPlan, Host, Pod, VirtualMachineProfile,
};

/// Placement strategy
pub trait DeploymentPlanner: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this planner applies to the VM at all; cheap and side-effect free
    fn can_handle(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        exclude: &ExcludeList,
    ) -> bool;

    /// Find a destination and reserve capacity on it.
    ///
    /// `Ok(None)` means nothing fits under this policy; errors are reserved for
    /// conditions that must stop the whole placement.
    fn plan(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        exclude: &ExcludeList,
    ) -> CumulusResult<Option<DeployDestination>>;

    /// Re-validate a destination produced earlier
    fn check(
        &self,
        _vm: &VirtualMachineProfile,
        _plan: &DeploymentPlan,
        destination: &DeployDestination,
        exclude: &ExcludeList,
    ) -> bool {
        !exclude.should_avoid_host(&destination.host)
    }
}

/// Collaborators every planner reads from
#[derive(Clone)]
pub struct PlannerContext {
    pub topology: Arc<dyn TopologyRepository>,
    pub ledger: Arc<dyn CapacityLedger>,
    pub vm_counts: Arc<dyn VmCountRepository>,
    pub metrics: Arc<PlacementMetrics>,
}

impl PlannerContext {
    pub fn new(
        topology: Arc<dyn TopologyRepository>,
        ledger: Arc<dyn CapacityLedger>,
        vm_counts: Arc<dyn VmCountRepository>,
    ) -> CumulusResult<Self> {
        Ok(Self {
            topology,
            ledger,
            vm_counts,
            metrics: Arc::new(PlacementMetrics::new()?),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<PlacementMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Reserve the VM's demand on a host; failures of any kind read as "does not fit"
    pub(crate) fn reserve(&self, host: &Host, vm: &VirtualMachineProfile, from_last_host: bool) -> bool {
        let granted =
            self.ledger
                .try_reserve(host.id, vm.cpu_mhz(), vm.memory_bytes(), from_last_host);
        self.metrics.record_reservation(from_last_host, granted);
        granted
    }

    /// Capacity summed over a set of hosts
    pub(crate) fn aggregate_capacity(&self, hosts: &[Host]) -> AggregateCapacity {
        let mut aggregate = AggregateCapacity::default();
        for host in hosts {
            match self.ledger.host_capacity(host.id) {
                Ok(Some(capacity)) => {
                    aggregate.cpu.add(&capacity.cpu);
                    aggregate.memory.add(&capacity.memory);
                }
                Ok(None) => debug!("Host {} has no capacity records", host.id),
                Err(e) => debug!("Skipping capacity of host {}: {}", host.id, e),
            }
        }
        aggregate
    }
}

/// Summed total and allocated (used + reserved) amounts of one resource
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceAggregate {
    pub total: u64,
    pub allocated: u64,
}

impl ResourceAggregate {
    fn add(&mut self, record: &CapacityRecord) {
        self.total = self.total.saturating_add(record.total_capacity);
        self.allocated = self
            .allocated
            .saturating_add(record.used_capacity)
            .saturating_add(record.reserved_capacity);
    }

    pub fn free(&self) -> u64 {
        self.total.saturating_sub(self.allocated)
    }

    pub fn utilization(&self) -> f64 {
        self.utilization_after(0)
    }

    /// Allocated fraction once `requested` more is allocated; 0.0 when there is no capacity
    pub fn utilization_after(&self, requested: u64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.allocated.saturating_add(requested) as f64 / self.total as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateCapacity {
    pub cpu: ResourceAggregate,
    pub memory: ResourceAggregate,
}

impl AggregateCapacity {
    pub fn resource(&self, resource: ResourceType) -> &ResourceAggregate {
        match resource {
            ResourceType::Cpu => &self.cpu,
            ResourceType::Memory => &self.memory,
        }
    }

    /// Whether the free capacity, summed over the hosts, covers the VM
    pub fn covers(&self, vm: &VirtualMachineProfile) -> bool {
        self.cpu.free() >= vm.cpu_mhz() && self.memory.free() >= vm.memory_bytes()
    }
}

/// Visiting order of candidates. The default keeps topology order.
pub trait CandidateOrdering: Send + Sync {
    fn order_pods(&self, _ctx: &PlannerContext, _vm: &VirtualMachineProfile, pods: Vec<Pod>) -> Vec<Pod> {
        pods
    }

    fn order_clusters(
        &self,
        _ctx: &PlannerContext,
        _vm: &VirtualMachineProfile,
        clusters: Vec<Cluster>,
    ) -> Vec<Cluster> {
        clusters
    }

    fn order_hosts(&self, _ctx: &PlannerContext, _vm: &VirtualMachineProfile, hosts: Vec<Host>) -> Vec<Host> {
        hosts
    }
}

/// Topology order
#[derive(Debug, Default, Clone, Copy)]
pub struct TopologyOrdering;

impl CandidateOrdering for TopologyOrdering {}

/// Complete a host's path up to the zone; `None` when the topology is inconsistent
pub fn resolve_destination(topology: &dyn TopologyRepository, host: &Host) -> Option<DeployDestination> {
    let cluster = topology.find_cluster(host.cluster_id)?;
    let pod = topology.find_pod(cluster.pod_id)?;
    let zone = topology.find_zone(pod.zone_id)?;
    Some(DeployDestination {
        zone,
        pod,
        cluster,
        host: host.clone(),
    })
}

/// Fill in the pod and cluster implied by narrower pins.
///
/// Returns `None` when a pin names an unknown node, a node outside the plan's zone,
/// or contradicts another pin.
pub fn normalize_plan(topology: &dyn TopologyRepository, plan: &DeploymentPlan) -> Option<DeploymentPlan> {
    let mut plan = *plan;

    if let Some(host_id) = plan.host_id {
        let host = topology.find_host(host_id)?;
        if plan.cluster_id.map_or(false, |id| id != host.cluster_id) {
            return None;
        }
        plan.cluster_id = Some(host.cluster_id);
    }

    if let Some(cluster_id) = plan.cluster_id {
        let cluster = topology.find_cluster(cluster_id)?;
        if plan.pod_id.map_or(false, |id| id != cluster.pod_id) {
            return None;
        }
        plan.pod_id = Some(cluster.pod_id);
    }

    if let Some(pod_id) = plan.pod_id {
        let pod = topology.find_pod(pod_id)?;
        if pod.zone_id != plan.data_center_id {
            return None;
        }
    }

    Some(plan)
}

/// Whether a host lies within every pin of a (normalized) plan
pub(crate) fn host_matches_plan(host: &Host, plan: &DeploymentPlan) -> bool {
    host.zone_id == plan.data_center_id
        && plan.pod_id.map_or(true, |id| id == host.pod_id)
        && plan.cluster_id.map_or(true, |id| id == host.cluster_id)
        && plan.host_id.map_or(true, |id| id == host.id)
}

/// Stable sort by an `f64` key, ascending
pub(crate) fn sort_by_score<T>(items: &mut [(T, f64)]) {
    items.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::capacity::{InMemoryCapacityLedger, OverprovisioningFactors};
    use crate::inventory::InMemoryInventory;
    use crate::topology::InMemoryTopology;
    use crate::types::{HypervisorType, ServiceOffering};

    pub fn context(topology: InMemoryTopology) -> (PlannerContext, Arc<InMemoryInventory>) {
        let ledger = Arc::new(InMemoryCapacityLedger::new());
        for host in topology.hosts() {
            ledger
                .register_host(host, &OverprovisioningFactors::default())
                .unwrap();
        }
        let inventory = Arc::new(InMemoryInventory::new(topology.hosts()));
        let ctx = PlannerContext::new(Arc::new(topology), ledger, inventory.clone()).unwrap();
        (ctx, inventory)
    }

    pub fn vm(cpus: u32, mhz: u64, ram_mb: u64) -> VirtualMachineProfile {
        VirtualMachineProfile::new(
            1,
            "vm-1",
            42,
            HypervisorType::Kvm,
            ServiceOffering::new("offering", cpus, mhz, ram_mb),
        )
    }
}
