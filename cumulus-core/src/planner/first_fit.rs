//! First-fit search over the zone → pod → cluster → host tree

use tracing::{debug, info};

use super::{
    host_matches_plan, normalize_plan, resolve_destination, CandidateOrdering, DeploymentPlanner,
    PlannerContext, TopologyOrdering,
};
use crate::config::{AllocationAlgorithm, PlannerConfig};
use crate::error::CumulusResult;
use crate::exclude_list::ExcludeList;
use crate::types::{
    Cluster, DeployDestination, DeploymentPlan, Host, HypervisorType, Pod, VirtualMachineProfile,
};

/// Per-cluster allocation ceilings; a cluster over either is skipped
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterThresholds {
    pub cpu: f64,
    pub memory: f64,
}

impl From<&PlannerConfig> for ClusterThresholds {
    fn from(config: &PlannerConfig) -> Self {
        Self {
            cpu: config.cluster_cpu_disable_threshold,
            memory: config.cluster_memory_disable_threshold,
        }
    }
}

/// Hook run on a candidate host before capacity is reserved on it, with the
/// reservation mode. `Ok(false)` skips the host; an error ends the search.
pub(crate) type HostAdmission<'a> = dyn Fn(&Host, bool) -> CumulusResult<bool> + 'a;

pub struct FirstFitPlanner {
    name: &'static str,
    /// Algorithm this planner implements
    algorithm: AllocationAlgorithm,
    /// Algorithm selected by configuration
    configured: AllocationAlgorithm,
    ctx: PlannerContext,
    thresholds: ClusterThresholds,
    ordering: Box<dyn CandidateOrdering>,
}

impl FirstFitPlanner {
    pub fn new(ctx: PlannerContext, config: &PlannerConfig) -> Self {
        Self::with_ordering(
            "first-fit",
            AllocationAlgorithm::FirstFit,
            ctx,
            config,
            Box::new(TopologyOrdering),
        )
    }

    /// A first-fit variant that visits candidates in a different order
    pub fn with_ordering(
        name: &'static str,
        algorithm: AllocationAlgorithm,
        ctx: PlannerContext,
        config: &PlannerConfig,
        ordering: Box<dyn CandidateOrdering>,
    ) -> Self {
        Self {
            name,
            algorithm,
            configured: config.allocation_algorithm,
            ctx,
            thresholds: ClusterThresholds::from(config),
            ordering,
        }
    }

    pub fn context(&self) -> &PlannerContext {
        &self.ctx
    }

    /// Sticky placement on the last host first, then first fit in visiting order
    pub(crate) fn search_with(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        exclude: &ExcludeList,
        admit: &HostAdmission<'_>,
    ) -> CumulusResult<Option<DeployDestination>> {
        let topology = self.ctx.topology.as_ref();
        let Some(plan) = normalize_plan(topology, plan) else {
            debug!("{}: plan pins are inconsistent with the topology", self.name);
            return Ok(None);
        };
        let Some(zone) = topology.find_zone(plan.data_center_id) else {
            debug!("{}: zone {} does not exist", self.name, plan.data_center_id);
            return Ok(None);
        };

        if let Some(destination) = self.try_last_host(vm, &plan, exclude, admit)? {
            return Ok(Some(destination));
        }

        let pods = match plan.pod_id {
            Some(pod_id) => topology.find_pod(pod_id).into_iter().collect(),
            None => topology.list_pods_in_zone(zone.id),
        };
        let pods: Vec<Pod> = pods
            .into_iter()
            .filter(|pod| !exclude.should_avoid_pod(pod))
            .collect();

        for pod in self.ordering.order_pods(&self.ctx, vm, pods) {
            let clusters: Vec<Cluster> = match plan.cluster_id {
                Some(cluster_id) => topology.find_cluster(cluster_id).into_iter().collect(),
                None => topology.list_clusters_in_pod(pod.id),
            }
            .into_iter()
            .filter(|cluster| {
                cluster.pod_id == pod.id
                    && cluster.hypervisor == vm.hypervisor
                    && !exclude.should_avoid_cluster(cluster)
                    && !self.cluster_disabled(vm, cluster)
            })
            .collect();

            for cluster in self.ordering.order_clusters(&self.ctx, vm, clusters) {
                let hosts: Vec<Host> = match plan.host_id {
                    Some(host_id) => topology.find_host(host_id).into_iter().collect(),
                    None => topology.list_hosts_in_cluster(cluster.id),
                }
                .into_iter()
                .filter(|host| {
                    host.cluster_id == cluster.id && host.is_up() && !exclude.should_avoid_host(host)
                })
                .collect();

                for host in self.ordering.order_hosts(&self.ctx, vm, hosts) {
                    if !admit(&host, false)? {
                        continue;
                    }
                    if self.ctx.reserve(&host, vm, false) {
                        debug!("{}: VM {} fits on host {}", self.name, vm.name, host.name);
                        return Ok(Some(DeployDestination {
                            zone: zone.clone(),
                            pod: pod.clone(),
                            cluster: cluster.clone(),
                            host,
                        }));
                    }
                }
            }
        }

        debug!("{}: no host in zone {} can take VM {}", self.name, zone.id, vm.name);
        Ok(None)
    }

    fn try_last_host(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        exclude: &ExcludeList,
        admit: &HostAdmission<'_>,
    ) -> CumulusResult<Option<DeployDestination>> {
        let Some(host_id) = vm.last_host_id else {
            return Ok(None);
        };
        let Some(host) = self.ctx.topology.find_host(host_id) else {
            debug!("Last host {} of VM {} no longer exists", host_id, vm.name);
            return Ok(None);
        };
        if !host.is_up() || exclude.should_avoid_host(&host) || !host_matches_plan(&host, plan) {
            debug!(
                "Last host {} of VM {} is {}, excluded or outside the plan",
                host.name, vm.name, host.status
            );
            return Ok(None);
        }
        let Some(destination) = resolve_destination(self.ctx.topology.as_ref(), &host) else {
            return Ok(None);
        };
        if destination.cluster.hypervisor != vm.hypervisor {
            return Ok(None);
        }

        if !admit(&host, true)? {
            debug!("Last host {} of VM {} was not admitted", host.name, vm.name);
            return Ok(None);
        }
        if self.ctx.reserve(&host, vm, true) {
            info!("VM {} returns to its last host {}", vm.name, host.name);
            return Ok(Some(destination));
        }
        debug!(
            "Capacity reserved for VM {} on last host {} does not cover it",
            vm.name, host.name
        );
        Ok(None)
    }

    /// Whether placing the VM would push the cluster over a disable threshold
    fn cluster_disabled(&self, vm: &VirtualMachineProfile, cluster: &Cluster) -> bool {
        if self.thresholds.cpu >= 1.0 && self.thresholds.memory >= 1.0 {
            // at 1.0 a cluster past the ceiling has no host with room left
            return false;
        }
        let hosts = self.ctx.topology.list_hosts_in_cluster(cluster.id);
        let aggregate = self.ctx.aggregate_capacity(&hosts);
        if aggregate.cpu.total == 0 || aggregate.memory.total == 0 {
            return false;
        }

        let cpu = aggregate.cpu.utilization_after(vm.cpu_mhz());
        let memory = aggregate.memory.utilization_after(vm.memory_bytes());
        let disabled = cpu > self.thresholds.cpu || memory > self.thresholds.memory;
        if disabled {
            debug!(
                "Cluster {} skipped: CPU at {:.2}, memory at {:.2} after placement",
                cluster.name, cpu, memory
            );
        }
        disabled
    }
}

impl DeploymentPlanner for FirstFitPlanner {
    fn name(&self) -> &str {
        self.name
    }

    fn can_handle(
        &self,
        vm: &VirtualMachineProfile,
        _plan: &DeploymentPlan,
        _exclude: &ExcludeList,
    ) -> bool {
        vm.hypervisor != HypervisorType::BareMetal && self.configured == self.algorithm
    }

    fn plan(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        exclude: &ExcludeList,
    ) -> CumulusResult<Option<DeployDestination>> {
        self.search_with(vm, plan, exclude, &|_, _| Ok(true))
    }

    fn check(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        destination: &DeployDestination,
        exclude: &ExcludeList,
    ) -> bool {
        destination.host.is_up()
            && destination.cluster.hypervisor == vm.hypervisor
            && host_matches_plan(&destination.host, plan)
            && !exclude.should_avoid_host(&destination.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::ResourceType;
    use crate::planner::test_support::{context, vm};
    use crate::topology::InMemoryTopology;
    use crate::types::MIB;
    use pretty_assertions::assert_eq;

    fn topology() -> InMemoryTopology {
        InMemoryTopology::builder()
            .zone(1, "z1")
            .pod(1, 1, "p1")
            .pod(2, 1, "p2")
            .cluster(1, 1, "c1", HypervisorType::XenServer)
            .cluster(2, 1, "c2", HypervisorType::Kvm)
            .cluster(3, 2, "c3", HypervisorType::Kvm)
            .host(Host::new(1, 1, "xen").with_cpu(8, 2000).with_memory_mb(16384))
            .host(Host::new(2, 2, "kvm-a").with_cpu(2, 1000).with_memory_mb(2048))
            .host(Host::new(3, 2, "kvm-b").with_cpu(4, 1000).with_memory_mb(4096))
            .host(Host::new(4, 3, "kvm-c").with_cpu(4, 1000).with_memory_mb(4096))
            .build()
            .unwrap()
    }

    fn planner() -> FirstFitPlanner {
        let (ctx, _) = context(topology());
        FirstFitPlanner::new(ctx, &PlannerConfig::default())
    }

    fn host_of(dest: Option<DeployDestination>) -> Option<u64> {
        dest.map(|d| d.host.id)
    }

    #[test]
    fn test_enumeration_is_deterministic() {
        let planner = planner();
        let exclude = ExcludeList::new();
        let plan = DeploymentPlan::new(1);
        let vm = vm(1, 1000, 1024);

        // kvm-a takes two, then kvm-b four, then kvm-c
        let hosts: Vec<_> = (0..4)
            .map(|_| host_of(planner.plan(&vm, &plan, &exclude).unwrap()))
            .collect();
        assert_eq!(hosts, vec![Some(2), Some(2), Some(3), Some(3)]);
    }

    #[test]
    fn test_hypervisor_filter() {
        let planner = planner();

        // Too big for any KVM host, fits the Xen host, which must not be used
        let big = vm(8, 1000, 8192);
        let result = planner
            .plan(&big, &DeploymentPlan::new(1), &ExcludeList::new())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_exclusions_respected() {
        let planner = planner();
        let mut exclude = ExcludeList::new();
        exclude.add_host(2);
        exclude.add_cluster(3);
        let dest = planner
            .plan(&vm(1, 1000, 512), &DeploymentPlan::new(1), &exclude)
            .unwrap();
        assert_eq!(host_of(dest), Some(3));

        exclude.add_pod(1);
        assert!(planner
            .plan(&vm(1, 1000, 512), &DeploymentPlan::new(1), &exclude)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_host_pin_is_the_only_candidate() {
        let planner = planner();
        let plan = DeploymentPlan::new(1).with_host(4);
        let dest = planner
            .plan(&vm(1, 1000, 512), &plan, &ExcludeList::new())
            .unwrap()
            .unwrap();
        assert_eq!(dest.pod.id, 2);
        assert_eq!(dest.cluster.id, 3);

        // a pin onto a host of the wrong hypervisor finds nothing
        let plan = DeploymentPlan::new(1).with_host(1);
        assert!(planner
            .plan(&vm(1, 1000, 512), &plan, &ExcludeList::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_sticky_last_host_comes_first() {
        let planner = planner();
        let ledger = planner.context().ledger.clone();
        ledger.set_usage(4, ResourceType::Cpu, 0, 1000).unwrap();
        ledger.set_usage(4, ResourceType::Memory, 0, 1024 * MIB).unwrap();

        let vm = vm(1, 1000, 1024).with_last_host(4);
        let dest = planner
            .plan(&vm, &DeploymentPlan::new(1), &ExcludeList::new())
            .unwrap();
        assert_eq!(host_of(dest), Some(4));

        let cpu = ledger.capacity(4, ResourceType::Cpu).unwrap().unwrap();
        assert_eq!(cpu.reserved_capacity, 0);
        assert_eq!(cpu.used_capacity, 1000);
        assert_eq!(planner.context().metrics.reservations(true, true), 1);
    }

    #[test]
    fn test_last_host_without_reservation_falls_back() {
        let planner = planner();
        let vm = vm(1, 1000, 1024).with_last_host(4);
        let dest = planner
            .plan(&vm, &DeploymentPlan::new(1), &ExcludeList::new())
            .unwrap();
        assert_eq!(host_of(dest), Some(2));
        assert_eq!(planner.context().metrics.reservations(true, false), 1);
    }

    #[test]
    fn test_disable_threshold_skips_busy_cluster() {
        let (ctx, _) = context(topology());
        ctx.ledger.set_usage(2, ResourceType::Cpu, 2000, 0).unwrap();
        ctx.ledger.set_usage(3, ResourceType::Cpu, 1000, 0).unwrap();
        let config = PlannerConfig {
            cluster_cpu_disable_threshold: 0.5,
            ..PlannerConfig::default()
        };
        let planner = FirstFitPlanner::new(ctx, &config);

        // cluster 2 would sit at 4000/6000, cluster 3 at 1000/4000
        let dest = planner
            .plan(&vm(1, 1000, 512), &DeploymentPlan::new(1), &ExcludeList::new())
            .unwrap();
        assert_eq!(host_of(dest), Some(4));
    }

    #[test]
    fn test_only_configured_algorithm_is_eligible() {
        let (ctx, _) = context(topology());
        let config = PlannerConfig {
            allocation_algorithm: AllocationAlgorithm::Random,
            ..PlannerConfig::default()
        };
        let planner = FirstFitPlanner::new(ctx, &config);
        let plan = DeploymentPlan::new(1);
        assert!(!planner.can_handle(&vm(1, 1, 1), &plan, &ExcludeList::new()));
    }
}
