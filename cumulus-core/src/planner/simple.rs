//! Simple planner: every host of the zone, in topology order

use tracing::debug;

use super::{host_matches_plan, normalize_plan, DeploymentPlanner, PlannerContext};
use crate::error::CumulusResult;
use crate::exclude_list::ExcludeList;
use crate::types::{DeployDestination, DeploymentPlan, HypervisorType, VirtualMachineProfile};

pub struct SimplePlanner {
    ctx: PlannerContext,
}

impl SimplePlanner {
    pub fn new(ctx: PlannerContext) -> Self {
        Self { ctx }
    }
}

impl DeploymentPlanner for SimplePlanner {
    fn name(&self) -> &str {
        "simple"
    }

    fn can_handle(
        &self,
        vm: &VirtualMachineProfile,
        _plan: &DeploymentPlan,
        _exclude: &ExcludeList,
    ) -> bool {
        vm.hypervisor != HypervisorType::BareMetal
    }

    fn plan(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        exclude: &ExcludeList,
    ) -> CumulusResult<Option<DeployDestination>> {
        let topology = self.ctx.topology.as_ref();
        let Some(plan) = normalize_plan(topology, plan) else {
            return Ok(None);
        };
        let Some(zone) = topology.find_zone(plan.data_center_id) else {
            return Ok(None);
        };

        for pod in topology.list_pods_in_zone(zone.id) {
            for cluster in topology.list_clusters_in_pod(pod.id) {
                if cluster.hypervisor != vm.hypervisor {
                    continue;
                }
                for host in topology.list_hosts_in_cluster(cluster.id) {
                    if !host.is_up()
                        || exclude.should_avoid_host(&host)
                        || !host_matches_plan(&host, &plan)
                    {
                        continue;
                    }
                    if self.ctx.reserve(&host, vm, false) {
                        return Ok(Some(DeployDestination {
                            zone,
                            pod,
                            cluster,
                            host,
                        }));
                    }
                }
            }
        }

        debug!("simple: no host in zone {} can take VM {}", zone.id, vm.name);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::test_support::{context, vm};
    use crate::topology::InMemoryTopology;
    use crate::types::{Host, HostStatus};

    #[test]
    fn test_first_up_host_with_room() {
        let topology = InMemoryTopology::builder()
            .zone(1, "z1")
            .pod(1, 1, "p1")
            .cluster(1, 1, "c1", HypervisorType::Kvm)
            .host(
                Host::new(1, 1, "down")
                    .with_cpu(4, 1000)
                    .with_memory_mb(4096)
                    .with_status(HostStatus::Maintenance),
            )
            .host(Host::new(2, 1, "small").with_cpu(1, 1000).with_memory_mb(512))
            .host(Host::new(3, 1, "big").with_cpu(4, 1000).with_memory_mb(4096))
            .build()
            .unwrap();
        let (ctx, _) = context(topology);
        let planner = SimplePlanner::new(ctx);

        let dest = planner
            .plan(&vm(2, 1000, 1024), &DeploymentPlan::new(1), &ExcludeList::new())
            .unwrap()
            .unwrap();
        assert_eq!(dest.host.id, 3);
        assert!(planner.check(&vm(2, 1000, 1024), &DeploymentPlan::new(1), &dest, &ExcludeList::new()));
    }

    #[test]
    fn test_excluded_host_is_never_chosen() {
        let topology = InMemoryTopology::builder()
            .zone(1, "z1")
            .pod(1, 1, "p1")
            .cluster(1, 1, "c1", HypervisorType::Kvm)
            .host(Host::new(1, 1, "only").with_cpu(4, 1000).with_memory_mb(4096))
            .build()
            .unwrap();
        let (ctx, _) = context(topology);
        let planner = SimplePlanner::new(ctx);
        let mut exclude = ExcludeList::new();
        exclude.add_host(1);

        assert!(planner
            .plan(&vm(1, 1000, 512), &DeploymentPlan::new(1), &exclude)
            .unwrap()
            .is_none());
        let capacity = planner.ctx.ledger.host_capacity(1).unwrap().unwrap();
        assert_eq!(capacity.cpu.used_capacity, 0);
    }
}
