//! User-dispersing planner
//!
//! Spreads an account's VMs: pods and clusters holding fewer of the account's
//! running VMs are visited first. Candidates are first ranked by capacity (least
//! utilized first) and candidates without enough free capacity for the VM are
//! dropped. With dispersion weight `w`, each candidate's key is
//!
//! ```text
//! w * account_vms_on_candidate / account_vms_total + (1 - w) * utilization
//! ```
//!
//! sorted ascending; ties keep the capacity rank. At `w == 1.0` the order is the
//! account's VM count alone.

use tracing::debug;

use super::{sort_by_score, AggregateCapacity, CandidateOrdering, FirstFitPlanner, PlannerContext};
use crate::capacity::ResourceType;
use crate::config::{AllocationAlgorithm, PlannerConfig};
use crate::types::{Cluster, Pod, VirtualMachineProfile};

pub struct UserDispersionOrdering {
    weight: f64,
    capacity_ordering: ResourceType,
}

impl UserDispersionOrdering {
    pub fn new(weight: f64, capacity_ordering: ResourceType) -> Self {
        Self {
            weight: weight.clamp(0.0, 1.0),
            capacity_ordering,
        }
    }

    /// Candidates that can hold the VM, least utilized first
    fn rank_by_capacity<T>(
        &self,
        vm: &VirtualMachineProfile,
        candidates: Vec<T>,
        capacity: impl Fn(&T) -> AggregateCapacity,
    ) -> Vec<(T, f64)> {
        let mut ranked: Vec<(T, f64)> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let aggregate = capacity(&candidate);
                aggregate.covers(vm).then(|| {
                    let utilization = aggregate.resource(self.capacity_ordering).utilization();
                    (candidate, utilization)
                })
            })
            .collect();
        sort_by_score(&mut ranked);
        ranked
    }

    /// Blend the account's footprint into the capacity rank
    fn disperse<T>(&self, ranked: Vec<(T, f64)>, vm_count: impl Fn(&T) -> u64, total_vms: u64) -> Vec<T> {
        let share = |count: u64| {
            if total_vms == 0 {
                0.0
            } else {
                count as f64 / total_vms as f64
            }
        };

        let mut scored: Vec<(T, f64)> = ranked
            .into_iter()
            .map(|(candidate, utilization)| {
                let count = share(vm_count(&candidate));
                let key = if self.weight >= 1.0 {
                    count
                } else {
                    self.weight * count + (1.0 - self.weight) * utilization
                };
                (candidate, key)
            })
            .collect();
        sort_by_score(&mut scored);
        scored.into_iter().map(|(candidate, _)| candidate).collect()
    }
}

impl CandidateOrdering for UserDispersionOrdering {
    fn order_pods(&self, ctx: &PlannerContext, vm: &VirtualMachineProfile, pods: Vec<Pod>) -> Vec<Pod> {
        let ranked = self.rank_by_capacity(vm, pods, |pod| {
            ctx.aggregate_capacity(&ctx.topology.list_hosts_in_pod(pod.id, vm.hypervisor))
        });
        let total = ctx.vm_counts.total_running_vms(vm.account_id);
        let ordered = self.disperse(
            ranked,
            |pod| ctx.vm_counts.count_running_vms_in_pod(vm.account_id, pod.id),
            total,
        );
        debug!(
            "Dispersing account {} over pods {:?}",
            vm.account_id,
            ordered.iter().map(|p| p.id).collect::<Vec<_>>()
        );
        ordered
    }

    fn order_clusters(
        &self,
        ctx: &PlannerContext,
        vm: &VirtualMachineProfile,
        clusters: Vec<Cluster>,
    ) -> Vec<Cluster> {
        let ranked = self.rank_by_capacity(vm, clusters, |cluster| {
            ctx.aggregate_capacity(&ctx.topology.list_hosts_in_cluster(cluster.id))
        });
        let total = ctx.vm_counts.total_running_vms(vm.account_id);
        let ordered = self.disperse(
            ranked,
            |cluster| {
                ctx.vm_counts
                    .count_running_vms_in_cluster(vm.account_id, cluster.id)
            },
            total,
        );
        debug!(
            "Dispersing account {} over clusters {:?}",
            vm.account_id,
            ordered.iter().map(|c| c.id).collect::<Vec<_>>()
        );
        ordered
    }
}

impl FirstFitPlanner {
    pub fn user_dispersing(ctx: PlannerContext, config: &PlannerConfig) -> Self {
        Self::with_ordering(
            "user-dispersing",
            AllocationAlgorithm::UserDispersing,
            ctx,
            config,
            Box::new(UserDispersionOrdering::new(
                config.dispersion_weight,
                config.capacity_ordering,
            )),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclude_list::ExcludeList;
    use crate::inventory::RunningVm;
    use crate::planner::test_support::{context, vm};
    use crate::planner::DeploymentPlanner;
    use crate::topology::InMemoryTopology;
    use crate::types::{DeploymentPlan, Host, HypervisorType};
    use rstest::rstest;

    /// One pod, clusters A (id 1) and B (id 2), equal capacity
    fn topology() -> InMemoryTopology {
        InMemoryTopology::builder()
            .zone(1, "z1")
            .pod(1, 1, "p1")
            .cluster(1, 1, "A", HypervisorType::Kvm)
            .cluster(2, 1, "B", HypervisorType::Kvm)
            .host(Host::new(1, 1, "a1").with_cpu(8, 1000).with_memory_mb(8192))
            .host(Host::new(2, 2, "b1").with_cpu(8, 1000).with_memory_mb(8192))
            .build()
            .unwrap()
    }

    fn config(weight: f64) -> PlannerConfig {
        PlannerConfig {
            allocation_algorithm: AllocationAlgorithm::UserDispersing,
            dispersion_weight: weight,
            ..PlannerConfig::default()
        }
    }

    #[test]
    fn test_full_weight_prefers_cluster_with_fewer_account_vms() {
        let (ctx, inventory) = context(topology());
        for id in 0..3 {
            inventory.add_vm(RunningVm::new(100 + id, format!("a{}", id), 42, 1));
        }
        inventory.add_vm(RunningVm::new(200, "b0", 42, 2));

        let planner = FirstFitPlanner::user_dispersing(ctx, &config(1.0));
        let dest = planner
            .plan(&vm(1, 1000, 1024), &DeploymentPlan::new(1), &ExcludeList::new())
            .unwrap()
            .unwrap();
        assert_eq!(dest.cluster.name, "B");
    }

    #[rstest]
    #[case(0.0, 2)]
    #[case(0.5, 1)]
    #[case(1.0, 1)]
    fn test_weight_trades_capacity_against_footprint(#[case] weight: f64, #[case] expected: u64) {
        // A is busier (6000/8000) but holds none of the account's VMs; B holds one
        let (ctx, inventory) = context(topology());
        ctx.ledger
            .set_usage(1, ResourceType::Cpu, 6000, 0)
            .unwrap();
        inventory.add_vm(RunningVm::new(200, "b0", 42, 2));
        inventory.add_vm(RunningVm::new(300, "other", 7, 1));

        let ordering = UserDispersionOrdering::new(weight, ResourceType::Cpu);
        let clusters = ctx.topology.list_clusters_in_pod(1);
        let ordered = ordering.order_clusters(&ctx, &vm(1, 1000, 1024), clusters);
        assert_eq!(ordered[0].id, expected);
    }

    #[test]
    fn test_candidates_without_room_are_dropped() {
        let (ctx, _) = context(topology());
        ctx.ledger
            .set_usage(2, ResourceType::Memory, 8192 * crate::types::MIB, 0)
            .unwrap();

        let ordering = UserDispersionOrdering::new(1.0, ResourceType::Cpu);
        let clusters = ctx.topology.list_clusters_in_pod(1);
        let ordered = ordering.order_clusters(&ctx, &vm(1, 1000, 1024), clusters);
        assert_eq!(ordered.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1]);
    }
}
