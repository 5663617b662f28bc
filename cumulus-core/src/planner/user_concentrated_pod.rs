//! User-concentrated-pod planner: keep an account's VMs together.
//! Pods already running the account's VMs come first, busiest first; the rest keep
//! topology order.

use std::cmp::Reverse;

use super::{CandidateOrdering, FirstFitPlanner, PlannerContext};
use crate::config::{AllocationAlgorithm, PlannerConfig};
use crate::types::{Pod, VirtualMachineProfile};

#[derive(Debug, Default, Clone, Copy)]
pub struct UserConcentratedPodOrdering;

impl CandidateOrdering for UserConcentratedPodOrdering {
    fn order_pods(&self, ctx: &PlannerContext, vm: &VirtualMachineProfile, pods: Vec<Pod>) -> Vec<Pod> {
        let mut counted: Vec<(Pod, u64)> = pods
            .into_iter()
            .map(|pod| {
                let count = ctx.vm_counts.count_running_vms_in_pod(vm.account_id, pod.id);
                (pod, count)
            })
            .collect();
        counted.sort_by_key(|&(_, count)| Reverse(count));
        counted.into_iter().map(|(pod, _)| pod).collect()
    }
}

impl FirstFitPlanner {
    pub fn user_concentrated_pod(ctx: PlannerContext, config: &PlannerConfig) -> Self {
        Self::with_ordering(
            "user-concentrated-pod",
            AllocationAlgorithm::UserConcentratedPod,
            ctx,
            config,
            Box::new(UserConcentratedPodOrdering),
        )
    }
}
