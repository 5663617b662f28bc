//! Random planner: first fit over a shuffled visiting order

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{CandidateOrdering, FirstFitPlanner, PlannerContext};
use crate::config::{AllocationAlgorithm, PlannerConfig};
use crate::types::{Cluster, Host, Pod, VirtualMachineProfile};

/// Shuffles pods, clusters and hosts with a seeded generator.
///
/// The generator is shared by all requests, so the sequence of placements is
/// reproducible for a fixed seed and a fixed request order.
pub struct RandomOrdering {
    rng: Mutex<ChaCha8Rng>,
}

impl RandomOrdering {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    fn shuffled<T>(&self, mut items: Vec<T>) -> Vec<T> {
        items.shuffle(&mut *self.rng.lock());
        items
    }
}

impl CandidateOrdering for RandomOrdering {
    fn order_pods(&self, _ctx: &PlannerContext, _vm: &VirtualMachineProfile, pods: Vec<Pod>) -> Vec<Pod> {
        self.shuffled(pods)
    }

    fn order_clusters(
        &self,
        _ctx: &PlannerContext,
        _vm: &VirtualMachineProfile,
        clusters: Vec<Cluster>,
    ) -> Vec<Cluster> {
        self.shuffled(clusters)
    }

    fn order_hosts(&self, _ctx: &PlannerContext, _vm: &VirtualMachineProfile, hosts: Vec<Host>) -> Vec<Host> {
        self.shuffled(hosts)
    }
}

impl FirstFitPlanner {
    pub fn random(ctx: PlannerContext, config: &PlannerConfig) -> Self {
        Self::with_ordering(
            "random",
            AllocationAlgorithm::Random,
            ctx,
            config,
            Box::new(RandomOrdering::new(config.random_seed)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclude_list::ExcludeList;
    use crate::planner::test_support::{context, vm};
    use crate::planner::DeploymentPlanner;
    use crate::topology::InMemoryTopology;
    use crate::types::{DeploymentPlan, HypervisorType};

    fn topology() -> InMemoryTopology {
        let mut builder = InMemoryTopology::builder()
            .zone(1, "z1")
            .pod(1, 1, "p1")
            .cluster(1, 1, "c1", HypervisorType::Kvm);
        for id in 1..=8 {
            builder = builder.host(
                Host::new(id, 1, format!("h{}", id))
                    .with_cpu(8, 1000)
                    .with_memory_mb(8192),
            );
        }
        builder.build().unwrap()
    }

    fn placements(seed: u64) -> Vec<u64> {
        let (ctx, _) = context(topology());
        let config = PlannerConfig {
            allocation_algorithm: AllocationAlgorithm::Random,
            random_seed: seed,
            ..PlannerConfig::default()
        };
        let planner = FirstFitPlanner::random(ctx, &config);
        let plan = DeploymentPlan::new(1);
        (0..6)
            .map(|_| {
                planner
                    .plan(&vm(1, 500, 256), &plan, &ExcludeList::new())
                    .unwrap()
                    .map(|d| d.host.id)
                    .unwrap_or_default()
            })
            .collect()
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let first = placements(7);
        assert_eq!(first, placements(7));
        assert!(first.iter().all(|&id| (1..=8).contains(&id)));
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let ordering = RandomOrdering::new(1);
        let mut items = ordering.shuffled((0..32).collect::<Vec<u32>>());
        items.sort_unstable();
        assert_eq!(items, (0..32).collect::<Vec<u32>>());
    }

    #[test]
    fn test_eligible_only_when_configured() {
        let (ctx, _) = context(topology());
        let planner = FirstFitPlanner::random(ctx, &PlannerConfig::default());
        assert!(!planner.can_handle(&vm(1, 1, 1), &DeploymentPlan::new(1), &ExcludeList::new()));
    }
}
