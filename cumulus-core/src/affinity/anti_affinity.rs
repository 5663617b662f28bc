//! Anti-affinity rules for VM placement
//!
//! Members of an anti-affinity group are spread across scope nodes (hosts,
//! clusters or pods). The checker counts how many members already sit on each
//! node; every node at or above the group's `max_per_scope` is excluded.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use super::{
    member_nodes, AffinityGroup, AffinityGroupId, AffinityGroupProcessor, AffinityGroupRepository,
    AffinityGroupType, AffinityScope,
};
use crate::error::CumulusResult;
use crate::exclude_list::ExcludeList;
use crate::topology::TopologyRepository;
use crate::types::{DeploymentPlan, VirtualMachineProfile};

/// Anti-affinity constraint checker
#[derive(Debug, Default)]
pub struct AntiAffinityChecker {
    /// Map of group -> scope node -> member count
    group_distribution: HashMap<AffinityGroupId, HashMap<u64, u32>>,
}

impl AntiAffinityChecker {
    /// Create a checker from (group, scope node) pairs, one per placed member
    pub fn new(distribution: impl IntoIterator<Item = (AffinityGroupId, u64)>) -> Self {
        let mut group_distribution: HashMap<AffinityGroupId, HashMap<u64, u32>> = HashMap::new();
        for (group, node) in distribution {
            *group_distribution
                .entry(group)
                .or_default()
                .entry(node)
                .or_insert(0) += 1;
        }
        Self { group_distribution }
    }

    pub fn member_count(&self, group: AffinityGroupId, node: u64) -> u32 {
        self.group_distribution
            .get(&group)
            .and_then(|nodes| nodes.get(&node))
            .copied()
            .unwrap_or(0)
    }

    /// Whether one more member of `group` may land on `node`
    pub fn check(&self, group: &AffinityGroup, node: u64) -> Result<(), String> {
        let current = self.member_count(group.id, node);
        if current >= group.max_per_scope {
            return Err(format!(
                "anti-affinity group '{}' already has {} members on {} {} (max: {})",
                group.name,
                current,
                group.group_type.scope(),
                node,
                group.max_per_scope
            ));
        }
        Ok(())
    }

    /// Nodes that cannot take another member of `group`
    pub fn saturated_nodes(&self, group: &AffinityGroup) -> BTreeSet<u64> {
        self.group_distribution
            .get(&group.id)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter(|&(_, &count)| count >= group.max_per_scope)
                    .map(|(&node, _)| node)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Excludes the scope nodes that already hold enough members of the VM's groups
pub struct AntiAffinityProcessor {
    group_type: AffinityGroupType,
    groups: Arc<dyn AffinityGroupRepository>,
    topology: Arc<dyn TopologyRepository>,
}

impl AntiAffinityProcessor {
    pub fn new(
        group_type: AffinityGroupType,
        groups: Arc<dyn AffinityGroupRepository>,
        topology: Arc<dyn TopologyRepository>,
    ) -> Self {
        Self {
            group_type,
            groups,
            topology,
        }
    }
}

impl AffinityGroupProcessor for AntiAffinityProcessor {
    fn group_type(&self) -> AffinityGroupType {
        self.group_type
    }

    fn process(
        &self,
        vm: &VirtualMachineProfile,
        _plan: &mut DeploymentPlan,
        exclude: &mut ExcludeList,
        groups: &[AffinityGroup],
    ) -> CumulusResult<()> {
        for group in groups.iter().filter(|g| g.group_type == self.group_type) {
            let checker = AntiAffinityChecker::new(
                member_nodes(self.groups.as_ref(), self.topology.as_ref(), group, vm.id)
                    .into_iter()
                    .map(|node| (group.id, node)),
            );
            let saturated = checker.saturated_nodes(group);
            if saturated.is_empty() {
                continue;
            }

            debug!(
                "Anti-affinity group '{}' excludes {}s {:?} for VM {}",
                group.name,
                group.group_type.scope(),
                saturated,
                vm.name
            );
            match group.group_type.scope() {
                AffinityScope::Host => exclude.add_hosts(saturated),
                AffinityScope::Cluster => exclude.add_clusters(saturated),
                AffinityScope::Pod => exclude.add_pods(saturated),
            }
        }
        Ok(())
    }
}
