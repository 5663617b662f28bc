//! Affinity processor: keep group members on the same scope node

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use super::{
    conflict, member_nodes, AffinityGroup, AffinityGroupProcessor, AffinityGroupRepository,
    AffinityGroupType, AffinityScope,
};
use crate::error::CumulusResult;
use crate::exclude_list::ExcludeList;
use crate::topology::TopologyRepository;
use crate::types::{DeploymentPlan, VirtualMachineProfile, ZoneId};

/// Pins the plan to the node where the VM's group members already run.
///
/// The first member of a group places freely. Members spread over several nodes,
/// or a node that contradicts a pin already in the plan, is a conflict.
pub struct AffinityProcessor {
    group_type: AffinityGroupType,
    groups: Arc<dyn AffinityGroupRepository>,
    topology: Arc<dyn TopologyRepository>,
}

impl AffinityProcessor {
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

    /// Node ids of the levels that pinning `node` at `scope` implies: (zone, pod, cluster, host)
    fn implied_pins(
        &self,
        scope: AffinityScope,
        node: u64,
    ) -> Option<(ZoneId, u64, Option<u64>, Option<u64>)> {
        match scope {
            AffinityScope::Host => {
                let host = self.topology.find_host(node)?;
                Some((host.zone_id, host.pod_id, Some(host.cluster_id), Some(host.id)))
            }
            AffinityScope::Cluster => {
                let cluster = self.topology.find_cluster(node)?;
                Some((cluster.zone_id, cluster.pod_id, Some(cluster.id), None))
            }
            AffinityScope::Pod => {
                let pod = self.topology.find_pod(node)?;
                Some((pod.zone_id, pod.id, None, None))
            }
        }
    }
}

fn pin(
    vm: &VirtualMachineProfile,
    slot: &mut Option<u64>,
    level: &str,
    value: u64,
    group: &AffinityGroup,
) -> CumulusResult<()> {
    match *slot {
        Some(existing) if existing != value => Err(conflict(
            vm,
            format!(
                "affinity group '{}' requires {} {} but the plan is pinned to {} {}",
                group.name, level, value, level, existing
            ),
        )),
        _ => {
            *slot = Some(value);
            Ok(())
        }
    }
}

impl AffinityGroupProcessor for AffinityProcessor {
    fn group_type(&self) -> AffinityGroupType {
        self.group_type
    }

    fn process(
        &self,
        vm: &VirtualMachineProfile,
        plan: &mut DeploymentPlan,
        _exclude: &mut ExcludeList,
        groups: &[AffinityGroup],
    ) -> CumulusResult<()> {
        let scope = self.group_type.scope();
        for group in groups.iter().filter(|g| g.group_type == self.group_type) {
            let nodes: BTreeSet<u64> =
                member_nodes(self.groups.as_ref(), self.topology.as_ref(), group, vm.id)
                    .into_iter()
                    .collect();

            if nodes.len() > 1 {
                return Err(conflict(
                    vm,
                    format!(
                        "members of affinity group '{}' run on several {}s {:?}",
                        group.name, scope, nodes
                    ),
                ));
            }
            let Some(&node) = nodes.iter().next() else {
                continue;
            };

            let Some((zone_id, pod_id, cluster_id, host_id)) = self.implied_pins(scope, node)
            else {
                continue;
            };
            if zone_id != plan.data_center_id {
                return Err(conflict(
                    vm,
                    format!(
                        "affinity group '{}' runs in zone {}, deployment requested in zone {}",
                        group.name, zone_id, plan.data_center_id
                    ),
                ));
            }

            pin(vm, &mut plan.pod_id, "pod", pod_id, group)?;
            if let Some(cluster_id) = cluster_id {
                pin(vm, &mut plan.cluster_id, "cluster", cluster_id, group)?;
            }
            if let Some(host_id) = host_id {
                pin(vm, &mut plan.host_id, "host", host_id, group)?;
            }
            debug!(
                "Affinity group '{}' pins VM {} to {} {}",
                group.name, vm.name, scope, node
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CumulusError;
    use crate::inventory::{InMemoryInventory, RunningVm};
    use crate::topology::InMemoryTopology;
    use crate::types::{Host, HypervisorType, ServiceOffering};

    fn setup() -> (Arc<InMemoryTopology>, Arc<InMemoryInventory>) {
        let topology = InMemoryTopology::builder()
            .zone(1, "z1")
            .pod(1, 1, "p1")
            .pod(2, 1, "p2")
            .cluster(1, 1, "c1", HypervisorType::Kvm)
            .cluster(2, 2, "c2", HypervisorType::Kvm)
            .host(Host::new(1, 1, "h1"))
            .host(Host::new(2, 2, "h2"))
            .build()
            .unwrap();
        let inventory = InMemoryInventory::new(topology.hosts());
        (Arc::new(topology), Arc::new(inventory))
    }

    fn vm() -> VirtualMachineProfile {
        VirtualMachineProfile::new(
            99,
            "db-2",
            1,
            HypervisorType::Kvm,
            ServiceOffering::new("small", 1, 1000, 512),
        )
    }

    #[test]
    fn test_host_affinity_pins_whole_path() {
        let (topology, inventory) = setup();
        let group = AffinityGroup::new(1, "db", AffinityGroupType::HostAffinity);
        inventory.add_group(group.clone());
        inventory.add_vm(RunningVm::new(10, "db-1", 1, 2).with_group(1));

        let processor = AffinityProcessor::new(AffinityGroupType::HostAffinity, inventory, topology);
        let mut plan = DeploymentPlan::new(1);
        processor
            .process(&vm(), &mut plan, &mut ExcludeList::new(), &[group])
            .unwrap();

        assert_eq!(plan, DeploymentPlan::new(1).with_pod(2).with_cluster(2).with_host(2));
    }

    #[test]
    fn test_first_member_places_freely() {
        let (topology, inventory) = setup();
        let group = AffinityGroup::new(1, "db", AffinityGroupType::PodAffinity);
        inventory.add_group(group.clone());

        let processor = AffinityProcessor::new(AffinityGroupType::PodAffinity, inventory, topology);
        let mut plan = DeploymentPlan::new(1);
        processor
            .process(&vm(), &mut plan, &mut ExcludeList::new(), &[group])
            .unwrap();
        assert_eq!(plan, DeploymentPlan::new(1));
    }

    #[test]
    fn test_spread_members_conflict() {
        let (topology, inventory) = setup();
        let group = AffinityGroup::new(1, "db", AffinityGroupType::ClusterAffinity);
        inventory.add_group(group.clone());
        inventory.add_vm(RunningVm::new(10, "db-1", 1, 1).with_group(1));
        inventory.add_vm(RunningVm::new(11, "db-3", 1, 2).with_group(1));

        let processor =
            AffinityProcessor::new(AffinityGroupType::ClusterAffinity, inventory, topology);
        let result = processor.process(
            &vm(),
            &mut DeploymentPlan::new(1),
            &mut ExcludeList::new(),
            &[group],
        );
        assert!(matches!(result, Err(CumulusError::AffinityConflict { .. })));
    }

    #[test]
    fn test_contradicting_pin_conflicts() {
        let (topology, inventory) = setup();
        let group = AffinityGroup::new(1, "db", AffinityGroupType::PodAffinity);
        inventory.add_group(group.clone());
        inventory.add_vm(RunningVm::new(10, "db-1", 1, 2).with_group(1));

        let processor = AffinityProcessor::new(AffinityGroupType::PodAffinity, inventory, topology);
        let mut plan = DeploymentPlan::new(1).with_pod(1);
        let err = processor
            .process(&vm(), &mut plan, &mut ExcludeList::new(), &[group])
            .unwrap_err();
        assert!(err.to_string().contains("pinned to pod 1"));
    }
}
