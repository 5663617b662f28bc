//! Running-VM inventory
//!
//! Planners that rank by an account's footprint ask [`VmCountRepository`], the
//! affinity chain asks [`AffinityGroupRepository`]. [`InMemoryInventory`] answers
//! both from a list of running VMs, for tests and for the CLI's snapshot files.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::affinity::{AffinityGroup, AffinityGroupId, AffinityGroupRepository, MemberPlacement};
use crate::types::{AccountId, ClusterId, Host, HostId, PodId, VmId};

/// Running-VM counts per account
pub trait VmCountRepository: Send + Sync {
    fn count_running_vms_in_cluster(&self, account_id: AccountId, cluster_id: ClusterId) -> u64;
    fn count_running_vms_in_pod(&self, account_id: AccountId, pod_id: PodId) -> u64;
    fn total_running_vms(&self, account_id: AccountId) -> u64;
}

/// A VM currently running on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningVm {
    pub id: VmId,
    pub name: String,
    pub account_id: AccountId,
    pub host_id: HostId,
    #[serde(default)]
    pub affinity_groups: Vec<AffinityGroupId>,
}

impl RunningVm {
    pub fn new(id: VmId, name: impl Into<String>, account_id: AccountId, host_id: HostId) -> Self {
        Self {
            id,
            name: name.into(),
            account_id,
            host_id,
            affinity_groups: Vec::new(),
        }
    }

    pub fn with_group(mut self, group_id: AffinityGroupId) -> Self {
        self.affinity_groups.push(group_id);
        self
    }
}

#[derive(Debug, Default)]
pub struct InMemoryInventory {
    /// host -> (cluster, pod)
    locations: RwLock<HashMap<HostId, (ClusterId, PodId)>>,
    vms: RwLock<Vec<RunningVm>>,
    groups: RwLock<Vec<AffinityGroup>>,
    memberships: RwLock<HashMap<VmId, Vec<AffinityGroupId>>>,
}

impl InMemoryInventory {
    /// An empty inventory that knows where the given hosts sit
    pub fn new<'a>(hosts: impl IntoIterator<Item = &'a Host>) -> Self {
        let inventory = Self::default();
        for host in hosts {
            inventory.register_host(host);
        }
        inventory
    }

    pub fn register_host(&self, host: &Host) {
        self.locations
            .write()
            .insert(host.id, (host.cluster_id, host.pod_id));
    }

    pub fn add_group(&self, group: AffinityGroup) {
        let mut groups = self.groups.write();
        groups.retain(|g| g.id != group.id);
        groups.push(group);
    }

    /// Record group membership of a VM that may not be running yet
    pub fn join_group(&self, vm_id: VmId, group_id: AffinityGroupId) {
        let mut memberships = self.memberships.write();
        let groups = memberships.entry(vm_id).or_default();
        if !groups.contains(&group_id) {
            groups.push(group_id);
        }
    }

    pub fn add_vm(&self, vm: RunningVm) {
        for &group_id in &vm.affinity_groups {
            self.join_group(vm.id, group_id);
        }
        let mut vms = self.vms.write();
        vms.retain(|existing| existing.id != vm.id);
        vms.push(vm);
    }

    pub fn vms(&self) -> Vec<RunningVm> {
        self.vms.read().clone()
    }

    fn count_where(&self, account_id: AccountId, matches: impl Fn(ClusterId, PodId) -> bool) -> u64 {
        let locations = self.locations.read();
        self.vms
            .read()
            .iter()
            .filter(|vm| vm.account_id == account_id)
            .filter(|vm| {
                locations
                    .get(&vm.host_id)
                    .map_or(false, |&(cluster, pod)| matches(cluster, pod))
            })
            .count() as u64
    }
}

impl VmCountRepository for InMemoryInventory {
    fn count_running_vms_in_cluster(&self, account_id: AccountId, cluster_id: ClusterId) -> u64 {
        self.count_where(account_id, |cluster, _| cluster == cluster_id)
    }

    fn count_running_vms_in_pod(&self, account_id: AccountId, pod_id: PodId) -> u64 {
        self.count_where(account_id, |_, pod| pod == pod_id)
    }

    fn total_running_vms(&self, account_id: AccountId) -> u64 {
        self.vms
            .read()
            .iter()
            .filter(|vm| vm.account_id == account_id)
            .count() as u64
    }
}

impl AffinityGroupRepository for InMemoryInventory {
    fn groups_for_vm(&self, vm_id: VmId) -> Vec<AffinityGroup> {
        let memberships = self.memberships.read();
        let Some(group_ids) = memberships.get(&vm_id) else {
            return Vec::new();
        };
        let groups = self.groups.read();
        group_ids
            .iter()
            .filter_map(|id| groups.iter().find(|g| g.id == *id).cloned())
            .collect()
    }

    fn member_placements(&self, group_id: AffinityGroupId) -> Vec<MemberPlacement> {
        let memberships = self.memberships.read();
        self.vms
            .read()
            .iter()
            .filter(|vm| {
                memberships
                    .get(&vm.id)
                    .map_or(false, |groups| groups.contains(&group_id))
            })
            .map(|vm| MemberPlacement {
                vm_id: vm.id,
                host_id: vm.host_id,
            })
            .collect()
    }
}
