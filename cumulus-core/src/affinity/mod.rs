//! Affinity and anti-affinity processing
//!
//! Before any planner runs, the VM's affinity groups are turned into plan pins
//! (affinity) or exclusions (anti-affinity). Each processor handles one group type,
//! and processors run in the configured order.

pub mod anti_affinity;
pub mod colocation;

pub use anti_affinity::{AntiAffinityChecker, AntiAffinityProcessor};
pub use colocation::AffinityProcessor;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::defaults::DEFAULT_MAX_PER_SCOPE;
use crate::error::{CumulusError, CumulusResult};
use crate::exclude_list::ExcludeList;
use crate::topology::TopologyRepository;
use crate::types::{AccountId, DeploymentPlan, HostId, VirtualMachineProfile, VmId};

pub type AffinityGroupId = u64;

/// Topology level an affinity rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AffinityScope {
    Host,
    Cluster,
    Pod,
}

impl std::fmt::Display for AffinityScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AffinityScope::Host => f.write_str("host"),
            AffinityScope::Cluster => f.write_str("cluster"),
            AffinityScope::Pod => f.write_str("pod"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AffinityGroupType {
    HostAffinity,
    HostAntiAffinity,
    ClusterAffinity,
    ClusterAntiAffinity,
    PodAffinity,
    PodAntiAffinity,
}

impl AffinityGroupType {
    /// Default processor order: anti-affinity first at every scope, narrowest scope first
    pub const ALL: [AffinityGroupType; 6] = [
        AffinityGroupType::HostAntiAffinity,
        AffinityGroupType::HostAffinity,
        AffinityGroupType::ClusterAntiAffinity,
        AffinityGroupType::ClusterAffinity,
        AffinityGroupType::PodAntiAffinity,
        AffinityGroupType::PodAffinity,
    ];

    pub fn scope(self) -> AffinityScope {
        match self {
            AffinityGroupType::HostAffinity | AffinityGroupType::HostAntiAffinity => {
                AffinityScope::Host
            }
            AffinityGroupType::ClusterAffinity | AffinityGroupType::ClusterAntiAffinity => {
                AffinityScope::Cluster
            }
            AffinityGroupType::PodAffinity | AffinityGroupType::PodAntiAffinity => {
                AffinityScope::Pod
            }
        }
    }

    pub fn is_anti(self) -> bool {
        matches!(
            self,
            AffinityGroupType::HostAntiAffinity
                | AffinityGroupType::ClusterAntiAffinity
                | AffinityGroupType::PodAntiAffinity
        )
    }
}

impl std::fmt::Display for AffinityGroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_anti() { "anti-affinity" } else { "affinity" };
        write!(f, "{}-{}", self.scope(), kind)
    }
}

fn default_max_per_scope() -> u32 {
    DEFAULT_MAX_PER_SCOPE
}

/// A named set of VMs placed under one affinity rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityGroup {
    pub id: AffinityGroupId,
    pub name: String,
    pub group_type: AffinityGroupType,
    #[serde(default)]
    pub account_id: Option<AccountId>,
    /// Members allowed per scope node (anti-affinity only)
    #[serde(default = "default_max_per_scope")]
    pub max_per_scope: u32,
}

impl AffinityGroup {
    pub fn new(id: AffinityGroupId, name: impl Into<String>, group_type: AffinityGroupType) -> Self {
        Self {
            id,
            name: name.into(),
            group_type,
            account_id: None,
            max_per_scope: DEFAULT_MAX_PER_SCOPE,
        }
    }

    pub fn with_max_per_scope(mut self, max: u32) -> Self {
        self.max_per_scope = max;
        self
    }
}

/// Where a group member currently runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPlacement {
    pub vm_id: VmId,
    pub host_id: HostId,
}

/// Affinity group membership, owned outside the planning core
pub trait AffinityGroupRepository: Send + Sync {
    fn groups_for_vm(&self, vm_id: VmId) -> Vec<AffinityGroup>;

    /// Placed members of a group
    fn member_placements(&self, group_id: AffinityGroupId) -> Vec<MemberPlacement>;
}

/// One link of the pre-planning chain
pub trait AffinityGroupProcessor: Send + Sync {
    fn group_type(&self) -> AffinityGroupType;

    /// Narrow `plan` and grow `exclude` for the groups of this processor's type.
    /// `groups` holds every group of the VM; processors skip the other types.
    fn process(
        &self,
        vm: &VirtualMachineProfile,
        plan: &mut DeploymentPlan,
        exclude: &mut ExcludeList,
        groups: &[AffinityGroup],
    ) -> CumulusResult<()>;
}

/// Build the processor chain for the configured group types
pub fn build_processors(
    types: &[AffinityGroupType],
    groups: Arc<dyn AffinityGroupRepository>,
    topology: Arc<dyn TopologyRepository>,
) -> Vec<Box<dyn AffinityGroupProcessor>> {
    types
        .iter()
        .map(|&group_type| -> Box<dyn AffinityGroupProcessor> {
            if group_type.is_anti() {
                Box::new(AntiAffinityProcessor::new(
                    group_type,
                    Arc::clone(&groups),
                    Arc::clone(&topology),
                ))
            } else {
                Box::new(AffinityProcessor::new(
                    group_type,
                    Arc::clone(&groups),
                    Arc::clone(&topology),
                ))
            }
        })
        .collect()
}

/// The node of `scope` that a host belongs to
pub(crate) fn scope_node(
    topology: &dyn TopologyRepository,
    scope: AffinityScope,
    host_id: HostId,
) -> Option<u64> {
    let host = topology.find_host(host_id)?;
    Some(match scope {
        AffinityScope::Host => host.id,
        AffinityScope::Cluster => host.cluster_id,
        AffinityScope::Pod => host.pod_id,
    })
}

/// Scope nodes occupied by the other members of a group
pub(crate) fn member_nodes(
    repository: &dyn AffinityGroupRepository,
    topology: &dyn TopologyRepository,
    group: &AffinityGroup,
    vm_id: VmId,
) -> Vec<u64> {
    repository
        .member_placements(group.id)
        .into_iter()
        .filter(|member| member.vm_id != vm_id)
        .filter_map(|member| {
            let node = scope_node(topology, group.group_type.scope(), member.host_id);
            if node.is_none() {
                tracing::warn!(
                    "Member {} of affinity group '{}' runs on unknown host {}",
                    member.vm_id,
                    group.name,
                    member.host_id
                );
            }
            node
        })
        .collect()
}

pub(crate) fn conflict(vm: &VirtualMachineProfile, message: impl Into<String>) -> CumulusError {
    CumulusError::affinity_conflict(vm.name.clone(), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_type_scope_and_names() {
        assert_eq!(AffinityGroupType::ClusterAntiAffinity.scope(), AffinityScope::Cluster);
        assert!(AffinityGroupType::PodAntiAffinity.is_anti());
        assert!(!AffinityGroupType::HostAffinity.is_anti());
        assert_eq!(AffinityGroupType::HostAntiAffinity.to_string(), "host-anti-affinity");

        let parsed: AffinityGroup = serde_json::from_str(
            r#"{"id": 1, "name": "web", "group_type": "pod-affinity"}"#,
        )
        .unwrap();
        assert_eq!(parsed.group_type, AffinityGroupType::PodAffinity);
        assert_eq!(parsed.max_per_scope, 1);
    }
}
