//! Pods, clusters and hosts a planning attempt must not place onto
//!
//! The list only grows during one placement request. Affinity processors add the
//! nodes their rules forbid and the orchestrator adds every host it hands out, so a
//! caller placing several VMs in one batch never gets the same host twice.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{Cluster, ClusterId, Host, HostId, Pod, PodId};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeList {
    pods: BTreeSet<PodId>,
    clusters: BTreeSet<ClusterId>,
    hosts: BTreeSet<HostId>,
}

impl ExcludeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the pod was not already excluded
    pub fn add_pod(&mut self, pod_id: PodId) -> bool {
        self.pods.insert(pod_id)
    }

    pub fn add_cluster(&mut self, cluster_id: ClusterId) -> bool {
        self.clusters.insert(cluster_id)
    }

    pub fn add_host(&mut self, host_id: HostId) -> bool {
        self.hosts.insert(host_id)
    }

    pub fn add_pods(&mut self, pod_ids: impl IntoIterator<Item = PodId>) {
        self.pods.extend(pod_ids);
    }

    pub fn add_clusters(&mut self, cluster_ids: impl IntoIterator<Item = ClusterId>) {
        self.clusters.extend(cluster_ids);
    }

    pub fn add_hosts(&mut self, host_ids: impl IntoIterator<Item = HostId>) {
        self.hosts.extend(host_ids);
    }

    pub fn contains_pod(&self, pod_id: PodId) -> bool {
        self.pods.contains(&pod_id)
    }

    pub fn contains_cluster(&self, cluster_id: ClusterId) -> bool {
        self.clusters.contains(&cluster_id)
    }

    pub fn contains_host(&self, host_id: HostId) -> bool {
        self.hosts.contains(&host_id)
    }

    pub fn should_avoid_pod(&self, pod: &Pod) -> bool {
        self.contains_pod(pod.id)
    }

    /// A cluster is avoided when it, or the pod it lives in, is excluded
    pub fn should_avoid_cluster(&self, cluster: &Cluster) -> bool {
        self.contains_cluster(cluster.id) || self.contains_pod(cluster.pod_id)
    }

    /// A host is avoided when it, its cluster or its pod is excluded
    pub fn should_avoid_host(&self, host: &Host) -> bool {
        self.contains_host(host.id)
            || self.contains_cluster(host.cluster_id)
            || self.contains_pod(host.pod_id)
    }

    pub fn pods(&self) -> impl Iterator<Item = PodId> + '_ {
        self.pods.iter().copied()
    }

    pub fn clusters(&self) -> impl Iterator<Item = ClusterId> + '_ {
        self.clusters.iter().copied()
    }

    pub fn hosts(&self) -> impl Iterator<Item = HostId> + '_ {
        self.hosts.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty() && self.clusters.is_empty() && self.hosts.is_empty()
    }
}

impl std::fmt::Display for ExcludeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ExcludeList[pods={:?}, clusters={:?}, hosts={:?}]",
            self.pods, self.clusters, self.hosts
        )
    }
}
