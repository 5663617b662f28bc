//! Zone → pod → cluster → host hierarchy as the planners see it
//!
//! Planners only read topology. Every listing returns nodes in a stable order (the
//! order they were registered in), which is what makes first-fit placement
//! reproducible for a fixed topology.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{CumulusError, CumulusResult};
use crate::types::{Cluster, ClusterId, Host, HostId, HypervisorType, Pod, PodId, Zone, ZoneId};

/// Read access to the physical topology
pub trait TopologyRepository: Send + Sync {
    fn find_zone(&self, zone_id: ZoneId) -> Option<Zone>;
    fn find_pod(&self, pod_id: PodId) -> Option<Pod>;
    fn find_cluster(&self, cluster_id: ClusterId) -> Option<Cluster>;
    fn find_host(&self, host_id: HostId) -> Option<Host>;

    fn list_pods_in_zone(&self, zone_id: ZoneId) -> Vec<Pod>;
    fn list_clusters_in_pod(&self, pod_id: PodId) -> Vec<Cluster>;
    fn list_hosts_in_cluster(&self, cluster_id: ClusterId) -> Vec<Host>;

    /// All hosts of a zone, pod by pod and cluster by cluster
    fn list_hosts_in_zone(&self, zone_id: ZoneId) -> Vec<Host> {
        self.list_pods_in_zone(zone_id)
            .iter()
            .flat_map(|pod| self.list_clusters_in_pod(pod.id))
            .flat_map(|cluster| self.list_hosts_in_cluster(cluster.id))
            .collect()
    }

    /// Hosts of a pod that belong to clusters running the given hypervisor
    fn list_hosts_in_pod(&self, pod_id: PodId, hypervisor: HypervisorType) -> Vec<Host> {
        self.list_clusters_in_pod(pod_id)
            .iter()
            .filter(|cluster| cluster.hypervisor == hypervisor)
            .flat_map(|cluster| self.list_hosts_in_cluster(cluster.id))
            .collect()
    }
}

/// Topology held in memory, in registration order
#[derive(Debug, Clone, Default)]
pub struct InMemoryTopology {
    zones: Vec<Zone>,
    pods: Vec<Pod>,
    clusters: Vec<Cluster>,
    hosts: Vec<Host>,
    host_index: HashMap<HostId, usize>,
}

impl InMemoryTopology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }
}

impl TopologyRepository for InMemoryTopology {
    fn find_zone(&self, zone_id: ZoneId) -> Option<Zone> {
        self.zones.iter().find(|z| z.id == zone_id).cloned()
    }

    fn find_pod(&self, pod_id: PodId) -> Option<Pod> {
        self.pods.iter().find(|p| p.id == pod_id).cloned()
    }

    fn find_cluster(&self, cluster_id: ClusterId) -> Option<Cluster> {
        self.clusters.iter().find(|c| c.id == cluster_id).cloned()
    }

    fn find_host(&self, host_id: HostId) -> Option<Host> {
        self.host_index
            .get(&host_id)
            .and_then(|&idx| self.hosts.get(idx))
            .cloned()
    }

    fn list_pods_in_zone(&self, zone_id: ZoneId) -> Vec<Pod> {
        self.pods.iter().filter(|p| p.zone_id == zone_id).cloned().collect()
    }

    fn list_clusters_in_pod(&self, pod_id: PodId) -> Vec<Cluster> {
        self.clusters
            .iter()
            .filter(|c| c.pod_id == pod_id)
            .cloned()
            .collect()
    }

    fn list_hosts_in_cluster(&self, cluster_id: ClusterId) -> Vec<Host> {
        self.hosts
            .iter()
            .filter(|h| h.cluster_id == cluster_id)
            .cloned()
            .collect()
    }
}

/// Builder validating that every node hangs off an existing parent
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    topology: InMemoryTopology,
    errors: Vec<String>,
}

impl TopologyBuilder {
    pub fn zone(mut self, id: ZoneId, name: impl Into<String>) -> Self {
        if self.topology.zones.iter().any(|z| z.id == id) {
            self.errors.push(format!("duplicate zone {}", id));
        }
        self.topology.zones.push(Zone {
            id,
            name: name.into(),
        });
        self
    }

    pub fn pod(mut self, id: PodId, zone_id: ZoneId, name: impl Into<String>) -> Self {
        if !self.topology.zones.iter().any(|z| z.id == zone_id) {
            self.errors.push(format!("pod {} references unknown zone {}", id, zone_id));
        }
        if self.topology.pods.iter().any(|p| p.id == id) {
            self.errors.push(format!("duplicate pod {}", id));
        }
        self.topology.pods.push(Pod {
            id,
            zone_id,
            name: name.into(),
        });
        self
    }

    pub fn cluster(
        mut self,
        id: ClusterId,
        pod_id: PodId,
        name: impl Into<String>,
        hypervisor: HypervisorType,
    ) -> Self {
        let zone_id = match self.topology.pods.iter().find(|p| p.id == pod_id) {
            Some(pod) => pod.zone_id,
            None => {
                self.errors
                    .push(format!("cluster {} references unknown pod {}", id, pod_id));
                0
            }
        };
        if self.topology.clusters.iter().any(|c| c.id == id) {
            self.errors.push(format!("duplicate cluster {}", id));
        }
        self.topology.clusters.push(Cluster {
            id,
            pod_id,
            zone_id,
            name: name.into(),
            hypervisor,
        });
        self
    }

    /// Attach a host; its pod and zone are taken from its cluster
    pub fn host(mut self, mut host: Host) -> Self {
        match self
            .topology
            .clusters
            .iter()
            .find(|c| c.id == host.cluster_id)
        {
            Some(cluster) => {
                host.pod_id = cluster.pod_id;
                host.zone_id = cluster.zone_id;
            }
            None => self.errors.push(format!(
                "host {} references unknown cluster {}",
                host.id, host.cluster_id
            )),
        }
        if self.topology.host_index.contains_key(&host.id) {
            self.errors.push(format!("duplicate host {}", host.id));
        } else {
            self.topology
                .host_index
                .insert(host.id, self.topology.hosts.len());
            self.topology.hosts.push(host);
        }
        self
    }

    pub fn build(self) -> CumulusResult<InMemoryTopology> {
        if !self.errors.is_empty() {
            return Err(CumulusError::configuration("topology", self.errors.join("; ")));
        }
        debug!(
            "Built topology with {} zones, {} pods, {} clusters, {} hosts",
            self.topology.zones.len(),
            self.topology.pods.len(),
            self.topology.clusters.len(),
            self.topology.hosts.len()
        );
        Ok(self.topology)
    }
}
