//! Deployment planning and capacity allocation
//!
//! Given a VM's resource demand and a deployment plan, pick a zone/pod/cluster/host
//! destination and reserve CPU and memory on the host atomically.

pub mod affinity;
pub mod capacity;
pub mod config;
pub mod error;
pub mod exclude_list;
pub mod inventory;
pub mod metrics;
pub mod orchestrator;
pub mod planner;
pub mod snapshot;
pub mod topology;
pub mod types;

pub use capacity::{open_ledger, CapacityLedger, CapacityRecord, HostCapacity, ResourceType};
pub use config::CumulusConfig;
pub use error::{CumulusError, CumulusResult};
pub use exclude_list::ExcludeList;
pub use orchestrator::DeploymentPlanningManager;
pub use planner::DeploymentPlanner;
pub use snapshot::{ClusterSnapshot, PlacementRequest};
pub use topology::{InMemoryTopology, TopologyRepository};
pub use types::{DeployDestination, DeploymentPlan, VirtualMachineProfile};
