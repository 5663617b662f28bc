//! Deployment planning manager
//!
//! Runs one placement request through three stages:
//!
//! 1. the affinity chain narrows the plan and grows the exclude list, but only for
//!    VMs that belong to at least one affinity group;
//! 2. planners are tried in priority order, skipping those that cannot handle the
//!    VM, until one returns a destination;
//! 3. the chosen host is added to the exclude list so a retry of the same request
//!    does not land there again.
//!
//! There is no scoring across planners: the first destination wins.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::affinity::{build_processors, AffinityGroupProcessor, AffinityGroupRepository};
use crate::capacity::CapacityLedger;
use crate::config::CumulusConfig;
use crate::error::{CumulusError, CumulusResult};
use crate::exclude_list::ExcludeList;
use crate::inventory::VmCountRepository;
use crate::metrics::{PlacementMetrics, PlacementOutcome};
use crate::planner::{
    BareMetalPlanner, DeploymentPlanner, FirstFitPlanner, PlannerContext, SimplePlanner,
};
use crate::topology::TopologyRepository;
use crate::types::{DeployDestination, DeploymentPlan, VirtualMachineProfile};

pub struct DeploymentPlanningManager {
    planners: Vec<Box<dyn DeploymentPlanner>>,
    processors: Vec<Box<dyn AffinityGroupProcessor>>,
    affinity_groups: Arc<dyn AffinityGroupRepository>,
    metrics: Arc<PlacementMetrics>,
}

impl DeploymentPlanningManager {
    /// A manager with no planners and no affinity processors
    pub fn new(affinity_groups: Arc<dyn AffinityGroupRepository>, metrics: Arc<PlacementMetrics>) -> Self {
        Self {
            planners: Vec::new(),
            processors: Vec::new(),
            affinity_groups,
            metrics,
        }
    }

    /// Append a planner at the lowest priority
    pub fn with_planner(mut self, planner: Box<dyn DeploymentPlanner>) -> Self {
        self.planners.push(planner);
        self
    }

    /// Append an affinity processor at the end of the chain
    pub fn with_processor(mut self, processor: Box<dyn AffinityGroupProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Build the planner chain and the affinity chain named by the configuration
    pub fn from_config(
        config: &CumulusConfig,
        topology: Arc<dyn TopologyRepository>,
        ledger: Arc<dyn CapacityLedger>,
        vm_counts: Arc<dyn VmCountRepository>,
        affinity_groups: Arc<dyn AffinityGroupRepository>,
    ) -> CumulusResult<Self> {
        config.validate()?;

        let ctx = PlannerContext::new(Arc::clone(&topology), ledger, vm_counts)?;
        let mut manager = Self::new(Arc::clone(&affinity_groups), Arc::clone(&ctx.metrics));

        for name in &config.planner.planners {
            let planner = build_planner(name, ctx.clone(), config)?;
            manager = manager.with_planner(planner);
        }
        manager.processors = build_processors(&config.affinity.processors, affinity_groups, topology);

        info!(
            "Deployment planning configured: algorithm {}, planners [{}], {} affinity processors",
            config.planner.allocation_algorithm,
            config.planner.planners.join(", "),
            manager.processors.len()
        );
        Ok(manager)
    }

    pub fn planner_names(&self) -> Vec<&str> {
        self.planners.iter().map(|p| p.name()).collect()
    }

    pub fn metrics(&self) -> &Arc<PlacementMetrics> {
        &self.metrics
    }

    /// Find a destination for the VM and reserve capacity on it.
    ///
    /// `Ok(None)` means every eligible planner came up empty. On success the
    /// chosen host is added to `exclude`.
    pub fn plan_deployment(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        exclude: &mut ExcludeList,
    ) -> CumulusResult<Option<DeployDestination>> {
        let start_time = Instant::now();
        let mut plan = *plan;

        if let Err(e) = self.apply_affinity(vm, &mut plan, exclude) {
            self.record_failure("affinity", &e);
            return Err(e);
        }

        for planner in &self.planners {
            if !planner.can_handle(vm, &plan, exclude) {
                debug!("Planner {} does not handle VM {}", planner.name(), vm.name);
                continue;
            }

            match planner.plan(vm, &plan, exclude) {
                Ok(Some(destination)) => {
                    exclude.add_host(destination.host.id);
                    self.metrics
                        .record_placement(planner.name(), PlacementOutcome::Placed);
                    info!(
                        "VM '{}' placed at {} by planner {} (took {}us)",
                        vm.name,
                        destination,
                        planner.name(),
                        start_time.elapsed().as_micros()
                    );
                    return Ok(Some(destination));
                }
                Ok(None) => {
                    self.metrics
                        .record_placement(planner.name(), PlacementOutcome::NoCapacity);
                    debug!("Planner {} found no host for VM {}", planner.name(), vm.name);
                }
                Err(e) => {
                    self.record_failure(planner.name(), &e);
                    return Err(e);
                }
            }
        }

        info!(
            "No planner could place VM '{}' in zone {}",
            vm.name, plan.data_center_id
        );
        Ok(None)
    }

    /// Like [`plan_deployment`](Self::plan_deployment), with exhaustion reported as
    /// [`CumulusError::InsufficientCapacity`]
    pub fn plan_required_deployment(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        exclude: &mut ExcludeList,
    ) -> CumulusResult<DeployDestination> {
        self.plan_deployment(vm, plan, exclude)?
            .ok_or_else(|| CumulusError::InsufficientCapacity {
                vm: vm.name.clone(),
                zone_id: plan.data_center_id,
                message: format!(
                    "no host found by planners [{}]",
                    self.planner_names().join(", ")
                ),
            })
    }

    /// Re-validate a destination with the first planner that handles the VM
    pub fn check_destination(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        destination: &DeployDestination,
        exclude: &ExcludeList,
    ) -> bool {
        self.planners
            .iter()
            .find(|planner| planner.can_handle(vm, plan, exclude))
            .map_or(false, |planner| planner.check(vm, plan, destination, exclude))
    }

    fn apply_affinity(
        &self,
        vm: &VirtualMachineProfile,
        plan: &mut DeploymentPlan,
        exclude: &mut ExcludeList,
    ) -> CumulusResult<()> {
        let groups = self.affinity_groups.groups_for_vm(vm.id);
        if groups.is_empty() {
            return Ok(());
        }

        debug!("VM {} belongs to {} affinity groups", vm.name, groups.len());
        for processor in &self.processors {
            processor.process(vm, plan, exclude, &groups)?;
        }
        ensure_pins_not_excluded(vm, plan, exclude)
    }

    fn record_failure(&self, stage: &str, error: &CumulusError) {
        if matches!(error, CumulusError::AffinityConflict { .. }) {
            self.metrics.record_affinity_conflict();
        }
        self.metrics.record_placement(stage, PlacementOutcome::Failed);
        warn!("Placement failed in {}: {}", stage, error);
    }
}

fn build_planner(
    name: &str,
    ctx: PlannerContext,
    config: &CumulusConfig,
) -> CumulusResult<Box<dyn DeploymentPlanner>> {
    let planner_config = &config.planner;
    let planner: Box<dyn DeploymentPlanner> = match name {
        "first-fit" => Box::new(FirstFitPlanner::new(ctx, planner_config)),
        "random" => Box::new(FirstFitPlanner::random(ctx, planner_config)),
        "user-dispersing" => Box::new(FirstFitPlanner::user_dispersing(ctx, planner_config)),
        "user-concentrated-pod" => {
            Box::new(FirstFitPlanner::user_concentrated_pod(ctx, planner_config))
        }
        "simple" => Box::new(SimplePlanner::new(ctx)),
        "bare-metal" => Box::new(BareMetalPlanner::new(ctx, planner_config)),
        other => {
            return Err(CumulusError::configuration(
                "planner.planners",
                format!("unknown planner '{}'", other),
            ))
        }
    };
    Ok(planner)
}

/// A pin the affinity chain produced must not point at an excluded node
fn ensure_pins_not_excluded(
    vm: &VirtualMachineProfile,
    plan: &DeploymentPlan,
    exclude: &ExcludeList,
) -> CumulusResult<()> {
    let pinned = [
        ("pod", plan.pod_id.filter(|&id| exclude.contains_pod(id))),
        ("cluster", plan.cluster_id.filter(|&id| exclude.contains_cluster(id))),
        ("host", plan.host_id.filter(|&id| exclude.contains_host(id))),
    ];
    match pinned.iter().find_map(|&(level, id)| id.map(|id| (level, id))) {
        Some((level, id)) => Err(CumulusError::affinity_conflict(
            vm.name.clone(),
            format!("plan is pinned to {} {} which is excluded", level, id),
        )),
        None => Ok(()),
    }
}
