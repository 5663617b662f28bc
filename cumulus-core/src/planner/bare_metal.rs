//! Bare-metal planner
//!
//! A bare-metal offering describes one whole machine. With a host tag the planner
//! takes the first Up host of the zone whose `hostTag` detail matches; without one
//! it runs a first-fit search. Either way the offering must equal the host's
//! physical CPU count, CPU speed and memory exactly.

use tracing::{debug, info};

use super::{resolve_destination, DeploymentPlanner, FirstFitPlanner, PlannerContext};
use crate::config::PlannerConfig;
use crate::error::{CumulusError, CumulusResult};
use crate::exclude_list::ExcludeList;
use crate::types::{
    DeployDestination, DeploymentPlan, Host, HypervisorType, VirtualMachineProfile,
    HOST_TAG_DETAIL, MIB,
};

pub struct BareMetalPlanner {
    ctx: PlannerContext,
    first_fit: FirstFitPlanner,
}

impl BareMetalPlanner {
    pub fn new(ctx: PlannerContext, config: &PlannerConfig) -> Self {
        let first_fit = FirstFitPlanner::new(ctx.clone(), config);
        Self { ctx, first_fit }
    }

    fn tagged_host(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        exclude: &ExcludeList,
        tag: &str,
    ) -> CumulusResult<Option<DeployDestination>> {
        let topology = self.ctx.topology.as_ref();
        let candidate = topology
            .list_hosts_in_zone(plan.data_center_id)
            .into_iter()
            .filter(|host| host.is_up() && !exclude.should_avoid_host(host))
            .filter(|host| host.detail(HOST_TAG_DETAIL) == Some(tag))
            .find_map(|host| {
                resolve_destination(topology, &host)
                    .filter(|dest| dest.cluster.hypervisor == HypervisorType::BareMetal)
            });

        let Some(destination) = candidate else {
            debug!("No Up bare-metal host in zone {} carries tag '{}'", plan.data_center_id, tag);
            return Ok(None);
        };

        ensure_exact_match(vm, &destination.host)?;
        if !self.ctx.reserve(&destination.host, vm, false) {
            debug!("Bare-metal host {} is already allocated", destination.host.name);
            return Ok(None);
        }
        info!(
            "Bare-metal VM {} takes host {} by tag '{}'",
            vm.name, destination.host.name, tag
        );
        Ok(Some(destination))
    }

    /// First-fit admission: only the host the search would select has to match.
    ///
    /// Hosts too small for the offering, or whose records would turn the
    /// reservation down, are skipped. A host that would take the VM but differs
    /// from the offering ends the search.
    fn admit(
        &self,
        vm: &VirtualMachineProfile,
        host: &Host,
        from_last_host: bool,
    ) -> CumulusResult<bool> {
        if is_exact_match(vm, host) {
            return Ok(true);
        }
        if !physically_holds(vm, host) {
            debug!("Bare-metal host {} is too small for offering {}", host.name, vm.offering.name);
            return Ok(false);
        }
        let would_fit = self
            .ctx
            .ledger
            .host_capacity(host.id)
            .ok()
            .flatten()
            .map_or(false, |capacity| {
                capacity.fits(vm.cpu_mhz(), vm.memory_bytes(), from_last_host)
            });
        if !would_fit {
            return Ok(false);
        }
        ensure_exact_match(vm, host).map(|()| true)
    }
}

fn is_exact_match(vm: &VirtualMachineProfile, host: &Host) -> bool {
    let offering = &vm.offering;
    offering.cpu_count == host.cpu_cores
        && offering.cpu_speed_mhz == host.cpu_speed_mhz
        && offering.ram_size_mb.checked_mul(MIB) == Some(host.total_memory_bytes)
}

fn physically_holds(vm: &VirtualMachineProfile, host: &Host) -> bool {
    vm.offering.cpu_count <= host.cpu_cores
        && vm.offering.cpu_speed_mhz <= host.cpu_speed_mhz
        && vm.memory_bytes() <= host.total_memory_bytes
}

/// The offering must describe exactly the host's physical capacity
pub fn ensure_exact_match(vm: &VirtualMachineProfile, host: &Host) -> CumulusResult<()> {
    if is_exact_match(vm, host) {
        return Ok(());
    }
    let offering = &vm.offering;

    Err(CumulusError::BareMetalCapacityMismatch {
        offering: offering.name.clone(),
        host_id: host.id,
        expected: format!(
            "{} CPU x {}MHz, {}MB",
            offering.cpu_count, offering.cpu_speed_mhz, offering.ram_size_mb
        ),
        actual: format!(
            "{} CPU x {}MHz, {}MB",
            host.cpu_cores,
            host.cpu_speed_mhz,
            host.total_memory_bytes / MIB
        ),
    })
}

impl DeploymentPlanner for BareMetalPlanner {
    fn name(&self) -> &str {
        "bare-metal"
    }

    fn can_handle(
        &self,
        vm: &VirtualMachineProfile,
        _plan: &DeploymentPlan,
        _exclude: &ExcludeList,
    ) -> bool {
        vm.hypervisor == HypervisorType::BareMetal
    }

    fn plan(
        &self,
        vm: &VirtualMachineProfile,
        plan: &DeploymentPlan,
        exclude: &ExcludeList,
    ) -> CumulusResult<Option<DeployDestination>> {
        match vm.offering.host_tag.as_deref() {
            Some(tag) => self.tagged_host(vm, plan, exclude, tag),
            None => self.first_fit.search_with(vm, plan, exclude, &|host, from_last_host| {
                self.admit(vm, host, from_last_host)
            }),
        }
    }

    fn check(
        &self,
        vm: &VirtualMachineProfile,
        _plan: &DeploymentPlan,
        destination: &DeployDestination,
        exclude: &ExcludeList,
    ) -> bool {
        destination.cluster.hypervisor == HypervisorType::BareMetal
            && is_exact_match(vm, &destination.host)
            && !exclude.should_avoid_host(&destination.host)
    }
}
