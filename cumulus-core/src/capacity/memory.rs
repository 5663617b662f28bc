//! In-memory capacity ledger
//!
//! Each host's pair of records sits behind its own mutex, which plays the part of a
//! row lock: a reservation holds it for the read-check-write of that host only.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{missing_record, CapacityLedger, HostCapacity, OverprovisioningFactors, ResourceType};
use crate::error::CumulusResult;
use crate::types::{Host, HostId};

#[derive(Debug, Default)]
pub struct InMemoryCapacityLedger {
    hosts: DashMap<HostId, Arc<Mutex<HostCapacity>>>,
}

impl InMemoryCapacityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a host's records wholesale
    pub fn insert(&self, capacity: HostCapacity) {
        self.hosts
            .insert(capacity.cpu.host_id, Arc::new(Mutex::new(capacity)));
    }

    fn host_lock(&self, host_id: HostId) -> Option<Arc<Mutex<HostCapacity>>> {
        // Clone the handle so the map shard is released before the host lock is taken
        self.hosts.get(&host_id).map(|entry| Arc::clone(entry.value()))
    }
}

impl CapacityLedger for InMemoryCapacityLedger {
    fn register_host(&self, host: &Host, factors: &OverprovisioningFactors) -> CumulusResult<()> {
        self.hosts
            .entry(host.id)
            .or_insert_with(|| Arc::new(Mutex::new(factors.capacity_for(host))));
        Ok(())
    }

    fn set_usage(
        &self,
        host_id: HostId,
        resource: ResourceType,
        used: u64,
        reserved: u64,
    ) -> CumulusResult<()> {
        let lock = self.host_lock(host_id).ok_or_else(|| missing_record(host_id))?;
        let mut capacity = lock.lock();
        capacity.record_mut(resource).set_usage(used, reserved)
    }

    fn host_capacity(&self, host_id: HostId) -> CumulusResult<Option<HostCapacity>> {
        let Some(lock) = self.host_lock(host_id) else {
            return Ok(None);
        };
        let capacity = lock.lock().clone();
        Ok(Some(capacity))
    }

    fn list_capacity(&self) -> CumulusResult<Vec<HostCapacity>> {
        let locks: Vec<_> = self
            .hosts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut all: Vec<_> = locks.iter().map(|lock| lock.lock().clone()).collect();
        all.sort_by_key(|capacity| capacity.cpu.host_id);
        Ok(all)
    }

    fn reserve(
        &self,
        host_id: HostId,
        cpu: u64,
        memory: u64,
        from_last_host: bool,
    ) -> CumulusResult<bool> {
        let lock = self.host_lock(host_id).ok_or_else(|| missing_record(host_id))?;
        let mut capacity = lock.lock();
        Ok(capacity.apply_reservation(cpu, memory, from_last_host))
    }
}
