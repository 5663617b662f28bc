//! Capacity ledger: per-host CPU and memory counters
//!
//! Every host has exactly two capacity records, one for CPU (MHz) and one for memory
//! (bytes). A reservation reads and updates both under a single per-host
//! serialization point, so two requests racing for the same host cannot both pass the
//! capacity check. Requests against different hosts do not contend.
//!
//! Invariant: `used + reserved <= total` for every record after every successful
//! reservation.

pub mod memory;
pub mod redb_ledger;

pub use memory::InMemoryCapacityLedger;
pub use redb_ledger::RedbCapacityLedger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{LedgerBackend, LedgerConfig};
use crate::error::{CumulusError, CumulusResult};
use crate::types::{Host, HostId};

/// Capacity dimension tracked by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Cpu,
    Memory,
}

impl ResourceType {
    pub(crate) fn as_byte(self) -> u8 {
        match self {
            ResourceType::Cpu => 0,
            ResourceType::Memory => 1,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Cpu => f.write_str("CPU"),
            ResourceType::Memory => f.write_str("MEMORY"),
        }
    }
}

/// One (host, resource) counter triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityRecord {
    pub host_id: HostId,
    pub resource_type: ResourceType,
    pub total_capacity: u64,
    pub used_capacity: u64,
    pub reserved_capacity: u64,
    pub updated_at: DateTime<Utc>,
}

impl CapacityRecord {
    pub fn new(host_id: HostId, resource_type: ResourceType, total_capacity: u64) -> Self {
        Self {
            host_id,
            resource_type,
            total_capacity,
            used_capacity: 0,
            reserved_capacity: 0,
            updated_at: Utc::now(),
        }
    }

    /// Capacity neither used nor reserved
    pub fn free_capacity(&self) -> u64 {
        self.total_capacity
            .saturating_sub(self.used_capacity)
            .saturating_sub(self.reserved_capacity)
    }

    /// Fraction of the total that is used or reserved (0.0 for an empty record)
    pub fn allocated_fraction(&self) -> f64 {
        if self.total_capacity == 0 {
            return 0.0;
        }
        (self.used_capacity + self.reserved_capacity) as f64 / self.total_capacity as f64
    }

    /// Overwrite used and reserved amounts; together they may not exceed the total
    pub fn set_usage(&mut self, used: u64, reserved: u64) -> CumulusResult<()> {
        if used.checked_add(reserved).map_or(true, |allocated| allocated > self.total_capacity) {
            return Err(CumulusError::configuration(
                format!("{} usage of host {}", self.resource_type, self.host_id),
                format!(
                    "used {} + reserved {} exceeds total {}",
                    used, reserved, self.total_capacity
                ),
            ));
        }
        self.used_capacity = used;
        self.reserved_capacity = reserved;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn fits_fresh(&self, requested: u64) -> bool {
        self.used_capacity
            .checked_add(self.reserved_capacity)
            .and_then(|allocated| allocated.checked_add(requested))
            .map_or(false, |after| after <= self.total_capacity)
    }

    fn fits_from_reserved(&self, requested: u64) -> bool {
        self.reserved_capacity >= requested
    }
}

/// Both records of one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapacity {
    pub cpu: CapacityRecord,
    pub memory: CapacityRecord,
}

impl HostCapacity {
    pub fn new(host_id: HostId, total_cpu_mhz: u64, total_memory_bytes: u64) -> Self {
        Self {
            cpu: CapacityRecord::new(host_id, ResourceType::Cpu, total_cpu_mhz),
            memory: CapacityRecord::new(host_id, ResourceType::Memory, total_memory_bytes),
        }
    }

    pub fn record(&self, resource: ResourceType) -> &CapacityRecord {
        match resource {
            ResourceType::Cpu => &self.cpu,
            ResourceType::Memory => &self.memory,
        }
    }

    pub fn record_mut(&mut self, resource: ResourceType) -> &mut CapacityRecord {
        match resource {
            ResourceType::Cpu => &mut self.cpu,
            ResourceType::Memory => &mut self.memory,
        }
    }

    /// Whether a reservation of this size would be granted, without applying it
    pub fn fits(&self, cpu: u64, memory: u64, from_last_host: bool) -> bool {
        if from_last_host {
            self.cpu.fits_from_reserved(cpu) && self.memory.fits_from_reserved(memory)
        } else {
            self.cpu.fits_fresh(cpu) && self.memory.fits_fresh(memory)
        }
    }

    /// Evaluate and, if both resources fit, apply a reservation.
    ///
    /// Sticky reservations draw on capacity already reserved for the VM on its last
    /// host and move it to used. Fresh reservations need free room for both
    /// resources. Nothing is modified unless both resources fit.
    pub fn apply_reservation(&mut self, cpu: u64, memory: u64, from_last_host: bool) -> bool {
        if !self.fits(cpu, memory, from_last_host) {
            return false;
        }

        let now = Utc::now();
        for (record, amount) in [(&mut self.cpu, cpu), (&mut self.memory, memory)] {
            if from_last_host {
                record.reserved_capacity -= amount;
            }
            record.used_capacity += amount;
            record.updated_at = now;
        }
        true
    }
}

/// Over-provisioning applied to physical capacity when a host joins
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverprovisioningFactors {
    pub cpu: f64,
    pub memory: f64,
}

impl Default for OverprovisioningFactors {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            memory: 1.0,
        }
    }
}

impl OverprovisioningFactors {
    pub fn capacity_for(&self, host: &Host) -> HostCapacity {
        HostCapacity::new(
            host.id,
            (host.total_cpu_mhz() as f64 * self.cpu) as u64,
            (host.total_memory_bytes as f64 * self.memory) as u64,
        )
    }
}

/// The per-host capacity store shared by all placement requests
pub trait CapacityLedger: Send + Sync {
    /// Create both records for a joining host. Existing records are left untouched.
    fn register_host(&self, host: &Host, factors: &OverprovisioningFactors) -> CumulusResult<()>;

    /// Overwrite used and reserved amounts of one record. Usage past the record's
    /// total is rejected with a configuration error.
    fn set_usage(
        &self,
        host_id: HostId,
        resource: ResourceType,
        used: u64,
        reserved: u64,
    ) -> CumulusResult<()>;

    fn host_capacity(&self, host_id: HostId) -> CumulusResult<Option<HostCapacity>>;

    /// All records, ordered by host
    fn list_capacity(&self) -> CumulusResult<Vec<HostCapacity>>;

    /// Reserve capacity under the host's serialization point, reporting errors
    fn reserve(
        &self,
        host_id: HostId,
        cpu: u64,
        memory: u64,
        from_last_host: bool,
    ) -> CumulusResult<bool>;

    fn capacity(&self, host_id: HostId, resource: ResourceType) -> CumulusResult<Option<CapacityRecord>> {
        Ok(self
            .host_capacity(host_id)?
            .map(|capacity| capacity.record(resource).clone()))
    }

    /// Reserve capacity; any failure is treated as "does not fit".
    ///
    /// Planners cannot tell a full host from one whose records could not be
    /// updated; both mean "try the next host".
    fn try_reserve(&self, host_id: HostId, cpu: u64, memory: u64, from_last_host: bool) -> bool {
        match self.reserve(host_id, cpu, memory, from_last_host) {
            Ok(reserved) => {
                debug!(
                    "Reservation of {}MHz/{}B on host {} (from last host: {}): {}",
                    cpu,
                    memory,
                    host_id,
                    from_last_host,
                    if reserved { "granted" } else { "rejected" }
                );
                reserved
            }
            Err(e) => {
                warn!("Reservation on host {} rolled back: {}", host_id, e);
                false
            }
        }
    }
}

/// Open the ledger backend selected by configuration
pub fn open_ledger(config: &LedgerConfig) -> CumulusResult<Arc<dyn CapacityLedger>> {
    match config.backend {
        LedgerBackend::Memory => Ok(Arc::new(InMemoryCapacityLedger::new())),
        LedgerBackend::Redb => {
            std::fs::create_dir_all(&config.data_dir)?;
            let path = config.data_dir.join(redb_ledger::LEDGER_FILE_NAME);
            Ok(Arc::new(RedbCapacityLedger::open(&path)?))
        }
    }
}

pub(crate) fn missing_record(host_id: HostId) -> CumulusError {
    CumulusError::not_found(format!("capacity records for host {}", host_id))
}
