//! Persistent capacity ledger backed by redb
//!
//! Records live in a single table keyed by `host_id (big-endian) ++ resource byte`,
//! values are bincode-encoded [`CapacityRecord`]s. redb admits one write transaction
//! at a time, so every reservation is serialized against every other one; the
//! read-check-write of both records happens inside that transaction and is aborted
//! unless both resources fit.

use redb::{Database, ReadableTable, Table, TableDefinition};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    missing_record, CapacityLedger, CapacityRecord, HostCapacity, OverprovisioningFactors,
    ResourceType,
};
use crate::error::{CumulusError, CumulusResult};
use crate::types::{Host, HostId};

/// File created under the configured data directory
pub const LEDGER_FILE_NAME: &str = "capacity.redb";

const CAPACITY_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("host_capacity");

type CapacityTable<'txn> = Table<'txn, &'static [u8], &'static [u8]>;

fn record_key(host_id: HostId, resource: ResourceType) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[..8].copy_from_slice(&host_id.to_be_bytes());
    key[8] = resource.as_byte();
    key
}

fn read_record<T>(
    table: &T,
    host_id: HostId,
    resource: ResourceType,
) -> CumulusResult<Option<CapacityRecord>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let key = record_key(host_id, resource);
    match table
        .get(key.as_slice())
        .map_err(|e| CumulusError::storage(format!("read {} record of host {}", resource, host_id), e))?
    {
        Some(data) => Ok(Some(bincode::deserialize(data.value())?)),
        None => Ok(None),
    }
}

fn read_host<T>(table: &T, host_id: HostId) -> CumulusResult<Option<HostCapacity>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let cpu = read_record(table, host_id, ResourceType::Cpu)?;
    let memory = read_record(table, host_id, ResourceType::Memory)?;
    match (cpu, memory) {
        (Some(cpu), Some(memory)) => Ok(Some(HostCapacity { cpu, memory })),
        (None, None) => Ok(None),
        _ => Err(CumulusError::internal(format!(
            "host {} has only one of its two capacity records",
            host_id
        ))),
    }
}

fn write_record(table: &mut CapacityTable<'_>, record: &CapacityRecord) -> CumulusResult<()> {
    let key = record_key(record.host_id, record.resource_type);
    let data = bincode::serialize(record)?;
    table
        .insert(key.as_slice(), data.as_slice())
        .map_err(|e| {
            CumulusError::storage(
                format!("write {} record of host {}", record.resource_type, record.host_id),
                e,
            )
        })?;
    Ok(())
}

fn write_host(table: &mut CapacityTable<'_>, capacity: &HostCapacity) -> CumulusResult<()> {
    write_record(table, &capacity.cpu)?;
    write_record(table, &capacity.memory)
}

pub struct RedbCapacityLedger {
    database: Arc<Database>,
}

impl RedbCapacityLedger {
    /// Open (or create) a ledger database file
    pub fn open(path: &Path) -> CumulusResult<Self> {
        let database = Database::create(path)
            .map_err(|e| CumulusError::storage(format!("open ledger {}", path.display()), e))?;
        info!("Opened capacity ledger at {}", path.display());
        Self::new(Arc::new(database))
    }

    /// Wrap an existing database, creating the capacity table if needed
    pub fn new(database: Arc<Database>) -> CumulusResult<Self> {
        let txn = database
            .begin_write()
            .map_err(|e| CumulusError::storage("begin ledger initialization", e))?;
        txn.open_table(CAPACITY_TABLE)
            .map_err(|e| CumulusError::storage("create capacity table", e))?;
        txn.commit()
            .map_err(|e| CumulusError::storage("commit ledger initialization", e))?;
        Ok(Self { database })
    }

    /// Run `f` against the capacity table inside one write transaction.
    ///
    /// The transaction commits when `f` returns `Ok(true)` and is aborted on
    /// `Ok(false)` or an error.
    fn write<F>(&self, operation: &str, f: F) -> CumulusResult<bool>
    where
        F: FnOnce(&mut CapacityTable<'_>) -> CumulusResult<bool>,
    {
        let txn = self
            .database
            .begin_write()
            .map_err(|e| CumulusError::storage(format!("begin {}", operation), e))?;
        let changed = {
            let mut table = txn
                .open_table(CAPACITY_TABLE)
                .map_err(|e| CumulusError::storage(format!("open table for {}", operation), e))?;
            f(&mut table)?
        };
        if changed {
            txn.commit()
                .map_err(|e| CumulusError::storage(format!("commit {}", operation), e))?;
        } else {
            txn.abort()
                .map_err(|e| CumulusError::storage(format!("abort {}", operation), e))?;
        }
        Ok(changed)
    }
}

impl CapacityLedger for RedbCapacityLedger {
    fn register_host(&self, host: &Host, factors: &OverprovisioningFactors) -> CumulusResult<()> {
        let created = self.write("register host", |table| {
            if read_host(&*table, host.id)?.is_some() {
                return Ok(false);
            }
            write_host(table, &factors.capacity_for(host))?;
            Ok(true)
        })?;
        if created {
            debug!("Registered capacity records for host {}", host.id);
        }
        Ok(())
    }

    fn set_usage(
        &self,
        host_id: HostId,
        resource: ResourceType,
        used: u64,
        reserved: u64,
    ) -> CumulusResult<()> {
        self.write("set usage", |table| {
            let mut record =
                read_record(&*table, host_id, resource)?.ok_or_else(|| missing_record(host_id))?;
            record.set_usage(used, reserved)?;
            write_record(table, &record)?;
            Ok(true)
        })?;
        Ok(())
    }

    fn host_capacity(&self, host_id: HostId) -> CumulusResult<Option<HostCapacity>> {
        let txn = self
            .database
            .begin_read()
            .map_err(|e| CumulusError::storage("begin capacity read", e))?;
        let table = txn
            .open_table(CAPACITY_TABLE)
            .map_err(|e| CumulusError::storage("open capacity table", e))?;
        read_host(&table, host_id)
    }

    fn list_capacity(&self) -> CumulusResult<Vec<HostCapacity>> {
        let txn = self
            .database
            .begin_read()
            .map_err(|e| CumulusError::storage("begin capacity listing", e))?;
        let table = txn
            .open_table(CAPACITY_TABLE)
            .map_err(|e| CumulusError::storage("open capacity table", e))?;

        let mut cpu: BTreeMap<HostId, CapacityRecord> = BTreeMap::new();
        let mut memory: BTreeMap<HostId, CapacityRecord> = BTreeMap::new();
        let iter = table
            .iter()
            .map_err(|e| CumulusError::storage("iterate capacity table", e))?;
        for entry in iter {
            let (_, value) =
                entry.map_err(|e| CumulusError::storage("read capacity entry", e))?;
            let record: CapacityRecord = bincode::deserialize(value.value())?;
            match record.resource_type {
                ResourceType::Cpu => cpu.insert(record.host_id, record),
                ResourceType::Memory => memory.insert(record.host_id, record),
            };
        }

        let mut all = Vec::with_capacity(cpu.len());
        for (host_id, cpu) in cpu {
            let memory = memory.remove(&host_id).ok_or_else(|| {
                CumulusError::internal(format!("host {} has no memory record", host_id))
            })?;
            all.push(HostCapacity { cpu, memory });
        }
        Ok(all)
    }

    fn reserve(
        &self,
        host_id: HostId,
        cpu: u64,
        memory: u64,
        from_last_host: bool,
    ) -> CumulusResult<bool> {
        self.write("reservation", |table| {
            let mut capacity = read_host(&*table, host_id)?.ok_or_else(|| missing_record(host_id))?;
            if !capacity.apply_reservation(cpu, memory, from_last_host) {
                return Ok(false);
            }
            write_host(table, &capacity)?;
            Ok(true)
        })
    }
}
