//! redb-based consumer store
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `offsets` | `partition` | `u64` | Next offset to fetch per partition |
//! | `applied_sequences` | `vehicle_id` | `u64` | Per-key applied high-water mark |
//! | `vehicle_snapshots` | `vehicle_id` | `VehicleTwin` | Current twin state |
//! | `ride_snapshots` | `ride_id` | `Ride` | Current ride state |
//! | `refused` | `event_id` | `RefusedEnvelope` | Consumer-side dead letters |
//!
//! One write transaction per applied envelope carries the snapshot
//! updates, the applied-sequence advance and the offset together, so an
//! offset is never committed ahead of its durable state mutation.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use shared::models::{Ride, VehicleTwin};

use crate::storage::StorageResult;

const OFFSETS_TABLE: TableDefinition<u32, u64> = TableDefinition::new("offsets");

const APPLIED_SEQUENCES_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("applied_sequences");

/// key = vehicle_id, value = JSON-serialized VehicleTwin
const VEHICLE_SNAPSHOTS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("vehicle_snapshots");

/// key = ride_id, value = JSON-serialized Ride
const RIDE_SNAPSHOTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("ride_snapshots");

/// key = event_id, value = JSON-serialized RefusedEnvelope
const REFUSED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("refused");

/// An envelope the consumer refused (schema failure) - terminal, never retried
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefusedEnvelope {
    pub event_id: String,
    pub partition_key: String,
    pub sequence: u64,
    pub reason: String,
    pub refused_at: i64,
}

/// Everything one applied envelope commits, atomically
#[derive(Debug, Default)]
pub struct CommitBatch<'a> {
    pub partition: u32,
    /// Next offset to fetch after this commit
    pub next_offset: u64,
    /// Applied-sequence advance for the envelope's key
    pub applied: Option<(&'a str, u64)>,
    pub vehicle: Option<&'a VehicleTwin>,
    pub ride: Option<&'a Ride>,
    pub refused: Option<&'a RefusedEnvelope>,
}

/// Consumer store backed by redb
#[derive(Clone)]
pub struct ConsumerStore {
    db: Arc<Database>,
}

impl ConsumerStore {
    /// Open or create the store at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(OFFSETS_TABLE)?;
            let _ = write_txn.open_table(APPLIED_SEQUENCES_TABLE)?;
            let _ = write_txn.open_table(VEHICLE_SNAPSHOTS_TABLE)?;
            let _ = write_txn.open_table(RIDE_SNAPSHOTS_TABLE)?;
            let _ = write_txn.open_table(REFUSED_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========== Commit ==========

    /// Persist one unit of progress in a single transaction
    pub fn commit(&self, batch: CommitBatch<'_>) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut offsets = write_txn.open_table(OFFSETS_TABLE)?;
            offsets.insert(batch.partition, batch.next_offset)?;

            if let Some((key, sequence)) = batch.applied {
                let mut applied = write_txn.open_table(APPLIED_SEQUENCES_TABLE)?;
                applied.insert(key, sequence)?;
            }

            if let Some(twin) = batch.vehicle {
                let bytes = serde_json::to_vec(twin)?;
                let mut vehicles = write_txn.open_table(VEHICLE_SNAPSHOTS_TABLE)?;
                vehicles.insert(twin.vehicle_id.as_str(), bytes.as_slice())?;
            }

            if let Some(ride) = batch.ride {
                let bytes = serde_json::to_vec(ride)?;
                let mut rides = write_txn.open_table(RIDE_SNAPSHOTS_TABLE)?;
                rides.insert(ride.ride_id.as_str(), bytes.as_slice())?;
            }

            if let Some(refused) = batch.refused {
                let bytes = serde_json::to_vec(refused)?;
                let mut table = write_txn.open_table(REFUSED_TABLE)?;
                table.insert(refused.event_id.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========== Recovery Reads ==========

    /// Next offset to fetch for a partition (0 = never committed)
    pub fn next_offset(&self, partition: u32) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(OFFSETS_TABLE)?;
        Ok(table
            .get(partition)?
            .map(|guard| guard.value())
            .unwrap_or(0))
    }

    /// Applied high-water mark for a key (0 = nothing applied)
    pub fn applied_sequence(&self, key: &str) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(APPLIED_SEQUENCES_TABLE)?;
        Ok(table.get(key)?.map(|guard| guard.value()).unwrap_or(0))
    }

    pub fn applied_sequences(&self) -> StorageResult<Vec<(String, u64)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(APPLIED_SEQUENCES_TABLE)?;
        let mut entries = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            entries.push((key.value().to_string(), value.value()));
        }
        Ok(entries)
    }

    pub fn vehicle(&self, vehicle_id: &str) -> StorageResult<Option<VehicleTwin>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VEHICLE_SNAPSHOTS_TABLE)?;
        match table.get(vehicle_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn ride(&self, ride_id: &str) -> StorageResult<Option<Ride>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RIDE_SNAPSHOTS_TABLE)?;
        match table.get(ride_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn all_vehicles(&self) -> StorageResult<Vec<VehicleTwin>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VEHICLE_SNAPSHOTS_TABLE)?;
        let mut vehicles = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            vehicles.push(serde_json::from_slice(value.value())?);
        }
        Ok(vehicles)
    }

    pub fn all_rides(&self) -> StorageResult<Vec<Ride>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RIDE_SNAPSHOTS_TABLE)?;
        let mut rides = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            rides.push(serde_json::from_slice(value.value())?);
        }
        Ok(rides)
    }

    /// Refused envelopes (inspection / manual recovery)
    pub fn refused(&self) -> StorageResult<Vec<RefusedEnvelope>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REFUSED_TABLE)?;
        let mut entries = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::VehicleType;

    #[test]
    fn test_offset_and_sequence_defaults() {
        let store = ConsumerStore::open_in_memory().unwrap();
        assert_eq!(store.next_offset(0).unwrap(), 0);
        assert_eq!(store.applied_sequence("v1").unwrap(), 0);
    }

    #[test]
    fn test_commit_is_atomic_across_tables() {
        let store = ConsumerStore::open_in_memory().unwrap();

        let mut twin = VehicleTwin::register("v1", VehicleType::Electric, 1_000);
        twin.last_sequence = 3;
        let ride = Ride::request("r1", "u1", "v1", 1_000, 90_000);

        store
            .commit(CommitBatch {
                partition: 2,
                next_offset: 8,
                applied: Some(("v1", 3)),
                vehicle: Some(&twin),
                ride: Some(&ride),
                refused: None,
            })
            .unwrap();

        assert_eq!(store.next_offset(2).unwrap(), 8);
        assert_eq!(store.applied_sequence("v1").unwrap(), 3);
        assert_eq!(store.vehicle("v1").unwrap().unwrap().last_sequence, 3);
        assert_eq!(store.ride("r1").unwrap().unwrap().ride_id, "r1");
    }

    #[test]
    fn test_offset_only_commit() {
        let store = ConsumerStore::open_in_memory().unwrap();
        store
            .commit(CommitBatch {
                partition: 0,
                next_offset: 5,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(store.next_offset(0).unwrap(), 5);
        assert!(store.all_vehicles().unwrap().is_empty());
    }

    #[test]
    fn test_refused_envelope_recorded() {
        let store = ConsumerStore::open_in_memory().unwrap();
        let refused = RefusedEnvelope {
            event_id: "e1".into(),
            partition_key: "v1".into(),
            sequence: 4,
            reason: "incompatible schema".into(),
            refused_at: 1_000,
        };
        store
            .commit(CommitBatch {
                partition: 0,
                next_offset: 1,
                refused: Some(&refused),
                ..Default::default()
            })
            .unwrap();

        let entries = store.refused().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 4);
    }
}
