//! redb-based adapter checkpoint
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `twin_sequences` | `vehicle_id` | `u64` | Per-vehicle sequence counters |
//! | `known_vehicles` | `vehicle_id` | `()` | First-registration detection |
//! | `dead_letter` | `entry_id` | `DeadLetterEntry` | Terminal sink for refused/unpublishable notifications |
//!
//! Sequence counters are incremented in the same write transaction that
//! records the envelope build, so a crash never reuses a sequence number.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::storage::StorageResult;

/// Table for per-vehicle sequence counters: key = vehicle_id, value = last assigned sequence
const TWIN_SEQUENCES_TABLE: TableDefinition<&str, u64> = TableDefinition::new("twin_sequences");

/// Table for first-registration detection: key = vehicle_id, value = empty
const KNOWN_VEHICLES_TABLE: TableDefinition<&str, ()> = TableDefinition::new("known_vehicles");

/// Table for dead letters: key = entry_id, value = JSON-serialized DeadLetterEntry
const DEAD_LETTER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("dead_letter");

/// Dead letter entry (notifications that could not be validated or published)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub entry_id: String,
    /// Vehicle the notification was about, when it could be extracted
    pub vehicle_id: Option<String>,
    /// Raw notification as received from the twin platform
    pub raw: serde_json::Value,
    /// Why the notification ended here
    pub reason: String,
    /// Publish attempts made before giving up (0 = refused before publish)
    pub retry_count: u32,
    pub failed_at: i64,
}

/// Adapter checkpoint backed by redb
#[derive(Clone)]
pub struct AdapterCheckpoint {
    db: Arc<Database>,
}

impl AdapterCheckpoint {
    /// Open or create the checkpoint database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let checkpoint = Self { db: Arc::new(db) };
        checkpoint.init_tables()?;
        Ok(checkpoint)
    }

    /// Open an in-memory checkpoint (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let checkpoint = Self { db: Arc::new(db) };
        checkpoint.init_tables()?;
        Ok(checkpoint)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(TWIN_SEQUENCES_TABLE)?;
            let _ = write_txn.open_table(KNOWN_VEHICLES_TABLE)?;
            let _ = write_txn.open_table(DEAD_LETTER_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    // ========== Sequence Operations ==========

    /// Increment and persist the sequence counter for a vehicle
    pub fn next_sequence(&self, vehicle_id: &str) -> StorageResult<u64> {
        let write_txn = self.db.begin_write()?;
        let next = {
            let mut table = write_txn.open_table(TWIN_SEQUENCES_TABLE)?;
            let current = table
                .get(vehicle_id)?
                .map(|guard| guard.value())
                .unwrap_or(0);
            let next = current + 1;
            table.insert(vehicle_id, next)?;
            next
        };
        write_txn.commit()?;
        Ok(next)
    }

    /// Last assigned sequence for a vehicle (0 = none yet)
    pub fn last_sequence(&self, vehicle_id: &str) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TWIN_SEQUENCES_TABLE)?;
        Ok(table
            .get(vehicle_id)?
            .map(|guard| guard.value())
            .unwrap_or(0))
    }

    // ========== Registration Detection ==========

    /// Mark a vehicle as known; returns true when it was newly marked
    pub fn mark_known(&self, vehicle_id: &str) -> StorageResult<bool> {
        let write_txn = self.db.begin_write()?;
        let newly_known = {
            let mut table = write_txn.open_table(KNOWN_VEHICLES_TABLE)?;
            let known = table.get(vehicle_id)?.is_some();
            if !known {
                table.insert(vehicle_id, ())?;
            }
            !known
        };
        write_txn.commit()?;
        Ok(newly_known)
    }

    pub fn is_known(&self, vehicle_id: &str) -> StorageResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KNOWN_VEHICLES_TABLE)?;
        Ok(table.get(vehicle_id)?.is_some())
    }

    // ========== Dead Letter Operations ==========

    /// Append an entry to the dead letter sink
    pub fn push_dead_letter(&self, entry: &DeadLetterEntry) -> StorageResult<()> {
        let bytes = serde_json::to_vec(entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DEAD_LETTER_TABLE)?;
            table.insert(entry.entry_id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All dead letter entries (manual recovery / inspection)
    pub fn dead_letters(&self) -> StorageResult<Vec<DeadLetterEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEAD_LETTER_TABLE)?;
        let mut entries = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }
}
