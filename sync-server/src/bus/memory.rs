//! In-memory partitioned bus
//!
//! Backs tests and single-process deployments. Each partition is an
//! append-only log guarded by a lock, with a [`Notify`] to wake waiting
//! consumers. Envelopes cross the bus in their wire form, so the encode
//! and decode paths are exercised even in-process.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use shared::envelope::EventEnvelope;
use shared::error::{SyncError, SyncResult};
use tokio::sync::Notify;

use super::{BusRecord, EventBus};

/// One partition: ordered log of encoded envelopes
struct PartitionLog {
    records: RwLock<Vec<Vec<u8>>>,
    notify: Notify,
}

/// In-memory partitioned bus (进程内分区日志)
pub struct MemoryBus {
    topic: String,
    logs: Vec<PartitionLog>,
}

impl MemoryBus {
    pub fn new(topic: impl Into<String>, partitions: u32) -> Self {
        let logs = (0..partitions.max(1))
            .map(|_| PartitionLog {
                records: RwLock::new(Vec::new()),
                notify: Notify::new(),
            })
            .collect();
        Self {
            topic: topic.into(),
            logs,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Current end offset of a partition (next offset to be written)
    pub fn end_offset(&self, partition: u32) -> u64 {
        self.logs[partition as usize].records.read().len() as u64
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    fn partitions(&self) -> u32 {
        self.logs.len() as u32
    }

    fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.logs.len() as u64) as u32
    }

    async fn publish(&self, envelope: EventEnvelope) -> SyncResult<u32> {
        if envelope.topic != self.topic {
            return Err(SyncError::transient(format!(
                "unknown topic {} (bus serves {})",
                envelope.topic, self.topic
            )));
        }
        let partition = self.partition_for(&envelope.partition_key);
        let bytes = envelope.to_bytes()?;

        let log = &self.logs[partition as usize];
        log.records.write().push(bytes);
        log.notify.notify_waiters();
        Ok(partition)
    }

    async fn fetch(
        &self,
        partition: u32,
        from_offset: u64,
        max: usize,
    ) -> SyncResult<Vec<BusRecord>> {
        let log = self
            .logs
            .get(partition as usize)
            .ok_or_else(|| SyncError::transient(format!("unknown partition {}", partition)))?;

        let records = log.records.read();
        let start = from_offset as usize;
        if start >= records.len() {
            return Ok(Vec::new());
        }

        records[start..]
            .iter()
            .take(max)
            .enumerate()
            .map(|(i, bytes)| {
                Ok(BusRecord {
                    offset: from_offset + i as u64,
                    envelope: EventEnvelope::from_bytes(bytes)?,
                })
            })
            .collect()
    }

    async fn wait_for_records(&self, partition: u32, from_offset: u64, timeout: Duration) {
        let Some(log) = self.logs.get(partition as usize) else {
            tokio::time::sleep(timeout).await;
            return;
        };

        // Register for notification before re-checking, so a publish
        // between the check and the await is not lost.
        let notified = log.notify.notified();
        if (log.records.read().len() as u64) > from_offset {
            return;
        }
        let _ = tokio::time::timeout(timeout, notified).await;
    }
}
