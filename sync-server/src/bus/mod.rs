//! 分区事件总线抽象
//!
//! # 架构
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      EventBus Trait                      │  ◄── 可插拔实现
//! └────────────────────────┬────────────────────────────────┘
//!                          │
//!              ┌───────────┴───────────┐
//!              ▼                       ▼
//!         MemoryBus             (外部 broker 适配器)
//!       (进程内分区日志)
//! ```
//!
//! # 顺序保证
//!
//! ```text
//! publish(envelope) ──▶ partition_for(partition_key) ──▶ 分区日志追加
//!                                                            │
//! Consumer ──▶ fetch(partition, offset) ◄────── 按位点顺序读取┘
//! ```
//!
//! 同一 partition_key 的消息总是落在同一分区，分区内按追加顺序投递；
//! 总线本身是外部基础设施，这里只消费其契约，不重新实现 broker。

mod memory;

pub use memory::MemoryBus;

use async_trait::async_trait;
use shared::envelope::EventEnvelope;
use shared::error::SyncResult;
use std::time::Duration;

/// A record as delivered from a partition: bus offset + envelope
#[derive(Debug, Clone)]
pub struct BusRecord {
    /// Position within the partition (commit unit for consumers)
    pub offset: u64,
    /// The envelope, decoded from the wire form
    pub envelope: EventEnvelope,
}

/// Partitioned, ordered event bus
///
/// Ordering contract: records with the same partition key land in the
/// same partition and are fetched in append order. Offsets are dense
/// per partition and start at 0.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Number of partitions backing the topic
    fn partitions(&self) -> u32;

    /// Partition a key is routed to (stable for the bus lifetime)
    fn partition_for(&self, key: &str) -> u32;

    /// Append an envelope to its key's partition
    ///
    /// Returns the partition written to. Failures are transient
    /// ([`shared::SyncError::TransientIo`]) and retried by the producer.
    async fn publish(&self, envelope: EventEnvelope) -> SyncResult<u32>;

    /// Read up to `max` records from `partition` starting at `from_offset`
    ///
    /// Returns immediately with whatever is available (possibly empty).
    async fn fetch(&self, partition: u32, from_offset: u64, max: usize)
    -> SyncResult<Vec<BusRecord>>;

    /// Wait until new records may be available past `from_offset`, or the
    /// timeout elapses. Used by consumers to avoid busy polling.
    async fn wait_for_records(&self, partition: u32, from_offset: u64, timeout: Duration);
}
