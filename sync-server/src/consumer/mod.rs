//! Consumer runtime module
//!
//! Subscribes to the assigned partitions, reads envelopes in delivered
//! order, suppresses duplicates by per-key sequence, applies state
//! machine transitions, and commits offsets only after the mutation is
//! durable:
//!
//! - **store**: redb persistence (offsets, applied sequences, snapshots)
//! - **worker**: per-partition apply loop + reservation expiry sweep
//! - **runtime**: assignment, worker lifecycle, graceful shutdown

pub mod runtime;
pub mod store;
pub mod worker;

// Re-exports
pub use runtime::{ConsumerHandle, ConsumerRuntime};
pub use store::{CommitBatch, ConsumerStore, RefusedEnvelope};
pub use worker::{PartitionWorker, WorkerConfig};
