//! redb error plumbing shared by the adapter checkpoint and consumer store
//!
//! # Durability
//!
//! redb commits with `Durability::Immediate`: a commit is persistent as
//! soon as `commit()` returns, and the database file is always in a
//! consistent state (copy-on-write with atomic pointer swap). Offset
//! commits and sequence checkpoints rely on this.

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for shared::SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Commit(e) => shared::SyncError::OffsetCommit(e.to_string()),
            other => shared::SyncError::storage(other.to_string()),
        }
    }
}
