//! 统一错误处理
//!
//! 同步核心的错误分类：
//! - [`SyncError`] - 管道各层共用的错误枚举
//!
//! # 错误分类
//!
//! | 分类 | 处理策略 |
//! |------|----------|
//! | 瞬时 I/O | 有界指数退避重试，超限后进入死信 |
//! | 模式校验 | 立即死信，不重试 |
//! | 非法状态迁移 | 以冲突形式返回调用方，不重试 |
//! | 重复事件 | 静默丢弃，不算错误 |
//! | 位点提交失败 | 重启后从上一个已提交位点重放 |

/// Pipeline-wide error taxonomy
///
/// Entity-level errors (state transitions, duplicates) are local and
/// never fatal to a consumer process; only sustained infrastructure
/// failure beyond the retry budget escalates.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    // ========== 瞬时基础设施错误 ==========
    /// Bus or registry temporarily unreachable
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    // ========== 模式错误 ==========
    /// Payload shape or field types do not match the declared schema
    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    /// Writer schema major version differs from the reader's pinned major
    #[error("Incompatible schema {subject}: written with v{writer}, reader pinned to major {reader_major}")]
    IncompatibleSchema {
        subject: String,
        writer: String,
        reader_major: u16,
    },

    /// Schema unknown to the registry
    #[error("Schema not found: {subject} v{version}")]
    SchemaNotFound { subject: String, version: String },

    // ========== 实体级错误 ==========
    /// Event is not applicable to the entity's current state
    #[error("Invalid state transition for {entity} {id}: {event} not allowed in state {state}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        state: String,
        event: String,
    },

    /// Sequence number at or below the applied high-water mark
    #[error("Duplicate event for {key}: sequence {sequence} already applied")]
    DuplicateEvent { key: String, sequence: u64 },

    // ========== 存储/提交错误 ==========
    /// Offset commit store unreachable
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Checkpoint / snapshot store failure
    #[error("Storage error: {0}")]
    Storage(String),

    // ========== 终态 ==========
    /// Notification or envelope routed to the dead-letter sink
    #[error("Dead-lettered: {0}")]
    DeadLettered(String),

    /// Malformed wire frame (unknown format version, truncated body)
    #[error("Wire format error: {0}")]
    Wire(String),
}

impl SyncError {
    /// 是否可重试（仅瞬时基础设施错误）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::TransientIo(_) | SyncError::OffsetCommit(_)
        )
    }

    /// 是否实体级冲突（返回调用方，不重试）
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::InvalidStateTransition { .. })
    }

    /// Create a transient I/O error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientIo(msg.into())
    }

    /// Create a schema validation error
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::SchemaValidation(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SyncError::transient("bus down").is_transient());
        assert!(SyncError::OffsetCommit("store gone".into()).is_transient());
        assert!(!SyncError::schema("bad field").is_transient());
        assert!(
            !SyncError::DuplicateEvent {
                key: "v1".into(),
                sequence: 3
            }
            .is_transient()
        );
    }

    #[test]
    fn test_conflict_classification() {
        let err = SyncError::InvalidStateTransition {
            entity: "vehicle",
            id: "v1".into(),
            state: "RESERVED".into(),
            event: "RIDE_REQUESTED".into(),
        };
        assert!(err.is_conflict());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_messages_name_the_entity() {
        let err = SyncError::InvalidStateTransition {
            entity: "ride",
            id: "r-9".into(),
            state: "COMPLETED".into(),
            event: "RIDE_STARTED".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ride r-9"));
        assert!(msg.contains("COMPLETED"));
    }
}
