//! 服务状态 - 持有所有组件的单例引用
//!
//! SyncState 是同步核心的中枢数据结构，持有总线、模式注册表、
//! 校验器、投影与两个持久化存储的共享引用。使用 Arc 实现浅拷贝。
//!
//! # 组件
//!
//! | 字段 | 类型 | 说明 |
//! |------|------|------|
//! | config | Config | 配置项（不可变） |
//! | bus | Arc\<dyn EventBus\> | 分区事件总线 |
//! | registry | Arc\<dyn SchemaRegistry\> | 模式注册表（带缓存） |
//! | validator | Arc\<SchemaValidator\> | 消费端模式校验器 |
//! | projection | Arc\<FleetProjection\> | 下游只读投影 |
//! | checkpoint | AdapterCheckpoint | 适配器检查点（redb） |
//! | store | ConsumerStore | 消费端存储（redb） |

use std::path::Path;
use std::sync::Arc;

use shared::error::{SyncError, SyncResult};

use crate::bus::{EventBus, MemoryBus};
use crate::consumer::ConsumerStore;
use crate::core::Config;
use crate::fleet::FleetProjection;
use crate::schema::{CachedRegistry, InMemoryRegistry, SchemaRegistry, SchemaValidator};
use crate::twin::AdapterCheckpoint;

/// Shared handles over every component of the synchronization core
#[derive(Clone)]
pub struct SyncState {
    pub config: Config,
    pub bus: Arc<dyn EventBus>,
    pub registry: Arc<dyn SchemaRegistry>,
    pub validator: Arc<SchemaValidator>,
    pub projection: Arc<FleetProjection>,
    pub checkpoint: AdapterCheckpoint,
    pub store: ConsumerStore,
}

impl SyncState {
    /// Build the full component graph from a config
    ///
    /// Opens the redb stores under `work_dir` and registers the built-in
    /// schemas behind a cached registry client.
    pub fn initialize(config: &Config) -> SyncResult<Self> {
        let work_dir = Path::new(&config.work_dir);
        std::fs::create_dir_all(work_dir)
            .map_err(|e| SyncError::storage(format!("create {}: {}", config.work_dir, e)))?;

        let bus: Arc<dyn EventBus> =
            Arc::new(MemoryBus::new(config.topic.clone(), config.bus_partitions));
        let registry: Arc<dyn SchemaRegistry> =
            Arc::new(CachedRegistry::new(InMemoryRegistry::with_builtin()));
        let validator = Arc::new(SchemaValidator::new(
            registry.clone(),
            config.pinned_schema_major,
        ));

        let checkpoint = AdapterCheckpoint::open(work_dir.join("adapter.redb"))?;
        let store = ConsumerStore::open(work_dir.join("consumer.redb"))?;

        tracing::info!(
            work_dir = %config.work_dir,
            topic = %config.topic,
            partitions = config.bus_partitions,
            "Sync state initialized"
        );

        Ok(Self {
            config: config.clone(),
            bus,
            registry,
            validator,
            projection: Arc::new(FleetProjection::new()),
            checkpoint,
            store,
        })
    }
}
