//! Fleet Sync Server - 共享车辆数字孪生同步核心
//!
//! # 架构概述
//!
//! 本模块把孪生平台的变更通知转换为有序、经过模式校验的总线事件，
//! 并用按实体的状态机消费这些事件，保持车辆可用性与骑行进度在
//! 各服务间一致：
//!
//! - **孪生适配器** (`twin`): 通知规范化、按车辆排序、重试与死信
//! - **模式** (`schema`): 注册表、缓存解析、按版本校验
//! - **总线** (`bus`): 分区事件总线抽象与进程内实现
//! - **状态机** (`fleet`): 车辆与骑行的全函数迁移表
//! - **消费端** (`consumer`): 分区工作者、去重、位点提交
//!
//! # 模块结构
//!
//! ```text
//! sync-server/src/
//! ├── core/          # 配置、状态、后台任务、服务装配
//! ├── bus/           # 分区事件总线
//! ├── schema/        # 模式注册与校验
//! ├── twin/          # 数字孪生适配器
//! ├── fleet/         # 车辆/骑行状态机与投影
//! ├── consumer/      # 消费运行时与位点存储
//! └── utils/         # 日志等工具
//! ```

pub mod bus;
pub mod consumer;
pub mod core;
pub mod fleet;
pub mod schema;
pub mod storage;
pub mod twin;
pub mod utils;

// Re-export 公共类型
pub use bus::{EventBus, MemoryBus};
pub use consumer::{ConsumerRuntime, ConsumerStore};
pub use core::{Config, RunningServer, SyncServer, SyncState};
pub use fleet::FleetProjection;
pub use schema::{SchemaRegistry, SchemaValidator};
pub use twin::TwinAdapter;

// Re-export unified error types from shared
pub use shared::{SyncError, SyncResult};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};

/// 设置运行环境 (dotenv, 日志)
pub fn setup_environment() {
    let _ = dotenv::dotenv();
    let log_level = std::env::var("LOG_LEVEL").ok();
    let log_dir = std::env::var("LOG_DIR").ok();
    init_logger_with_file(log_level.as_deref(), log_dir.as_deref());
}

/// 打印启动横幅
pub fn print_banner() {
    println!(
        r#"
  ___ _           _     ___
 | __| |___ ___ _| |_  / __|_  _ _ _  __
 | _|| / -_) -_)_   _| \__ \ || | ' \/ _|
 |_| |_\___\___| |_|   |___/\_, |_||_\__|
                            |__/
"#
    );
}
