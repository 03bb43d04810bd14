//! 服务配置 - 同步核心的所有配置项
//!
//! # 环境变量
//!
//! 所有配置项都可以通过环境变量覆盖：
//!
//! | 环境变量 | 默认值 | 说明 |
//! |----------|--------|------|
//! | WORK_DIR | /var/lib/fleet/sync | 工作目录（检查点、位点存储） |
//! | FLEET_TOPIC | fleet-events | 总线主题 |
//! | BUS_PARTITIONS | 4 | 分区数量 |
//! | BATTERY_MAINTENANCE_THRESHOLD | 15 | 电量维护阈值（百分比） |
//! | RESERVATION_WINDOW_MS | 90000 | 预约窗口（毫秒） |
//! | PUBLISH_MAX_RETRIES | 3 | 发布重试上限 |
//! | PUBLISH_RETRY_BASE_MS | 500 | 重试退避基数（毫秒） |
//! | PUBLISH_RETRY_MAX_MS | 10000 | 重试退避上限（毫秒） |
//! | FETCH_BATCH_SIZE | 64 | 单次拉取条数 |
//! | FETCH_WAIT_TIMEOUT_MS | 500 | 拉取等待超时（毫秒） |
//! | EXPIRY_SCAN_INTERVAL_MS | 5000 | 预约过期扫描间隔（毫秒） |
//! | SHUTDOWN_TIMEOUT_MS | 10000 | 关闭超时（毫秒） |
//! | SCHEMA_MAJOR | 1 | 消费端锁定的模式主版本 |
//! | ENVIRONMENT | development | 运行环境 |
//!
//! # 示例
//!
//! ```ignore
//! WORK_DIR=/data/fleet BUS_PARTITIONS=8 cargo run
//! ```

use std::time::Duration;

use crate::consumer::WorkerConfig;
use crate::twin::RetryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录，存储检查点与位点数据库
    pub work_dir: String,
    /// 总线主题
    pub topic: String,
    /// 分区数量（顺序与并行的单位）
    pub bus_partitions: u32,
    /// 电量维护阈值（百分比，低于等于则进入维护）
    pub battery_maintenance_threshold: u8,
    /// 预约窗口（毫秒），超时未开始则取消
    pub reservation_window_ms: i64,
    /// 发布重试上限
    pub publish_max_retries: u32,
    /// 重试退避基数（毫秒）
    pub publish_retry_base_ms: u64,
    /// 重试退避上限（毫秒）
    pub publish_retry_max_ms: u64,
    /// 单次拉取条数
    pub fetch_batch_size: usize,
    /// 拉取等待超时（毫秒）
    pub fetch_wait_timeout_ms: u64,
    /// 预约过期扫描间隔（毫秒）
    pub expiry_scan_interval_ms: u64,
    /// 关闭超时（毫秒）
    pub shutdown_timeout_ms: u64,
    /// 消费端锁定的模式主版本
    pub pinned_schema_major: u16,
    /// 运行环境: development | staging | production
    pub environment: String,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/fleet/sync".into()),
            topic: std::env::var("FLEET_TOPIC").unwrap_or_else(|_| "fleet-events".into()),
            bus_partitions: env_parse("BUS_PARTITIONS", 4),
            battery_maintenance_threshold: env_parse("BATTERY_MAINTENANCE_THRESHOLD", 15),
            reservation_window_ms: env_parse("RESERVATION_WINDOW_MS", 90_000),
            publish_max_retries: env_parse("PUBLISH_MAX_RETRIES", 3),
            publish_retry_base_ms: env_parse("PUBLISH_RETRY_BASE_MS", 500),
            publish_retry_max_ms: env_parse("PUBLISH_RETRY_MAX_MS", 10_000),
            fetch_batch_size: env_parse("FETCH_BATCH_SIZE", 64),
            fetch_wait_timeout_ms: env_parse("FETCH_WAIT_TIMEOUT_MS", 500),
            expiry_scan_interval_ms: env_parse("EXPIRY_SCAN_INTERVAL_MS", 5_000),
            shutdown_timeout_ms: env_parse("SHUTDOWN_TIMEOUT_MS", 10_000),
            pinned_schema_major: env_parse("SCHEMA_MAJOR", 1),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        }
    }

    /// 使用自定义工作目录覆盖配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, bus_partitions: u32) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.bus_partitions = bus_partitions;
        config
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 是否开发环境
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Publish retry policy derived from this config
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.publish_max_retries,
            base_delay_ms: self.publish_retry_base_ms,
            max_delay_ms: self.publish_retry_max_ms,
        }
    }

    /// Worker tuning derived from this config
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            fetch_batch_size: self.fetch_batch_size,
            wait_timeout: Duration::from_millis(self.fetch_wait_timeout_ms),
            expiry_scan_interval: Duration::from_millis(self.expiry_scan_interval_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
