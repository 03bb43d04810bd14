//! 后台任务管理
//!
//! 统一管理所有后台任务的注册、启动和关闭。
//!
//! # 任务类型
//!
//! - [`TaskKind::Worker`] - 长期后台工作者
//! - [`TaskKind::Listener`] - 事件监听器
//! - [`TaskKind::Periodic`] - 定时任务

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// 长期后台工作者
    Worker,
    /// 事件监听器
    Listener,
    /// 定时任务
    Periodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Worker => write!(f, "Worker"),
            TaskKind::Listener => write!(f, "Listener"),
            TaskKind::Periodic => write!(f, "Periodic"),
        }
    }
}

/// 已注册的后台任务
struct RegisteredTask {
    name: &'static str,
    kind: TaskKind,
    handle: JoinHandle<()>,
}

/// 后台任务管理器
///
/// # 使用示例
///
/// ```ignore
/// let mut tasks = BackgroundTasks::new();
/// tasks.spawn("twin_adapter", TaskKind::Listener, async move {
///     // 任务逻辑
/// });
/// tasks.shutdown(Duration::from_secs(10)).await;
/// ```
pub struct BackgroundTasks {
    tasks: Vec<RegisteredTask>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// 与外部共享同一个取消令牌
    pub fn with_token(shutdown: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            shutdown,
        }
    }

    /// 获取取消令牌（用于任务内部监听 shutdown 信号）
    pub fn token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// 注册并启动一个后台任务
    ///
    /// 任务内的 panic 被捕获并记录，不会拖垮整个进程。
    pub fn spawn<F>(&mut self, name: &'static str, kind: TaskKind, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, kind = %kind, "Background task started");
        let wrapped = AssertUnwindSafe(future).catch_unwind().map(move |result| {
            if result.is_err() {
                tracing::error!(task = name, "Background task panicked");
            }
        });
        self.tasks.push(RegisteredTask {
            name,
            kind,
            handle: tokio::spawn(wrapped),
        });
    }

    /// 优雅关闭所有任务
    ///
    /// 先取消令牌，再逐个等待任务退出；超时的任务被强制终止
    /// （强制终止最多丢弃上次提交以来的工作，符合至少一次语义）。
    pub async fn shutdown(self, timeout: Duration) {
        self.shutdown.cancel();
        for task in self.tasks {
            let mut handle = task.handle;
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => {
                    tracing::debug!(task = task.name, kind = %task.kind, "Background task stopped");
                }
                Ok(Err(err)) => {
                    tracing::error!(task = task.name, error = %err, "Background task panicked");
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        task = task.name,
                        kind = %task.kind,
                        timeout_ms = timeout.as_millis() as u64,
                        "Background task did not stop in time, aborting"
                    );
                }
            }
        }
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}
