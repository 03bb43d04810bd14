//! Core service plumbing: configuration, shared state, background tasks,
//! server wiring

pub mod config;
pub mod server;
pub mod state;
pub mod tasks;

// Re-exports
pub use config::Config;
pub use server::{RunningServer, SyncServer};
pub use state::SyncState;
pub use tasks::{BackgroundTasks, TaskKind};
