//! Data models
//!
//! Domain records shared between the synchronization core and the
//! read-only projection consumers. Entity state is owned by the state
//! machines; nothing outside the consumer runtime mutates these.

pub mod ride;
pub mod vehicle;

// Re-exports
pub use ride::*;
pub use vehicle::*;
