//! Shared types for the fleet synchronization platform
//!
//! Canonical data model consumed by every service crate: the event
//! envelope placed on the bus, vehicle/ride domain records, the error
//! taxonomy, and small utilities.

pub mod envelope;
pub mod error;
pub mod models;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Envelope re-exports (for convenient access)
pub use envelope::{EventEnvelope, EventPayload, FleetEventType, SchemaVersion};

// Error re-exports
pub use error::{SyncError, SyncResult};
