//! Per-entity state machines and the downstream projection
//!
//! - **vehicle**: availability/condition transitions (total function)
//! - **ride**: ride lifecycle, gated by vehicle transitions
//! - **projection**: read-only view for the excluded HTTP/persistence layer

pub mod projection;
pub mod ride;
pub mod vehicle;

// Re-exports
pub use projection::FleetProjection;
pub use ride::{RideMachine, CANCEL_RESERVATION_EXPIRED, CANCEL_VEHICLE_UNAVAILABLE};
pub use vehicle::VehicleMachine;
