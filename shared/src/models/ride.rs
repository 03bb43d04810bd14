//! Ride model

use serde::{Deserialize, Serialize};

/// Ride lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideState {
    #[default]
    Requested,
    VehicleReserved,
    InProgress,
    Completed,
    Cancelled,
}

impl RideState {
    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideState::Completed | RideState::Cancelled)
    }
}

impl std::fmt::Display for RideState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RideState::Requested => write!(f, "REQUESTED"),
            RideState::VehicleReserved => write!(f, "VEHICLE_RESERVED"),
            RideState::InProgress => write!(f, "IN_PROGRESS"),
            RideState::Completed => write!(f, "COMPLETED"),
            RideState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A rider's trip on exactly one vehicle, set at reservation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ride {
    /// Ride ID (assigned by the ride service)
    pub ride_id: String,
    /// Rider who requested the vehicle
    pub rider_id: String,
    /// Vehicle bound to this ride
    pub vehicle_id: String,
    /// Lifecycle state
    pub state: RideState,
    /// Request timestamp (Unix milliseconds)
    pub requested_at: i64,
    /// Start timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    /// End timestamp (completion or cancellation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    /// A start event must arrive before this instant or the ride is cancelled
    pub reservation_deadline: i64,
    /// Why the ride was cancelled, if it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Last applied event sequence
    pub last_sequence: u64,
    /// Last update timestamp
    pub updated_at: i64,
}

impl Ride {
    /// Create a ride in REQUESTED with its reservation deadline
    pub fn request(
        ride_id: impl Into<String>,
        rider_id: impl Into<String>,
        vehicle_id: impl Into<String>,
        requested_at: i64,
        reservation_window_ms: i64,
    ) -> Self {
        Self {
            ride_id: ride_id.into(),
            rider_id: rider_id.into(),
            vehicle_id: vehicle_id.into(),
            state: RideState::Requested,
            requested_at,
            started_at: None,
            ended_at: None,
            reservation_deadline: requested_at + reservation_window_ms,
            cancel_reason: None,
            last_sequence: 0,
            updated_at: requested_at,
        }
    }

    /// Whether the reservation window has elapsed without a start
    pub fn reservation_overdue(&self, now: i64) -> bool {
        matches!(
            self.state,
            RideState::Requested | RideState::VehicleReserved
        ) && now >= self.reservation_deadline
    }
}
