//! Ride state machine
//!
//! Per-ride lifecycle, gated by vehicle state transitions. Reservation is
//! one logical step with the vehicle compare-and-set: the consumer only
//! records VEHICLE_RESERVED when the vehicle transition succeeded.
//!
//! ```text
//! REQUESTED ──▶ VEHICLE_RESERVED ──▶ IN_PROGRESS ──▶ COMPLETED
//!     │                │
//!     └────────────────┴──────▶ CANCELLED   (window expiry / conflict)
//! ```
//!
//! COMPLETED and CANCELLED are terminal; later events for a terminal
//! ride are logged and dropped by the consumer, not treated as errors.

use shared::error::{SyncError, SyncResult};
use shared::models::{Ride, RideState};

/// Cancellation reason recorded when the vehicle CAS is lost
pub const CANCEL_VEHICLE_UNAVAILABLE: &str = "vehicle-unavailable";

/// Cancellation reason recorded when the reservation window elapses
pub const CANCEL_RESERVATION_EXPIRED: &str = "reservation-expired";

/// Ride transition logic, parameterized by the reservation window
#[derive(Debug, Clone)]
pub struct RideMachine {
    reservation_window_ms: i64,
}

impl RideMachine {
    pub fn new(reservation_window_ms: i64) -> Self {
        Self {
            reservation_window_ms,
        }
    }

    pub fn reservation_window_ms(&self) -> i64 {
        self.reservation_window_ms
    }

    fn invalid(ride: &Ride, event: &str) -> SyncError {
        SyncError::InvalidStateTransition {
            entity: "ride",
            id: ride.ride_id.clone(),
            state: ride.state.to_string(),
            event: event.to_string(),
        }
    }

    fn touch(ride: &mut Ride, sequence: u64, now: i64) {
        ride.last_sequence = sequence;
        ride.updated_at = now;
    }

    /// Create a ride in REQUESTED with its reservation deadline
    pub fn request(
        &self,
        ride_id: &str,
        rider_id: &str,
        vehicle_id: &str,
        sequence: u64,
        now: i64,
    ) -> Ride {
        let mut ride = Ride::request(ride_id, rider_id, vehicle_id, now, self.reservation_window_ms);
        ride.last_sequence = sequence;
        ride
    }

    /// REQUESTED → VEHICLE_RESERVED, after the vehicle CAS succeeded
    pub fn mark_reserved(&self, ride: &mut Ride, sequence: u64, now: i64) -> SyncResult<RideState> {
        if ride.state != RideState::Requested {
            return Err(Self::invalid(ride, "VEHICLE_RESERVED"));
        }
        ride.state = RideState::VehicleReserved;
        Self::touch(ride, sequence, now);
        Ok(ride.state)
    }

    /// VEHICLE_RESERVED → IN_PROGRESS on the ride-start event
    pub fn start(&self, ride: &mut Ride, sequence: u64, now: i64) -> SyncResult<RideState> {
        if ride.state != RideState::VehicleReserved {
            return Err(Self::invalid(ride, "RIDE_STARTED"));
        }
        ride.state = RideState::InProgress;
        ride.started_at = Some(now);
        Self::touch(ride, sequence, now);
        Ok(ride.state)
    }

    /// IN_PROGRESS → COMPLETED on the ride-end event
    pub fn complete(&self, ride: &mut Ride, sequence: u64, now: i64) -> SyncResult<RideState> {
        if ride.state != RideState::InProgress {
            return Err(Self::invalid(ride, "RIDE_ENDED"));
        }
        ride.state = RideState::Completed;
        ride.ended_at = Some(now);
        Self::touch(ride, sequence, now);
        Ok(ride.state)
    }

    /// REQUESTED or VEHICLE_RESERVED → CANCELLED
    pub fn cancel(
        &self,
        ride: &mut Ride,
        reason: &str,
        sequence: u64,
        now: i64,
    ) -> SyncResult<RideState> {
        if !matches!(
            ride.state,
            RideState::Requested | RideState::VehicleReserved
        ) {
            return Err(Self::invalid(ride, "RIDE_CANCELLED"));
        }
        ride.state = RideState::Cancelled;
        ride.cancel_reason = Some(reason.to_string());
        ride.ended_at = Some(now);
        Self::touch(ride, sequence, now);
        Ok(ride.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> RideMachine {
        RideMachine::new(90_000)
    }

    fn ride_in(state: RideState) -> Ride {
        let mut ride = machine().request("r1", "u1", "v1", 1, 1_000);
        ride.state = state;
        ride
    }

    #[test]
    fn test_happy_path() {
        let m = machine();
        let mut ride = m.request("r1", "u1", "v1", 1, 1_000);
        assert_eq!(ride.state, RideState::Requested);
        assert_eq!(ride.reservation_deadline, 91_000);

        assert_eq!(m.mark_reserved(&mut ride, 2, 1_001).unwrap(), RideState::VehicleReserved);
        assert_eq!(m.start(&mut ride, 3, 2_000).unwrap(), RideState::InProgress);
        assert_eq!(ride.started_at, Some(2_000));
        assert_eq!(m.complete(&mut ride, 4, 9_000).unwrap(), RideState::Completed);
        assert_eq!(ride.ended_at, Some(9_000));
        assert_eq!(ride.last_sequence, 4);
    }

    #[test]
    fn test_cancel_records_reason() {
        let m = machine();
        let mut ride = ride_in(RideState::VehicleReserved);
        m.cancel(&mut ride, CANCEL_RESERVATION_EXPIRED, 5, 95_000).unwrap();
        assert_eq!(ride.state, RideState::Cancelled);
        assert_eq!(ride.cancel_reason.as_deref(), Some(CANCEL_RESERVATION_EXPIRED));
        assert_eq!(ride.ended_at, Some(95_000));
    }

    #[test]
    fn test_transition_table_is_total() {
        // Exhaustive enumeration: every (state, operation) pair outside the
        // table is rejected and leaves the ride untouched.
        let m = machine();
        let all = [
            RideState::Requested,
            RideState::VehicleReserved,
            RideState::InProgress,
            RideState::Completed,
            RideState::Cancelled,
        ];

        for state in all {
            let mut ride = ride_in(state);
            assert_eq!(
                m.mark_reserved(&mut ride, 9, 0).is_ok(),
                state == RideState::Requested,
                "mark_reserved from {:?}",
                state
            );

            let mut ride = ride_in(state);
            assert_eq!(
                m.start(&mut ride, 9, 0).is_ok(),
                state == RideState::VehicleReserved,
                "start from {:?}",
                state
            );

            let mut ride = ride_in(state);
            assert_eq!(
                m.complete(&mut ride, 9, 0).is_ok(),
                state == RideState::InProgress,
                "complete from {:?}",
                state
            );

            let mut ride = ride_in(state);
            let cancellable =
                matches!(state, RideState::Requested | RideState::VehicleReserved);
            assert_eq!(
                m.cancel(&mut ride, "test", 9, 0).is_ok(),
                cancellable,
                "cancel from {:?}",
                state
            );
            if !cancellable {
                assert_eq!(ride.state, state);
            }
        }
    }

    #[test]
    fn test_rejection_is_conflict_error() {
        let m = machine();
        let mut ride = ride_in(RideState::Completed);
        let err = m.start(&mut ride, 9, 0).unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("COMPLETED"));
    }
}
