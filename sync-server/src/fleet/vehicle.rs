//! Vehicle state machine
//!
//! Availability/condition state per vehicle, updated by telemetry and
//! ride events. The transition table is a total function: every
//! (state, event) pair outside it fails with `InvalidStateTransition`,
//! never silently.
//!
//! ```text
//!              first telemetry            reserve (CAS)
//!   OFFLINE ──────────────────▶ AVAILABLE ─────────────▶ RESERVED
//!      ▲                          ▲    ▲                    │ start
//!      │ deregister               │    │ release            ▼
//!      └───(any state)            │    └──────────────── IN_USE
//!                                 │ service-complete        │ end
//!                                 │                         ▼
//!                             MAINTENANCE ◀───── battery low / fault
//!                                        (deferred while IN_USE)
//! ```

use shared::envelope::{EventEnvelope, EventPayload};
use shared::error::{SyncError, SyncResult};
use shared::models::{VehicleState, VehicleTwin};

/// Vehicle transition logic, parameterized by the battery threshold
#[derive(Debug, Clone)]
pub struct VehicleMachine {
    /// Battery percent at or below which a vehicle needs service
    battery_threshold: u8,
}

impl VehicleMachine {
    pub fn new(battery_threshold: u8) -> Self {
        Self { battery_threshold }
    }

    fn invalid(twin: &VehicleTwin, event: impl std::fmt::Display) -> SyncError {
        SyncError::InvalidStateTransition {
            entity: "vehicle",
            id: twin.vehicle_id.clone(),
            state: twin.state.to_string(),
            event: event.to_string(),
        }
    }

    fn touch(twin: &mut VehicleTwin, sequence: u64, now: i64) {
        twin.last_sequence = sequence;
        twin.updated_at = now;
    }

    /// Apply a twin-platform event (telemetry, fault, service, deregistration)
    ///
    /// Ride lifecycle events go through the explicit [`reserve`],
    /// [`start_ride`], [`end_ride`] and [`release`] operations instead,
    /// because they are coupled with the ride machine.
    ///
    /// [`reserve`]: VehicleMachine::reserve
    /// [`start_ride`]: VehicleMachine::start_ride
    /// [`end_ride`]: VehicleMachine::end_ride
    /// [`release`]: VehicleMachine::release
    pub fn apply_twin_event(
        &self,
        twin: &mut VehicleTwin,
        envelope: &EventEnvelope,
    ) -> SyncResult<VehicleState> {
        let now = envelope.timestamp;
        let sequence = envelope.sequence;
        match &envelope.payload {
            EventPayload::TelemetryUpdated {
                location,
                battery_level,
            } => {
                twin.location = *location;
                if battery_level.is_some() {
                    twin.battery_level = *battery_level;
                }

                // First successful telemetry brings the twin online
                if twin.state == VehicleState::Offline {
                    twin.state = VehicleState::Available;
                }
                self.check_condition(twin);
                Self::touch(twin, sequence, now);
                Ok(twin.state)
            }
            EventPayload::FaultReported { fault_code, .. } => {
                if twin.state == VehicleState::InUse {
                    // Deferred until ride end; the rider is not stranded
                    twin.pending_maintenance = true;
                    tracing::warn!(
                        vehicle_id = %twin.vehicle_id,
                        fault_code = %fault_code,
                        "Fault while IN_USE, maintenance deferred to ride end"
                    );
                } else {
                    twin.state = VehicleState::Maintenance;
                }
                Self::touch(twin, sequence, now);
                Ok(twin.state)
            }
            EventPayload::ServiceCompleted {} => {
                if twin.state != VehicleState::Maintenance {
                    return Err(Self::invalid(twin, envelope.event_type));
                }
                twin.state = VehicleState::Available;
                twin.pending_maintenance = false;
                Self::touch(twin, sequence, now);
                Ok(twin.state)
            }
            EventPayload::VehicleDeregistered { .. } => {
                twin.state = VehicleState::Offline;
                twin.pending_maintenance = false;
                Self::touch(twin, sequence, now);
                Ok(twin.state)
            }
            other => Err(Self::invalid(twin, other.event_type())),
        }
    }

    /// Battery below threshold sends the vehicle to maintenance, except
    /// while IN_USE where the transition is deferred
    fn check_condition(&self, twin: &mut VehicleTwin) {
        let battery_low = twin
            .battery_level
            .map(|pct| pct <= self.battery_threshold)
            .unwrap_or(false);
        if !battery_low {
            return;
        }
        match twin.state {
            VehicleState::InUse => twin.pending_maintenance = true,
            VehicleState::Maintenance | VehicleState::Offline => {}
            _ => twin.state = VehicleState::Maintenance,
        }
    }

    /// Compare-and-set reservation: succeeds only from AVAILABLE
    ///
    /// Events for one vehicle are serialized by partition ownership, so
    /// of two concurrent reservation attempts exactly one observes
    /// AVAILABLE; the loser gets the conflict and must surface a
    /// "vehicle unavailable" outcome.
    pub fn reserve(
        &self,
        twin: &mut VehicleTwin,
        sequence: u64,
        now: i64,
    ) -> SyncResult<VehicleState> {
        if twin.state != VehicleState::Available {
            return Err(Self::invalid(twin, "RIDE_REQUESTED"));
        }
        twin.state = VehicleState::Reserved;
        Self::touch(twin, sequence, now);
        Ok(twin.state)
    }

    /// RESERVED → IN_USE on ride start
    pub fn start_ride(
        &self,
        twin: &mut VehicleTwin,
        sequence: u64,
        now: i64,
    ) -> SyncResult<VehicleState> {
        if twin.state != VehicleState::Reserved {
            return Err(Self::invalid(twin, "RIDE_STARTED"));
        }
        twin.state = VehicleState::InUse;
        Self::touch(twin, sequence, now);
        Ok(twin.state)
    }

    /// IN_USE → AVAILABLE, or MAINTENANCE when battery/condition demands it
    pub fn end_ride(
        &self,
        twin: &mut VehicleTwin,
        sequence: u64,
        now: i64,
    ) -> SyncResult<VehicleState> {
        if twin.state != VehicleState::InUse {
            return Err(Self::invalid(twin, "RIDE_ENDED"));
        }
        let battery_low = twin
            .battery_level
            .map(|pct| pct <= self.battery_threshold)
            .unwrap_or(false);
        twin.state = if twin.pending_maintenance || battery_low {
            twin.pending_maintenance = false;
            VehicleState::Maintenance
        } else {
            VehicleState::Available
        };
        Self::touch(twin, sequence, now);
        Ok(twin.state)
    }

    /// RESERVED → AVAILABLE when a reservation is cancelled or expires
    pub fn release(
        &self,
        twin: &mut VehicleTwin,
        sequence: u64,
        now: i64,
    ) -> SyncResult<VehicleState> {
        if twin.state != VehicleState::Reserved {
            return Err(Self::invalid(twin, "RIDE_CANCELLED"));
        }
        twin.state = VehicleState::Available;
        Self::touch(twin, sequence, now);
        Ok(twin.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::envelope::SchemaVersion;
    use shared::models::{GeoPoint, VehicleType};

    fn machine() -> VehicleMachine {
        VehicleMachine::new(15)
    }

    fn twin(state: VehicleState) -> VehicleTwin {
        let mut twin = VehicleTwin::register("v1", VehicleType::Electric, 0);
        twin.state = state;
        twin.battery_level = Some(80);
        twin
    }

    fn telemetry_envelope(seq: u64, battery: Option<u8>) -> EventEnvelope {
        EventEnvelope::new(
            "fleet-events",
            "v1",
            seq,
            SchemaVersion::new(1, 0),
            None,
            EventPayload::TelemetryUpdated {
                location: GeoPoint { lat: 44.0, lng: 12.0 },
                battery_level: battery,
            },
        )
    }

    fn fault_envelope(seq: u64) -> EventEnvelope {
        EventEnvelope::new(
            "fleet-events",
            "v1",
            seq,
            SchemaVersion::new(1, 0),
            None,
            EventPayload::FaultReported {
                fault_code: "BRAKE".into(),
                detail: None,
            },
        )
    }

    fn service_envelope(seq: u64) -> EventEnvelope {
        EventEnvelope::new(
            "fleet-events",
            "v1",
            seq,
            SchemaVersion::new(1, 0),
            None,
            EventPayload::ServiceCompleted {},
        )
    }

    #[test]
    fn test_first_telemetry_brings_offline_online() {
        let mut twin = twin(VehicleState::Offline);
        let state = machine()
            .apply_twin_event(&mut twin, &telemetry_envelope(1, Some(90)))
            .unwrap();
        assert_eq!(state, VehicleState::Available);
        assert_eq!(twin.last_sequence, 1);
    }

    #[test]
    fn test_low_battery_forces_maintenance() {
        let mut twin = twin(VehicleState::Available);
        let state = machine()
            .apply_twin_event(&mut twin, &telemetry_envelope(2, Some(5)))
            .unwrap();
        assert_eq!(state, VehicleState::Maintenance);

        // Subsequent reservation must be rejected
        let err = machine().reserve(&mut twin, 3, 100).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_low_battery_while_in_use_is_deferred() {
        let mut twin = twin(VehicleState::InUse);
        let state = machine()
            .apply_twin_event(&mut twin, &telemetry_envelope(2, Some(3)))
            .unwrap();
        assert_eq!(state, VehicleState::InUse);
        assert!(twin.pending_maintenance);

        // Ride end resolves the deferral
        let state = machine().end_ride(&mut twin, 3, 100).unwrap();
        assert_eq!(state, VehicleState::Maintenance);
        assert!(!twin.pending_maintenance);
    }

    #[test]
    fn test_ride_end_with_nominal_battery_returns_available() {
        let mut twin = twin(VehicleState::InUse);
        let state = machine().end_ride(&mut twin, 2, 100).unwrap();
        assert_eq!(state, VehicleState::Available);
    }

    #[test]
    fn test_reservation_cas_single_winner() {
        let mut twin = twin(VehicleState::Available);

        let first = machine().reserve(&mut twin, 2, 100);
        assert_eq!(first.unwrap(), VehicleState::Reserved);

        // The second attempt observes RESERVED and loses deterministically
        let second = machine().reserve(&mut twin, 3, 101);
        assert!(second.unwrap_err().is_conflict());
        assert_eq!(twin.state, VehicleState::Reserved);
    }

    #[test]
    fn test_fault_goes_to_maintenance_except_in_use() {
        for state in [
            VehicleState::Offline,
            VehicleState::Available,
            VehicleState::Reserved,
            VehicleState::Maintenance,
        ] {
            let mut t = twin(state);
            let next = machine().apply_twin_event(&mut t, &fault_envelope(2)).unwrap();
            assert_eq!(next, VehicleState::Maintenance, "from {:?}", state);
        }

        let mut t = twin(VehicleState::InUse);
        let next = machine().apply_twin_event(&mut t, &fault_envelope(2)).unwrap();
        assert_eq!(next, VehicleState::InUse);
        assert!(t.pending_maintenance);
    }

    #[test]
    fn test_service_complete_only_from_maintenance() {
        let mut t = twin(VehicleState::Maintenance);
        let next = machine().apply_twin_event(&mut t, &service_envelope(2)).unwrap();
        assert_eq!(next, VehicleState::Available);

        for state in [
            VehicleState::Offline,
            VehicleState::Available,
            VehicleState::Reserved,
            VehicleState::InUse,
        ] {
            let mut t = twin(state);
            let err = machine()
                .apply_twin_event(&mut t, &service_envelope(2))
                .unwrap_err();
            assert!(err.is_conflict(), "from {:?}", state);
            assert_eq!(t.state, state, "state must not change on rejection");
        }
    }

    #[test]
    fn test_ride_transitions_rejected_outside_their_source_state() {
        // Exhaustive enumeration of the ride-coupled operations
        let m = machine();
        for state in [
            VehicleState::Offline,
            VehicleState::Available,
            VehicleState::Reserved,
            VehicleState::InUse,
            VehicleState::Maintenance,
        ] {
            let mut t = twin(state);
            assert_eq!(
                m.reserve(&mut t, 9, 0).is_ok(),
                state == VehicleState::Available,
                "reserve from {:?}",
                state
            );

            let mut t = twin(state);
            assert_eq!(
                m.start_ride(&mut t, 9, 0).is_ok(),
                state == VehicleState::Reserved,
                "start from {:?}",
                state
            );

            let mut t = twin(state);
            assert_eq!(
                m.end_ride(&mut t, 9, 0).is_ok(),
                state == VehicleState::InUse,
                "end from {:?}",
                state
            );

            let mut t = twin(state);
            assert_eq!(
                m.release(&mut t, 9, 0).is_ok(),
                state == VehicleState::Reserved,
                "release from {:?}",
                state
            );
        }
    }

    #[test]
    fn test_deregistration_from_any_state() {
        for state in [
            VehicleState::Offline,
            VehicleState::Available,
            VehicleState::Reserved,
            VehicleState::InUse,
            VehicleState::Maintenance,
        ] {
            let mut t = twin(state);
            let envelope = EventEnvelope::new(
                "fleet-events",
                "v1",
                9,
                SchemaVersion::new(1, 0),
                None,
                EventPayload::VehicleDeregistered { reason: None },
            );
            let next = machine().apply_twin_event(&mut t, &envelope).unwrap();
            assert_eq!(next, VehicleState::Offline);
        }
    }

    #[test]
    fn test_telemetry_without_battery_keeps_last_reading() {
        let mut t = twin(VehicleState::Available);
        t.battery_level = Some(60);
        machine()
            .apply_twin_event(&mut t, &telemetry_envelope(2, None))
            .unwrap();
        assert_eq!(t.battery_level, Some(60));
    }
}
