//! Downstream projection interface
//!
//! Current VehicleTwin and Ride records for the HTTP/persistence layer:
//! readable by anyone, written only by the partition worker that owns the
//! entity (single writer per key, no cross-thread locking on the write
//! path beyond the map shard).

use dashmap::DashMap;
use shared::models::{Ride, RideState, VehicleTwin};

/// Read handle over the fleet's current state
#[derive(Debug, Default)]
pub struct FleetProjection {
    vehicles: DashMap<String, VehicleTwin>,
    rides: DashMap<String, Ride>,
}

impl FleetProjection {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Write path (partition owners only) ==========

    pub(crate) fn upsert_vehicle(&self, twin: VehicleTwin) {
        self.vehicles.insert(twin.vehicle_id.clone(), twin);
    }

    pub(crate) fn upsert_ride(&self, ride: Ride) {
        self.rides.insert(ride.ride_id.clone(), ride);
    }

    // ========== Read path ==========

    pub fn vehicle(&self, vehicle_id: &str) -> Option<VehicleTwin> {
        self.vehicles.get(vehicle_id).map(|entry| entry.value().clone())
    }

    pub fn ride(&self, ride_id: &str) -> Option<Ride> {
        self.rides.get(ride_id).map(|entry| entry.value().clone())
    }

    /// Vehicles currently offered to riders
    pub fn available_vehicles(&self) -> Vec<VehicleTwin> {
        self.vehicles
            .iter()
            .filter(|entry| entry.is_available())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Rides not yet in a terminal state
    pub fn active_rides(&self) -> Vec<Ride> {
        self.rides
            .iter()
            .filter(|entry| !entry.state.is_terminal())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn ride_count(&self) -> usize {
        self.rides.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{VehicleState, VehicleType};

    #[test]
    fn test_available_listing_excludes_other_states() {
        let projection = FleetProjection::new();

        let mut available = VehicleTwin::register("v1", VehicleType::Pedal, 0);
        available.state = VehicleState::Available;
        projection.upsert_vehicle(available);

        let mut reserved = VehicleTwin::register("v2", VehicleType::Electric, 0);
        reserved.state = VehicleState::Reserved;
        projection.upsert_vehicle(reserved);

        projection.upsert_vehicle(VehicleTwin::register("v3", VehicleType::Pedal, 0));

        let listing = projection.available_vehicles();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].vehicle_id, "v1");
        assert_eq!(projection.vehicle_count(), 3);
    }

    #[test]
    fn test_active_rides_excludes_terminal() {
        let projection = FleetProjection::new();

        let mut ride = Ride::request("r1", "u1", "v1", 0, 1_000);
        ride.state = RideState::InProgress;
        projection.upsert_ride(ride);

        let mut done = Ride::request("r2", "u2", "v2", 0, 1_000);
        done.state = RideState::Completed;
        projection.upsert_ride(done);

        let active = projection.active_rides();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].ride_id, "r1");
    }
}
