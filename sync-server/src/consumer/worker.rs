//! Partition worker - applies envelopes to the state machines
//!
//! # Envelope Flow
//!
//! ```text
//! process_record(record)
//!     ├─ 1. Schema check (compat + shape; refusal → dead letter, offset advances)
//!     ├─ 2. Duplicate check (sequence <= applied high-water → silent no-op)
//!     ├─ 3. State transition on cloned entities (no partial mutation)
//!     ├─ 4. Single redb transaction: snapshots + applied sequence + offset
//!     └─ 5. Projection update
//! ```
//!
//! The worker owns every vehicle and ride whose key hashes to its
//! partition; state is single-writer by construction and needs no locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use shared::envelope::{EventEnvelope, EventPayload};
use shared::error::{SyncError, SyncResult};
use shared::models::{Ride, RideState, VehicleTwin, VehicleType};
use tokio_util::sync::CancellationToken;

use crate::bus::{BusRecord, EventBus};
use crate::fleet::{
    FleetProjection, RideMachine, VehicleMachine, CANCEL_RESERVATION_EXPIRED,
    CANCEL_VEHICLE_UNAVAILABLE,
};
use crate::schema::SchemaValidator;

use super::store::{CommitBatch, ConsumerStore, RefusedEnvelope};

/// Worker tuning knobs (from [`crate::core::Config`])
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub fetch_batch_size: usize,
    pub wait_timeout: Duration,
    pub expiry_scan_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            fetch_batch_size: 64,
            wait_timeout: Duration::from_millis(500),
            expiry_scan_interval: Duration::from_secs(5),
        }
    }
}

/// Partition-owned, single-writer entity state
#[derive(Debug, Default)]
struct FleetState {
    vehicles: HashMap<String, VehicleTwin>,
    rides: HashMap<String, Ride>,
    /// Applied-sequence high-water mark per key
    applied: HashMap<String, u64>,
}

impl FleetState {
    /// Rebuild this partition's slice of the durable state
    fn load(store: &ConsumerStore, bus: &dyn EventBus, partition: u32) -> SyncResult<Self> {
        let mut state = Self::default();
        for twin in store.all_vehicles()? {
            if bus.partition_for(&twin.vehicle_id) == partition {
                state.vehicles.insert(twin.vehicle_id.clone(), twin);
            }
        }
        for ride in store.all_rides()? {
            if bus.partition_for(&ride.vehicle_id) == partition {
                state.rides.insert(ride.ride_id.clone(), ride);
            }
        }
        for (key, sequence) in store.applied_sequences()? {
            if bus.partition_for(&key) == partition {
                state.applied.insert(key, sequence);
            }
        }
        Ok(state)
    }

    fn applied_for(&self, key: &str) -> u64 {
        self.applied.get(key).copied().unwrap_or(0)
    }
}

/// What applying one envelope produced
enum ApplyOutcome {
    Applied,
    /// Entity-level rejection, surfaced to the originating request
    Conflict(SyncError),
    /// Logged and discarded (terminal ride, unknown entity, upstream dup)
    Dropped(&'static str),
}

/// One worker per assigned partition
pub struct PartitionWorker {
    partition: u32,
    bus: Arc<dyn EventBus>,
    validator: Arc<SchemaValidator>,
    store: ConsumerStore,
    projection: Arc<FleetProjection>,
    vehicles: VehicleMachine,
    rides: RideMachine,
    config: WorkerConfig,
}

impl PartitionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partition: u32,
        bus: Arc<dyn EventBus>,
        validator: Arc<SchemaValidator>,
        store: ConsumerStore,
        projection: Arc<FleetProjection>,
        vehicles: VehicleMachine,
        rides: RideMachine,
        config: WorkerConfig,
    ) -> Self {
        Self {
            partition,
            bus,
            validator,
            store,
            projection,
            vehicles,
            rides,
            config,
        }
    }

    /// Consume the partition until shutdown
    ///
    /// A record mid-application is committed before the worker exits;
    /// cancellation is only observed between records.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut state = match FleetState::load(&self.store, self.bus.as_ref(), self.partition) {
            Ok(state) => state,
            Err(err) => {
                tracing::error!(partition = self.partition, error = %err, "Failed to load partition state");
                return;
            }
        };
        let mut next_offset = match self.store.next_offset(self.partition) {
            Ok(offset) => offset,
            Err(err) => {
                tracing::error!(partition = self.partition, error = %err, "Failed to read committed offset");
                return;
            }
        };

        // Seed the projection with recovered state so reads are warm
        for twin in state.vehicles.values() {
            self.projection.upsert_vehicle(twin.clone());
        }
        for ride in state.rides.values() {
            self.projection.upsert_ride(ride.clone());
        }

        tracing::info!(
            partition = self.partition,
            next_offset,
            vehicles = state.vehicles.len(),
            rides = state.rides.len(),
            "Partition worker started"
        );

        let mut expiry_interval = tokio::time::interval(self.config.expiry_scan_interval);
        expiry_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = expiry_interval.tick() => {
                    let now = shared::util::now_millis();
                    if let Err(err) = self.expire_reservations(&mut state, next_offset, now) {
                        tracing::error!(partition = self.partition, error = %err, "Reservation expiry sweep failed");
                    }
                }
                _ = self.bus.wait_for_records(self.partition, next_offset, self.config.wait_timeout) => {
                    let records = match self
                        .bus
                        .fetch(self.partition, next_offset, self.config.fetch_batch_size)
                        .await
                    {
                        Ok(records) => records,
                        Err(err) => {
                            tracing::warn!(partition = self.partition, error = %err, "Bus fetch failed, retrying");
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            continue;
                        }
                    };

                    for record in records {
                        match self.process_record(&mut state, &record).await {
                            Ok(()) => next_offset = record.offset + 1,
                            Err(err) => {
                                // Transient (registry/commit store): stay on
                                // this offset and reprocess after a pause.
                                tracing::warn!(
                                    partition = self.partition,
                                    offset = record.offset,
                                    error = %err,
                                    "Record processing failed, will reprocess"
                                );
                                tokio::time::sleep(Duration::from_millis(200)).await;
                                break;
                            }
                        }
                    }
                }
            }
        }

        tracing::info!(partition = self.partition, "Partition worker stopped");
    }

    /// Validate, deduplicate, apply and commit one record
    async fn process_record(&self, state: &mut FleetState, record: &BusRecord) -> SyncResult<()> {
        let envelope = &record.envelope;
        let key = envelope.partition_key.as_str();
        let next_offset = record.offset + 1;

        // 1. Schema check - fail-closed, refusal is terminal for the envelope
        if let Err(err) = self.validator.validate(envelope).await {
            if err.is_transient() {
                return Err(err);
            }
            tracing::error!(
                partition = self.partition,
                event_id = %envelope.event_id,
                partition_key = key,
                sequence = envelope.sequence,
                error = %err,
                "Envelope refused by schema check, dead-lettered"
            );
            let refused = RefusedEnvelope {
                event_id: envelope.event_id.clone(),
                partition_key: key.to_string(),
                sequence: envelope.sequence,
                reason: err.to_string(),
                refused_at: shared::util::now_millis(),
            };
            self.store.commit(CommitBatch {
                partition: self.partition,
                next_offset,
                refused: Some(&refused),
                ..Default::default()
            })?;
            return Ok(());
        }

        // 2. Duplicate check - re-delivery of an applied sequence is a no-op
        if envelope.sequence <= state.applied_for(key) {
            tracing::debug!(
                partition = self.partition,
                partition_key = key,
                sequence = envelope.sequence,
                applied = state.applied_for(key),
                "Duplicate sequence discarded"
            );
            self.store.commit(CommitBatch {
                partition: self.partition,
                next_offset,
                ..Default::default()
            })?;
            return Ok(());
        }

        // 3. Apply on clones; nothing is written back until commit succeeds
        let (vehicle, ride, outcome) = self.apply_envelope(state, envelope);

        // 4. Durable mutation + applied advance + offset, one transaction.
        //    The high-water mark advances for every non-duplicate envelope:
        //    reprocessing after restart must resolve to the same outcome.
        self.store.commit(CommitBatch {
            partition: self.partition,
            next_offset,
            applied: Some((key, envelope.sequence)),
            vehicle: vehicle.as_ref(),
            ride: ride.as_ref(),
            refused: None,
        })?;
        state.applied.insert(key.to_string(), envelope.sequence);

        // 5. Write back and project
        if let Some(twin) = vehicle {
            self.projection.upsert_vehicle(twin.clone());
            state.vehicles.insert(twin.vehicle_id.clone(), twin);
        }
        if let Some(ride) = ride {
            self.projection.upsert_ride(ride.clone());
            state.rides.insert(ride.ride_id.clone(), ride);
        }

        match outcome {
            ApplyOutcome::Applied => {
                tracing::debug!(
                    partition = self.partition,
                    partition_key = key,
                    sequence = envelope.sequence,
                    event_type = %envelope.event_type,
                    "Envelope applied"
                );
            }
            ApplyOutcome::Conflict(err) => {
                // Surfaced to the originating request as a conflict; the
                // event itself is consumed and never retried.
                tracing::warn!(
                    partition = self.partition,
                    partition_key = key,
                    sequence = envelope.sequence,
                    event_type = %envelope.event_type,
                    error = %err,
                    "Transition rejected"
                );
            }
            ApplyOutcome::Dropped(reason) => {
                tracing::warn!(
                    partition = self.partition,
                    partition_key = key,
                    sequence = envelope.sequence,
                    event_type = %envelope.event_type,
                    reason,
                    "Envelope dropped"
                );
            }
        }
        Ok(())
    }

    /// Route an envelope to the state machines
    ///
    /// Returns the updated entities (already transitioned clones) and the
    /// outcome. Coupled ride/vehicle steps either both succeed or neither
    /// entity is returned changed.
    fn apply_envelope(
        &self,
        state: &FleetState,
        envelope: &EventEnvelope,
    ) -> (Option<VehicleTwin>, Option<Ride>, ApplyOutcome) {
        let key = envelope.partition_key.as_str();
        let now = envelope.timestamp;
        let sequence = envelope.sequence;

        match &envelope.payload {
            EventPayload::VehicleRegistered { vehicle_type } => {
                if state.vehicles.contains_key(key) {
                    return (None, None, ApplyOutcome::Dropped("vehicle already registered"));
                }
                let mut twin = VehicleTwin::register(key, *vehicle_type, now);
                twin.last_sequence = sequence;
                (Some(twin), None, ApplyOutcome::Applied)
            }

            EventPayload::TelemetryUpdated { .. }
            | EventPayload::FaultReported { .. }
            | EventPayload::ServiceCompleted {}
            | EventPayload::VehicleDeregistered { .. } => {
                let mut twin = self.twin_or_implicit(state, key, now);
                match self.vehicles.apply_twin_event(&mut twin, envelope) {
                    Ok(_) => (Some(twin), None, ApplyOutcome::Applied),
                    Err(err) => (None, None, ApplyOutcome::Conflict(err)),
                }
            }

            EventPayload::RideRequested { rider_id } => {
                let Some(ride_id) = envelope.ride_id.as_deref() else {
                    return (None, None, ApplyOutcome::Dropped("ride event without ride_id"));
                };
                if let Some(existing) = state.rides.get(ride_id) {
                    tracing::debug!(ride_id, state = %existing.state, "Ride already known");
                    return (None, None, ApplyOutcome::Dropped("ride already requested"));
                }

                let mut twin = self.twin_or_implicit(state, key, now);
                match self.vehicles.reserve(&mut twin, sequence, now) {
                    Ok(_) => {
                        // One logical step: the ride is only recorded
                        // reserved because the vehicle CAS succeeded.
                        let mut ride = self.rides.request(ride_id, rider_id, key, sequence, now);
                        match self.rides.mark_reserved(&mut ride, sequence, now) {
                            Ok(_) => (Some(twin), Some(ride), ApplyOutcome::Applied),
                            Err(err) => (None, None, ApplyOutcome::Conflict(err)),
                        }
                    }
                    Err(err) => {
                        // Losing side: record the ride closed with the
                        // vehicle-unavailable outcome for its caller.
                        let mut ride = self.rides.request(ride_id, rider_id, key, sequence, now);
                        let _ = self
                            .rides
                            .cancel(&mut ride, CANCEL_VEHICLE_UNAVAILABLE, sequence, now);
                        (None, Some(ride), ApplyOutcome::Conflict(err))
                    }
                }
            }

            EventPayload::RideStarted { .. } => {
                self.coupled_ride_step(state, envelope, |machine, ride, twin_machine, twin| {
                    machine.start(ride, sequence, now)?;
                    twin_machine.start_ride(twin, sequence, now)?;
                    Ok(())
                })
            }

            EventPayload::RideEnded {} => {
                self.coupled_ride_step(state, envelope, |machine, ride, twin_machine, twin| {
                    machine.complete(ride, sequence, now)?;
                    twin_machine.end_ride(twin, sequence, now)?;
                    Ok(())
                })
            }

            EventPayload::RideCancelled { reason } => {
                let reason = reason.clone();
                self.coupled_ride_step(state, envelope, move |machine, ride, twin_machine, twin| {
                    let was_reserved = ride.state == RideState::VehicleReserved;
                    machine.cancel(
                        ride,
                        reason.as_deref().unwrap_or("cancelled"),
                        sequence,
                        now,
                    )?;
                    // The vehicle is only held once the reservation stuck
                    if was_reserved {
                        twin_machine.release(twin, sequence, now)?;
                    }
                    Ok(())
                })
            }
        }
    }

    /// Shared plumbing for ride events coupled to a vehicle transition:
    /// lookup, terminal-drop, clone, transition both, return both.
    fn coupled_ride_step(
        &self,
        state: &FleetState,
        envelope: &EventEnvelope,
        transition: impl FnOnce(
            &RideMachine,
            &mut Ride,
            &VehicleMachine,
            &mut VehicleTwin,
        ) -> SyncResult<()>,
    ) -> (Option<VehicleTwin>, Option<Ride>, ApplyOutcome) {
        let Some(ride_id) = envelope.ride_id.as_deref() else {
            return (None, None, ApplyOutcome::Dropped("ride event without ride_id"));
        };
        let Some(ride) = state.rides.get(ride_id) else {
            return (None, None, ApplyOutcome::Dropped("unknown ride"));
        };
        if ride.state.is_terminal() {
            // Terminal rides absorb late events; logged by the caller
            return (None, None, ApplyOutcome::Dropped("ride already terminal"));
        }

        let mut ride = ride.clone();
        let mut twin = self.twin_or_implicit(state, &envelope.partition_key, envelope.timestamp);
        match transition(&self.rides, &mut ride, &self.vehicles, &mut twin) {
            Ok(()) => (Some(twin), Some(ride), ApplyOutcome::Applied),
            Err(err) => (None, None, ApplyOutcome::Conflict(err)),
        }
    }

    /// Known twin, or an OFFLINE placeholder when the registration
    /// envelope was lost (tolerated; transitions from OFFLINE still gate)
    fn twin_or_implicit(&self, state: &FleetState, key: &str, now: i64) -> VehicleTwin {
        state.vehicles.get(key).cloned().unwrap_or_else(|| {
            tracing::debug!(vehicle_id = key, "Event for unregistered vehicle, implicit OFFLINE twin");
            VehicleTwin::register(key, VehicleType::Pedal, now)
        })
    }

    /// Cancel overdue reservations and release their vehicles
    ///
    /// Driven by the periodic tick, not by an envelope: the partition
    /// owner is the only writer, so local expiry is race-free.
    fn expire_reservations(
        &self,
        state: &mut FleetState,
        next_offset: u64,
        now: i64,
    ) -> SyncResult<usize> {
        let overdue: Vec<String> = state
            .rides
            .values()
            .filter(|ride| ride.reservation_overdue(now))
            .map(|ride| ride.ride_id.clone())
            .collect();

        let mut expired = 0;
        for ride_id in overdue {
            let Some(mut ride) = state.rides.get(&ride_id).cloned() else {
                continue;
            };
            let was_reserved = ride.state == RideState::VehicleReserved;
            let ride_sequence = ride.last_sequence;
            self.rides
                .cancel(&mut ride, CANCEL_RESERVATION_EXPIRED, ride_sequence, now)?;

            let vehicle = if was_reserved {
                let vehicle_id = ride.vehicle_id.clone();
                let mut twin = self.twin_or_implicit(state, &vehicle_id, now);
                // Keep the twin's own high-water; expiry is not an envelope
                let twin_sequence = twin.last_sequence;
                self.vehicles.release(&mut twin, twin_sequence, now)?;
                Some(twin)
            } else {
                None
            };

            self.store.commit(CommitBatch {
                partition: self.partition,
                next_offset,
                applied: None,
                vehicle: vehicle.as_ref(),
                ride: Some(&ride),
                refused: None,
            })?;

            tracing::info!(
                partition = self.partition,
                ride_id = %ride.ride_id,
                vehicle_id = %ride.vehicle_id,
                deadline = ride.reservation_deadline,
                "Reservation window elapsed, ride cancelled"
            );

            if let Some(twin) = vehicle {
                self.projection.upsert_vehicle(twin.clone());
                state.vehicles.insert(twin.vehicle_id.clone(), twin);
            }
            self.projection.upsert_ride(ride.clone());
            state.rides.insert(ride.ride_id.clone(), ride);
            expired += 1;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::schema::InMemoryRegistry;
    use shared::envelope::SchemaVersion;
    use shared::models::{GeoPoint, VehicleState};

    const TOPIC: &str = "fleet-events";

    fn worker() -> PartitionWorker {
        let bus = Arc::new(MemoryBus::new(TOPIC, 1));
        PartitionWorker::new(
            0,
            bus,
            Arc::new(SchemaValidator::new(
                Arc::new(InMemoryRegistry::with_builtin()),
                1,
            )),
            ConsumerStore::open_in_memory().unwrap(),
            Arc::new(FleetProjection::new()),
            VehicleMachine::new(15),
            RideMachine::new(90_000),
            WorkerConfig::default(),
        )
    }

    fn envelope(vehicle_id: &str, seq: u64, ride_id: Option<&str>, payload: EventPayload) -> EventEnvelope {
        EventEnvelope::new(
            TOPIC,
            vehicle_id,
            seq,
            SchemaVersion::new(1, 0),
            ride_id.map(str::to_string),
            payload,
        )
    }

    fn registered(vehicle_id: &str, seq: u64) -> EventEnvelope {
        envelope(
            vehicle_id,
            seq,
            None,
            EventPayload::VehicleRegistered {
                vehicle_type: shared::models::VehicleType::Electric,
            },
        )
    }

    fn telemetry(vehicle_id: &str, seq: u64, battery: u8) -> EventEnvelope {
        envelope(
            vehicle_id,
            seq,
            None,
            EventPayload::TelemetryUpdated {
                location: GeoPoint { lat: 44.0, lng: 12.0 },
                battery_level: Some(battery),
            },
        )
    }

    fn ride_requested(vehicle_id: &str, seq: u64, ride_id: &str, rider: &str) -> EventEnvelope {
        envelope(
            vehicle_id,
            seq,
            Some(ride_id),
            EventPayload::RideRequested {
                rider_id: rider.to_string(),
            },
        )
    }

    async fn feed(worker: &PartitionWorker, state: &mut FleetState, offset: u64, env: EventEnvelope) {
        worker
            .process_record(state, &BusRecord { offset, envelope: env })
            .await
            .unwrap();
    }

    async fn available_vehicle(worker: &PartitionWorker, state: &mut FleetState, vehicle_id: &str) {
        feed(worker, state, 0, registered(vehicle_id, 1)).await;
        feed(worker, state, 1, telemetry(vehicle_id, 2, 90)).await;
        assert_eq!(
            state.vehicles[vehicle_id].state,
            VehicleState::Available
        );
    }

    #[tokio::test]
    async fn test_registration_then_telemetry_reaches_projection() {
        let worker = worker();
        let mut state = FleetState::default();

        available_vehicle(&worker, &mut state, "v1").await;

        let projected = worker.projection.vehicle("v1").unwrap();
        assert_eq!(projected.state, VehicleState::Available);
        assert_eq!(projected.battery_level, Some(90));
        assert_eq!(worker.store.next_offset(0).unwrap(), 2);
        assert_eq!(worker.store.applied_sequence("v1").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_is_noop_and_idempotent() {
        let worker = worker();
        let mut state = FleetState::default();

        available_vehicle(&worker, &mut state, "v1").await;
        let before = state.vehicles["v1"].clone();

        // Same sequence re-delivered (bus replay): applied once
        feed(&worker, &mut state, 2, telemetry("v1", 2, 10)).await;
        assert_eq!(state.vehicles["v1"], before, "replay must not change state");
        assert_eq!(worker.store.next_offset(0).unwrap(), 3, "offset still advances");

        // Out-of-order older sequence: discarded, no regression
        feed(&worker, &mut state, 3, telemetry("v1", 1, 10)).await;
        assert_eq!(state.vehicles["v1"], before);
        assert_eq!(worker.store.applied_sequence("v1").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reservation_couples_ride_and_vehicle() {
        let worker = worker();
        let mut state = FleetState::default();
        available_vehicle(&worker, &mut state, "v1").await;

        feed(&worker, &mut state, 2, ride_requested("v1", 3, "r1", "u1")).await;

        assert_eq!(state.vehicles["v1"].state, VehicleState::Reserved);
        assert_eq!(state.rides["r1"].state, RideState::VehicleReserved);
        // Both visible in the projection from the same step
        assert_eq!(
            worker.projection.vehicle("v1").unwrap().state,
            VehicleState::Reserved
        );
        assert_eq!(
            worker.projection.ride("r1").unwrap().state,
            RideState::VehicleReserved
        );
    }

    #[tokio::test]
    async fn test_concurrent_reservations_have_one_winner() {
        let worker = worker();
        let mut state = FleetState::default();
        available_vehicle(&worker, &mut state, "v1").await;

        feed(&worker, &mut state, 2, ride_requested("v1", 3, "r1", "u1")).await;
        feed(&worker, &mut state, 3, ride_requested("v1", 4, "r2", "u2")).await;

        assert_eq!(state.rides["r1"].state, RideState::VehicleReserved);
        let loser = &state.rides["r2"];
        assert_eq!(loser.state, RideState::Cancelled);
        assert_eq!(
            loser.cancel_reason.as_deref(),
            Some(CANCEL_VEHICLE_UNAVAILABLE)
        );
        assert_eq!(state.vehicles["v1"].state, VehicleState::Reserved);
    }

    #[tokio::test]
    async fn test_full_ride_lifecycle() {
        let worker = worker();
        let mut state = FleetState::default();
        available_vehicle(&worker, &mut state, "v1").await;

        feed(&worker, &mut state, 2, ride_requested("v1", 3, "r1", "u1")).await;
        feed(
            &worker,
            &mut state,
            3,
            envelope("v1", 4, Some("r1"), EventPayload::RideStarted { rider_id: "u1".into() }),
        )
        .await;
        assert_eq!(state.vehicles["v1"].state, VehicleState::InUse);
        assert_eq!(state.rides["r1"].state, RideState::InProgress);

        feed(
            &worker,
            &mut state,
            4,
            envelope("v1", 5, Some("r1"), EventPayload::RideEnded {}),
        )
        .await;
        assert_eq!(state.vehicles["v1"].state, VehicleState::Available);
        assert_eq!(state.rides["r1"].state, RideState::Completed);
    }

    #[tokio::test]
    async fn test_ride_end_with_low_battery_goes_to_maintenance() {
        let worker = worker();
        let mut state = FleetState::default();
        available_vehicle(&worker, &mut state, "v1").await;

        feed(&worker, &mut state, 2, ride_requested("v1", 3, "r1", "u1")).await;
        feed(
            &worker,
            &mut state,
            3,
            envelope("v1", 4, Some("r1"), EventPayload::RideStarted { rider_id: "u1".into() }),
        )
        .await;
        // Battery drains below threshold mid-ride: deferred
        feed(&worker, &mut state, 4, telemetry("v1", 5, 5)).await;
        assert_eq!(state.vehicles["v1"].state, VehicleState::InUse);
        assert!(state.vehicles["v1"].pending_maintenance);

        feed(
            &worker,
            &mut state,
            5,
            envelope("v1", 6, Some("r1"), EventPayload::RideEnded {}),
        )
        .await;
        assert_eq!(state.vehicles["v1"].state, VehicleState::Maintenance);
    }

    #[tokio::test]
    async fn test_battery_scenario_maintenance_blocks_reservation() {
        let worker = worker();
        let mut state = FleetState::default();
        available_vehicle(&worker, &mut state, "v1").await;

        // Telemetry with battery=5% drives AVAILABLE -> MAINTENANCE
        feed(&worker, &mut state, 2, telemetry("v1", 3, 5)).await;
        assert_eq!(state.vehicles["v1"].state, VehicleState::Maintenance);

        // Subsequent reservation request is rejected; ride closes unavailable
        feed(&worker, &mut state, 3, ride_requested("v1", 4, "r1", "u1")).await;
        assert_eq!(state.vehicles["v1"].state, VehicleState::Maintenance);
        assert_eq!(state.rides["r1"].state, RideState::Cancelled);
    }

    #[tokio::test]
    async fn test_terminal_ride_absorbs_late_events() {
        let worker = worker();
        let mut state = FleetState::default();
        available_vehicle(&worker, &mut state, "v1").await;

        feed(&worker, &mut state, 2, ride_requested("v1", 3, "r1", "u1")).await;
        feed(
            &worker,
            &mut state,
            3,
            envelope("v1", 4, Some("r1"), EventPayload::RideCancelled { reason: None }),
        )
        .await;
        assert_eq!(state.rides["r1"].state, RideState::Cancelled);
        assert_eq!(state.vehicles["v1"].state, VehicleState::Available);

        // A late start for the cancelled ride is dropped, not an error
        feed(
            &worker,
            &mut state,
            4,
            envelope("v1", 5, Some("r1"), EventPayload::RideStarted { rider_id: "u1".into() }),
        )
        .await;
        assert_eq!(state.rides["r1"].state, RideState::Cancelled);
        assert_eq!(state.vehicles["v1"].state, VehicleState::Available);
        // The envelope was still consumed
        assert_eq!(worker.store.applied_sequence("v1").unwrap(), 5);
    }

    #[tokio::test]
    async fn test_incompatible_schema_is_refused_and_skipped() {
        let worker = worker();
        let mut state = FleetState::default();
        available_vehicle(&worker, &mut state, "v1").await;

        let mut bad = telemetry("v1", 3, 50);
        bad.schema_version = SchemaVersion::new(2, 0);
        feed(&worker, &mut state, 2, bad).await;

        // Offset advanced past the refused envelope; state untouched
        assert_eq!(worker.store.next_offset(0).unwrap(), 3);
        assert_eq!(worker.store.applied_sequence("v1").unwrap(), 2);
        let refused = worker.store.refused().unwrap();
        assert_eq!(refused.len(), 1);
        assert!(refused[0].reason.contains("Incompatible schema"));
    }

    #[tokio::test]
    async fn test_expiry_cancels_ride_and_releases_vehicle() {
        let worker = worker();
        let mut state = FleetState::default();
        available_vehicle(&worker, &mut state, "v1").await;

        feed(&worker, &mut state, 2, ride_requested("v1", 3, "r1", "u1")).await;
        let deadline = state.rides["r1"].reservation_deadline;

        // Before the window elapses: nothing happens
        let expired = worker
            .expire_reservations(&mut state, 3, deadline - 1)
            .unwrap();
        assert_eq!(expired, 0);

        let expired = worker
            .expire_reservations(&mut state, 3, deadline + 1)
            .unwrap();
        assert_eq!(expired, 1);
        assert_eq!(state.rides["r1"].state, RideState::Cancelled);
        assert_eq!(
            state.rides["r1"].cancel_reason.as_deref(),
            Some(CANCEL_RESERVATION_EXPIRED)
        );
        assert_eq!(state.vehicles["v1"].state, VehicleState::Available);

        // A second sweep finds nothing (terminal rides are skipped)
        let expired = worker
            .expire_reservations(&mut state, 3, deadline + 2)
            .unwrap();
        assert_eq!(expired, 0);
    }
}
