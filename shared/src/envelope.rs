//! Event envelope - the canonical, schema-validated record placed on the bus

use crate::error::SyncError;
use crate::models::{GeoPoint, VehicleType};
use serde::{Deserialize, Serialize};

/// Wire format version prepended to every encoded envelope.
///
/// Bumped only when the frame layout itself changes; payload evolution is
/// carried by the per-subject schema version inside the envelope.
pub const WIRE_FORMAT_VERSION: u8 = 1;

/// Schema version: major for breaking changes, minor for additive ones
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SchemaVersion {
    pub major: u16,
    pub minor: u16,
}

impl SchemaVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Event envelope - immutable once published
///
/// Ordering contract: `sequence` is monotonically increasing per
/// `partition_key` (vehicle id) and is the AUTHORITATIVE mechanism for
/// consumer-side ordering and duplicate suppression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Envelope unique ID
    pub event_id: String,
    /// Topic this envelope is published to
    pub topic: String,
    /// Partition key (vehicle id) - ordering and ownership scope
    pub partition_key: String,
    /// Per-key sequence number assigned by the adapter (monotonic)
    pub sequence: u64,
    /// Schema subject the payload was written against
    pub schema_subject: String,
    /// Schema version the payload was written with
    pub schema_version: SchemaVersion,
    /// Event type
    pub event_type: FleetEventType,
    /// Ride this event belongs to (ride lifecycle events only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<String>,
    /// Emission timestamp (Unix milliseconds), set when the envelope is built
    pub timestamp: i64,
    /// Event payload
    pub payload: EventPayload,
}

/// Event type enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FleetEventType {
    // Twin lifecycle
    VehicleRegistered,
    VehicleDeregistered,

    // Telemetry
    TelemetryUpdated,
    FaultReported,
    ServiceCompleted,

    // Ride lifecycle
    RideRequested,
    RideStarted,
    RideEnded,
    RideCancelled,
}

impl FleetEventType {
    /// Registry subject the payload of this event type is validated against
    pub fn schema_subject(&self) -> &'static str {
        match self {
            FleetEventType::VehicleRegistered => "fleet.vehicle-registered",
            FleetEventType::VehicleDeregistered => "fleet.vehicle-deregistered",
            FleetEventType::TelemetryUpdated => "fleet.telemetry-updated",
            FleetEventType::FaultReported => "fleet.fault-reported",
            FleetEventType::ServiceCompleted => "fleet.service-completed",
            FleetEventType::RideRequested => "fleet.ride-requested",
            FleetEventType::RideStarted => "fleet.ride-started",
            FleetEventType::RideEnded => "fleet.ride-ended",
            FleetEventType::RideCancelled => "fleet.ride-cancelled",
        }
    }

    /// Ride lifecycle events carry a mandatory `ride_id`
    pub fn is_ride_event(&self) -> bool {
        matches!(
            self,
            FleetEventType::RideRequested
                | FleetEventType::RideStarted
                | FleetEventType::RideEnded
                | FleetEventType::RideCancelled
        )
    }
}

impl std::fmt::Display for FleetEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FleetEventType::VehicleRegistered => write!(f, "VEHICLE_REGISTERED"),
            FleetEventType::VehicleDeregistered => write!(f, "VEHICLE_DEREGISTERED"),
            FleetEventType::TelemetryUpdated => write!(f, "TELEMETRY_UPDATED"),
            FleetEventType::FaultReported => write!(f, "FAULT_REPORTED"),
            FleetEventType::ServiceCompleted => write!(f, "SERVICE_COMPLETED"),
            FleetEventType::RideRequested => write!(f, "RIDE_REQUESTED"),
            FleetEventType::RideStarted => write!(f, "RIDE_STARTED"),
            FleetEventType::RideEnded => write!(f, "RIDE_ENDED"),
            FleetEventType::RideCancelled => write!(f, "RIDE_CANCELLED"),
        }
    }
}

/// Event payload variants - closed set, validated once at the producing boundary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    // ========== Twin lifecycle ==========
    VehicleRegistered {
        vehicle_type: VehicleType,
    },

    VehicleDeregistered {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    // ========== Telemetry ==========
    TelemetryUpdated {
        location: GeoPoint,
        /// Percent 0-100, electric vehicles only
        #[serde(skip_serializing_if = "Option::is_none")]
        battery_level: Option<u8>,
    },

    FaultReported {
        fault_code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// Explicit service-complete signal from the maintenance crew
    ServiceCompleted {},

    // ========== Ride lifecycle ==========
    RideRequested {
        rider_id: String,
    },

    RideStarted {
        rider_id: String,
    },

    RideEnded {},

    RideCancelled {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl EventPayload {
    /// Event type this payload belongs to
    pub fn event_type(&self) -> FleetEventType {
        match self {
            EventPayload::VehicleRegistered { .. } => FleetEventType::VehicleRegistered,
            EventPayload::VehicleDeregistered { .. } => FleetEventType::VehicleDeregistered,
            EventPayload::TelemetryUpdated { .. } => FleetEventType::TelemetryUpdated,
            EventPayload::FaultReported { .. } => FleetEventType::FaultReported,
            EventPayload::ServiceCompleted {} => FleetEventType::ServiceCompleted,
            EventPayload::RideRequested { .. } => FleetEventType::RideRequested,
            EventPayload::RideStarted { .. } => FleetEventType::RideStarted,
            EventPayload::RideEnded {} => FleetEventType::RideEnded,
            EventPayload::RideCancelled { .. } => FleetEventType::RideCancelled,
        }
    }
}

impl EventEnvelope {
    /// Create a new envelope
    ///
    /// # Arguments
    /// * `topic` - Bus topic
    /// * `partition_key` - Vehicle id (ordering and ownership scope)
    /// * `sequence` - Per-key sequence number (assigned by the adapter)
    /// * `schema_version` - Version the payload is written with
    /// * `ride_id` - Ride id for ride lifecycle events
    /// * `payload` - Event payload (event type is derived from it)
    pub fn new(
        topic: impl Into<String>,
        partition_key: impl Into<String>,
        sequence: u64,
        schema_version: SchemaVersion,
        ride_id: Option<String>,
        payload: EventPayload,
    ) -> Self {
        let event_type = payload.event_type();
        Self {
            event_id: crate::util::new_id(),
            topic: topic.into(),
            partition_key: partition_key.into(),
            sequence,
            schema_subject: event_type.schema_subject().to_string(),
            schema_version,
            event_type,
            ride_id,
            // Emission timestamp is ALWAYS set by the producing side
            timestamp: crate::util::now_millis(),
            payload,
        }
    }

    /// Encode to the wire form: 1-byte format version + JSON body
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        let mut buf = vec![WIRE_FORMAT_VERSION];
        serde_json::to_writer(&mut buf, self).map_err(|e| SyncError::Wire(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from the wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        match bytes.split_first() {
            Some((&WIRE_FORMAT_VERSION, body)) => {
                serde_json::from_slice(body).map_err(|e| SyncError::Wire(e.to_string()))
            }
            Some((&version, _)) => Err(SyncError::Wire(format!(
                "unsupported wire format version {}",
                version
            ))),
            None => Err(SyncError::Wire("empty frame".to_string())),
        }
    }
}
