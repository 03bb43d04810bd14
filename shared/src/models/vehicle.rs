//! Vehicle twin model

use serde::{Deserialize, Serialize};

/// Vehicle propulsion type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Pedal,
    Electric,
}

/// Vehicle availability / condition state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleState {
    /// Registered but no telemetry received yet
    #[default]
    Offline,
    Available,
    Reserved,
    InUse,
    Maintenance,
}

impl std::fmt::Display for VehicleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VehicleState::Offline => write!(f, "OFFLINE"),
            VehicleState::Available => write!(f, "AVAILABLE"),
            VehicleState::Reserved => write!(f, "RESERVED"),
            VehicleState::InUse => write!(f, "IN_USE"),
            VehicleState::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

/// Geographic coordinate (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Digital twin of a fleet vehicle
///
/// Mutated only through validated state-machine transitions applied by
/// the partition owner; request handlers read it via the projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VehicleTwin {
    /// Vehicle ID (partition key)
    pub vehicle_id: String,
    /// Propulsion type
    pub vehicle_type: VehicleType,
    /// Last reported location
    pub location: GeoPoint,
    /// Battery percent 0-100 (electric only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    /// Availability / condition state
    pub state: VehicleState,
    /// Maintenance was signalled while IN_USE; resolved at ride end
    #[serde(default)]
    pub pending_maintenance: bool,
    /// Last applied event sequence (duplicate suppression)
    pub last_sequence: u64,
    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl VehicleTwin {
    /// Create a twin for a freshly registered vehicle (OFFLINE until the
    /// first successful telemetry event arrives)
    pub fn register(vehicle_id: impl Into<String>, vehicle_type: VehicleType, now: i64) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            vehicle_type,
            location: GeoPoint::default(),
            battery_level: None,
            state: VehicleState::Offline,
            pending_maintenance: false,
            last_sequence: 0,
            updated_at: now,
        }
    }

    /// Whether the vehicle can currently be handed to a rider
    pub fn is_available(&self) -> bool {
        self.state == VehicleState::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_twin_starts_offline() {
        let twin = VehicleTwin::register("v1", VehicleType::Electric, 1_000);
        assert_eq!(twin.state, VehicleState::Offline);
        assert!(!twin.is_available());
        assert_eq!(twin.last_sequence, 0);
        assert!(twin.battery_level.is_none());
    }

    #[test]
    fn test_state_serializes_screaming_snake() {
        let json = serde_json::to_value(VehicleState::InUse).unwrap();
        assert_eq!(json, "IN_USE");
        let json = serde_json::to_value(VehicleType::Pedal).unwrap();
        assert_eq!(json, "pedal");
    }
}
