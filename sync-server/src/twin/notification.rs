//! Twin-platform change notifications
//!
//! The twin platform delivers loosely-typed JSON. It is parsed exactly
//! once, here, into the closed [`TwinChange`] set; everything downstream
//! works with validated variants. Field names follow the platform's
//! camelCase convention.

use shared::models::{GeoPoint, VehicleType};

/// A change notification normalized at the adapter boundary
#[derive(Debug, Clone, PartialEq)]
pub enum TwinChange {
    /// Periodic telemetry: position and (electric only) battery
    Telemetry {
        vehicle_id: String,
        timestamp: i64,
        location: GeoPoint,
        battery_level: Option<u8>,
        vehicle_type: VehicleType,
    },
    /// Fault code raised by the vehicle
    Fault {
        vehicle_id: String,
        timestamp: i64,
        fault_code: String,
        detail: Option<String>,
    },
    /// Maintenance crew marked the vehicle serviced
    ServiceComplete { vehicle_id: String, timestamp: i64 },
    /// Vehicle removed from the twin platform
    Deregistration {
        vehicle_id: String,
        timestamp: i64,
        reason: Option<String>,
    },
}

impl TwinChange {
    pub fn vehicle_id(&self) -> &str {
        match self {
            TwinChange::Telemetry { vehicle_id, .. }
            | TwinChange::Fault { vehicle_id, .. }
            | TwinChange::ServiceComplete { vehicle_id, .. }
            | TwinChange::Deregistration { vehicle_id, .. } => vehicle_id,
        }
    }

    /// The propulsion type carried by (or inferred from) the notification
    pub fn vehicle_type(&self) -> VehicleType {
        match self {
            TwinChange::Telemetry { vehicle_type, .. } => *vehicle_type,
            _ => VehicleType::Pedal,
        }
    }
}

/// Why a notification was refused at the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingVehicleId,
    MissingChangeType,
    UnknownChangeType(String),
    MissingTimestamp,
    MalformedField(&'static str),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MissingVehicleId => write!(f, "missing required field `vehicleId`"),
            RejectReason::MissingChangeType => write!(f, "missing required field `changeType`"),
            RejectReason::UnknownChangeType(t) => write!(f, "unknown changeType `{}`", t),
            RejectReason::MissingTimestamp => write!(f, "missing required field `timestamp`"),
            RejectReason::MalformedField(name) => write!(f, "malformed field `{}`", name),
        }
    }
}

/// Parse a raw notification into the closed change set
///
/// Required fields: `vehicleId`, `changeType`, `timestamp`. A rejected
/// notification is dead-lettered by the caller without consuming a
/// sequence number.
pub fn parse_notification(raw: &serde_json::Value) -> Result<TwinChange, RejectReason> {
    let vehicle_id = raw
        .get("vehicleId")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or(RejectReason::MissingVehicleId)?
        .to_string();

    let change_type = raw
        .get("changeType")
        .and_then(|v| v.as_str())
        .ok_or(RejectReason::MissingChangeType)?;

    let timestamp = raw
        .get("timestamp")
        .and_then(|v| v.as_i64())
        .ok_or(RejectReason::MissingTimestamp)?;

    match change_type {
        "telemetry-update" => {
            let location = raw
                .get("location")
                .and_then(parse_location)
                .ok_or(RejectReason::MalformedField("location"))?;

            let battery_level = match raw.get("batteryLevel") {
                None | Some(serde_json::Value::Null) => None,
                Some(v) => Some(
                    v.as_u64()
                        .filter(|&pct| pct <= 100)
                        .ok_or(RejectReason::MalformedField("batteryLevel"))?
                        as u8,
                ),
            };

            // Explicit type wins; otherwise a battery reading implies electric
            let vehicle_type = match raw.get("vehicleType").and_then(|v| v.as_str()) {
                Some("electric") => VehicleType::Electric,
                Some("pedal") => VehicleType::Pedal,
                Some(_) => return Err(RejectReason::MalformedField("vehicleType")),
                None if battery_level.is_some() => VehicleType::Electric,
                None => VehicleType::Pedal,
            };

            Ok(TwinChange::Telemetry {
                vehicle_id,
                timestamp,
                location,
                battery_level,
                vehicle_type,
            })
        }
        "fault" => {
            let fault_code = raw
                .get("faultCode")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .ok_or(RejectReason::MalformedField("faultCode"))?
                .to_string();
            let detail = raw
                .get("detail")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Ok(TwinChange::Fault {
                vehicle_id,
                timestamp,
                fault_code,
                detail,
            })
        }
        "service-complete" => Ok(TwinChange::ServiceComplete {
            vehicle_id,
            timestamp,
        }),
        "deregistration" => Ok(TwinChange::Deregistration {
            vehicle_id,
            timestamp,
            reason: raw
                .get("reason")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }),
        other => Err(RejectReason::UnknownChangeType(other.to_string())),
    }
}

fn parse_location(value: &serde_json::Value) -> Option<GeoPoint> {
    Some(GeoPoint {
        lat: value.get("lat")?.as_f64()?,
        lng: value.get("lng")?.as_f64()?,
    })
}
