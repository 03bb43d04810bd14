//! Schema registry and payload validation
//!
//! Every payload is validated against a registered, versioned schema
//! before it is allowed onto the bus, and again (compatibility-checked)
//! before a consumer applies it. Versions are immutable once registered;
//! evolution rules:
//!
//! - minor bump: adds optional fields only (backward compatible)
//! - major bump: adds required fields or changes a field kind
//!   (incompatible, rejected by consumers pinned to the older major)

mod registry;
mod validator;

pub use registry::{CachedRegistry, InMemoryRegistry, SchemaRegistry};
pub use validator::{validate_value, SchemaValidator};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::envelope::{FleetEventType, SchemaVersion};

/// Field value kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Object,
    Array,
}

impl FieldKind {
    /// Whether a JSON value inhabits this kind
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::String => write!(f, "string"),
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Float => write!(f, "float"),
            FieldKind::Boolean => write!(f, "boolean"),
            FieldKind::Object => write!(f, "object"),
            FieldKind::Array => write!(f, "array"),
        }
    }
}

/// One named field of a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
        }
    }
}

/// A registered schema version for a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub subject: String,
    pub version: SchemaVersion,
    pub fields: Vec<FieldDef>,
}

impl SchemaDef {
    pub fn new(subject: impl Into<String>, version: SchemaVersion, fields: Vec<FieldDef>) -> Self {
        Self {
            subject: subject.into(),
            version,
            fields,
        }
    }

    /// Content-addressed fingerprint over the canonical field list
    ///
    /// 指纹只取决于字段定义，与注册顺序无关；用于日志与注册审计。
    pub fn fingerprint(&self) -> String {
        let mut fields: Vec<&FieldDef> = self.fields.iter().collect();
        fields.sort_by(|a, b| a.name.cmp(&b.name));

        let mut hasher = Sha256::new();
        hasher.update(self.subject.as_bytes());
        for field in fields {
            hasher.update(field.name.as_bytes());
            hasher.update(field.kind.to_string().as_bytes());
            hasher.update([u8::from(field.required)]);
        }

        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// The payload tag field written by the envelope serializer
pub const TYPE_TAG_FIELD: &str = "type";

/// Built-in v1.0 schemas for every fleet event subject
///
/// Registered at startup; further versions are appended through the
/// registry's write path.
pub fn builtin_schemas() -> Vec<SchemaDef> {
    let v1 = SchemaVersion::new(1, 0);
    let tag = || FieldDef::required(TYPE_TAG_FIELD, FieldKind::String);

    vec![
        SchemaDef::new(
            FleetEventType::VehicleRegistered.schema_subject(),
            v1,
            vec![tag(), FieldDef::required("vehicle_type", FieldKind::String)],
        ),
        SchemaDef::new(
            FleetEventType::VehicleDeregistered.schema_subject(),
            v1,
            vec![tag(), FieldDef::optional("reason", FieldKind::String)],
        ),
        SchemaDef::new(
            FleetEventType::TelemetryUpdated.schema_subject(),
            v1,
            vec![
                tag(),
                FieldDef::required("location", FieldKind::Object),
                FieldDef::optional("battery_level", FieldKind::Integer),
            ],
        ),
        SchemaDef::new(
            FleetEventType::FaultReported.schema_subject(),
            v1,
            vec![
                tag(),
                FieldDef::required("fault_code", FieldKind::String),
                FieldDef::optional("detail", FieldKind::String),
            ],
        ),
        SchemaDef::new(
            FleetEventType::ServiceCompleted.schema_subject(),
            v1,
            vec![tag()],
        ),
        SchemaDef::new(
            FleetEventType::RideRequested.schema_subject(),
            v1,
            vec![tag(), FieldDef::required("rider_id", FieldKind::String)],
        ),
        SchemaDef::new(
            FleetEventType::RideStarted.schema_subject(),
            v1,
            vec![tag(), FieldDef::required("rider_id", FieldKind::String)],
        ),
        SchemaDef::new(FleetEventType::RideEnded.schema_subject(), v1, vec![tag()]),
        SchemaDef::new(
            FleetEventType::RideCancelled.schema_subject(),
            v1,
            vec![tag(), FieldDef::optional("reason", FieldKind::String)],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_field_order() {
        let a = SchemaDef::new(
            "fleet.test",
            SchemaVersion::new(1, 0),
            vec![
                FieldDef::required("alpha", FieldKind::String),
                FieldDef::optional("beta", FieldKind::Integer),
            ],
        );
        let b = SchemaDef::new(
            "fleet.test",
            SchemaVersion::new(1, 0),
            vec![
                FieldDef::optional("beta", FieldKind::Integer),
                FieldDef::required("alpha", FieldKind::String),
            ],
        );
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_requiredness() {
        let a = SchemaDef::new(
            "fleet.test",
            SchemaVersion::new(1, 0),
            vec![FieldDef::required("alpha", FieldKind::String)],
        );
        let b = SchemaDef::new(
            "fleet.test",
            SchemaVersion::new(1, 0),
            vec![FieldDef::optional("alpha", FieldKind::String)],
        );
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_builtin_covers_every_event_type() {
        let subjects: Vec<String> = builtin_schemas().into_iter().map(|s| s.subject).collect();
        for event_type in [
            FleetEventType::VehicleRegistered,
            FleetEventType::VehicleDeregistered,
            FleetEventType::TelemetryUpdated,
            FleetEventType::FaultReported,
            FleetEventType::ServiceCompleted,
            FleetEventType::RideRequested,
            FleetEventType::RideStarted,
            FleetEventType::RideEnded,
            FleetEventType::RideCancelled,
        ] {
            assert!(
                subjects.contains(&event_type.schema_subject().to_string()),
                "missing builtin schema for {}",
                event_type
            );
        }
    }

    #[test]
    fn test_field_kind_matching() {
        assert!(FieldKind::Integer.matches(&serde_json::json!(42)));
        assert!(!FieldKind::Integer.matches(&serde_json::json!(1.5)));
        assert!(FieldKind::Float.matches(&serde_json::json!(1.5)));
        assert!(FieldKind::Float.matches(&serde_json::json!(3)));
        assert!(FieldKind::Object.matches(&serde_json::json!({"lat": 1.0})));
        assert!(!FieldKind::String.matches(&serde_json::json!(null)));
    }
}
