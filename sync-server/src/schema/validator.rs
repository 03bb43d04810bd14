//! Payload validation against resolved schemas
//!
//! Fail-closed: an envelope that does not validate is refused
//! (dead-lettered by the caller), never passed through degraded.

use std::sync::Arc;

use shared::envelope::EventEnvelope;
use shared::error::{SyncError, SyncResult};

use super::{SchemaDef, SchemaRegistry};

/// Validate a JSON payload against a schema definition
///
/// Checks shape (object), required-field presence, and the kind of every
/// field the schema knows about. Unknown fields are permitted: they are
/// what a newer minor version adds.
pub fn validate_value(def: &SchemaDef, payload: &serde_json::Value) -> SyncResult<()> {
    let object = payload.as_object().ok_or_else(|| {
        SyncError::schema(format!("{}: payload is not an object", def.subject))
    })?;

    for field in &def.fields {
        match object.get(&field.name) {
            Some(value) => {
                if !field.kind.matches(value) {
                    return Err(SyncError::schema(format!(
                        "{}: field `{}` expected {}, got {}",
                        def.subject,
                        field.name,
                        field.kind,
                        json_kind(value)
                    )));
                }
            }
            None if field.required => {
                return Err(SyncError::schema(format!(
                    "{}: missing required field `{}`",
                    def.subject, field.name
                )));
            }
            None => {}
        }
    }
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Envelope validator bound to a registry and a pinned major version
///
/// The producing side validates against the version it writes; the
/// consuming side additionally rejects envelopes written with a
/// different major (incompatible schema, distinct error).
pub struct SchemaValidator {
    registry: Arc<dyn SchemaRegistry>,
    pinned_major: u16,
}

impl SchemaValidator {
    pub fn new(registry: Arc<dyn SchemaRegistry>, pinned_major: u16) -> Self {
        Self {
            registry,
            pinned_major,
        }
    }

    pub fn pinned_major(&self) -> u16 {
        self.pinned_major
    }

    /// Validate an envelope's payload against its declared schema
    pub async fn validate(&self, envelope: &EventEnvelope) -> SyncResult<()> {
        if envelope.schema_version.major != self.pinned_major {
            return Err(SyncError::IncompatibleSchema {
                subject: envelope.schema_subject.clone(),
                writer: envelope.schema_version.to_string(),
                reader_major: self.pinned_major,
            });
        }

        let def = self
            .registry
            .resolve(&envelope.schema_subject, envelope.schema_version)
            .await?;

        let payload = serde_json::to_value(&envelope.payload)
            .map_err(|e| SyncError::schema(e.to_string()))?;
        validate_value(&def, &payload)
    }
}
