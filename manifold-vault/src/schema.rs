//! Typed payload validation per integration type.
//!
//! The vault refuses to store a payload whose required fields are missing or
//! empty. `Custom` payloads only need to be a non-empty object.

use serde_json::Value;

use manifold_core::model::secret::IntegrationType;

use crate::error::VaultError;

/// Validate a typed payload against the integration's required fields.
pub fn validate_payload(
    integration_type: IntegrationType,
    payload: &Value,
) -> Result<(), VaultError> {
    let object = payload
        .as_object()
        .ok_or_else(|| VaultError::SchemaViolation("payload must be an object".into()))?;
    if object.is_empty() {
        return Err(VaultError::SchemaViolation("payload is empty".into()));
    }
    for field in integration_type.required_fields() {
        match object.get(*field) {
            None | Some(Value::Null) => {
                return Err(VaultError::SchemaViolation(format!(
                    "missing required field '{field}'"
                )));
            }
            Some(Value::String(s)) if s.is_empty() => {
                return Err(VaultError::SchemaViolation(format!(
                    "required field '{field}' is empty"
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
