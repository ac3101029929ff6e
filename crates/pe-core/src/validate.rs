// SPDX-License-Identifier: MIT OR Apache-2.0
//! Validation of incoming runtime specifications.
//!
//! Validation is pass/fail against a fixed JSON Schema and never mutates or
//! corrects the input. Only a specification that passes is deserialized into
//! a typed [`RuntimeSpecification`].

use std::sync::LazyLock;

use pe_error::{EngineError, ErrorCode};
use serde_json::{Value, json};

use crate::{RuntimeSpecification, SR};

fn component_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "CPU": { "type": "number" },
            "MEMORY": { "type": "integer", "minimum": 0 },
            "DISK_SIZE": { "type": "integer", "minimum": 0 },
            "FLAVOUR": { "type": "string" }
        },
        "required": ["FLAVOUR"]
    })
}

/// The JSON Schema every runtime specification must satisfy.
pub fn specification_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "SERVERLESS_RUNTIME": {
                "type": "object",
                "properties": {
                    "NAME": { "type": "string" },
                    "ID": { "type": "integer" },
                    "SERVICE_ID": { "type": "integer" },
                    "FAAS": component_schema(),
                    "DAAS": {
                        "oneOf": [
                            component_schema(),
                            { "type": "null" }
                        ]
                    },
                    "SCHEDULING": {
                        "type": "object",
                        "properties": {
                            "POLICY": { "type": "string" },
                            "REQUIREMENTS": { "type": "string" }
                        }
                    },
                    "DEVICE_INFO": {
                        "type": "object",
                        "properties": {
                            "LATENCY_TO_PE": { "type": "integer" },
                            "GEOGRAPHIC_LOCATION": { "type": "string" }
                        }
                    }
                },
                "required": ["FAAS"]
            }
        },
        "required": ["SERVERLESS_RUNTIME"]
    })
}

static VALIDATOR: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    jsonschema::validator_for(&specification_schema())
        .expect("built-in specification schema must compile")
});

/// Validate a raw specification document.
///
/// Returns `Ok(())` when the document satisfies the schema, or `Err(reason)`
/// listing every violation found.
pub fn validate_specification(specification: &Value) -> Result<(), String> {
    let violations: Vec<String> = VALIDATOR
        .iter_errors(specification)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{e} at {path}")
            }
        })
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Invalid {SR} specification: {}",
            violations.join("; ")
        ))
    }
}

/// Validate and deserialize a raw specification document.
///
/// # Errors
///
/// [`ErrorCode::InvalidSpecification`] if the schema rejects the document or
/// the validated document still fails typed deserialization.
pub fn parse_specification(specification: &Value) -> Result<RuntimeSpecification, EngineError> {
    validate_specification(specification)
        .map_err(|reason| EngineError::new(ErrorCode::InvalidSpecification, reason))?;

    let inner = specification
        .get("SERVERLESS_RUNTIME")
        .cloned()
        .unwrap_or(Value::Null);
    serde_json::from_value(inner).map_err(|e| {
        EngineError::new(
            ErrorCode::InvalidSpecification,
            format!("Invalid {SR} specification: {e}"),
        )
        .with_source(e)
    })
}
