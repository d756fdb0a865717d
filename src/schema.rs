//! JSON Schema validation of response bodies
//!
//! Schemas are compiled with the `jsonschema` crate and every violation is collected
//! instead of stopping at the first one. XSD validation lives in `xsd`.

use jsonschema::error::ValidationErrorKind;
use jsonschema::{JSONSchema, ValidationError};
use serde_json::Value as JsonValue;

use crate::json_compare::{ComparisonResult, Mismatch};

/// Relative tolerance for `multipleOf` on fractional steps, so 0.3 is a multiple of 0.1
const MULTIPLE_OF_TOLERANCE: f64 = 1e-9;

/// Compiled JSON Schema (draft 7 unless `$schema` names another draft)
pub struct JsonSchemaValidator {
    compiled: JSONSchema,
}

impl std::fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchemaValidator").finish_non_exhaustive()
    }
}

impl JsonSchemaValidator {
    pub fn compile(schema: &JsonValue) -> Result<Self, String> {
        JSONSchema::compile(schema)
            .map(|compiled| Self { compiled })
            .map_err(|e| format!("Invalid JSON schema: {}", e))
    }

    pub fn parse(schema: &str) -> Result<Self, String> {
        let schema: JsonValue =
            serde_json::from_str(schema).map_err(|e| format!("Schema is not valid JSON: {}", e))?;
        Self::compile(&schema)
    }

    pub fn validate(&self, instance: &JsonValue) -> ComparisonResult {
        let mut result = ComparisonResult::default();
        if let Err(errors) = self.compiled.validate(instance) {
            result.mismatches = errors
                .filter(|error| !is_float_rounding(error))
                .map(|error| Mismatch {
                    path: pointer_to_path(&error.instance_path.to_string()),
                    message: error.to_string(),
                })
                .collect();
        }
        result
    }
}

/// `multipleOf` failures caused only by binary float rounding
fn is_float_rounding(error: &ValidationError) -> bool {
    let ValidationErrorKind::MultipleOf { multiple_of } = &error.kind else {
        return false;
    };
    let Some(value) = error.instance.as_f64() else {
        return false;
    };
    let quotient = value / multiple_of;
    quotient.is_finite() && (quotient - quotient.round()).abs() <= MULTIPLE_OF_TOLERANCE * quotient.abs().max(1.0)
}

/// `/items/0/name` becomes `items[0].name`; the document root is `$`
fn pointer_to_path(pointer: &str) -> String {
    let mut path = String::new();
    for segment in pointer.split('/').skip(1) {
        let segment = segment.replace("~1", "/").replace("~0", "~");
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            path.push_str(&format!("[{}]", segment));
        } else {
            if !path.is_empty() {
                path.push('.');
            }
            path.push_str(&segment);
        }
    }
    if path.is_empty() {
        "$".to_string()
    } else {
        path
    }
}
