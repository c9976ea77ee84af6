//! Schema-driven argument checking and sanitization.
//!
//! Arguments are validated against the capability's declared input schema before any
//! handler is resolved or executed. Checks run in a fixed order: required fields, then
//! types, then formats (pattern, enum, bounds), so the first reported error is always the
//! most fundamental one. There is no implicit coercion; a numeric string is rejected,
//! never converted.
//!
//! Validation never fails with an exception. It always produces a [`ValidationResult`],
//! which the dispatcher either passes forward (the sanitized argument tree) or turns
//! directly into a JSON-RPC error payload.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The JSON Schema subset understood by the validation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct InputSchema {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, InputSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<InputSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl SchemaType {
    fn name(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::Null => "null",
        }
    }

    fn is_primitive(&self) -> bool {
        !matches!(self, SchemaType::Object | SchemaType::Array)
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
            SchemaType::Null => value.is_null(),
        }
    }
}

/// A single validation failure, citing the offending path and the expected vs. received
/// type so a caller can correct its arguments and retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldError {
    pub path: String,
    pub message: String,
    pub expected_type: String,
    pub received_type: String,
}

/// The outcome of validating one argument tree. Constructed fresh per call; never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub sanitized: Value,
    pub errors: Vec<FieldError>,
}

/// The JSON type of a value, as reported in [`FieldError::received_type`].
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate `args` against `schema`, walking the schema depth-first.
pub fn validate(args: &Value, schema: &InputSchema) -> ValidationResult {
    let mut errors = Vec::new();
    let sanitized = check("", args, schema, &mut errors);
    ValidationResult {
        valid: errors.is_empty(),
        sanitized: sanitized.unwrap_or(Value::Null),
        errors,
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Validate one node. Returns the sanitized value, or `None` when the value was stripped
/// by sanitization or failed a check.
fn check(path: &str, value: &Value, schema: &InputSchema, errors: &mut Vec<FieldError>) -> Option<Value> {
    // `null` is preserved as-is; it is its own JSON type, distinct from absence.
    if value.is_null() && schema.schema_type != Some(SchemaType::Object) {
        return Some(Value::Null);
    }

    match schema.schema_type {
        Some(SchemaType::Object) => check_object(path, value, schema, errors),
        Some(SchemaType::Array) => check_array(path, value, schema, errors),
        Some(ty) if ty.is_primitive() => check_primitive(path, value, ty, schema, errors),
        _ => {
            // No declared type: an object-shaped schema still validates structurally,
            // anything else passes through untouched.
            if schema.properties.is_some() {
                check_object(path, value, schema, errors)
            } else {
                check_enum(path, value, schema, errors);
                Some(value.clone())
            }
        }
    }
}

fn check_object(
    path: &str,
    value: &Value,
    schema: &InputSchema,
    errors: &mut Vec<FieldError>,
) -> Option<Value> {
    let map = match value.as_object() {
        Some(map) => map,
        None => {
            errors.push(FieldError {
                path: path.to_string(),
                message: format!("Expected object, received {}", json_type_name(value)),
                expected_type: "object".to_string(),
                received_type: json_type_name(value).to_string(),
            });
            return None;
        }
    };

    // Required-field checks come first, so a missing field is reported before any
    // wrong-type error nested beneath it.
    if let Some(required) = &schema.required {
        for field in required {
            if !map.contains_key(field) {
                let expected = schema
                    .properties
                    .as_ref()
                    .and_then(|props| props.get(field))
                    .and_then(|prop| prop.schema_type)
                    .map(|ty| ty.name())
                    .unwrap_or("any");
                errors.push(FieldError {
                    path: child_path(path, field),
                    message: format!("Missing required field: {field}"),
                    expected_type: expected.to_string(),
                    received_type: "missing".to_string(),
                });
            }
        }
    }

    let mut sanitized = serde_json::Map::new();
    for (key, entry) in map {
        let prop_schema = schema.properties.as_ref().and_then(|props| props.get(key));
        match prop_schema {
            Some(prop) => {
                if let Some(clean) = check(&child_path(path, key), entry, prop, errors) {
                    sanitized.insert(key.clone(), clean);
                }
            }
            None => {
                // Extra keys are dropped when the schema closes the object, kept
                // verbatim otherwise.
                if schema.additional_properties != Some(false) {
                    sanitized.insert(key.clone(), entry.clone());
                }
            }
        }
    }

    Some(Value::Object(sanitized))
}

fn check_array(
    path: &str,
    value: &Value,
    schema: &InputSchema,
    errors: &mut Vec<FieldError>,
) -> Option<Value> {
    let items = match value.as_array() {
        Some(items) => items,
        None => {
            errors.push(FieldError {
                path: path.to_string(),
                message: format!("Expected array, received {}", json_type_name(value)),
                expected_type: "array".to_string(),
                received_type: json_type_name(value).to_string(),
            });
            return None;
        }
    };

    let sanitized = match &schema.items {
        Some(item_schema) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| check(&format!("{path}[{i}]"), item, item_schema, errors))
            .collect(),
        None => items.clone(),
    };

    check_enum(path, value, schema, errors);
    Some(Value::Array(sanitized))
}

fn check_primitive(
    path: &str,
    value: &Value,
    ty: SchemaType,
    schema: &InputSchema,
    errors: &mut Vec<FieldError>,
) -> Option<Value> {
    // Sanitization: a compound value at a primitive leaf is stripped, not reported.
    if value.is_object() || value.is_array() {
        return None;
    }

    if !ty.matches(value) {
        errors.push(FieldError {
            path: path.to_string(),
            message: format!(
                "Expected {}, received {}",
                ty.name(),
                json_type_name(value)
            ),
            expected_type: ty.name().to_string(),
            received_type: json_type_name(value).to_string(),
        });
        return None;
    }

    check_enum(path, value, schema, errors);

    if let (Some(pattern), Some(s)) = (&schema.pattern, value.as_str()) {
        // The configured expression is used verbatim. An unparseable pattern is caught
        // by config validation at startup; here it reads as a mismatch.
        let matched = Regex::new(pattern).map(|re| re.is_match(s)).unwrap_or(false);
        if !matched {
            errors.push(FieldError {
                path: path.to_string(),
                message: format!("Value does not match pattern: {pattern}"),
                expected_type: ty.name().to_string(),
                received_type: json_type_name(value).to_string(),
            });
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count();
        if schema.min_length.is_some_and(|min| len < min) {
            errors.push(bound_error(path, ty, value, format!("String shorter than minLength ({})", schema.min_length.unwrap())));
        }
        if schema.max_length.is_some_and(|max| len > max) {
            errors.push(bound_error(path, ty, value, format!("String longer than maxLength ({})", schema.max_length.unwrap())));
        }
    }

    if let Some(n) = value.as_f64() {
        if schema.minimum.is_some_and(|min| n < min) {
            errors.push(bound_error(path, ty, value, format!("Value below minimum ({})", schema.minimum.unwrap())));
        }
        if schema.maximum.is_some_and(|max| n > max) {
            errors.push(bound_error(path, ty, value, format!("Value above maximum ({})", schema.maximum.unwrap())));
        }
    }

    Some(value.clone())
}

fn bound_error(path: &str, ty: SchemaType, value: &Value, message: String) -> FieldError {
    FieldError {
        path: path.to_string(),
        message,
        expected_type: ty.name().to_string(),
        received_type: json_type_name(value).to_string(),
    }
}

fn check_enum(path: &str, value: &Value, schema: &InputSchema, errors: &mut Vec<FieldError>) {
    if let Some(allowed) = &schema.enumeration {
        if !allowed.contains(value) {
            errors.push(FieldError {
                path: path.to_string(),
                message: format!(
                    "Value must be one of: {}",
                    allowed
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                expected_type: schema
                    .schema_type
                    .map(|ty| ty.name())
                    .unwrap_or("any")
                    .to_string(),
                received_type: json_type_name(value).to_string(),
            });
        }
    }
}
