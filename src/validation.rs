//! Required-field check against a JSON schema's `required` list.
//!
//! Full schema validation belongs to the caller; this only reports which
//! required fields came out empty.

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::extraction::FieldDictionary;

/// Names listed under the schema's top-level `required` array whose value
/// is absent, `null`, `""`, `[]` or `{}`, in schema order.
///
/// A schema without `required` yields an empty list. A schema that is not
/// a JSON object is `ConfigurationMalformed`.
pub fn missing_required_fields(fields: &FieldDictionary, schema_json: &str) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(schema_json)
        .map_err(|e| EngineError::malformed(format!("schema is not valid JSON: {e}")))?;
    let Value::Object(schema) = schema else {
        return Err(EngineError::malformed("schema must be a JSON object"));
    };

    let required = match schema.get("required") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(names)) => names,
        Some(_) => return Err(EngineError::malformed("schema 'required' must be an array")),
    };

    Ok(required
        .iter()
        .filter_map(Value::as_str)
        .filter(|name| fields.get(*name).map_or(true, is_empty))
        .map(str::to_string)
        .collect())
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
