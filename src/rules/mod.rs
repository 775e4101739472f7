//! Declarative rule sets, validated once when loaded from JSON.
//!
//! Extraction rules say where a field comes from in a source message;
//! mapping rules say how a template placeholder is filled from extracted
//! fields. Both are JSON objects whose key order is preserved.

pub mod extraction;
pub mod mapping;

pub use extraction::{ConditionSpec, ExtractionRule, ExtractionRuleSet, Locator, REGEX_PREFIX};
pub use mapping::{MappingRule, MappingRuleSet, Resolution, ScalarTransform};

use serde_json::Value;

use crate::error::{EngineError, Result};

/// Parse rule-set text into a JSON object.
fn parse_object(text: &str, what: &str) -> Result<serde_json::Map<String, Value>> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| EngineError::malformed(format!("{what} is not valid JSON: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(EngineError::malformed(format!(
            "{what} must be a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render a JSON scalar as rule text. Strings are taken verbatim.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
