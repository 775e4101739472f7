//! Built-in post-processors for tagged-text party and remittance blocks.
//!
//! Both accept either a list of lines (the usual shape of a `multiple` tag
//! rule) or a single string, which is split into lines first.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::transform_registry::TransformError;

/// Registry name of [`account_lines`].
pub const ACCOUNT_LINES: &str = "account_lines";
/// Registry name of [`remittance_lines`].
pub const REMITTANCE_LINES: &str = "remittance_lines";

lazy_static! {
    static ref SEPARATOR: Regex = Regex::new(r"/+").unwrap();
}

fn as_lines(value: &Value) -> Result<Vec<String>, TransformError> {
    match value {
        Value::String(s) => Ok(s.lines().map(str::to_string).collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(TransformError::InvalidArgs(format!(
                    "expected a list of strings, found {other}"
                ))),
            })
            .collect(),
        other => Err(TransformError::InvalidArgs(format!(
            "expected a string or a list of lines, found {other}"
        ))),
    }
}

/// Split a party block into its account and free-text lines.
///
/// A first line starting with `/` carries the account number (slash
/// removed); otherwise `account_number` is null and every line is kept.
///
/// ```text
/// ["/12345", "ACME", "LONDON"] -> {"account_number": "12345", "lines": ["ACME", "LONDON"]}
/// ```
pub fn account_lines(value: &Value) -> Result<Value, TransformError> {
    let lines = as_lines(value)?;
    if lines.is_empty() {
        return Ok(Value::Null);
    }

    let (account_number, rest) = match lines[0].strip_prefix('/') {
        Some(account) => (Value::String(account.to_string()), &lines[1..]),
        None => (Value::Null, &lines[..]),
    };

    Ok(json!({
        "account_number": account_number,
        "lines": rest,
    }))
}

/// Parse one `/KEY/VALUE/KEY/VALUE` remittance line.
///
/// Runs of slashes are a single separator. A trailing key with no value
/// maps to null.
pub fn parse_remittance_line(line: &str) -> Map<String, Value> {
    let segments: Vec<&str> = SEPARATOR
        .split(line)
        .filter(|segment| !segment.is_empty())
        .collect();

    let mut parsed = Map::new();
    for pair in segments.chunks(2) {
        let value = pair
            .get(1)
            .map_or(Value::Null, |v| Value::String((*v).to_string()));
        parsed.insert(pair[0].to_string(), value);
    }
    parsed
}

/// Parse every remittance line; lines with no segments are skipped.
pub fn remittance_lines(value: &Value) -> Result<Value, TransformError> {
    let parsed = as_lines(value)?
        .iter()
        .map(|line| parse_remittance_line(line))
        .filter(|entry| !entry.is_empty())
        .map(Value::Object)
        .collect();
    Ok(Value::Array(parsed))
}
