//! Predicates applied to a single extracted value.

use regex::Regex;
use serde_json::Value;

use crate::error::FieldError;

/// A condition attached to an extraction rule.
///
/// The operand is kept as given; `Regex` patterns are compiled when the
/// condition is applied so a bad pattern only nulls the owning field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Contains(String),
    Equals(String),
    NotEquals(String),
    StartsWith(String),
    EndsWith(String),
    Regex(String),
    /// Unrecognised condition name. Values pass through unchanged.
    Unknown(String),
}

impl Condition {
    /// Build a condition from its rule-set name and operand.
    ///
    /// A known condition without an operand is an error; unknown names never
    /// need one.
    pub fn from_parts(name: &str, operand: Option<&str>) -> Result<Self, FieldError> {
        let operand = || {
            operand
                .map(str::to_string)
                .ok_or_else(|| FieldError::MissingOperand(name.to_string()))
        };

        Ok(match name {
            "contains" => Condition::Contains(operand()?),
            "equals" => Condition::Equals(operand()?),
            "not_equals" => Condition::NotEquals(operand()?),
            "starts_with" => Condition::StartsWith(operand()?),
            "ends_with" => Condition::EndsWith(operand()?),
            "regex" => Condition::Regex(operand()?),
            other => Condition::Unknown(other.to_string()),
        })
    }

    /// Test a string against the condition.
    pub fn matches(&self, value: &str) -> Result<bool, FieldError> {
        Ok(match self {
            Condition::Contains(op) => value.contains(op.as_str()),
            Condition::Equals(op) => value == op,
            Condition::NotEquals(op) => value != op,
            Condition::StartsWith(op) => value.starts_with(op.as_str()),
            Condition::EndsWith(op) => value.ends_with(op.as_str()),
            Condition::Regex(pattern) => {
                let re = Regex::new(pattern).map_err(|e| FieldError::BadRegex {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                re.is_match(value)
            }
            Condition::Unknown(_) => true,
        })
    }
}

/// Apply a condition to a scalar value: the value survives unchanged when it
/// matches, otherwise the result is `None`. `None` in gives `None` out.
pub fn apply(value: Option<&str>, condition: &Condition) -> Result<Option<String>, FieldError> {
    match value {
        None => Ok(None),
        Some(v) if condition.matches(v)? => Ok(Some(v.to_string())),
        Some(_) => Ok(None),
    }
}

/// Apply a condition to an extracted JSON value.
///
/// With `multiple` set, every string in a list is tested on its own and the
/// ones that fail are dropped. Objects (composite results) are not filtered.
pub fn apply_to_value(value: Value, condition: &Condition, multiple: bool) -> Result<Value, FieldError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(apply(Some(&s), condition)?.map_or(Value::Null, Value::String)),
        Value::Array(items) if multiple => {
            let mut kept = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => {
                        if condition.matches(&s)? {
                            kept.push(Value::String(s));
                        }
                    }
                    Value::Null => {}
                    other => kept.push(other),
                }
            }
            Ok(Value::Array(kept))
        }
        other => Ok(other),
    }
}
