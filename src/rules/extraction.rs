//! Extraction rule sets.
//!
//! ```json
//! {
//!   "block1": {"block": 1},
//!   "reference": ":20:",
//!   "beneficiary": {"path": ":59:", "multiple": true, "postprocess": "account_lines"},
//!   "uetr": {"path": "regex:\\{121:([^}]+)\\}"},
//!   "debtor": {
//!     "path": "/def:Document//def:Dbtr",
//!     "fields": {"name": "def:Nm", "lines": {"path": "def:PstlAdr/def:AdrLine", "multiple": true}}
//!   }
//! }
//! ```

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::{json_type, parse_object, scalar_text};
use crate::condition::Condition;
use crate::error::{EngineError, FieldError, Result};

/// Path prefix selecting a regular-expression search over the raw input.
pub const REGEX_PREFIX: &str = "regex:";

/// Where a rule takes its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Numbered envelope segment (`{N:...}`), keyed by its stringified number.
    Block(String),
    /// Regular expression searched over the whole raw input.
    Regex(String),
    /// Tag (text formats) or path expression (XML formats).
    Path(String),
    /// Path whose matches are expanded into nested objects.
    Composite { path: String, fields: ExtractionRuleSet },
    /// No usable address: the field is always null.
    Unset,
}

/// Condition name and operand as written in the rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionSpec {
    pub name: String,
    pub operand: Option<String>,
}

impl ConditionSpec {
    pub fn to_condition(&self) -> std::result::Result<Condition, FieldError> {
        Condition::from_parts(&self.name, self.operand.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRule {
    pub locator: Locator,
    pub condition: Option<ConditionSpec>,
    pub multiple: bool,
    pub postprocess: Option<String>,
}

impl ExtractionRule {
    /// Shorthand rule: a bare path string.
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            locator: locator_for_path(path.into(), None),
            condition: None,
            multiple: false,
            postprocess: None,
        }
    }

    fn from_value(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::String(path) => Ok(Self::path(path.clone())),
            Value::Object(entry) => Self::from_entry(field, entry),
            other => Err(EngineError::malformed(format!(
                "rule '{field}' must be a string or an object, got {}",
                json_type(other)
            ))),
        }
    }

    fn from_entry(field: &str, entry: &Map<String, Value>) -> Result<Self> {
        let path = optional_string(field, entry, "path")?;
        let postprocess = optional_string(field, entry, "postprocess")?.filter(|p| !p.is_empty());
        let condition = optional_string(field, entry, "condition")?
            .filter(|c| !c.is_empty())
            .map(|name| ConditionSpec {
                name,
                operand: entry.get("value").and_then(scalar_text),
            });

        let multiple = match entry.get("multiple") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(EngineError::malformed(format!(
                    "rule '{field}': 'multiple' must be a boolean, got {}",
                    json_type(other)
                )))
            }
        };

        let fields = match entry.get("fields") {
            None | Some(Value::Null) => None,
            Some(Value::Object(nested)) => Some(ExtractionRuleSet::from_map(nested)?),
            Some(other) => {
                return Err(EngineError::malformed(format!(
                    "rule '{field}': 'fields' must be an object, got {}",
                    json_type(other)
                )))
            }
        };

        let locator = match entry.get("block") {
            None | Some(Value::Null) => match path {
                Some(path) => locator_for_path(path, fields),
                None => Locator::Unset,
            },
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Locator::Block(n.to_string()),
            Some(Value::String(s)) => Locator::Block(s.trim().to_string()),
            Some(other) => {
                return Err(EngineError::malformed(format!(
                    "rule '{field}': 'block' must be an integer, got {}",
                    json_type(other)
                )))
            }
        };

        Ok(Self {
            locator,
            condition,
            multiple,
            postprocess,
        })
    }
}

fn locator_for_path(path: String, fields: Option<ExtractionRuleSet>) -> Locator {
    if path.is_empty() {
        return Locator::Unset;
    }
    if let Some(pattern) = path.strip_prefix(REGEX_PREFIX) {
        return Locator::Regex(pattern.trim().to_string());
    }
    match fields {
        Some(fields) => Locator::Composite { path, fields },
        None => Locator::Path(path),
    }
}

fn optional_string(field: &str, entry: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match entry.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(EngineError::malformed(format!(
            "rule '{field}': '{key}' must be a string, got {}",
            json_type(other)
        ))),
    }
}

/// Output field name to rule, in rule-set order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionRuleSet {
    rules: IndexMap<String, ExtractionRule>,
}

impl ExtractionRuleSet {
    /// Parse and validate rule-set JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        parse_object(text, "extraction rule set")
            .and_then(|map| Self::from_map(&map))
            .map_err(|e| {
                tracing::warn!(error = %e, "failed to load extraction rule set");
                e
            })
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let rules = map
            .iter()
            .map(|(field, value)| Ok((field.clone(), ExtractionRule::from_value(field, value)?)))
            .collect::<Result<IndexMap<_, _>>>()?;
        Ok(Self { rules })
    }

    pub fn insert(&mut self, field: impl Into<String>, rule: ExtractionRule) {
        self.rules.insert(field.into(), rule);
    }

    pub fn get(&self, field: &str) -> Option<&ExtractionRule> {
        self.rules.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExtractionRule)> {
        self.rules.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
