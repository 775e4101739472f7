//! Mapping rule sets: template placeholder to the way its value is resolved.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::{json_type, parse_object, scalar_text};
use crate::error::{EngineError, Result};

/// How a placeholder's base value is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Several fields fed to a named combinator.
    Composite { sources: Vec<String>, combinator: String },
    /// One field, with a fallback when it is absent or empty.
    Source { field: String, default: Option<String> },
    /// A literal value.
    Default(String),
    /// Always the empty string.
    Empty,
}

/// Case or date transform applied after resolution and prefixing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarTransform {
    None,
    Uppercase,
    Lowercase,
    DateFormat(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pub resolution: Resolution,
    pub prefix: Option<String>,
    pub transform: ScalarTransform,
}

impl MappingRule {
    pub fn empty() -> Self {
        Self {
            resolution: Resolution::Empty,
            prefix: None,
            transform: ScalarTransform::None,
        }
    }

    /// Build a rule from its JSON form. Entries that are not objects resolve
    /// to the empty string.
    fn from_value(placeholder: &str, value: &Value) -> Result<Self> {
        let Value::Object(entry) = value else {
            return Ok(Self::empty());
        };

        let text = |key: &str| entry.get(key).and_then(scalar_text).filter(|s| !s.is_empty());

        let sources = match entry.get("sources") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        EngineError::malformed(format!(
                            "mapping '{placeholder}': 'sources' must hold field names, got {}",
                            json_type(item)
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(EngineError::malformed(format!(
                    "mapping '{placeholder}': 'sources' must be an array, got {}",
                    json_type(other)
                )))
            }
        };

        let transform_name = text("transform");
        // "default": null still counts as a literal default.
        let default = entry
            .get("default")
            .map(|v| scalar_text(v).unwrap_or_default());

        let resolution = match (&transform_name, text("source")) {
            (Some(combinator), _) if !sources.is_empty() => Resolution::Composite {
                sources,
                combinator: combinator.clone(),
            },
            (_, Some(field)) => Resolution::Source { field, default },
            _ => match default {
                Some(literal) => Resolution::Default(literal),
                None => Resolution::Empty,
            },
        };

        let transform = match transform_name.as_deref() {
            Some("uppercase") => ScalarTransform::Uppercase,
            Some("lowercase") => ScalarTransform::Lowercase,
            Some("date_format") => match text("date_format") {
                Some(format) => ScalarTransform::DateFormat(format),
                None => ScalarTransform::None,
            },
            _ => ScalarTransform::None,
        };

        Ok(Self {
            resolution,
            prefix: text("prefix"),
            transform,
        })
    }
}

/// Placeholder name to mapping rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingRuleSet {
    rules: IndexMap<String, MappingRule>,
}

impl MappingRuleSet {
    pub fn from_json(text: &str) -> Result<Self> {
        parse_object(text, "mapping rule set")
            .and_then(|map| Self::from_map(&map))
            .map_err(|e| {
                tracing::warn!(error = %e, "failed to load mapping rule set");
                e
            })
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        let rules = map
            .iter()
            .map(|(name, value)| Ok((name.clone(), MappingRule::from_value(name, value)?)))
            .collect::<Result<IndexMap<_, _>>>()?;
        Ok(Self { rules })
    }

    pub fn insert(&mut self, placeholder: impl Into<String>, rule: MappingRule) {
        self.rules.insert(placeholder.into(), rule);
    }

    pub fn get(&self, placeholder: &str) -> Option<&MappingRule> {
        self.rules.get(placeholder)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
