//! Rule-driven field extraction from tagged text and XML messages.
//!
//! Both formats share one interpreter. Block and regex rules work on the raw
//! input whatever the format; path rules go through a [`FieldSource`], which is
//! the tag map for text messages and the element tree for XML. Resolution
//! problems on a single field are logged and leave that field `null`.

use std::collections::HashMap;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::condition;
use crate::error::{EngineError, FieldError, Result};
use crate::rules::{ExtractionRule, ExtractionRuleSet, Locator};
use crate::tags::{envelope_blocks, TagBlockMap};
use crate::transform_registry::{TransformError, TransformRegistry};
use crate::xml::{NodeId, XPathItem, XmlDocument};

/// Output of an extraction: field name to JSON value, in rule-set order.
pub type FieldDictionary = Map<String, Value>;

/// Which parser a message goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// Tagged text (SWIFT MT style).
    Text,
    /// XML / ISO 20022.
    Xml,
}

impl MessageFormat {
    /// Pick the parser for a declared file type and, optionally, the name of
    /// the uploaded file.
    ///
    /// # Example
    ///
    /// ```ignore
    /// assert_eq!(MessageFormat::detect("MT103", None)?, MessageFormat::Text);
    /// assert_eq!(MessageFormat::detect("pacs.008", None)?, MessageFormat::Xml);
    /// assert_eq!(MessageFormat::detect("custom", Some("in.xml"))?, MessageFormat::Xml);
    /// ```
    pub fn detect(file_type: &str, filename: Option<&str>) -> Result<Self> {
        let declared = file_type.trim().to_lowercase();
        let uploaded_xml = filename.is_some_and(|name| name.to_lowercase().ends_with(".xml"));

        if declared == "text" || declared.starts_with("mt") {
            Ok(MessageFormat::Text)
        } else if declared == "xml"
            || declared.ends_with(".xml")
            || declared.starts_with("pacs")
            || declared.starts_with("pain")
            || uploaded_xml
        {
            Ok(MessageFormat::Xml)
        } else {
            Err(EngineError::UnsupportedFileType(file_type.to_string()))
        }
    }
}

/// Something path rules can be resolved against.
///
/// Block and regex locators are handled once for every source in
/// [`FieldSource::resolve`]; implementors only answer path and composite
/// locators.
pub trait FieldSource {
    /// The raw message text.
    fn raw(&self) -> &str;

    /// Numbered envelope segments of the raw message.
    fn envelope(&self) -> &HashMap<String, String>;

    /// Resolve a `Path` or `Composite` locator.
    fn locate(&self, rule: &ExtractionRule, registry: &TransformRegistry) -> std::result::Result<Value, FieldError>;

    /// Resolve one rule: locate the value, then apply its condition and
    /// post-processor.
    fn resolve(&self, rule: &ExtractionRule, registry: &TransformRegistry) -> std::result::Result<Value, FieldError> {
        let value = match &rule.locator {
            Locator::Block(number) => self
                .envelope()
                .get(number)
                .map_or(Value::Null, |text| Value::String(text.clone())),
            Locator::Regex(pattern) => regex_search(self.raw(), pattern, rule.multiple)?,
            Locator::Path(_) | Locator::Composite { .. } => self.locate(rule, registry)?,
            Locator::Unset => Value::Null,
        };

        let value = match &rule.condition {
            Some(cond) => condition::apply_to_value(value, &cond.to_condition()?, rule.multiple)?,
            None => value,
        };

        match &rule.postprocess {
            Some(name) if is_truthy(&value) => postprocess(registry, name, value),
            _ => Ok(value),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

fn postprocess(registry: &TransformRegistry, name: &str, value: Value) -> std::result::Result<Value, FieldError> {
    match registry.postprocess(name, &value) {
        Ok(processed) => Ok(processed),
        Err(TransformError::NotFound(_)) => {
            tracing::debug!(postprocess = name, "no such post-processor, value kept");
            Ok(value)
        }
        Err(e) => Err(FieldError::PostProcess {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Search the whole input in multi-line, dot-matches-newline mode.
///
/// Each match contributes its first capture group when that group took part
/// in the match, otherwise the whole match; values are trimmed. Without
/// `multiple` only the first match is used and no match gives `null`.
fn regex_search(raw: &str, pattern: &str, multiple: bool) -> std::result::Result<Value, FieldError> {
    let re = RegexBuilder::new(pattern)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| FieldError::BadRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

    let capture = |caps: regex::Captures<'_>| {
        let m = caps.get(1).or_else(|| caps.get(0));
        Value::String(m.map_or("", |m| m.as_str()).trim().to_string())
    };

    if multiple {
        Ok(Value::Array(re.captures_iter(raw).map(capture).collect()))
    } else {
        Ok(re.captures(raw).map_or(Value::Null, capture))
    }
}

/// Tagged-text source.
#[derive(Debug)]
pub struct TextSource<'a> {
    raw: &'a str,
    envelope: HashMap<String, String>,
    tags: TagBlockMap,
}

impl<'a> TextSource<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self {
            raw,
            envelope: envelope_blocks(raw),
            tags: TagBlockMap::parse(raw),
        }
    }

    pub fn tags(&self) -> &TagBlockMap {
        &self.tags
    }
}

impl FieldSource for TextSource<'_> {
    fn raw(&self) -> &str {
        self.raw
    }

    fn envelope(&self) -> &HashMap<String, String> {
        &self.envelope
    }

    /// A path names a tag. Without `multiple` the first occurrence's text is
    /// returned; with it, the non-blank lines of every occurrence, or `null`
    /// when there are none. Composite `fields` have no meaning for tags and
    /// are ignored.
    fn locate(&self, rule: &ExtractionRule, _registry: &TransformRegistry) -> std::result::Result<Value, FieldError> {
        let path = match &rule.locator {
            Locator::Path(path) | Locator::Composite { path, .. } => path,
            _ => return Ok(Value::Null),
        };

        if rule.multiple {
            let lines = self.tags.lines(path);
            if lines.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(Value::Array(lines.into_iter().map(Value::String).collect()));
        }

        Ok(self
            .tags
            .first(path)
            .map_or(Value::Null, |text| Value::String(text.to_string())))
    }
}

/// XML source, optionally positioned on a context element for the nested
/// rules of a composite.
#[derive(Debug, Clone, Copy)]
pub struct XmlSource<'a> {
    raw: &'a str,
    envelope: &'a HashMap<String, String>,
    document: &'a XmlDocument,
    context: Option<NodeId>,
}

impl<'a> XmlSource<'a> {
    pub fn new(raw: &'a str, envelope: &'a HashMap<String, String>, document: &'a XmlDocument) -> Self {
        Self {
            raw,
            envelope,
            document,
            context: None,
        }
    }

    fn at(&self, context: NodeId) -> Self {
        Self {
            context: Some(context),
            ..*self
        }
    }
}

impl FieldSource for XmlSource<'_> {
    fn raw(&self) -> &str {
        self.raw
    }

    fn envelope(&self) -> &HashMap<String, String> {
        self.envelope
    }

    fn locate(&self, rule: &ExtractionRule, registry: &TransformRegistry) -> std::result::Result<Value, FieldError> {
        match &rule.locator {
            Locator::Composite { path, fields } => {
                let found = self.document.select(path, self.context)?;
                let expand = |item: &XPathItem| match item {
                    XPathItem::Element(id) => Value::Object(extract_fields(&self.at(*id), fields, registry)),
                    // nested paths have nothing to run against
                    XPathItem::Text(_) => Value::Object(null_fields(fields)),
                };

                if rule.multiple {
                    Ok(Value::Array(found.iter().map(expand).collect()))
                } else {
                    Ok(found.first().map_or(Value::Null, expand))
                }
            }
            Locator::Path(path) => {
                let found = self.document.select(path, self.context)?;
                if rule.multiple {
                    Ok(Value::Array(
                        found
                            .iter()
                            .filter_map(|item| self.document.item_text(item))
                            .map(Value::String)
                            .collect(),
                    ))
                } else {
                    Ok(found
                        .first()
                        .and_then(|item| self.document.item_text(item))
                        .map_or(Value::Null, Value::String))
                }
            }
            _ => Ok(Value::Null),
        }
    }
}

fn null_fields(rules: &ExtractionRuleSet) -> FieldDictionary {
    rules.iter().map(|(field, _)| (field.to_string(), Value::Null)).collect()
}

/// Resolve every rule against a source.
///
/// A field whose resolution fails is logged at debug level and set to
/// `null`; the other fields are unaffected.
pub fn extract_fields<S: FieldSource + ?Sized>(
    source: &S,
    rules: &ExtractionRuleSet,
    registry: &TransformRegistry,
) -> FieldDictionary {
    rules
        .iter()
        .map(|(field, rule)| {
            let value = source.resolve(rule, registry).unwrap_or_else(|e| {
                tracing::debug!(field, error = %e, "field resolution failed");
                Value::Null
            });
            (field.to_string(), value)
        })
        .collect()
}

/// Extract fields from a message with an already-validated rule set.
pub fn extract(
    raw: &str,
    rules: &ExtractionRuleSet,
    format: MessageFormat,
    registry: &TransformRegistry,
) -> FieldDictionary {
    match format {
        MessageFormat::Text => extract_fields(&TextSource::new(raw), rules, registry),
        MessageFormat::Xml => {
            let envelope = envelope_blocks(raw);
            let document = XmlDocument::parse(raw);
            extract_fields(&XmlSource::new(raw, &envelope, &document), rules, registry)
        }
    }
}

/// Extract fields from a tagged-text message.
///
/// # Arguments
///
/// * `raw` - Message text
/// * `rules_json` - Extraction rule set as JSON text
/// * `registry` - Post-processors named by the rules
///
/// # Returns
///
/// * `Ok(FieldDictionary)` - One entry per rule, possibly `null`
/// * `Err(EngineError::ConfigurationMalformed)` - The rule set could not be read
pub fn extract_text(raw: &str, rules_json: &str, registry: &TransformRegistry) -> Result<FieldDictionary> {
    let rules = ExtractionRuleSet::from_json(rules_json)?;
    Ok(extract(raw, &rules, MessageFormat::Text, registry))
}

/// Extract fields from an XML message. Same contract as [`extract_text`].
pub fn extract_xml(raw: &str, rules_json: &str, registry: &TransformRegistry) -> Result<FieldDictionary> {
    let rules = ExtractionRuleSet::from_json(rules_json)?;
    Ok(extract(raw, &rules, MessageFormat::Xml, registry))
}

/// Namespace-agnostic extraction used by converters.
///
/// `rules_json` maps names to paths. Namespaces are stripped before parsing,
/// so paths use bare element names. Each value is the trimmed text of the
/// first match, or `""` when nothing matches or the path is invalid.
pub fn extract_flat_xml(raw: &str, rules_json: &str) -> Result<FieldDictionary> {
    let rules: Map<String, Value> = serde_json::from_str(rules_json)
        .map_err(|e| {
            tracing::warn!(error = %e, "failed to load converter extraction rules");
            EngineError::malformed(format!("converter extraction rules: {e}"))
        })?;
    let document = XmlDocument::parse_without_namespaces(raw);

    let mut fields = FieldDictionary::new();
    for (name, path) in &rules {
        let text = match path.as_str() {
            Some(path) => match document.select(path, None) {
                Ok(found) => found
                    .first()
                    .map(|item| document.item_text(item).unwrap_or_default().trim().to_string())
                    .unwrap_or_default(),
                Err(e) => {
                    tracing::debug!(field = %name, error = %e, "flat XML path failed");
                    String::new()
                }
            },
            None => String::new(),
        };
        fields.insert(name.clone(), Value::String(text));
    }
    Ok(fields)
}
