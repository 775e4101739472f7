//! Template mapping: fill placeholders from an extracted field dictionary.

use std::fmt::Write as _;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde_json::Value;

use crate::extraction::FieldDictionary;
use crate::rules::{MappingRule, MappingRuleSet, Resolution, ScalarTransform};
use crate::transform_registry::TransformRegistry;

/// Placeholder name to resolved text, in placeholder order.
pub type PlaceholderMap = IndexMap<String, String>;

/// Input formats tried, in order, by the `date_format` transform.
pub const DATE_INPUT_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y%m%d", "%d-%m-%Y", "%Y/%m/%d"];

/// Resolve every placeholder. A placeholder without a rule maps to `""`.
///
/// # Arguments
///
/// * `fields` - Extracted field dictionary
/// * `rules` - Mapping rule set
/// * `placeholders` - Placeholder names found in the template
/// * `registry` - Combinators named by composite rules
pub fn map_fields<I, S>(
    fields: &FieldDictionary,
    rules: &MappingRuleSet,
    placeholders: I,
    registry: &TransformRegistry,
) -> PlaceholderMap
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let empty = MappingRule::empty();
    placeholders
        .into_iter()
        .map(|name| {
            let name = name.as_ref();
            let rule = rules.get(name).unwrap_or(&empty);
            (name.to_string(), resolve(rule, fields, registry))
        })
        .collect()
}

/// Resolve one mapping rule.
///
/// The base value comes from the rule's resolution. A non-empty value then
/// gets the prefix, and finally the case or date transform.
pub fn resolve(rule: &MappingRule, fields: &FieldDictionary, registry: &TransformRegistry) -> String {
    let value = match &rule.resolution {
        Resolution::Composite { sources, combinator } => {
            let parts: Vec<String> = sources.iter().map(|s| field_text(fields, s)).collect();
            registry.combine(combinator, &parts).unwrap_or_else(|e| {
                tracing::warn!(combinator = %combinator, error = %e, "combinator failed, concatenating");
                parts.concat()
            })
        }
        Resolution::Source { field, default } => {
            let value = field_text(fields, field);
            if value.is_empty() {
                default.clone().unwrap_or_default()
            } else {
                value
            }
        }
        Resolution::Default(literal) => literal.clone(),
        Resolution::Empty => String::new(),
    };

    if value.is_empty() {
        return value;
    }

    let value = match &rule.prefix {
        Some(prefix) => format!("{prefix}{value}"),
        None => value,
    };

    match &rule.transform {
        ScalarTransform::None => value,
        ScalarTransform::Uppercase => value.to_uppercase(),
        ScalarTransform::Lowercase => value.to_lowercase(),
        ScalarTransform::DateFormat(target) => format_date(&value, target).unwrap_or(value),
    }
}

/// Text of a field for mapping purposes.
///
/// Strings are used as they are, `null` and absent fields are empty, lists
/// are joined with newlines and objects are rendered as JSON.
pub fn field_text(fields: &FieldDictionary, name: &str) -> String {
    fields.get(name).map(value_text).unwrap_or_default()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join("\n"),
        Value::Object(_) => value.to_string(),
    }
}

/// Parse `value` with the first matching input format and reformat it.
///
/// Returns `None` when no input format matches or `target` is not a valid
/// format string.
pub fn format_date(value: &str, target: &str) -> Option<String> {
    let date = parse_date(value)?;
    let datetime = date.and_hms_opt(0, 0, 0)?;

    let mut out = String::new();
    write!(out, "{}", datetime.format(target)).ok()?;
    Some(out)
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_INPUT_FORMATS.iter().find_map(|format| match *format {
        // chrono reads %Y greedily, so compact dates are split by hand
        "%Y%m%d" => parse_compact_date(value),
        format => NaiveDate::parse_from_str(value, format).ok(),
    })
}

fn parse_compact_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 8 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year = value[0..4].parse().ok()?;
    let month = value[4..6].parse().ok()?;
    let day = value[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform_registry::TransformError;
    use serde_json::json;

    fn fields(value: Value) -> FieldDictionary {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn map_one(rule_json: &str, dict: Value) -> String {
        let rules = MappingRuleSet::from_json(&format!(r#"{{"X": {rule_json}}}"#)).unwrap();
        let mapped = map_fields(&fields(dict), &rules, ["X"], &TransformRegistry::with_builtins());
        mapped["X"].clone()
    }

    #[test]
    fn test_date_format_conversions() {
        assert_eq!(format_date("2024-01-05", "%d/%m/%Y").as_deref(), Some("05/01/2024"));
        assert_eq!(format_date("20240105", "%Y-%m-%d").as_deref(), Some("2024-01-05"));
        assert_eq!(format_date("05-01-2024", "%Y%m%d").as_deref(), Some("20240105"));
        assert_eq!(format_date("2024/01/05", "%d.%m.%y").as_deref(), Some("05.01.24"));
        assert_eq!(format_date("not-a-date", "%d/%m/%Y"), None);
        assert_eq!(format_date("20241305", "%d/%m/%Y"), None);
    }

    #[test]
    fn test_date_transform_leaves_unparseable_value() {
        let rule = r#"{"source": "d", "transform": "date_format", "date_format": "%d/%m/%Y"}"#;
        assert_eq!(map_one(rule, json!({"d": "2024-01-05"})), "05/01/2024");
        assert_eq!(map_one(rule, json!({"d": "not-a-date"})), "not-a-date");
    }

    #[test]
    fn test_invalid_target_format_is_a_no_op() {
        assert_eq!(format_date("2024-01-05", "%Q"), None);
    }

    #[test]
    fn test_source_default_and_prefix() {
        let rule = r#"{"source": "ccy", "default": "EUR", "prefix": "CCY:"}"#;
        assert_eq!(map_one(rule, json!({"ccy": "USD"})), "CCY:USD");
        assert_eq!(map_one(rule, json!({"ccy": ""})), "CCY:EUR");
        assert_eq!(map_one(rule, json!({"ccy": null})), "CCY:EUR");
        assert_eq!(map_one(rule, json!({})), "CCY:EUR");
    }

    #[test]
    fn test_prefix_skipped_for_empty_value() {
        assert_eq!(map_one(r#"{"source": "a", "prefix": "/"}"#, json!({})), "");
    }

    #[test]
    fn test_default_only_and_missing_rule() {
        assert_eq!(map_one(r#"{"default": "fixed"}"#, json!({})), "fixed");
        let mapped = map_fields(
            &fields(json!({"a": "1"})),
            &MappingRuleSet::default(),
            ["NOPE"],
            &TransformRegistry::with_builtins(),
        );
        assert_eq!(mapped["NOPE"], "");
    }

    #[test]
    fn test_case_transforms() {
        assert_eq!(map_one(r#"{"source": "n", "transform": "uppercase"}"#, json!({"n": "acme"})), "ACME");
        assert_eq!(
            map_one(r#"{"source": "n", "transform": "lowercase", "prefix": "ID-"}"#, json!({"n": "X1"})),
            "id-x1"
        );
    }

    #[test]
    fn test_composite_with_registered_combinator() {
        let mut registry = TransformRegistry::with_builtins();
        registry.register_combinator(
            "concat_ab",
            Box::new(|parts: &[String]| -> Result<String, TransformError> { Ok(parts.join("-")) }),
        );
        let rules = MappingRuleSet::from_json(r#"{"AB": {"sources": ["a", "b"], "transform": "concat_ab"}}"#).unwrap();

        let mapped = map_fields(&fields(json!({"a": "X", "b": "Y"})), &rules, ["AB"], &registry);
        assert_eq!(mapped["AB"], "X-Y");
    }

    #[test]
    fn test_composite_unknown_combinator_concatenates() {
        let rule = r#"{"sources": ["a", "missing", "b"], "transform": "nope"}"#;
        assert_eq!(map_one(rule, json!({"a": "X", "b": "Y"})), "XY");
    }

    #[test]
    fn test_non_string_fields_are_stringified() {
        assert_eq!(map_one(r#"{"source": "l"}"#, json!({"l": ["a", "b"]})), "a\nb");
        assert_eq!(map_one(r#"{"source": "n"}"#, json!({"n": 3})), "3");
        assert_eq!(
            map_one(r#"{"source": "o"}"#, json!({"o": {"k": "v"}})),
            r#"{"k":"v"}"#
        );
    }

    #[test]
    fn test_map_preserves_placeholder_order() {
        let rules = MappingRuleSet::from_json(r#"{"A": {"default": "1"}, "B": {"default": "2"}}"#).unwrap();
        let mapped = map_fields(&FieldDictionary::new(), &rules, ["B", "A"], &TransformRegistry::new());
        assert_eq!(mapped.keys().collect::<Vec<_>>(), vec!["B", "A"]);
    }
}
