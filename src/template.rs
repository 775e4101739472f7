//! `@@NAME@@` placeholder templates.
//!
//! A placeholder is the shortest run of text between two `@@` markers on one
//! line, so `@@A@@-@@B@@` holds `A` and `B`. Unbalanced markers are left as
//! literal text.

use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::error::{EngineError, Result};
use crate::extraction::FieldDictionary;
use crate::mapping::{self, PlaceholderMap};
use crate::rules::MappingRuleSet;
use crate::transform_registry::TransformRegistry;

/// Template file extensions, in lookup order.
pub const TEMPLATE_EXTENSIONS: [&str; 2] = ["xml", "txt"];

/// Suffix every template file carries after its extension.
pub const TEMPLATE_SUFFIX: &str = "j2";

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"@@(.*?)@@").unwrap();
}

/// Distinct placeholder names, in order of first appearance.
pub fn placeholders(template: &str) -> IndexSet<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Substitute every placeholder; names missing from `values` become `""`.
pub fn render(template: &str, values: &PlaceholderMap) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            values.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Map extracted fields through mapping rules and render the result.
///
/// # Arguments
///
/// * `fields` - Extracted field dictionary
/// * `mapping_rules_json` - Mapping rule set as JSON text
/// * `template` - Template text
/// * `registry` - Combinators named by composite rules
///
/// # Returns
///
/// * `Ok(String)` - Rendered output
/// * `Err(EngineError::ConfigurationMalformed)` - The mapping rules could not be read
pub fn map_and_render(
    fields: &FieldDictionary,
    mapping_rules_json: &str,
    template: &str,
    registry: &TransformRegistry,
) -> Result<String> {
    let rules = MappingRuleSet::from_json(mapping_rules_json)?;
    let values = mapping::map_fields(fields, &rules, placeholders(template), registry);
    Ok(render(template, &values))
}

/// A loaded template and the extension it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub extension: String,
    pub text: String,
}

impl Template {
    pub fn new(name: impl Into<String>, extension: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            text: text.into(),
        }
    }

    pub fn placeholders(&self) -> IndexSet<String> {
        placeholders(&self.text)
    }

    pub fn render(&self, values: &PlaceholderMap) -> String {
        render(&self.text, values)
    }

    /// Render from user-supplied values without any mapping rules.
    ///
    /// Unknown names in `values` are ignored; placeholders with no value
    /// render empty.
    pub fn render_with_values<I, K, V>(&self, values: I) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values: IndexMap<String, String> = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.render(&values)
    }
}

/// Templates on disk, named `<type>.<ext>.j2`.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a template of `type_name` would have with `extension`.
    pub fn path_for(&self, type_name: &str, extension: &str) -> PathBuf {
        self.dir
            .join(format!("{type_name}.{extension}.{TEMPLATE_SUFFIX}"))
    }

    /// Load the template for a type, trying `.xml` before `.txt`.
    pub fn load(&self, type_name: &str) -> Result<Template> {
        for extension in TEMPLATE_EXTENSIONS {
            let path = self.path_for(type_name, extension);
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| EngineError::io(&path, e))?;
            tracing::debug!(path = %path.display(), "loaded template");
            return Ok(Template::new(type_name, extension, text));
        }

        Err(EngineError::TemplateNotFound {
            type_name: type_name.to_string(),
            dir: self.dir.clone(),
        })
    }
}
