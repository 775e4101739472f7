//! Engine configuration loader.
//!
//! Loads named extraction profiles, source file types and converters from
//! YAML. Rule sets and schemas are kept as JSON text; in YAML they may be
//! written either as a JSON string or as an inline mapping, which is
//! re-serialised to JSON on load.
//!
//! ```yaml
//! template_dir: templates
//! extractions:
//!   - name: mt103-basic
//!     file_type: MT103
//!     rules: '{"ref": ":20:", "val": ":32A:"}'
//!     schema: {required: [ref]}
//! file_types:
//!   - name: pacs.008
//!     file_mode: xml
//!     extraction_rules: {MSG_ID: "//MsgId"}
//! converters:
//!   - name: pacs008-to-mt103
//!     source_type: pacs.008
//!     target_type: MT103
//!     rules: {REF: {source: MSG_ID}}
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EngineError, Result};
use crate::extraction::{self, FieldDictionary, MessageFormat};
use crate::rules::{ExtractionRuleSet, MappingRuleSet};
use crate::template::TemplateStore;
use crate::transform_registry::TransformRegistry;
use crate::validation;

/// Default template directory, relative to the configuration file.
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";

/// Accept JSON text or an inline YAML mapping and keep it as JSON text.
fn json_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    yaml_to_json_text(value).map_err(serde::de::Error::custom)
}

fn optional_json_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::Null => Ok(None),
        value => yaml_to_json_text(value).map(Some).map_err(serde::de::Error::custom),
    }
}

fn yaml_to_json_text(value: serde_yaml::Value) -> std::result::Result<String, String> {
    match value {
        serde_yaml::Value::String(text) => Ok(text),
        other => serde_json::to_string(&other).map_err(|e| format!("cannot convert to JSON: {e}")),
    }
}

fn empty_rules() -> String {
    "{}".to_string()
}

/// A named extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionProfile {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Declared message type (`MT103`, `pacs.008`, `xml`, ...).
    pub file_type: String,

    /// Extraction rule set, JSON text.
    #[serde(deserialize_with = "json_text")]
    pub rules: String,

    /// JSON schema for the extracted fields, JSON text.
    #[serde(default, deserialize_with = "optional_json_text")]
    pub schema: Option<String>,
}

impl ExtractionProfile {
    pub fn rule_set(&self) -> Result<ExtractionRuleSet> {
        ExtractionRuleSet::from_json(&self.rules)
    }

    /// Parser to use for this profile, given the uploaded file name.
    pub fn format(&self, filename: Option<&str>) -> Result<MessageFormat> {
        MessageFormat::detect(&self.file_type, filename)
    }

    /// Extract fields from a message with this profile.
    ///
    /// # Arguments
    /// * `raw` - Message text
    /// * `filename` - Name of the uploaded file, used for format detection
    /// * `registry` - Post-processors named by the rules
    ///
    /// # Errors
    /// `UnsupportedFileType` when neither parser applies, and
    /// `ConfigurationMalformed` when the rules cannot be read.
    pub fn extract(
        &self,
        raw: &str,
        filename: Option<&str>,
        registry: &TransformRegistry,
    ) -> Result<FieldDictionary> {
        let format = self.format(filename)?;
        let rules = self.rule_set()?;
        Ok(extraction::extract(raw, &rules, format, registry))
    }

    /// Required fields that came out empty. No schema means none.
    pub fn missing_required(&self, fields: &FieldDictionary) -> Result<Vec<String>> {
        match &self.schema {
            Some(schema) => validation::missing_required_fields(fields, schema),
            None => Ok(Vec::new()),
        }
    }
}

/// A source message type known to converters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTypeConfig {
    pub name: String,

    #[serde(default = "default_file_mode")]
    pub file_mode: MessageFormat,

    /// Name-to-path rules for namespace-agnostic XML extraction, JSON text.
    #[serde(default = "empty_rules", deserialize_with = "json_text")]
    pub extraction_rules: String,
}

fn default_file_mode() -> MessageFormat {
    MessageFormat::Text
}

/// A named conversion from one message type to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub source_type: String,

    pub target_type: String,

    /// Mapping rule set, JSON text.
    #[serde(deserialize_with = "json_text")]
    pub rules: String,
}

/// Everything the engine is configured with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub template_dir: Option<PathBuf>,

    #[serde(default)]
    pub extractions: Vec<ExtractionProfile>,

    #[serde(default)]
    pub file_types: Vec<FileTypeConfig>,

    #[serde(default)]
    pub converters: Vec<ConverterConfig>,

    /// Directory relative paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Load engine configuration from a YAML file.
    ///
    /// # Arguments
    /// * `path` - Path to msgmap.yaml
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is not valid YAML
    ///
    /// # Example
    /// ```ignore
    /// use msgmap::runtime::EngineConfig;
    ///
    /// let config = EngineConfig::load_from_file("config/msgmap.yaml")?;
    /// let profile = config.extraction("mt103-basic")?;
    /// ```
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;

        let mut config = Self::from_yaml_str(&contents)?;
        config.base_dir = path.parent().map(Path::to_path_buf);

        tracing::info!(
            path = %path.display(),
            extractions = config.extractions.len(),
            file_types = config.file_types.len(),
            converters = config.converters.len(),
            "loaded engine configuration"
        );
        Ok(config)
    }

    /// Parse configuration from YAML text. Relative paths resolve against
    /// the working directory.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Get an extraction profile by name.
    pub fn extraction(&self, name: &str) -> Result<&ExtractionProfile> {
        self.extractions
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| EngineError::ProfileNotFound {
                kind: "extraction",
                name: name.to_string(),
            })
    }

    /// Get a converter by name.
    pub fn converter(&self, name: &str) -> Result<&ConverterConfig> {
        self.converters
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| EngineError::ProfileNotFound {
                kind: "converter",
                name: name.to_string(),
            })
    }

    /// Get a source file type by name, if configured.
    pub fn file_type(&self, name: &str) -> Option<&FileTypeConfig> {
        self.file_types.iter().find(|f| f.name == name)
    }

    /// Template directory, resolved against the configuration file's directory.
    pub fn template_dir(&self) -> PathBuf {
        let dir = self
            .template_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_DIR));
        match &self.base_dir {
            Some(base) if dir.is_relative() => base.join(dir),
            _ => dir,
        }
    }

    pub fn template_store(&self) -> TemplateStore {
        TemplateStore::new(self.template_dir())
    }

    /// Check every rule set, schema and declared file type.
    ///
    /// # Returns
    /// One message per problem; empty when the configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut report = |what: String, error: EngineError| {
            tracing::warn!(%what, %error, "invalid configuration entry");
            problems.push(format!("{what}: {error}"));
        };

        for profile in &self.extractions {
            let what = format!("extraction '{}'", profile.name);
            if let Err(e) = profile.rule_set() {
                report(what.clone(), e);
            }
            if let Err(e) = profile.format(None) {
                report(what.clone(), e);
            }
            if let Some(schema) = &profile.schema {
                if let Err(e) = validation::missing_required_fields(&FieldDictionary::new(), schema) {
                    report(what, e);
                }
            }
        }

        for file_type in &self.file_types {
            if let Err(e) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&file_type.extraction_rules) {
                report(
                    format!("file type '{}'", file_type.name),
                    EngineError::malformed(format!("extraction rules: {e}")),
                );
            }
        }

        for converter in &self.converters {
            if let Err(e) = MappingRuleSet::from_json(&converter.rules) {
                report(format!("converter '{}'", converter.name), e);
            }
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
template_dir: out
extractions:
  - name: mt103-basic
    description: Reference and value date
    file_type: MT103
    rules: '{"ref": ":20:", "val": ":32A:"}'
    schema:
      required: [ref, val]
  - name: pacs008-header
    file_type: pacs.008
    rules:
      id:
        path: /app:AppHdr/app:BizMsgIdr
file_types:
  - name: pacs.008
    file_mode: xml
    extraction_rules:
      MSG_ID: //MsgId
  - name: MT103
converters:
  - name: pacs-to-mt
    source_type: pacs.008
    target_type: MT103
    rules: {REF: {source: MSG_ID}}
"#;

    #[test]
    fn test_parse_config() {
        let config = EngineConfig::from_yaml_str(CONFIG).unwrap();

        let basic = config.extraction("mt103-basic").unwrap();
        assert_eq!(basic.rules, r#"{"ref": ":20:", "val": ":32A:"}"#);
        assert_eq!(basic.schema.as_deref(), Some(r#"{"required":["ref","val"]}"#));

        let header = config.extraction("pacs008-header").unwrap();
        assert_eq!(header.rules, r#"{"id":{"path":"/app:AppHdr/app:BizMsgIdr"}}"#);
        assert!(header.schema.is_none());

        let mt = config.file_type("MT103").unwrap();
        assert_eq!(mt.file_mode, MessageFormat::Text);
        assert_eq!(mt.extraction_rules, "{}");
        assert_eq!(config.file_type("pacs.008").unwrap().file_mode, MessageFormat::Xml);

        assert_eq!(config.converter("pacs-to-mt").unwrap().target_type, "MT103");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_unknown_names() {
        let config = EngineConfig::from_yaml_str(CONFIG).unwrap();
        assert!(matches!(
            config.extraction("nope"),
            Err(EngineError::ProfileNotFound { kind: "extraction", .. })
        ));
        assert!(matches!(
            config.converter("nope"),
            Err(EngineError::ProfileNotFound { kind: "converter", .. })
        ));
        assert!(config.file_type("nope").is_none());
    }

    #[test]
    fn test_profile_extracts() {
        let config = EngineConfig::from_yaml_str(CONFIG).unwrap();
        let profile = config.extraction("mt103-basic").unwrap();
        let fields = profile
            .extract(":20:REF123\n-}", None, &TransformRegistry::with_builtins())
            .unwrap();

        assert_eq!(fields["ref"], "REF123");
        assert_eq!(profile.missing_required(&fields).unwrap(), vec!["val"]);
    }

    #[test]
    fn test_validate_reports_problems() {
        let config = EngineConfig::from_yaml_str(
            r#"
extractions:
  - name: broken
    file_type: csv
    rules: 'not json'
converters:
  - name: bad-mapping
    source_type: a
    target_type: b
    rules: '[1]'
"#,
        )
        .unwrap();

        let problems = config.validate();
        assert_eq!(problems.len(), 3);
        assert!(problems[0].starts_with("extraction 'broken'"));
        assert!(problems[2].starts_with("converter 'bad-mapping'"));
    }

    #[test]
    fn test_load_from_file_resolves_template_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("msgmap.yaml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(config.template_dir(), dir.path().join("out"));

        let defaults = EngineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(defaults.template_dir(), PathBuf::from(DEFAULT_TEMPLATE_DIR));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            EngineConfig::load_from_file("/definitely/not/here.yaml"),
            Err(EngineError::Io { .. })
        ));
    }
}
