//! Message conversion: extract from a source message, map, render into the
//! target type's template.

use crate::error::Result;
use crate::extraction::{self, FieldDictionary, MessageFormat};
use crate::mapping;
use crate::rules::MappingRuleSet;
use crate::tags;
use crate::template::{self, TemplateStore};
use crate::transform_registry::TransformRegistry;

use super::config_loader::{ConverterConfig, EngineConfig};

/// Result of one conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    /// Rendered target message.
    pub output: String,
    /// Extension of the template used (`xml` or `txt`).
    pub extension: String,
    /// Fields extracted from the source message.
    pub fields: FieldDictionary,
}

impl Conversion {
    /// Suggested file name for the output.
    pub fn file_name(&self) -> String {
        format!("converted_output.{}", self.extension)
    }
}

/// Runs converters defined in an [`EngineConfig`].
pub struct Converter<'a> {
    config: &'a EngineConfig,
    templates: TemplateStore,
    registry: &'a TransformRegistry,
}

impl<'a> Converter<'a> {
    pub fn new(config: &'a EngineConfig, registry: &'a TransformRegistry) -> Self {
        Self {
            config,
            templates: config.template_store(),
            registry,
        }
    }

    /// Use a different template store than the configured one.
    pub fn with_templates(mut self, templates: TemplateStore) -> Self {
        self.templates = templates;
        self
    }

    /// Convert `source` with the named converter.
    ///
    /// # Errors
    /// * `ProfileNotFound` - no converter with that name
    /// * `TemplateNotFound` - no template for the target type
    /// * `ConfigurationMalformed` - mapping or source extraction rules are not valid JSON
    pub fn convert(&self, converter_name: &str, source: &str) -> Result<Conversion> {
        let converter = self.config.converter(converter_name)?;
        self.run(converter, source)
    }

    /// Convert `source` with an explicit converter definition.
    pub fn run(&self, converter: &ConverterConfig, source: &str) -> Result<Conversion> {
        let template = self.templates.load(&converter.target_type)?;
        let rules = MappingRuleSet::from_json(&converter.rules)?;
        let fields = self.extract_source(&converter.source_type, source)?;

        let values = mapping::map_fields(&fields, &rules, template.placeholders(), self.registry);
        tracing::debug!(
            converter = %converter.name,
            fields = fields.len(),
            placeholders = values.len(),
            "mapped source fields"
        );

        Ok(Conversion {
            output: template::render(&template.text, &values),
            extension: template.extension,
            fields,
        })
    }

    /// Flat extraction for converters: path rules for XML source types,
    /// `tag<T>` / `tag<T>Line<n>` fields for everything else.
    fn extract_source(&self, source_type: &str, source: &str) -> Result<FieldDictionary> {
        match self.config.file_type(source_type) {
            Some(file_type) if file_type.file_mode == MessageFormat::Xml => {
                extraction::extract_flat_xml(source, &file_type.extraction_rules)
            }
            _ => Ok(tags::flatten_tag_fields(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
file_types:
  - name: pacs.008
    file_mode: xml
    extraction_rules: {MSG_ID: "//GrpHdr/MsgId", DATE: "//CreDtTm", AMT: "//IntrBkSttlmAmt", CCY: "//IntrBkSttlmAmt/@Ccy"}
  - name: MT103
    file_mode: text
converters:
  - name: pacs-to-mt
    source_type: pacs.008
    target_type: MT103
    rules:
      REF: {source: MSG_ID}
      DATE: {source: DATE, transform: date_format, date_format: "%y%m%d"}
      AMOUNT: {sources: [CCY, AMT], transform: join_space}
  - name: mt-to-pacs
    source_type: MT103
    target_type: pacs.008
    rules:
      MSG_ID: {source: tag20}
      NAME: {source: tag59Line2, transform: uppercase}
      CCY: {default: EUR}
  - name: broken
    source_type: MT103
    target_type: MT103
    rules: 'not json'
"#;

    const PACS: &str = r#"<Document xmlns="urn:iso:std:iso:20022:tech:xsd:pacs.008.001.08">
<GrpHdr><MsgId>MSG-1</MsgId><CreDtTm>2024-03-09</CreDtTm></GrpHdr>
<IntrBkSttlmAmt Ccy="EUR">150.00</IntrBkSttlmAmt>
</Document>"#;

    const MT103: &str = ":20:REF9\n:59:/DE123\nacme gmbh\n-}";

    fn setup() -> (TempDir, EngineConfig) {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("MT103.txt.j2"),
            ":20:@@REF@@\n:32A:@@DATE@@@@AMOUNT@@\n:99:@@UNMAPPED@@",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("pacs.008.xml.j2"),
            "<MsgId>@@MSG_ID@@</MsgId><Nm>@@NAME@@</Nm><Ccy>@@CCY@@</Ccy>",
        )
        .unwrap();

        let mut config = EngineConfig::from_yaml_str(CONFIG).unwrap();
        config.template_dir = Some(dir.path().to_path_buf());
        (dir, config)
    }

    #[test]
    fn test_xml_source_to_text_target() {
        let (_dir, config) = setup();
        let registry = TransformRegistry::with_builtins();
        let conversion = Converter::new(&config, &registry).convert("pacs-to-mt", PACS).unwrap();

        assert_eq!(conversion.extension, "txt");
        assert_eq!(conversion.output, ":20:MSG-1\n:32A:240309EUR 150.00\n:99:");
        assert_eq!(conversion.fields["MSG_ID"], "MSG-1");
        assert_eq!(conversion.file_name(), "converted_output.txt");
    }

    #[test]
    fn test_text_source_to_xml_target() {
        let (_dir, config) = setup();
        let registry = TransformRegistry::with_builtins();
        let conversion = Converter::new(&config, &registry).convert("mt-to-pacs", MT103).unwrap();

        assert_eq!(conversion.extension, "xml");
        assert_eq!(conversion.output, "<MsgId>REF9</MsgId><Nm>ACME GMBH</Nm><Ccy>EUR</Ccy>");
    }

    #[test]
    fn test_conversion_errors() {
        let (dir, config) = setup();
        let registry = TransformRegistry::with_builtins();
        let converter = Converter::new(&config, &registry);

        assert!(matches!(
            converter.convert("missing", MT103),
            Err(EngineError::ProfileNotFound { .. })
        ));
        assert!(matches!(
            converter.convert("broken", MT103),
            Err(EngineError::ConfigurationMalformed(_))
        ));

        std::fs::remove_file(dir.path().join("MT103.txt.j2")).unwrap();
        assert!(matches!(
            converter.convert("pacs-to-mt", PACS),
            Err(EngineError::TemplateNotFound { .. })
        ));
    }
}
