//! Error types for the extraction and mapping engine.
//!
//! Only whole-call failures surface as [`EngineError`]. Problems with a single
//! field are carried by [`FieldError`], which the extractor logs and turns
//! into a `null` value for that field.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a whole extraction, mapping or conversion call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A rule set (extraction or mapping) is not valid JSON or does not
    /// follow the rule grammar.
    #[error("malformed configuration: {0}")]
    ConfigurationMalformed(String),

    /// No template file exists for the requested type.
    #[error("no template found for type '{type_name}' in {dir}")]
    TemplateNotFound { type_name: String, dir: PathBuf },

    /// The declared file type maps to neither the tag nor the XML parser.
    #[error("unsupported file type for extraction: {0}")]
    UnsupportedFileType(String),

    /// A named extraction profile, file type or converter is not configured.
    #[error("{kind} '{name}' is not configured")]
    ProfileNotFound { kind: &'static str, name: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        EngineError::ConfigurationMalformed(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure to resolve one field. Recovered locally as a `null` value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("invalid regular expression '{pattern}': {reason}")]
    BadRegex { pattern: String, reason: String },

    #[error("invalid path expression '{path}': {reason}")]
    BadPath { path: String, reason: String },

    #[error("undefined namespace prefix '{0}'")]
    UndefinedPrefix(String),

    #[error("document has no {0} element")]
    MissingRoot(&'static str),

    #[error("condition '{0}' needs a 'value' operand")]
    MissingOperand(String),

    #[error("post-processor '{name}' failed: {reason}")]
    PostProcess { name: String, reason: String },
}
