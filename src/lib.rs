//! # msgmap: Financial Message Field Extraction and Template Mapping
//!
//! msgmap reads semi-structured payment messages, pulls named fields out of
//! them with a declarative rule set, and renders those fields into an output
//! template through a second rule set.
//!
//! ## Features
//!
//! - **Tagged text**: SWIFT MT style `:TAG:` blocks, `{N:...}` envelope segments and regex rules
//! - **XML / ISO 20022**: tolerant parsing of fragments, `AppHdr` / `Document` namespace aliases and an XPath subset
//! - **Conditions and post-processors**: per-field filters plus named reshaping functions
//! - **Template mapping**: `@@NAME@@` placeholders filled by source, default, composite, prefix and case/date transforms
//! - **Runtime**: YAML-configured extraction profiles and converters
//!
//! ## Example: Extraction Rules
//!
//! ```json
//! {
//!   "reference": ":20:",
//!   "beneficiary": {"path": ":59:", "multiple": true, "postprocess": "account_lines"},
//!   "currency": {"path": ":32A:", "condition": "regex", "value": "^\\d{6}[A-Z]{3}"},
//!   "msg_id": {"path": "/app:AppHdr/app:BizMsgIdr"}
//! }
//! ```
//!
//! ## Example: Mapping Rules
//!
//! ```json
//! {
//!   "REF": {"source": "reference", "transform": "uppercase"},
//!   "DATE": {"source": "value_date", "transform": "date_format", "date_format": "%d/%m/%Y"},
//!   "NAME": {"sources": ["first", "last"], "transform": "join_space"},
//!   "CCY": {"default": "EUR"}
//! }
//! ```

// Core modules
pub mod error;
pub mod condition;
pub mod tags;
pub mod xml;
pub mod rules;
pub mod postprocess;
pub mod transform_registry;
pub mod extraction;
pub mod mapping;
pub mod template;
pub mod validation;

// Configuration-driven runtime
pub mod runtime;

// Re-export key types
pub use error::{EngineError, FieldError, Result};
pub use condition::Condition;
pub use tags::{flatten_tag_fields, TagBlockMap};
pub use xml::{ElementTree, XmlDocument};
pub use rules::{ExtractionRuleSet, MappingRuleSet};
pub use transform_registry::{TransformError, TransformRegistry};
pub use extraction::{
    extract, extract_flat_xml, extract_text, extract_xml, FieldDictionary, FieldSource, MessageFormat,
};
pub use mapping::{map_fields, PlaceholderMap};
pub use template::{map_and_render, placeholders, render, Template, TemplateStore};
pub use validation::missing_required_fields;

// Re-export runtime types
pub use runtime::{Conversion, Converter, EngineConfig};
