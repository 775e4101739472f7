//! Configuration-driven runtime.
//!
//! Named extraction profiles, file types and converters are loaded from YAML
//! and run through the extraction and mapping engine.

pub mod config_loader;
pub mod converter;

// Re-export key types
pub use config_loader::{ConverterConfig, EngineConfig, ExtractionProfile, FileTypeConfig};
pub use converter::{Conversion, Converter};
