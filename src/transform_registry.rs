//! Transform registry for named post-processors and combinators.
//!
//! Extraction rules name a post-processor (`"postprocess": "account_lines"`)
//! and mapping rules name a combinator (`"transform": "concat_ab"`). Both are
//! looked up here by name instead of by any kind of reflection. The registry is
//! built once and passed explicitly to the extraction and mapping calls.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::postprocess;

/// Error type for transform operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    NotFound(String),
    InvalidArgs(String),
    ExecutionError(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::NotFound(name) => write!(f, "Transform not found: {}", name),
            TransformError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            TransformError::ExecutionError(msg) => write!(f, "Execution error: {}", msg),
        }
    }
}

impl std::error::Error for TransformError {}

/// A post-processor reshapes one extracted field value.
///
/// # Returns
///
/// * `Ok(Value)` - Replacement value (object, list, string or null)
/// * `Err(TransformError)` - The value had an unexpected shape
pub trait PostProcessFn: Send + Sync {
    fn execute(&self, value: &Value) -> Result<Value, TransformError>;
}

impl<F> PostProcessFn for F
where
    F: Fn(&Value) -> Result<Value, TransformError> + Send + Sync,
{
    fn execute(&self, value: &Value) -> Result<Value, TransformError> {
        self(value)
    }
}

/// A combinator joins the values of several source fields into one string.
pub trait CombinatorFn: Send + Sync {
    fn combine(&self, parts: &[String]) -> Result<String, TransformError>;
}

impl<F> CombinatorFn for F
where
    F: Fn(&[String]) -> Result<String, TransformError> + Send + Sync,
{
    fn combine(&self, parts: &[String]) -> Result<String, TransformError> {
        self(parts)
    }
}

/// Name of the combinator used when a mapping names an unknown one.
pub const FALLBACK_COMBINATOR: &str = "concat";

fn concat(parts: &[String]) -> Result<String, TransformError> {
    Ok(parts.concat())
}

fn join_space(parts: &[String]) -> Result<String, TransformError> {
    Ok(parts.join(" "))
}

fn join_lines(parts: &[String]) -> Result<String, TransformError> {
    Ok(parts.join("\n"))
}

/// Registry for storing and calling post-processors and combinators
pub struct TransformRegistry {
    postprocessors: HashMap<String, Box<dyn PostProcessFn>>,
    combinators: HashMap<String, Box<dyn CombinatorFn>>,
}

impl TransformRegistry {
    /// Create a new empty transform registry
    pub fn new() -> Self {
        Self {
            postprocessors: HashMap::new(),
            combinators: HashMap::new(),
        }
    }

    /// Registry with the built-in post-processors (`account_lines`,
    /// `remittance_lines`) and combinators (`concat`, `join_space`,
    /// `join_lines`).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_postprocessor(postprocess::ACCOUNT_LINES, Box::new(postprocess::account_lines));
        registry.register_postprocessor(
            postprocess::REMITTANCE_LINES,
            Box::new(postprocess::remittance_lines),
        );

        registry.register_combinator(FALLBACK_COMBINATOR, Box::new(concat));
        registry.register_combinator("join_space", Box::new(join_space));
        registry.register_combinator("join_lines", Box::new(join_lines));
        registry
    }

    /// Register a post-processor
    ///
    /// # Example
    ///
    /// ```ignore
    /// use msgmap::{TransformError, TransformRegistry};
    ///
    /// let mut registry = TransformRegistry::new();
    /// registry.register_postprocessor("first_line", Box::new(|value: &Value| {
    ///     let lines = value.as_array()
    ///         .ok_or_else(|| TransformError::InvalidArgs("expected a list".to_string()))?;
    ///     Ok(lines.first().cloned().unwrap_or(Value::Null))
    /// }));
    /// ```
    pub fn register_postprocessor(&mut self, name: impl Into<String>, func: Box<dyn PostProcessFn>) {
        self.postprocessors.insert(name.into(), func);
    }

    /// Register a combinator; replaces any combinator with the same name,
    /// built-ins included.
    pub fn register_combinator(&mut self, name: impl Into<String>, func: Box<dyn CombinatorFn>) {
        self.combinators.insert(name.into(), func);
    }

    /// Call a registered post-processor
    ///
    /// # Arguments
    ///
    /// * `name` - Name of the registered post-processor
    /// * `value` - Extracted field value
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` - Reshaped value
    /// * `Err(TransformError::NotFound)` - No post-processor with that name
    /// * `Err(TransformError)` - The post-processor failed
    pub fn postprocess(&self, name: &str, value: &Value) -> Result<Value, TransformError> {
        let func = self
            .postprocessors
            .get(name)
            .ok_or_else(|| TransformError::NotFound(name.to_string()))?;

        func.execute(value)
    }

    /// Combine source values with the named combinator.
    ///
    /// Unknown names fall back to plain concatenation.
    pub fn combine(&self, name: &str, parts: &[String]) -> Result<String, TransformError> {
        match self.combinators.get(name) {
            Some(func) => func.combine(parts),
            None => {
                tracing::debug!(combinator = name, "unknown combinator, concatenating");
                concat(parts)
            }
        }
    }

    /// Check if a post-processor is registered
    pub fn has_postprocessor(&self, name: &str) -> bool {
        self.postprocessors.contains_key(name)
    }

    /// Check if a combinator is registered
    pub fn has_combinator(&self, name: &str) -> bool {
        self.combinators.contains_key(name)
    }

    /// Registered post-processor names, sorted
    pub fn list_postprocessors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.postprocessors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered combinator names, sorted
    pub fn list_combinators(&self) -> Vec<String> {
        let mut names: Vec<String> = self.combinators.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("postprocessors", &self.list_postprocessors())
            .field("combinators", &self.list_combinators())
            .finish()
    }
}
