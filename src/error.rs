//! Error handling for simbuf-rs
//!
//! This module defines the crate error type and a Result alias. Rejected
//! buffer operations (out-of-range indices, no-op resizes) are not errors:
//! they return `false`. Errors are reserved for configuration mistakes such
//! as linking a variable whose kind does not match the buffered one.

use crate::registry::VariableKind;
use thiserror::Error;

/// Main error type for simbuf-rs operations
#[derive(Error, Debug)]
pub enum SimBufError {
    /// Errors related to the variable tree (duplicate names, invalid enums)
    #[error("Registry error: {0}")]
    Registry(String),

    /// A consumer variable does not match the kind of the buffered variable
    #[error("Kind mismatch for '{path}': buffer holds {expected}, got {actual}")]
    KindMismatch {
        path: String,
        expected: VariableKind,
        actual: VariableKind,
    },

    /// A namespace cannot be placed inside the buffer's variable tree
    #[error("Namespace '{namespace}' is not part of the buffer tree rooted at '{root}'")]
    NamespaceMismatch { namespace: String, root: String },

    /// The shared buffer was disposed
    #[error("Shared buffer has been disposed")]
    Disposed,

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SimBufError>,
    },
}

impl SimBufError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SimBufError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for simbuf-rs operations
pub type Result<T> = std::result::Result<T, SimBufError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimBufError::Registry("duplicate variable 'x'".to_string());
        assert_eq!(err.to_string(), "Registry error: duplicate variable 'x'");
    }

    #[test]
    fn test_kind_mismatch_display() {
        let err = SimBufError::KindMismatch {
            path: "root.q".to_string(),
            expected: VariableKind::Double,
            actual: VariableKind::Integer,
        };
        let msg = err.to_string();
        assert!(msg.contains("root.q"));
        assert!(msg.contains("double"));
        assert!(msg.contains("integer"));
    }

    #[test]
    fn test_error_with_context() {
        let err = SimBufError::Config("bad size".to_string());
        let with_ctx = err.with_context("Failed to load config");
        assert!(with_ctx.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_result_ext_context() {
        let result: Result<()> = Err(SimBufError::Disposed);
        let err = result.context("linking registry").unwrap_err();
        assert!(err.to_string().starts_with("linking registry"));
    }
}
