//! Error handling for VolVis-RS
//!
//! This module defines the crate-wide error type and a Result alias used by
//! configuration loading, the binary, and anything that wraps the pipeline.
//! Pipeline and render internals use [`PipelineError`] directly.

use crate::pipeline::PipelineError;
use thiserror::Error;

/// Main error type for VolVis-RS operations
#[derive(Error, Debug)]
pub enum VolVisError {
    /// Errors raised while updating or executing the pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<VolVisError>,
    },
}

impl VolVisError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        VolVisError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True when the root cause is a user-requested abort.
    pub fn is_abort(&self) -> bool {
        match self {
            VolVisError::Pipeline(e) => e.is_abort(),
            VolVisError::WithContext { source, .. } => source.is_abort(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for VolVisError {
    fn from(err: serde_json::Error) -> Self {
        VolVisError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for VolVisError {
    fn from(err: toml::de::Error) -> Self {
        VolVisError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for VolVisError {
    fn from(err: toml::ser::Error) -> Self {
        VolVisError::Serialization(err.to_string())
    }
}

/// Result type alias for VolVis-RS operations
pub type Result<T> = std::result::Result<T, VolVisError>;

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

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| VolVisError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| VolVisError::from(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::NodeId;

    #[test]
    fn test_error_display() {
        let err = VolVisError::Config("width must be non-zero".to_string());
        assert_eq!(err.to_string(), "Configuration error: width must be non-zero");
    }

    #[test]
    fn test_error_with_context() {
        let err = VolVisError::Config("test".to_string());
        let with_ctx = err.with_context("Failed to load");
        assert!(with_ctx.to_string().contains("Failed to load"));
    }

    #[test]
    fn test_abort_survives_context() {
        let err: std::result::Result<(), PipelineError> = Err(PipelineError::Aborted {
            node: NodeId(3),
        });
        let wrapped = err.context("rendering frame").unwrap_err();
        assert!(wrapped.is_abort());
        assert!(!VolVisError::Config("x".into()).is_abort());
    }
}
