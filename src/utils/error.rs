//! Error Handling Module
//!
//! Defines the error taxonomy for the classification pipeline.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown dataset mode string
    #[error("Invalid mode: expected train, val or test but found '{0}'")]
    InvalidMode(String),

    /// A split, label or background folder is absent
    #[error("Missing directory: '{0}' wasn't found")]
    MissingDirectory(PathBuf),

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Label name outside the label registry
    #[error("Unknown label '{0}'")]
    UnknownLabel(String),

    /// Background name outside the background registry
    #[error("Unknown background '{0}'")]
    UnknownBackground(String),

    /// Metric vector does not match the declared metric count
    #[error("Length mismatch: metrics vector has {found} values but {expected} metrics are declared")]
    LengthMismatch { expected: usize, found: usize },

    /// Nothing to serialize
    #[error("Empty results: inference produced no predictions to save")]
    EmptyResults,

    /// Error with model construction, weights or forward pass
    #[error("Model error: {0}")]
    Model(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

/// Convenience Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| PipelineError::Model(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| PipelineError::Model(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| PipelineError::Model(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| PipelineError::Model(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Config("batch_size must be > 0".to_string());
        assert_eq!(format!("{}", err), "Configuration error: batch_size must be > 0");
    }

    #[test]
    fn test_missing_directory_names_path() {
        let err = PipelineError::MissingDirectory(PathBuf::from("/data/train_256/cat"));
        assert!(format!("{}", err).contains("train_256/cat"));
    }

    #[test]
    fn test_length_mismatch_display() {
        let err = PipelineError::LengthMismatch {
            expected: 7,
            found: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains('7'));
        assert!(msg.contains('5'));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: PipelineError = json_err.into();
        assert!(matches!(err, PipelineError::Serialization(_)));
    }

    #[test]
    fn test_option_context() {
        let opt: Option<i32> = None;
        let with_context = opt.context("Value was None");
        assert!(with_context.is_err());
    }
}
