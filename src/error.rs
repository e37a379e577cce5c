//! Error types for the flood explainability pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for explainability operations
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("No model file matching '{pattern}' found in {}", dir.display())]
    ModelNotFound { dir: PathBuf, pattern: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Plot error: {0}")]
    PlotError(String),

    #[error("Report error: {0}")]
    ReportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serde_json::Error> for ExplainError {
    fn from(err: serde_json::Error) -> Self {
        ExplainError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for ExplainError {
    fn from(err: bincode::Error) -> Self {
        ExplainError::SerializationError(err.to_string())
    }
}

impl From<polars::error::PolarsError> for ExplainError {
    fn from(err: polars::error::PolarsError) -> Self {
        ExplainError::DataError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ExplainError {
    fn from(err: ndarray::ShapeError) -> Self {
        ExplainError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<handlebars::RenderError> for ExplainError {
    fn from(err: handlebars::RenderError) -> Self {
        ExplainError::ReportError(err.to_string())
    }
}

impl From<png::EncodingError> for ExplainError {
    fn from(err: png::EncodingError) -> Self {
        ExplainError::PlotError(err.to_string())
    }
}

impl From<globset::Error> for ExplainError {
    fn from(err: globset::Error) -> Self {
        ExplainError::ConfigError(err.to_string())
    }
}
