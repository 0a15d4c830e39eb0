//! Error types for Meridian.
//!
//! This module defines a unified error enum covering configuration, I/O,
//! embedding provider, index, and lookup failures.

use thiserror::Error;

/// Unified error type for Meridian.
///
/// All fallible functions in the workspace return `Result<T, AppError>`.
/// Stale caches and fingerprint mismatches are recovered locally and never
/// reach this type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown document or ticket id for a single-target operation
    #[error("Not found: {0}")]
    NotFound(String),

    /// A query or similarity call was made before `build()` completed
    #[error("Index not built: call build() before querying")]
    IndexNotBuilt,

    /// Embedding provider failed after exhausting retries
    #[error("Embedding provider error: {0}")]
    Provider(String),

    /// Persisted index store or in-memory index errors
    #[error("Index error: {0}")]
    Index(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_not_built_message() {
        let err = AppError::IndexNotBuilt;
        assert!(err.to_string().contains("build()"));
    }

    #[test]
    fn test_serde_json_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: AppError = parse.unwrap_err().into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
