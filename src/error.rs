//! Error types for Stepr
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::domain::StepType;

/// All error types that can occur while orchestrating steps
#[derive(Debug, Error)]
pub enum StepError {
    /// The governing context was cancelled; always propagated as-is
    #[error("execution cancelled")]
    Cancelled,

    /// No executor is registered for the step type
    #[error("no executor registered for step type: {0}")]
    ExecutorNotFound(StepType),

    /// A value an executor needs was not present in task metadata
    #[error("missing required task metadata: {0}")]
    MissingMetadata(String),

    /// Step configuration could not be normalized
    #[error("invalid step config: {0}")]
    InvalidConfig(String),

    /// A collaborator the executor depends on was not configured
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// Loop state persistence error
    #[error("storage error: {0}")]
    Storage(String),

    /// Scratchpad read/write error
    #[error("scratchpad error: {0}")]
    Scratchpad(String),

    /// Artifact persistence error
    #[error("artifact error: {0}")]
    Artifact(String),

    /// The CI status query itself failed
    #[error("CI status fetch failed: {0}")]
    CiFetch(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl StepError {
    /// Returns true if this error is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StepError::Cancelled)
    }
}

/// Result type alias for Stepr operations
pub type Result<T> = std::result::Result<T, StepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_error() {
        let err = StepError::Cancelled;
        assert_eq!(err.to_string(), "execution cancelled");
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_executor_not_found_names_type() {
        let err = StepError::ExecutorNotFound(StepType::Ci);
        assert_eq!(err.to_string(), "no executor registered for step type: ci");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_missing_metadata_error() {
        let err = StepError::MissingMetadata("pr_number".to_string());
        assert_eq!(err.to_string(), "missing required task metadata: pr_number");
    }

    #[test]
    fn test_storage_error() {
        let err = StepError::Storage("disk full".to_string());
        assert_eq!(err.to_string(), "storage error: disk full");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StepError = io_err.into();
        assert!(matches!(err, StepError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: StepError = json_err.into();
        assert!(matches!(err, StepError::Json(_)));
    }
}
