//! Error types for the granary workspace.

use thiserror::Error;

/// Result type alias using granary's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for granary operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage engine operation failed (wraps sqlx::Error)
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// DocSource not found
    #[error("DocSource not found: {0}")]
    DocSourceNotFound(uuid::Uuid),

    /// Invalid input (missing required config, malformed record)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Pipeline stage execution failed
    #[error("Stage error: {0}")]
    Stage(String),

    /// Task/Job scheduling error
    #[error("Job error: {0}")]
    Job(String),

    /// Illegal status transition
    #[error("Invalid transition: {0}")]
    Transition(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wait deadline elapsed before the entity reached a terminal status
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("segment 42".to_string());
        assert_eq!(err.to_string(), "Not found: segment 42");
    }

    #[test]
    fn test_error_display_docsource_not_found() {
        let id = Uuid::nil();
        let err = Error::DocSourceNotFound(id);
        assert_eq!(err.to_string(), format!("DocSource not found: {}", id));
    }

    #[test]
    fn test_error_display_validation() {
        let err = Error::Validation("uri must not be empty".to_string());
        assert_eq!(err.to_string(), "Validation error: uri must not be empty");
    }

    #[test]
    fn test_error_display_stage() {
        let err = Error::Stage("converter returned failure".to_string());
        assert_eq!(err.to_string(), "Stage error: converter returned failure");
    }

    #[test]
    fn test_error_display_timeout() {
        let err = Error::Timeout("docsource did not finish in 5s".to_string());
        assert_eq!(err.to_string(), "Timed out: docsource did not finish in 5s");
    }

    #[test]
    fn test_error_display_transition() {
        let err = Error::Transition("completed -> running".to_string());
        assert_eq!(err.to_string(), "Invalid transition: completed -> running");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "log file missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("log file missing"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
