//! Error types for the Opflow Server
//!
//! This module contains the error types used throughout the server.

use thiserror::Error;

use opflow_core::EngineError;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Write rejected because it would clobber existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Unauthorized error
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Anti-replay check failed
    #[error("Request expired: {0}")]
    Expired(String),

    /// Stored flow source does not compile
    #[error("Flow compile error: {0}")]
    CompileError(String),

    /// Flow execution exceeded its wall-clock bound
    #[error("Flow execution timed out: {0}")]
    ExecutionTimeout(String),

    /// The flow itself threw
    #[error("Flow execution error: {0}")]
    ExecutionError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

// Implement conversions from other error types
impl From<EngineError> for ServerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::FlowNotFound(key) => ServerError::NotFound(format!("Flow {}", key)),
            EngineError::Conflict(msg) => ServerError::Conflict(msg),
            EngineError::CompileError(msg) => ServerError::CompileError(msg),
            EngineError::Timeout(bound) => {
                ServerError::ExecutionTimeout(format!("exceeded {:?}", bound))
            }
            EngineError::ExecutionError(msg) => ServerError::ExecutionError(msg),
            EngineError::Expired(msg) => ServerError::Expired(msg),
            EngineError::KeyGenerationFailed { attempts } => ServerError::InternalError(format!(
                "Key generation failed after {} attempts",
                attempts
            )),
            EngineError::StoreError(msg) => ServerError::InternalError(msg),
            EngineError::SerializationError(msg) => ServerError::ValidationError(msg),
            EngineError::Internal(msg) => ServerError::InternalError(msg),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::ValidationError(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::InternalError(format!("IO error: {}", err))
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::InternalError(format!("Error: {}", err))
    }
}
