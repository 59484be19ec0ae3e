use std::time::Duration;
use thiserror::Error;

/// Core error type for the Opflow engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Flow not found (or disabled, which callers must treat the same way)
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Write rejected because it would clobber existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Source text did not evaluate to an invocable unit
    #[error("Compile error: {0}")]
    CompileError(String),

    /// Execution exceeded the wall-clock bound
    #[error("Flow execution timed out after {0:?}")]
    Timeout(Duration),

    /// The flow itself threw; the original message is preserved
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Anti-replay check failed; the request timestamp is too old
    #[error("Request expired: {0}")]
    Expired(String),

    /// Key generation exhausted its retry budget without finding a free key
    #[error("Key generation failed after {attempts} attempts")]
    KeyGenerationFailed {
        /// Number of generate-and-check attempts made
        attempts: u32,
    },

    /// Persistence layer error
    #[error("Store error: {0}")]
    StoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(err: String) -> Self {
        EngineError::Internal(err)
    }
}

impl From<&str> for EngineError {
    fn from(err: &str) -> Self {
        EngineError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                EngineError::FlowNotFound("k1".to_string()),
                "Flow not found: k1",
            ),
            (
                EngineError::Conflict("key exists".to_string()),
                "Conflict: key exists",
            ),
            (
                EngineError::CompileError("unexpected token".to_string()),
                "Compile error: unexpected token",
            ),
            (
                EngineError::ExecutionError("boom".to_string()),
                "Execution error: boom",
            ),
            (
                EngineError::Expired("older than 30 minutes".to_string()),
                "Request expired: older than 30 minutes",
            ),
            (
                EngineError::KeyGenerationFailed { attempts: 16 },
                "Key generation failed after 16 attempts",
            ),
            (
                EngineError::StoreError("lock poisoned".to_string()),
                "Store error: lock poisoned",
            ),
            (
                EngineError::SerializationError("bad json".to_string()),
                "Serialization error: bad json",
            ),
            (
                EngineError::Internal("oops".to_string()),
                "Internal error: oops",
            ),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_timeout_display_mentions_duration() {
        let err = EngineError::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: EngineError = json_error.into();

        match error {
            EngineError::SerializationError(msg) => {
                assert!(msg.contains("expected value"));
            }
            _ => panic!("Expected SerializationError variant"),
        }
    }

    #[test]
    fn test_error_clone_and_eq() {
        let original = EngineError::Conflict("test".to_string());
        let cloned = original.clone();

        assert_eq!(original, cloned);
    }
}
