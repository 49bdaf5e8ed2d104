//! Error types for sessh-tool

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Argument type mismatch for '{name}': expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// sessh exited non-zero without producing any output
    #[error("{0}")]
    InvocationFailed(String),

    #[error("sessh {op} returned invalid JSON: {source}")]
    Parse {
        op: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("sessh {op} timed out after {after_ms}ms")]
    Timeout { op: String, after_ms: u64 },

    #[error("sessh {0} was cancelled")]
    Cancelled(String),
}

impl ToolError {
    /// Errors caused by the caller's request rather than by sessh
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ToolError::NotFound(_)
                | ToolError::InvalidArgument(_)
                | ToolError::MissingArgument(_)
                | ToolError::TypeMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_failed_message_is_verbatim() {
        let err = ToolError::InvocationFailed("ssh: connect to host x port 22".to_string());
        assert_eq!(err.to_string(), "ssh: connect to host x port 22");
    }

    #[test]
    fn test_client_error_classification() {
        assert!(ToolError::MissingArgument("alias".into()).is_client_error());
        assert!(ToolError::NotFound("nope".into()).is_client_error());
        assert!(!ToolError::InvocationFailed("boom".into()).is_client_error());
        assert!(!ToolError::Cancelled("run".into()).is_client_error());
    }
}
