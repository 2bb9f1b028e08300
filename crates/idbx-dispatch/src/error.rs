//! Error types for the request dispatcher

use idbx_core::{DatabaseError, ErrorCode};
use idbx_proto::WorkerId;
use thiserror::Error;

/// Result type for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Failures detected on the client side of the channel.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A put whose value would not fit in one message
    #[error("The serialized value is too large (size={size} bytes, max={max} bytes).")]
    ValueTooLarge { size: usize, max: usize },

    /// A handle was used after its dispatcher shut down
    #[error("The dispatcher for {0} is no longer running.")]
    NotRunning(WorkerId),

    /// The message channel refused the request
    #[error("The request could not be sent: {0}")]
    Transport(#[from] idbx::Error),

    /// The backend sent something the client cannot interpret
    #[error("Malformed response from backend: {0}")]
    Protocol(String),
}

/// Convert DispatchError to the DatabaseError delivered to callers
impl From<DispatchError> for DatabaseError {
    fn from(err: DispatchError) -> Self {
        let code = match &err {
            DispatchError::ValueTooLarge { .. } => ErrorCode::UnknownError,
            DispatchError::NotRunning(_) => ErrorCode::AbortError,
            DispatchError::Transport(_) => ErrorCode::UnknownError,
            DispatchError::Protocol(_) => ErrorCode::UnknownError,
        };
        DatabaseError::new(code, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_too_large_message() {
        let err: DatabaseError = DispatchError::ValueTooLarge {
            size: 2048,
            max: 1024,
        }
        .into();
        assert_eq!(err.code, ErrorCode::UnknownError);
        assert_eq!(
            err.message,
            "The serialized value is too large (size=2048 bytes, max=1024 bytes)."
        );
    }

    #[test]
    fn test_not_running_names_the_worker() {
        let err: DatabaseError = DispatchError::NotRunning(WorkerId(3)).into();
        assert_eq!(err.code, ErrorCode::AbortError);
        assert!(err.message.contains("worker#3"));
    }
}
