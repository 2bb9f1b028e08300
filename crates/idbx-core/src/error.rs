//! Database error types
//!
//! `DatabaseError` is what a caller ultimately sees on a request's error path,
//! whether the server reported it, the dispatcher rejected the request locally,
//! or the dispatcher was torn down while the request was pending.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// IndexedDB exception names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    UnknownError,
    ConstraintError,
    DataError,
    TransactionInactiveError,
    ReadOnlyError,
    VersionError,
    NotFoundError,
    InvalidStateError,
    InvalidAccessError,
    AbortError,
    TimeoutError,
    QuotaExceededError,
    DataCloneError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnknownError => "UnknownError",
            ErrorCode::ConstraintError => "ConstraintError",
            ErrorCode::DataError => "DataError",
            ErrorCode::TransactionInactiveError => "TransactionInactiveError",
            ErrorCode::ReadOnlyError => "ReadOnlyError",
            ErrorCode::VersionError => "VersionError",
            ErrorCode::NotFoundError => "NotFoundError",
            ErrorCode::InvalidStateError => "InvalidStateError",
            ErrorCode::InvalidAccessError => "InvalidAccessError",
            ErrorCode::AbortError => "AbortError",
            ErrorCode::TimeoutError => "TimeoutError",
            ErrorCode::QuotaExceededError => "QuotaExceededError",
            ErrorCode::DataCloneError => "DataCloneError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error code plus a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct DatabaseError {
    pub code: ErrorCode,
    pub message: String,
}

impl DatabaseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFoundError, message)
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AbortError, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DataError, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConstraintError, message)
    }
}
