//! Common error types for idbx Rust components.

use thiserror::Error;

/// Common error type for idbx plumbing (channels, codecs, configuration).
///
/// Errors that are reported *to script* travel as `idbx_core::DatabaseError`
/// instead; this type covers the layers underneath.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The message channel is closed or refused the message
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("{0}")]
    Internal(String),
}

/// Result type alias using idbx Error.
pub type Result<T> = std::result::Result<T, Error>;
