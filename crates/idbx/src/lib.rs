//! # idbx Shared Rust Library
//!
//! This crate provides shared infrastructure for all idbx Rust components:
//! - **error**: Common error type for transport, codec and configuration failures
//! - **tracing**: Logging utilities with idbx segment prefixes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use idbx::error::Error;
//! use idbx::tracing::prefix;
//! ```

pub mod error;
pub mod tracing;

pub use error::{Error, Result};
