//! idbx Core Types
//!
//! This crate holds the data model shared by the client-side dispatcher
//! (`idbx-dispatch`), the wire protocol (`idbx-proto`) and storage backends
//! (`idbx-memory`):
//!
//! - **key**: IndexedDB keys with their standard ordering and size estimates, key ranges
//! - **value**: serialized values and the blob handles they reference
//! - **metadata**: database / object store / index metadata
//! - **error**: the error code + message pair delivered to callers
//! - **slots**: a generation-checked slot table used for every opaque handle
//!
//! # Example
//!
//! ```rust
//! use idbx_core::{IdbKey, KeyRange};
//!
//! let range = KeyRange::bound(IdbKey::Number(1.0), IdbKey::Number(10.0), false, true);
//! assert!(range.contains(&IdbKey::Number(1.0)));
//! assert!(!range.contains(&IdbKey::Number(10.0)));
//! assert!(IdbKey::String("a".into()) > IdbKey::Number(1e9));
//! ```

pub mod error;
pub mod key;
pub mod metadata;
pub mod slots;
pub mod types;
pub mod value;

// Re-export main types at crate root
pub use error::{DatabaseError, ErrorCode};
pub use key::{IdbKey, KeyRange};
pub use metadata::{DatabaseMetadata, IndexMetadata, KeyPath, ObjectStoreMetadata};
pub use slots::{SlotKey, Slots};
pub use types::{
    CursorDirection, DataLoss, IndexId, IndexKeys, ObjectStoreId, PutMode, TaskType,
    TransactionId, TransactionMode, NO_INDEX,
};
pub use value::{BlobInfo, IdbValue, ReturnValue};
