//! idbx in-memory storage backend.
//!
//! Speaks the `idbx-proto` protocol from the storage side:
//!
//! - **backend**: [`MemoryBackend`], databases, connections, transactions and observers
//! - **store**: object stores with key generators and range scans
//! - **cursor**: object store cursors with prefetch and prefetch-reset
//! - **serve**: async loops that feed a backend from a channel
//!
//! Index reads and index cursors are not supported.
//!
//! # Example
//!
//! ```rust
//! use idbx_memory::MemoryBackend;
//! use idbx_proto::{CallbackId, ClientEvent, HostMessage, Ticket, WorkerId};
//!
//! let mut backend = MemoryBackend::new();
//! let ticket = Ticket { worker: WorkerId::MAIN, callbacks: CallbackId::from_raw(1) };
//! let out = backend.handle(HostMessage::FactoryGetDatabaseNames {
//!     ticket,
//!     origin: "https://example.test".into(),
//! });
//! assert!(matches!(out[0].event, ClientEvent::SuccessStringList { .. }));
//! ```

pub mod backend;
mod cursor;
pub mod serve;
pub mod store;

pub use backend::MemoryBackend;
pub use serve::{serve, serve_frames};
pub use store::ObjectStore;
