//! idbx client-side request dispatcher.
//!
//! Translates typed IndexedDB operations into [`HostMessage`]s for the storage
//! backend and routes its [`ClientMessage`]s back to the request, cursor or
//! connection they belong to.
//!
//! - **dispatcher**: the per-worker [`Dispatcher`] and response demultiplexing
//! - **callbacks**: generation-checked registry of pending handlers
//! - **cursor** / **prefetch**: cursor handles and their adaptive prefetch cache
//! - **database**: connection handles (structural, data and observer operations)
//! - **registry**: per-worker ownership ([`WorkerLoop`], [`DispatcherContext`]) and
//!   cross-thread inbox routing ([`WorkerRouter`])
//! - **transport**: the outbound [`MessageSender`] seam
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//! use idbx_core::TransactionId;
//! use idbx_dispatch::{Dispatcher, DispatcherConfig, RecordingSender};
//! use idbx_proto::WorkerId;
//!
//! let sender = Rc::new(RecordingSender::new());
//! let dispatcher = Dispatcher::new(WorkerId::MAIN, sender.clone(), DispatcherConfig::default());
//!
//! let open = dispatcher.open("https://example.test", "library", Some(1), TransactionId(1));
//! assert_eq!(sender.len(), 1);
//! assert_eq!(dispatcher.pending_request_count(), 1);
//! # drop(open);
//! ```
//!
//! [`HostMessage`]: idbx_proto::HostMessage
//! [`ClientMessage`]: idbx_proto::ClientMessage

pub mod callbacks;
pub mod config;
pub mod cursor;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod prefetch;
pub mod registry;
pub mod request;
pub mod transport;

pub use callbacks::{CallbackRegistry, PendingHandler, RegistryId};
pub use config::{DispatcherConfig, PrefetchPolicy};
pub use cursor::CursorHandle;
pub use database::{CursorOptions, DatabaseHandle, Observer};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, Result};
pub use prefetch::{PrefetchCache, PrefetchStats};
pub use registry::{DispatcherContext, StopObserver, WorkerLoop, WorkerRouter};
pub use request::{
    DatabaseEvent, DatabaseEvents, IdbOutcome, ObserverChangesStream, OpenRequest, Request,
};
pub use transport::{ChannelSender, EncodedSender, MessageSender, RecordingSender};
