//! Wire protocol for idbx.
//!
//! `HostMessage` flows from a client context (document or worker) to the
//! storage backend; `ClientMessage` flows back. Every request that expects an
//! answer carries a `Ticket` naming the worker that issued it and the
//! `CallbackId` the answer must quote.
//!
//! Messages are plain serde types; `codec` turns them into byte frames for
//! transports that only move bytes.

pub mod codec;
pub mod ids;
pub mod messages;
pub mod observer;

pub use ids::{CallbackId, CursorId, DatabaseCallbacksId, DatabaseId, ObserverId, WorkerId};
pub use messages::{ClientEvent, ClientMessage, CursorEntry, HostMessage, Ticket};
pub use observer::{Observation, ObserverChanges, ObserverOptions, OperationType};
