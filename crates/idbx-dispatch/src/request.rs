//! What callers hold while a request is in flight.
//!
//! Every request gets its own unbounded channel. The dispatcher keeps the
//! sending half (`Callbacks`) in its registry and the caller reads outcomes
//! from the receiving half (`Request`). Delivery never runs caller code
//! while the dispatcher is mid-update.

use std::fmt;

use idbx_core::{
    DataLoss, DatabaseError, DatabaseMetadata, IdbKey, IdbValue, KeyPath, ReturnValue,
    TransactionId,
};
use idbx_proto::{CursorEntry, Observation};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::callbacks::PendingHandler;
use crate::cursor::CursorHandle;
use crate::database::DatabaseHandle;

/// One response to a request.
pub enum IdbOutcome {
    /// A cursor was opened and positioned on its first entry
    Cursor {
        cursor: CursorHandle,
        entry: CursorEntry,
    },
    /// An existing cursor moved, either from the backend or from its prefetch cache
    CursorContinue(CursorEntry),
    /// The open completed. `database` is `None` when the connection was
    /// already delivered by `UpgradeNeeded`.
    Database {
        database: Option<DatabaseHandle>,
        metadata: DatabaseMetadata,
    },
    Key(Option<IdbKey>),
    StringList(Vec<String>),
    Array(Vec<ReturnValue>),
    /// A single value, or `None` for "no data" (including an exhausted cursor)
    Value(Option<ReturnValue>),
    ValueWithKey {
        value: IdbValue,
        primary_key: IdbKey,
        key_path: KeyPath,
    },
    Integer(i64),
    Undefined,
    Error(DatabaseError),
    /// Other connections are holding up an open or delete. More outcomes follow.
    Blocked { old_version: i64 },
    /// The open needs a version change transaction. More outcomes follow.
    UpgradeNeeded {
        database: DatabaseHandle,
        old_version: i64,
        data_loss: DataLoss,
        data_loss_message: String,
        metadata: DatabaseMetadata,
    },
}

impl IdbOutcome {
    /// Whether this outcome ends the request.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            IdbOutcome::Blocked { .. } | IdbOutcome::UpgradeNeeded { .. }
        )
    }

    pub fn error(&self) -> Option<&DatabaseError> {
        match self {
            IdbOutcome::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<IdbOutcome, DatabaseError> {
        match self {
            IdbOutcome::Error(err) => Err(err),
            other => Ok(other),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            IdbOutcome::Cursor { .. } => "Cursor",
            IdbOutcome::CursorContinue(_) => "CursorContinue",
            IdbOutcome::Database { .. } => "Database",
            IdbOutcome::Key(_) => "Key",
            IdbOutcome::StringList(_) => "StringList",
            IdbOutcome::Array(_) => "Array",
            IdbOutcome::Value(_) => "Value",
            IdbOutcome::ValueWithKey { .. } => "ValueWithKey",
            IdbOutcome::Integer(_) => "Integer",
            IdbOutcome::Undefined => "Undefined",
            IdbOutcome::Error(_) => "Error",
            IdbOutcome::Blocked { .. } => "Blocked",
            IdbOutcome::UpgradeNeeded { .. } => "UpgradeNeeded",
        }
    }
}

impl fmt::Debug for IdbOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdbOutcome::Cursor { cursor, entry } => f
                .debug_struct("Cursor")
                .field("cursor", &cursor.id())
                .field("entry", entry)
                .finish(),
            IdbOutcome::CursorContinue(entry) => f.debug_tuple("CursorContinue").field(entry).finish(),
            IdbOutcome::Key(key) => f.debug_tuple("Key").field(key).finish(),
            IdbOutcome::Value(value) => f.debug_tuple("Value").field(value).finish(),
            IdbOutcome::Integer(n) => f.debug_tuple("Integer").field(n).finish(),
            IdbOutcome::Error(err) => f.debug_tuple("Error").field(err).finish(),
            IdbOutcome::Blocked { old_version } => f
                .debug_struct("Blocked")
                .field("old_version", old_version)
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Registry-side half of a request.
#[derive(Clone)]
pub struct Callbacks {
    tx: mpsc::UnboundedSender<IdbOutcome>,
}

impl Callbacks {
    /// Hand an outcome to the caller. A caller that stopped listening simply
    /// drops it, along with any handle it carries.
    pub fn deliver(&self, outcome: IdbOutcome) {
        let _ = self.tx.send(outcome);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PendingHandler for Callbacks {
    fn abandon(self) {
        self.deliver(IdbOutcome::Error(DatabaseError::not_found(
            "The request was dropped because its dispatcher shut down.",
        )));
    }
}

/// Caller-side half of a request.
pub struct Request {
    rx: mpsc::UnboundedReceiver<IdbOutcome>,
}

impl Request {
    pub(crate) fn channel() -> (Callbacks, Request) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Callbacks { tx }, Request { rx })
    }

    /// A request answered locally, without a round trip.
    pub(crate) fn ready(outcome: IdbOutcome) -> Request {
        let (callbacks, request) = Self::channel();
        callbacks.deliver(outcome);
        request
    }

    pub(crate) fn failed(error: DatabaseError) -> Request {
        Self::ready(IdbOutcome::Error(error))
    }

    /// Wait for the next outcome. `None` once the dispatcher forgot the request.
    pub async fn next(&mut self) -> Option<IdbOutcome> {
        self.rx.recv().await
    }

    /// The next outcome if one has already arrived.
    pub fn try_next(&mut self) -> Option<IdbOutcome> {
        self.rx.try_recv().ok()
    }

    /// Wait for the first terminal outcome, skipping `Blocked`.
    pub async fn finish(&mut self) -> Option<IdbOutcome> {
        while let Some(outcome) = self.next().await {
            if outcome.is_terminal() {
                return Some(outcome);
            }
        }
        None
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<IdbOutcome> {
        UnboundedReceiverStream::new(self.rx)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").finish_non_exhaustive()
    }
}

/// Connection-level notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseEvent {
    /// The backend closed the connection on its own
    ForcedClose,
    /// Another connection wants to change the version; close to let it proceed
    VersionChange {
        old_version: i64,
        new_version: Option<i64>,
    },
    Abort {
        transaction: TransactionId,
        error: DatabaseError,
    },
    Complete { transaction: TransactionId },
}

/// Registry-side half of a connection's event stream.
#[derive(Clone)]
pub struct DatabaseEventSink {
    tx: mpsc::UnboundedSender<DatabaseEvent>,
}

impl DatabaseEventSink {
    pub fn deliver(&self, event: DatabaseEvent) {
        let _ = self.tx.send(event);
    }
}

/// Dropping the sink closes the stream, which is all a connection needs to
/// learn at teardown.
impl PendingHandler for DatabaseEventSink {
    fn abandon(self) {}
}

/// Caller-side stream of connection events, created together with the open request.
#[derive(Debug)]
pub struct DatabaseEvents {
    rx: mpsc::UnboundedReceiver<DatabaseEvent>,
}

impl DatabaseEvents {
    pub(crate) fn channel() -> (DatabaseEventSink, DatabaseEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DatabaseEventSink { tx }, DatabaseEvents { rx })
    }

    pub async fn next(&mut self) -> Option<DatabaseEvent> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<DatabaseEvent> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<DatabaseEvent> {
        UnboundedReceiverStream::new(self.rx)
    }
}

/// Returned by `Dispatcher::open`.
#[derive(Debug)]
pub struct OpenRequest {
    pub request: Request,
    pub events: DatabaseEvents,
}

/// Observations delivered to one observer, batch by batch.
#[derive(Debug)]
pub struct ObserverChangesStream {
    rx: mpsc::UnboundedReceiver<Vec<Observation>>,
}

impl ObserverChangesStream {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<Vec<Observation>>, ObserverChangesStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, ObserverChangesStream { rx })
    }

    pub async fn next(&mut self) -> Option<Vec<Observation>> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<Vec<Observation>> {
        self.rx.try_recv().ok()
    }
}
