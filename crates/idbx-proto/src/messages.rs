//! Messages exchanged between a client context and the storage backend.

use idbx_core::{
    CursorDirection, DataLoss, DatabaseError, DatabaseMetadata, IdbKey, IdbValue, IndexId,
    IndexKeys, KeyPath, KeyRange, ObjectStoreId, PutMode, ReturnValue, TaskType, TransactionId,
    TransactionMode,
};
use serde::{Deserialize, Serialize};

use crate::ids::{CallbackId, CursorId, DatabaseCallbacksId, DatabaseId, ObserverId, WorkerId};
use crate::observer::{ObserverChanges, ObserverOptions};

/// Return address of a request: the issuing worker and the callback slot
/// its answer must quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub worker: WorkerId,
    pub callbacks: CallbackId,
}

/// Client → backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostMessage {
    // Factory
    FactoryGetDatabaseNames {
        ticket: Ticket,
        origin: String,
    },
    FactoryOpen {
        ticket: Ticket,
        database_callbacks: DatabaseCallbacksId,
        origin: String,
        name: String,
        /// `None` opens the current version (creating version 1 if new).
        version: Option<i64>,
        /// Used for the version change transaction if an upgrade is needed.
        transaction: TransactionId,
    },
    FactoryDeleteDatabase {
        ticket: Ticket,
        origin: String,
        name: String,
    },

    // Connection lifecycle
    DatabaseClose {
        database: DatabaseId,
    },
    DatabaseDestroyed {
        database: DatabaseId,
    },
    DatabaseVersionChangeIgnored {
        database: DatabaseId,
    },

    // Structural operations
    DatabaseCreateTransaction {
        database: DatabaseId,
        transaction: TransactionId,
        scope: Vec<ObjectStoreId>,
        mode: TransactionMode,
    },
    DatabaseCreateObjectStore {
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        name: String,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    },
    DatabaseDeleteObjectStore {
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
    },
    DatabaseRenameObjectStore {
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        new_name: String,
    },
    DatabaseCreateIndex {
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        name: String,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    },
    DatabaseDeleteIndex {
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
    },
    DatabaseRenameIndex {
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        new_name: String,
    },
    DatabaseAbort {
        database: DatabaseId,
        transaction: TransactionId,
    },
    DatabaseCommit {
        database: DatabaseId,
        transaction: TransactionId,
    },
    DatabaseObserve {
        database: DatabaseId,
        transaction: TransactionId,
        observer: ObserverId,
        options: ObserverOptions,
    },
    DatabaseUnobserve {
        database: DatabaseId,
        observers: Vec<ObserverId>,
    },
    DatabaseSetIndexKeys {
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        primary_key: IdbKey,
        index_keys: Vec<IndexKeys>,
    },
    DatabaseSetIndexesReady {
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index_ids: Vec<IndexId>,
    },

    // Data operations
    DatabaseGet {
        ticket: Ticket,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        key_range: KeyRange,
        key_only: bool,
    },
    DatabaseGetAll {
        ticket: Ticket,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        key_range: KeyRange,
        key_only: bool,
        max_count: Option<u32>,
    },
    DatabasePut {
        ticket: Ticket,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        value: IdbValue,
        key: Option<IdbKey>,
        mode: PutMode,
        index_keys: Vec<IndexKeys>,
    },
    DatabaseOpenCursor {
        ticket: Ticket,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        key_range: KeyRange,
        direction: CursorDirection,
        key_only: bool,
        task_type: TaskType,
    },
    DatabaseCount {
        ticket: Ticket,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        key_range: KeyRange,
    },
    DatabaseDeleteRange {
        ticket: Ticket,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        key_range: KeyRange,
    },
    DatabaseClear {
        ticket: Ticket,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
    },

    // Cursor operations
    CursorAdvance {
        ticket: Ticket,
        cursor: CursorId,
        count: u32,
    },
    CursorContinue {
        ticket: Ticket,
        cursor: CursorId,
        key: Option<IdbKey>,
        primary_key: Option<IdbKey>,
    },
    CursorPrefetch {
        ticket: Ticket,
        cursor: CursorId,
        count: u32,
    },
    /// Tells the backend how much of the last prefetch the client consumed so
    /// it can reposition its cursor.
    CursorPrefetchReset {
        cursor: CursorId,
        used_prefetches: u32,
        unused_prefetches: u32,
    },
    CursorDestroyed {
        cursor: CursorId,
    },

    /// Releases the backend's hold on blobs the client has taken (or discarded).
    AckReceivedBlobs {
        uuids: Vec<String>,
    },
}

impl HostMessage {
    /// The ticket of requests that expect an answer.
    pub fn ticket(&self) -> Option<Ticket> {
        use HostMessage::*;
        match self {
            FactoryGetDatabaseNames { ticket, .. }
            | FactoryOpen { ticket, .. }
            | FactoryDeleteDatabase { ticket, .. }
            | DatabaseGet { ticket, .. }
            | DatabaseGetAll { ticket, .. }
            | DatabasePut { ticket, .. }
            | DatabaseOpenCursor { ticket, .. }
            | DatabaseCount { ticket, .. }
            | DatabaseDeleteRange { ticket, .. }
            | DatabaseClear { ticket, .. }
            | CursorAdvance { ticket, .. }
            | CursorContinue { ticket, .. }
            | CursorPrefetch { ticket, .. } => Some(*ticket),
            _ => None,
        }
    }
}

/// One cursor position as delivered to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorEntry {
    pub key: IdbKey,
    pub primary_key: IdbKey,
    /// `None` for key-only cursors.
    pub value: Option<IdbValue>,
}

/// Backend → client, addressed to one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub worker: WorkerId,
    pub event: ClientEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    SuccessCursor {
        callbacks: CallbackId,
        cursor: CursorId,
        entry: CursorEntry,
    },
    SuccessCursorContinue {
        callbacks: CallbackId,
        cursor: CursorId,
        entry: CursorEntry,
    },
    SuccessCursorPrefetch {
        callbacks: CallbackId,
        cursor: CursorId,
        keys: Vec<IdbKey>,
        primary_keys: Vec<IdbKey>,
        values: Vec<Option<IdbValue>>,
    },
    SuccessDatabase {
        callbacks: CallbackId,
        database_callbacks: DatabaseCallbacksId,
        /// `None` when the connection was already handed out by `UpgradeNeeded`.
        database: Option<DatabaseId>,
        metadata: DatabaseMetadata,
    },
    SuccessKey {
        callbacks: CallbackId,
        key: Option<IdbKey>,
    },
    SuccessStringList {
        callbacks: CallbackId,
        list: Vec<String>,
    },
    SuccessArray {
        callbacks: CallbackId,
        values: Vec<ReturnValue>,
    },
    /// Also signals "no data" for open-cursor and exhausted cursors.
    SuccessValue {
        callbacks: CallbackId,
        value: Option<ReturnValue>,
    },
    SuccessValueWithKey {
        callbacks: CallbackId,
        value: IdbValue,
        primary_key: IdbKey,
        key_path: KeyPath,
    },
    SuccessInteger {
        callbacks: CallbackId,
        value: i64,
    },
    SuccessUndefined {
        callbacks: CallbackId,
    },
    Error {
        callbacks: CallbackId,
        error: DatabaseError,
    },
    Blocked {
        callbacks: CallbackId,
        old_version: i64,
    },
    UpgradeNeeded {
        callbacks: CallbackId,
        database_callbacks: DatabaseCallbacksId,
        database: DatabaseId,
        old_version: i64,
        data_loss: DataLoss,
        data_loss_message: String,
        metadata: DatabaseMetadata,
    },

    // Per-connection events
    ForcedClose {
        database_callbacks: DatabaseCallbacksId,
    },
    VersionChange {
        database_callbacks: DatabaseCallbacksId,
        old_version: i64,
        new_version: Option<i64>,
    },
    Abort {
        database_callbacks: DatabaseCallbacksId,
        transaction: TransactionId,
        error: DatabaseError,
    },
    Complete {
        database_callbacks: DatabaseCallbacksId,
        transaction: TransactionId,
    },
    DatabaseChanges {
        database_callbacks: DatabaseCallbacksId,
        changes: ObserverChanges,
    },
}
