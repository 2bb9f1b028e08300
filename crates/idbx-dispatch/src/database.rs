//! Client-side database connection handle.
//!
//! Structural operations are forwarded as-is. Data operations go through the
//! dispatcher, which first resets the prefetch caches of the other cursors in
//! the same transaction.

use std::cell::{Cell, RefCell};
use std::fmt;

use idbx::tracing::prefix;
use idbx_core::{
    CursorDirection, DatabaseError, IdbKey, IdbValue, IndexId, IndexKeys, KeyPath, KeyRange,
    ObjectStoreId, PutMode, TaskType, TransactionId, TransactionMode,
};
use idbx_proto::{DatabaseCallbacksId, DatabaseId, HostMessage, ObserverId, ObserverOptions};
use tracing::debug;

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::request::{ObserverChangesStream, Request};

/// A registered observer and the stream its change batches arrive on.
#[derive(Debug)]
pub struct Observer {
    pub id: ObserverId,
    pub changes: ObserverChangesStream,
}

/// Which entries a cursor walks and how.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorOptions {
    pub object_store: ObjectStoreId,
    pub index: IndexId,
    pub key_range: KeyRange,
    pub direction: CursorDirection,
    pub key_only: bool,
    pub task_type: TaskType,
}

impl CursorOptions {
    /// Forward cursor over a whole object store.
    pub fn object_store(object_store: ObjectStoreId) -> Self {
        Self {
            object_store,
            index: idbx_core::NO_INDEX,
            key_range: KeyRange::unbounded(),
            direction: CursorDirection::Next,
            key_only: false,
            task_type: TaskType::Normal,
        }
    }

    pub fn with_range(mut self, key_range: KeyRange) -> Self {
        self.key_range = key_range;
        self
    }

    pub fn with_direction(mut self, direction: CursorDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn key_only(mut self) -> Self {
        self.key_only = true;
        self
    }
}

/// An open connection. Dropping it tells the backend the handle is gone.
pub struct DatabaseHandle {
    id: DatabaseId,
    database_callbacks: DatabaseCallbacksId,
    dispatcher: Dispatcher,
    observers: RefCell<Vec<ObserverId>>,
    closed: Cell<bool>,
}

impl DatabaseHandle {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        id: DatabaseId,
        database_callbacks: DatabaseCallbacksId,
    ) -> Self {
        Self {
            id,
            database_callbacks,
            dispatcher,
            observers: RefCell::new(Vec::new()),
            closed: Cell::new(false),
        }
    }

    pub fn id(&self) -> DatabaseId {
        self.id
    }

    pub fn database_callbacks_id(&self) -> DatabaseCallbacksId {
        self.database_callbacks
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub fn observer_ids(&self) -> Vec<ObserverId> {
        self.observers.borrow().clone()
    }

    // Structural operations

    pub fn create_transaction(
        &self,
        transaction: TransactionId,
        scope: Vec<ObjectStoreId>,
        mode: TransactionMode,
    ) {
        self.dispatcher.post(HostMessage::DatabaseCreateTransaction {
            database: self.id,
            transaction,
            scope,
            mode,
        });
    }

    pub fn create_object_store(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        name: &str,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) {
        self.dispatcher.post(HostMessage::DatabaseCreateObjectStore {
            database: self.id,
            transaction,
            object_store,
            name: name.to_string(),
            key_path,
            auto_increment,
        });
    }

    pub fn delete_object_store(&self, transaction: TransactionId, object_store: ObjectStoreId) {
        self.dispatcher.post(HostMessage::DatabaseDeleteObjectStore {
            database: self.id,
            transaction,
            object_store,
        });
    }

    pub fn rename_object_store(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        new_name: &str,
    ) {
        self.dispatcher.post(HostMessage::DatabaseRenameObjectStore {
            database: self.id,
            transaction,
            object_store,
            new_name: new_name.to_string(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_index(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        name: &str,
        key_path: KeyPath,
        unique: bool,
        multi_entry: bool,
    ) {
        self.dispatcher.post(HostMessage::DatabaseCreateIndex {
            database: self.id,
            transaction,
            object_store,
            index,
            name: name.to_string(),
            key_path,
            unique,
            multi_entry,
        });
    }

    pub fn delete_index(&self, transaction: TransactionId, object_store: ObjectStoreId, index: IndexId) {
        self.dispatcher.post(HostMessage::DatabaseDeleteIndex {
            database: self.id,
            transaction,
            object_store,
            index,
        });
    }

    pub fn rename_index(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        new_name: &str,
    ) {
        self.dispatcher.post(HostMessage::DatabaseRenameIndex {
            database: self.id,
            transaction,
            object_store,
            index,
            new_name: new_name.to_string(),
        });
    }

    pub fn abort(&self, transaction: TransactionId) {
        self.dispatcher.post(HostMessage::DatabaseAbort {
            database: self.id,
            transaction,
        });
    }

    pub fn commit(&self, transaction: TransactionId) {
        self.dispatcher.post(HostMessage::DatabaseCommit {
            database: self.id,
            transaction,
        });
    }

    pub fn set_index_keys(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        primary_key: IdbKey,
        index_keys: Vec<IndexKeys>,
    ) {
        self.dispatcher.post(HostMessage::DatabaseSetIndexKeys {
            database: self.id,
            transaction,
            object_store,
            primary_key,
            index_keys,
        });
    }

    pub fn set_indexes_ready(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index_ids: Vec<IndexId>,
    ) {
        self.dispatcher.post(HostMessage::DatabaseSetIndexesReady {
            database: self.id,
            transaction,
            object_store,
            index_ids,
        });
    }

    /// Tell the backend this connection chose not to close on a version change.
    pub fn version_change_ignored(&self) {
        self.dispatcher
            .post(HostMessage::DatabaseVersionChangeIgnored { database: self.id });
    }

    // Data operations

    pub fn get(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        key_range: KeyRange,
        key_only: bool,
    ) -> Request {
        let database = self.id;
        self.dispatcher.submit(Some(transaction), |ticket| HostMessage::DatabaseGet {
            ticket,
            database,
            transaction,
            object_store,
            index,
            key_range,
            key_only,
        })
    }

    pub fn get_all(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        key_range: KeyRange,
        key_only: bool,
        max_count: Option<u32>,
    ) -> Request {
        let database = self.id;
        self.dispatcher.submit(Some(transaction), |ticket| HostMessage::DatabaseGetAll {
            ticket,
            database,
            transaction,
            object_store,
            index,
            key_range,
            key_only,
            max_count,
        })
    }

    /// Store a value. Values too large for one message fail locally and
    /// never reach the backend.
    pub fn put(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        value: IdbValue,
        key: Option<IdbKey>,
        mode: PutMode,
        index_keys: Vec<IndexKeys>,
    ) -> Request {
        let max = self.dispatcher.config().max_put_value_size;
        let size = value.size() + key.as_ref().map_or(0, IdbKey::size_estimate);
        if size > max {
            debug!("{} rejecting put of {} bytes (max {})", prefix::DB, size, max);
            let err: DatabaseError = DispatchError::ValueTooLarge { size, max }.into();
            return Request::failed(err);
        }

        let database = self.id;
        self.dispatcher.submit(Some(transaction), |ticket| HostMessage::DatabasePut {
            ticket,
            database,
            transaction,
            object_store,
            value,
            key,
            mode,
            index_keys,
        })
    }

    /// Open a cursor. The first outcome is `Cursor` with the handle and first
    /// entry, or `Value(None)` when nothing is in range.
    pub fn open_cursor(&self, transaction: TransactionId, options: CursorOptions) -> Request {
        let database = self.id;
        self.dispatcher
            .submit_open_cursor(transaction, |ticket| HostMessage::DatabaseOpenCursor {
                ticket,
                database,
                transaction,
                object_store: options.object_store,
                index: options.index,
                key_range: options.key_range,
                direction: options.direction,
                key_only: options.key_only,
                task_type: options.task_type,
            })
    }

    pub fn count(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        key_range: KeyRange,
    ) -> Request {
        let database = self.id;
        self.dispatcher.submit(Some(transaction), |ticket| HostMessage::DatabaseCount {
            ticket,
            database,
            transaction,
            object_store,
            index,
            key_range,
        })
    }

    pub fn delete_range(
        &self,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        key_range: KeyRange,
    ) -> Request {
        let database = self.id;
        self.dispatcher
            .submit(Some(transaction), |ticket| HostMessage::DatabaseDeleteRange {
                ticket,
                database,
                transaction,
                object_store,
                key_range,
            })
    }

    pub fn clear(&self, transaction: TransactionId, object_store: ObjectStoreId) -> Request {
        let database = self.id;
        self.dispatcher.submit(Some(transaction), |ticket| HostMessage::DatabaseClear {
            ticket,
            database,
            transaction,
            object_store,
        })
    }

    // Observers

    /// Start observing changes committed through this connection's database.
    pub fn observe(
        &self,
        transaction: TransactionId,
        options: ObserverOptions,
    ) -> Result<Observer, DatabaseError> {
        let (tx, changes) = ObserverChangesStream::channel();
        let id = self
            .dispatcher
            .add_observer(self.id, tx)
            .ok_or_else(|| DatabaseError::from(self.dispatcher.not_running_error()))?;
        self.observers.borrow_mut().push(id);
        self.dispatcher.post(HostMessage::DatabaseObserve {
            database: self.id,
            transaction,
            observer: id,
            options,
        });
        Ok(Observer { id, changes })
    }

    /// Stop the given observers. Ids not registered through this handle are ignored.
    pub fn unobserve(&self, ids: &[ObserverId]) {
        let removed = self.dispatcher.remove_observers(self.id, ids);
        if removed.is_empty() {
            return;
        }
        self.observers.borrow_mut().retain(|id| !removed.contains(id));
        self.dispatcher.post(HostMessage::DatabaseUnobserve {
            database: self.id,
            observers: removed,
        });
    }

    /// Close the connection. Observers go first so none fire after close.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        debug!("{} closing {}", prefix::CLOSE, self.id);
        let ids = self.observer_ids();
        self.unobserve(&ids);
        self.dispatcher.post(HostMessage::DatabaseClose { database: self.id });
        self.dispatcher.forget_database_callbacks(self.database_callbacks);
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("id", &self.id)
            .field("database_callbacks", &self.database_callbacks)
            .field("closed", &self.closed.get())
            .finish()
    }
}

impl Drop for DatabaseHandle {
    fn drop(&mut self) {
        let ids = self.observers.borrow().clone();
        self.dispatcher.remove_observers(self.id, &ids);
        self.dispatcher
            .post(HostMessage::DatabaseDestroyed { database: self.id });
        self.dispatcher.forget_database_callbacks(self.database_callbacks);
    }
}
