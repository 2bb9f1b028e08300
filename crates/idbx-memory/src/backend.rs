//! In-memory storage backend
//!
//! Answers `HostMessage`s the way a storage process would, holding every
//! database in memory. Useful for tests and the demo binary. Transactions
//! are not isolated and aborts do not roll data back.

use std::collections::{BTreeMap, HashMap};

use idbx::tracing::prefix;
use idbx_core::{
    DataLoss, DatabaseError, DatabaseMetadata, ErrorCode, IdbValue, IndexId, IndexMetadata,
    KeyPath, KeyRange, ObjectStoreId, ObjectStoreMetadata, PutMode, Slots, TransactionId,
    TransactionMode, NO_INDEX,
};
use idbx_proto::{
    CallbackId, ClientEvent, ClientMessage, DatabaseCallbacksId, DatabaseId, HostMessage,
    Observation, ObserverChanges, ObserverId, ObserverOptions, OperationType, Ticket, WorkerId,
};
use tracing::{debug, trace, warn};

use crate::cursor::Cursor;
use crate::store::ObjectStore;

/// Databases are scoped by origin.
pub(crate) type DatabaseKey = (String, String);

pub(crate) struct Database {
    name: String,
    version: i64,
    max_object_store_id: ObjectStoreId,
    pub(crate) stores: BTreeMap<ObjectStoreId, ObjectStore>,
    connections: Vec<DatabaseId>,
}

impl Database {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: DatabaseMetadata::NO_VERSION,
            max_object_store_id: 0,
            stores: BTreeMap::new(),
            connections: Vec::new(),
        }
    }

    fn metadata(&self) -> DatabaseMetadata {
        DatabaseMetadata {
            name: self.name.clone(),
            version: self.version,
            max_object_store_id: self.max_object_store_id,
            object_stores: self
                .stores
                .iter()
                .map(|(id, store)| (*id, store.metadata.clone()))
                .collect(),
        }
    }

    fn store_mut(&mut self, id: ObjectStoreId) -> Result<&mut ObjectStore, DatabaseError> {
        self.stores
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found(format!("No object store with id {id}.")))
    }
}

pub(crate) struct Transaction {
    pub(crate) mode: TransactionMode,
    scope: Vec<ObjectStoreId>,
    observations: Vec<Observation>,
}

impl Transaction {
    fn covers(&self, object_store: ObjectStoreId) -> bool {
        self.mode == TransactionMode::VersionChange
            || self.scope.is_empty()
            || self.scope.contains(&object_store)
    }
}

/// The open request waiting on a version change transaction.
struct PendingUpgrade {
    ticket: Ticket,
    transaction: TransactionId,
    old_version: i64,
}

pub(crate) struct Connection {
    worker: WorkerId,
    pub(crate) database: DatabaseKey,
    callbacks: DatabaseCallbacksId,
    pub(crate) transactions: HashMap<TransactionId, Transaction>,
    observers: BTreeMap<ObserverId, ObserverOptions>,
    upgrade: Option<PendingUpgrade>,
}

impl Connection {
    fn message(&self, event: ClientEvent) -> ClientMessage {
        ClientMessage {
            worker: self.worker,
            event,
        }
    }
}

/// Every database, connection and cursor of one storage process.
#[derive(Default)]
pub struct MemoryBackend {
    pub(crate) databases: BTreeMap<DatabaseKey, Database>,
    pub(crate) connections: Slots<Connection>,
    pub(crate) cursors: Slots<Cursor>,
    held_blobs: HashMap<String, usize>,
}

pub(crate) fn reply(ticket: Ticket, event: ClientEvent) -> ClientMessage {
    ClientMessage {
        worker: ticket.worker,
        event,
    }
}

pub(crate) fn error_event(callbacks: CallbackId, error: DatabaseError) -> ClientEvent {
    ClientEvent::Error { callbacks, error }
}

pub(crate) fn transaction_inactive() -> DatabaseError {
    DatabaseError::new(
        ErrorCode::TransactionInactiveError,
        "The transaction is not active.",
    )
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_names(&self, origin: &str) -> Vec<String> {
        self.databases
            .keys()
            .filter(|(o, _)| o == origin)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }

    /// Number of records in one object store, if it exists.
    pub fn record_count(&self, origin: &str, name: &str, object_store: ObjectStoreId) -> Option<usize> {
        self.databases
            .get(&(origin.to_string(), name.to_string()))?
            .stores
            .get(&object_store)
            .map(ObjectStore::len)
    }

    /// Blob references handed to clients and not yet acknowledged.
    pub fn outstanding_blobs(&self) -> usize {
        self.held_blobs.values().sum()
    }

    /// Handle one request and return everything it sends back, in order.
    pub fn handle(&mut self, message: HostMessage) -> Vec<ClientMessage> {
        trace!("{} handling {:?}", prefix::STORE, message);
        let out = match message {
            HostMessage::FactoryGetDatabaseNames { ticket, origin } => vec![reply(
                ticket,
                ClientEvent::SuccessStringList {
                    callbacks: ticket.callbacks,
                    list: self.database_names(&origin),
                },
            )],
            HostMessage::FactoryOpen {
                ticket,
                database_callbacks,
                origin,
                name,
                version,
                transaction,
            } => self.open(ticket, database_callbacks, (origin, name), version, transaction),
            HostMessage::FactoryDeleteDatabase {
                ticket,
                origin,
                name,
            } => self.delete_database(ticket, (origin, name)),

            HostMessage::DatabaseClose { database } | HostMessage::DatabaseDestroyed { database } => {
                self.close_connection(database)
            }
            HostMessage::DatabaseVersionChangeIgnored { database } => {
                debug!("{} {} ignored a version change", prefix::STORE, database);
                Vec::new()
            }
            HostMessage::DatabaseCreateTransaction {
                database,
                transaction,
                scope,
                mode,
            } => {
                match self.connections.get_mut(database.slot()) {
                    Some(connection) => {
                        connection.transactions.insert(
                            transaction,
                            Transaction {
                                mode,
                                scope,
                                observations: Vec::new(),
                            },
                        );
                    }
                    None => warn!(
                        "{} transaction {} for unknown connection {}",
                        prefix::STORE,
                        transaction,
                        database
                    ),
                }
                Vec::new()
            }
            HostMessage::DatabaseCreateObjectStore {
                database,
                transaction,
                object_store,
                name,
                key_path,
                auto_increment,
            } => self.version_change(database, transaction, |db| {
                create_object_store(db, object_store, name, key_path, auto_increment)
            }),
            HostMessage::DatabaseDeleteObjectStore {
                database,
                transaction,
                object_store,
            } => self.version_change(database, transaction, |db| {
                db.stores
                    .remove(&object_store)
                    .map(|_| ())
                    .ok_or_else(|| DatabaseError::not_found("The object store does not exist."))
            }),
            HostMessage::DatabaseRenameObjectStore {
                database,
                transaction,
                object_store,
                new_name,
            } => self.version_change(database, transaction, |db| {
                if db.stores.values().any(|s| s.metadata.name == new_name) {
                    return Err(DatabaseError::constraint(
                        "An object store with the specified name already exists.",
                    ));
                }
                db.store_mut(object_store)?.metadata.name = new_name;
                Ok(())
            }),
            HostMessage::DatabaseCreateIndex {
                database,
                transaction,
                object_store,
                index,
                name,
                key_path,
                unique,
                multi_entry,
            } => self.version_change(database, transaction, |db| {
                let store = db.store_mut(object_store)?;
                store.metadata.indexes.insert(
                    index,
                    IndexMetadata {
                        id: index,
                        name,
                        key_path,
                        unique,
                        multi_entry,
                    },
                );
                store.metadata.max_index_id = store.metadata.max_index_id.max(index);
                Ok(())
            }),
            HostMessage::DatabaseDeleteIndex {
                database,
                transaction,
                object_store,
                index,
            } => self.version_change(database, transaction, |db| {
                db.store_mut(object_store)?
                    .metadata
                    .indexes
                    .remove(&index)
                    .map(|_| ())
                    .ok_or_else(|| DatabaseError::not_found("The index does not exist."))
            }),
            HostMessage::DatabaseRenameIndex {
                database,
                transaction,
                object_store,
                index,
                new_name,
            } => self.version_change(database, transaction, |db| {
                let indexes = &mut db.store_mut(object_store)?.metadata.indexes;
                match indexes.get_mut(&index) {
                    Some(metadata) => {
                        metadata.name = new_name;
                        Ok(())
                    }
                    None => Err(DatabaseError::not_found("The index does not exist.")),
                }
            }),
            HostMessage::DatabaseAbort {
                database,
                transaction,
            } => self.abort(
                database,
                transaction,
                DatabaseError::abort("The transaction was aborted."),
            ),
            HostMessage::DatabaseCommit {
                database,
                transaction,
            } => self.commit(database, transaction),
            HostMessage::DatabaseObserve {
                database,
                observer,
                options,
                ..
            } => {
                if let Some(connection) = self.connections.get_mut(database.slot()) {
                    connection.observers.insert(observer, options);
                }
                Vec::new()
            }
            HostMessage::DatabaseUnobserve {
                database,
                observers,
            } => {
                if let Some(connection) = self.connections.get_mut(database.slot()) {
                    for id in &observers {
                        connection.observers.remove(id);
                    }
                }
                Vec::new()
            }
            HostMessage::DatabaseSetIndexKeys { object_store, .. }
            | HostMessage::DatabaseSetIndexesReady { object_store, .. } => {
                trace!(
                    "{} index keys for store {} ignored",
                    prefix::STORE,
                    object_store
                );
                Vec::new()
            }

            HostMessage::DatabaseGet {
                ticket,
                database,
                transaction,
                object_store,
                index,
                key_range,
                key_only,
            } => {
                let result = self
                    .read_store(database, transaction, object_store, index)
                    .map(|store| match store.first_in(&key_range) {
                        Some((key, _)) if key_only => ClientEvent::SuccessKey {
                            callbacks: ticket.callbacks,
                            key: Some(key.clone()),
                        },
                        Some((key, value)) => ClientEvent::SuccessValue {
                            callbacks: ticket.callbacks,
                            value: Some(store.return_value(key, value)),
                        },
                        None => ClientEvent::SuccessValue {
                            callbacks: ticket.callbacks,
                            value: None,
                        },
                    });
                vec![self.answer(ticket, result)]
            }
            HostMessage::DatabaseGetAll {
                ticket,
                database,
                transaction,
                object_store,
                index,
                key_range,
                key_only,
                max_count,
            } => {
                let limit = max_count.map_or(usize::MAX, |n| n as usize);
                let result = self
                    .read_store(database, transaction, object_store, index)
                    .map(|store| ClientEvent::SuccessArray {
                        callbacks: ticket.callbacks,
                        values: store
                            .scan(&key_range)
                            .take(limit)
                            .map(|(key, value)| {
                                if key_only {
                                    // Keys travel as the primary key of an empty value
                                    let mut returned = store.return_value(key, &IdbValue::default());
                                    returned.primary_key = Some(key.clone());
                                    returned
                                } else {
                                    store.return_value(key, value)
                                }
                            })
                            .collect(),
                    });
                vec![self.answer(ticket, result)]
            }
            HostMessage::DatabasePut {
                ticket,
                database,
                transaction,
                object_store,
                value,
                key,
                mode,
                ..
            } => {
                let kind = match mode {
                    PutMode::AddOnly => OperationType::Add,
                    PutMode::AddOrUpdate | PutMode::CursorUpdate => OperationType::Put,
                };
                let result = self.write(database, transaction, object_store, |store| {
                    let stored = value.clone();
                    let key = store.put(value, key, mode)?;
                    Ok((
                        ClientEvent::SuccessKey {
                            callbacks: ticket.callbacks,
                            key: Some(key.clone()),
                        },
                        Some(Observation {
                            object_store_id: object_store,
                            kind,
                            key_range: Some(KeyRange::only(key)),
                            value: Some(stored),
                        }),
                    ))
                });
                vec![self.answer(ticket, result)]
            }
            HostMessage::DatabaseOpenCursor {
                ticket,
                database,
                transaction,
                object_store,
                index,
                key_range,
                direction,
                key_only,
                ..
            } => {
                let result = self.open_cursor(
                    ticket,
                    database,
                    transaction,
                    object_store,
                    index,
                    key_range,
                    direction,
                    key_only,
                );
                vec![self.answer(ticket, result)]
            }
            HostMessage::DatabaseCount {
                ticket,
                database,
                transaction,
                object_store,
                index,
                key_range,
            } => {
                let result = self
                    .read_store(database, transaction, object_store, index)
                    .map(|store| ClientEvent::SuccessInteger {
                        callbacks: ticket.callbacks,
                        value: store.count(&key_range) as i64,
                    });
                vec![self.answer(ticket, result)]
            }
            HostMessage::DatabaseDeleteRange {
                ticket,
                database,
                transaction,
                object_store,
                key_range,
            } => {
                let result = self.write(database, transaction, object_store, |store| {
                    let removed = store.delete_range(&key_range);
                    let observation = (!removed.is_empty()).then(|| Observation {
                        object_store_id: object_store,
                        kind: OperationType::Delete,
                        key_range: Some(key_range),
                        value: None,
                    });
                    Ok((
                        ClientEvent::SuccessUndefined {
                            callbacks: ticket.callbacks,
                        },
                        observation,
                    ))
                });
                vec![self.answer(ticket, result)]
            }
            HostMessage::DatabaseClear {
                ticket,
                database,
                transaction,
                object_store,
            } => {
                let result = self.write(database, transaction, object_store, |store| {
                    store.clear();
                    Ok((
                        ClientEvent::SuccessUndefined {
                            callbacks: ticket.callbacks,
                        },
                        Some(Observation {
                            object_store_id: object_store,
                            kind: OperationType::Clear,
                            key_range: None,
                            value: None,
                        }),
                    ))
                });
                vec![self.answer(ticket, result)]
            }

            HostMessage::CursorAdvance {
                ticket,
                cursor,
                count,
            } => {
                let result = self.advance_cursor(ticket, cursor, count);
                vec![self.answer(ticket, result)]
            }
            HostMessage::CursorContinue {
                ticket,
                cursor,
                key,
                ..
            } => {
                let result = self.continue_cursor(ticket, cursor, key);
                vec![self.answer(ticket, result)]
            }
            HostMessage::CursorPrefetch {
                ticket,
                cursor,
                count,
            } => {
                let result = self.prefetch_cursor(ticket, cursor, count);
                vec![self.answer(ticket, result)]
            }
            HostMessage::CursorPrefetchReset {
                cursor,
                used_prefetches,
                unused_prefetches,
            } => {
                self.reset_cursor(cursor, used_prefetches, unused_prefetches);
                Vec::new()
            }
            HostMessage::CursorDestroyed { cursor } => {
                if self.cursors.remove(cursor.slot()).is_none() {
                    trace!("{} {} already gone", prefix::STORE, cursor);
                }
                Vec::new()
            }

            HostMessage::AckReceivedBlobs { uuids } => {
                self.release_blobs(&uuids);
                Vec::new()
            }
        };

        for message in &out {
            self.hold_blobs(&message.event);
        }
        out
    }

    fn answer(&self, ticket: Ticket, result: Result<ClientEvent, DatabaseError>) -> ClientMessage {
        let event = result.unwrap_or_else(|error| {
            debug!("{} request {} failed: {}", prefix::STORE, ticket.callbacks, error);
            error_event(ticket.callbacks, error)
        });
        reply(ticket, event)
    }

    // Factory

    fn open(
        &mut self,
        ticket: Ticket,
        database_callbacks: DatabaseCallbacksId,
        key: DatabaseKey,
        version: Option<i64>,
        transaction: TransactionId,
    ) -> Vec<ClientMessage> {
        let database = self
            .databases
            .entry(key.clone())
            .or_insert_with(|| Database::new(&key.1));
        let current = database.version;
        let requested = version.unwrap_or(if current == DatabaseMetadata::NO_VERSION {
            1
        } else {
            current
        });
        if requested < current {
            let error = DatabaseError::new(
                ErrorCode::VersionError,
                format!(
                    "The requested version ({requested}) is less than the existing version ({current})."
                ),
            );
            return vec![reply(ticket, error_event(ticket.callbacks, error))];
        }

        let id = DatabaseId::from(self.connections.insert(Connection {
            worker: ticket.worker,
            database: key.clone(),
            callbacks: database_callbacks,
            transactions: HashMap::new(),
            observers: BTreeMap::new(),
            upgrade: None,
        }));
        let others: Vec<DatabaseId> = database.connections.clone();
        database.connections.push(id);
        debug!(
            "{} {} opened {}/{} at version {}",
            prefix::OPEN,
            id,
            key.0,
            key.1,
            requested
        );

        if requested == current {
            return vec![reply(
                ticket,
                ClientEvent::SuccessDatabase {
                    callbacks: ticket.callbacks,
                    database_callbacks,
                    database: Some(id),
                    metadata: database.metadata(),
                },
            )];
        }

        // Other connections are told, but the upgrade does not wait for them.
        let mut out: Vec<ClientMessage> = others
            .iter()
            .filter_map(|other| self.connections.get(other.slot()))
            .map(|other| {
                other.message(ClientEvent::VersionChange {
                    database_callbacks: other.callbacks,
                    old_version: current,
                    new_version: Some(requested),
                })
            })
            .collect();
        if !out.is_empty() {
            out.push(reply(
                ticket,
                ClientEvent::Blocked {
                    callbacks: ticket.callbacks,
                    old_version: current,
                },
            ));
        }

        database.version = requested;
        if let Some(connection) = self.connections.get_mut(id.slot()) {
            connection.transactions.insert(
                transaction,
                Transaction {
                    mode: TransactionMode::VersionChange,
                    scope: Vec::new(),
                    observations: Vec::new(),
                },
            );
            connection.upgrade = Some(PendingUpgrade {
                ticket,
                transaction,
                old_version: current,
            });
        }
        out.push(reply(
            ticket,
            ClientEvent::UpgradeNeeded {
                callbacks: ticket.callbacks,
                database_callbacks,
                database: id,
                old_version: current,
                data_loss: DataLoss::None,
                data_loss_message: String::new(),
                metadata: database.metadata(),
            },
        ));
        out
    }

    fn delete_database(&mut self, ticket: Ticket, key: DatabaseKey) -> Vec<ClientMessage> {
        let Some(database) = self.databases.remove(&key) else {
            return vec![reply(
                ticket,
                ClientEvent::SuccessInteger {
                    callbacks: ticket.callbacks,
                    value: DatabaseMetadata::NO_VERSION,
                },
            )];
        };

        let mut out = Vec::new();
        for id in &database.connections {
            let Some(connection) = self.connections.remove(id.slot()) else {
                continue;
            };
            out.push(connection.message(ClientEvent::VersionChange {
                database_callbacks: connection.callbacks,
                old_version: database.version,
                new_version: None,
            }));
            out.push(connection.message(ClientEvent::ForcedClose {
                database_callbacks: connection.callbacks,
            }));
            self.drop_cursors_of(*id, None);
        }
        debug!("{} deleted {}/{}", prefix::CLOSE, key.0, key.1);
        out.push(reply(
            ticket,
            ClientEvent::SuccessInteger {
                callbacks: ticket.callbacks,
                value: database.version,
            },
        ));
        out
    }

    // Connections and transactions

    fn close_connection(&mut self, id: DatabaseId) -> Vec<ClientMessage> {
        let Some(connection) = self.connections.remove(id.slot()) else {
            trace!("{} {} already closed", prefix::STORE, id);
            return Vec::new();
        };
        self.drop_cursors_of(id, None);
        let mut out = Vec::new();
        let mut never_created = false;
        if let Some(database) = self.databases.get_mut(&connection.database) {
            database.connections.retain(|c| *c != id);
            if let Some(upgrade) = connection.upgrade {
                database.version = upgrade.old_version;
                out.push(reply(
                    upgrade.ticket,
                    error_event(
                        upgrade.ticket.callbacks,
                        DatabaseError::abort("The connection was closed during the upgrade."),
                    ),
                ));
            }
            never_created = database.version == DatabaseMetadata::NO_VERSION
                && database.connections.is_empty();
        }
        if never_created {
            self.databases.remove(&connection.database);
        }
        debug!("{} {} closed", prefix::CLOSE, id);
        out
    }

    /// Run a structural change inside a version change transaction. Any
    /// failure aborts the transaction.
    fn version_change<F>(
        &mut self,
        database: DatabaseId,
        transaction: TransactionId,
        change: F,
    ) -> Vec<ClientMessage>
    where
        F: FnOnce(&mut Database) -> Result<(), DatabaseError>,
    {
        let result = match self.connections.get(database.slot()) {
            None => {
                warn!("{} structural change on unknown {}", prefix::STORE, database);
                return Vec::new();
            }
            Some(connection) => match connection.transactions.get(&transaction) {
                Some(txn) if txn.mode == TransactionMode::VersionChange => {
                    match self.databases.get_mut(&connection.database) {
                        Some(db) => change(db),
                        None => Err(DatabaseError::not_found("The database was deleted.")),
                    }
                }
                Some(_) => Err(DatabaseError::new(
                    ErrorCode::InvalidStateError,
                    "Structural changes need a version change transaction.",
                )),
                None => Err(transaction_inactive()),
            },
        };
        match result {
            Ok(()) => Vec::new(),
            Err(error) => self.abort(database, transaction, error),
        }
    }

    fn abort(
        &mut self,
        database: DatabaseId,
        transaction: TransactionId,
        error: DatabaseError,
    ) -> Vec<ClientMessage> {
        let Some(connection) = self.connections.get_mut(database.slot()) else {
            return Vec::new();
        };
        if connection.transactions.remove(&transaction).is_none() {
            trace!("{} {} not active on {}", prefix::STORE, transaction, database);
            return Vec::new();
        }
        let mut out = vec![connection.message(ClientEvent::Abort {
            database_callbacks: connection.callbacks,
            transaction,
            error,
        })];
        let upgrade = if connection
            .upgrade
            .as_ref()
            .is_some_and(|u| u.transaction == transaction)
        {
            connection.upgrade.take()
        } else {
            None
        };
        self.drop_cursors_of(database, Some(transaction));

        if let Some(upgrade) = upgrade {
            out.push(reply(
                upgrade.ticket,
                error_event(
                    upgrade.ticket.callbacks,
                    DatabaseError::abort("The version change transaction was aborted."),
                ),
            ));
            if let Some(db) = self
                .connections
                .get(database.slot())
                .and_then(|c| self.databases.get_mut(&c.database))
            {
                db.version = upgrade.old_version;
            }
            // The connection never finished opening
            self.close_connection(database);
        }
        out
    }

    fn commit(&mut self, database: DatabaseId, transaction: TransactionId) -> Vec<ClientMessage> {
        let Some(connection) = self.connections.get_mut(database.slot()) else {
            return Vec::new();
        };
        let Some(txn) = connection.transactions.remove(&transaction) else {
            trace!("{} {} not active on {}", prefix::STORE, transaction, database);
            return Vec::new();
        };
        let upgrade = if connection
            .upgrade
            .as_ref()
            .is_some_and(|u| u.transaction == transaction)
        {
            connection.upgrade.take()
        } else {
            None
        };
        let complete = connection.message(ClientEvent::Complete {
            database_callbacks: connection.callbacks,
            transaction,
        });
        let key = connection.database.clone();
        self.drop_cursors_of(database, Some(transaction));

        let mut out = self.observer_changes(&key, &txn.observations);
        out.push(complete);
        if let Some(upgrade) = upgrade {
            let metadata = self
                .databases
                .get(&key)
                .map(Database::metadata)
                .unwrap_or_else(|| DatabaseMetadata::new(&key.1));
            let database_callbacks = self
                .connections
                .get(database.slot())
                .map(|c| c.callbacks);
            if let Some(database_callbacks) = database_callbacks {
                out.push(reply(
                    upgrade.ticket,
                    ClientEvent::SuccessDatabase {
                        callbacks: upgrade.ticket.callbacks,
                        database_callbacks,
                        database: None,
                        metadata,
                    },
                ));
            }
        }
        trace!("{} {} committed on {}", prefix::STORE, transaction, database);
        out
    }

    /// One `DatabaseChanges` per connection that has observers.
    fn observer_changes(&self, key: &DatabaseKey, observations: &[Observation]) -> Vec<ClientMessage> {
        if observations.is_empty() {
            return Vec::new();
        }
        let Some(database) = self.databases.get(key) else {
            return Vec::new();
        };
        database
            .connections
            .iter()
            .filter_map(|id| self.connections.get(id.slot()))
            .filter(|connection| !connection.observers.is_empty())
            .map(|connection| {
                let wants_values = connection.observers.values().any(|o| o.values);
                let observation_index_map = connection
                    .observers
                    .iter()
                    .map(|(id, options)| {
                        let indexes = if options.no_records {
                            Vec::new()
                        } else {
                            observations
                                .iter()
                                .enumerate()
                                .filter(|(_, o)| options.records(o.kind))
                                .map(|(i, _)| i)
                                .collect()
                        };
                        (*id, indexes)
                    })
                    .collect();
                let observations = observations
                    .iter()
                    .cloned()
                    .map(|mut o| {
                        if !wants_values {
                            o.value = None;
                        }
                        o
                    })
                    .collect();
                connection.message(ClientEvent::DatabaseChanges {
                    database_callbacks: connection.callbacks,
                    changes: ObserverChanges {
                        observation_index_map,
                        observations,
                    },
                })
            })
            .collect()
    }

    // Data access

    /// The transaction a request runs in, checked for scope.
    pub(crate) fn transaction(
        &self,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
    ) -> Result<(&Connection, &Transaction), DatabaseError> {
        let connection = self
            .connections
            .get(database.slot())
            .ok_or_else(|| DatabaseError::new(ErrorCode::InvalidStateError, "The connection is closed."))?;
        let txn = connection
            .transactions
            .get(&transaction)
            .ok_or_else(transaction_inactive)?;
        if !txn.covers(object_store) {
            return Err(DatabaseError::not_found(
                "The object store is not in the transaction's scope.",
            ));
        }
        Ok((connection, txn))
    }

    pub(crate) fn read_store(
        &self,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
    ) -> Result<&ObjectStore, DatabaseError> {
        if index != NO_INDEX {
            return Err(DatabaseError::data(
                "Index reads are not supported by the memory backend.",
            ));
        }
        let (connection, _) = self.transaction(database, transaction, object_store)?;
        self.databases
            .get(&connection.database)
            .and_then(|db| db.stores.get(&object_store))
            .ok_or_else(|| DatabaseError::not_found(format!("No object store with id {object_store}.")))
    }

    /// Run a write and record its observation on the transaction.
    fn write<F>(
        &mut self,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        op: F,
    ) -> Result<ClientEvent, DatabaseError>
    where
        F: FnOnce(&mut ObjectStore) -> Result<(ClientEvent, Option<Observation>), DatabaseError>,
    {
        let (connection, txn) = self.transaction(database, transaction, object_store)?;
        if txn.mode == TransactionMode::ReadOnly {
            return Err(DatabaseError::new(
                ErrorCode::ReadOnlyError,
                "The transaction is read-only.",
            ));
        }
        let key = connection.database.clone();
        let store = self
            .databases
            .get_mut(&key)
            .ok_or_else(|| DatabaseError::not_found("The database was deleted."))?
            .store_mut(object_store)?;
        let (event, observation) = op(store)?;

        if let Some(observation) = observation {
            if let Some(txn) = self
                .connections
                .get_mut(database.slot())
                .and_then(|c| c.transactions.get_mut(&transaction))
            {
                txn.observations.push(observation);
            }
        }
        Ok(event)
    }

    // Blobs

    fn hold_blobs(&mut self, event: &ClientEvent) {
        let mut hold = |value: &IdbValue| {
            for uuid in value.blob_uuids() {
                *self.held_blobs.entry(uuid.to_string()).or_insert(0) += 1;
            }
        };
        match event {
            ClientEvent::SuccessCursor { entry, .. } | ClientEvent::SuccessCursorContinue { entry, .. } => {
                if let Some(value) = &entry.value {
                    hold(value);
                }
            }
            ClientEvent::SuccessCursorPrefetch { values, .. } => {
                values.iter().flatten().for_each(hold);
            }
            ClientEvent::SuccessArray { values, .. } => {
                values.iter().for_each(|v| hold(&v.value));
            }
            ClientEvent::SuccessValue { value: Some(v), .. } => hold(&v.value),
            ClientEvent::SuccessValueWithKey { value, .. } => hold(value),
            _ => {}
        }
    }

    fn release_blobs(&mut self, uuids: &[String]) {
        for uuid in uuids {
            match self.held_blobs.get_mut(uuid) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    self.held_blobs.remove(uuid);
                }
                None => warn!("{} ack for unheld blob {}", prefix::STORE, uuid),
            }
        }
    }
}

fn create_object_store(
    database: &mut Database,
    id: ObjectStoreId,
    name: String,
    key_path: Option<KeyPath>,
    auto_increment: bool,
) -> Result<(), DatabaseError> {
    if database.stores.contains_key(&id) || database.stores.values().any(|s| s.metadata.name == name) {
        return Err(DatabaseError::constraint(
            "An object store with the specified name already exists.",
        ));
    }
    database.max_object_store_id = database.max_object_store_id.max(id);
    database.stores.insert(
        id,
        ObjectStore::new(ObjectStoreMetadata::new(id, name, key_path, auto_increment)),
    );
    Ok(())
}
