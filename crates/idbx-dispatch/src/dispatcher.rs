//! Request dispatcher.
//!
//! One `Dispatcher` per client context (document or worker). Outbound, it
//! turns typed operations into `HostMessage`s carrying a fresh `CallbackId`.
//! Inbound, it demultiplexes `ClientMessage`s back onto the pending request
//! they answer, the cursor they move, or the connection they concern.
//!
//! The dispatcher is single-threaded (`Rc<RefCell<..>>`). Outcomes are
//! queued on per-request channels after the internal borrow is released, so
//! caller code never runs inside a dispatcher update.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

use idbx::tracing::prefix;
use idbx_core::{IdbValue, TransactionId};
use idbx_proto::{
    CallbackId, ClientEvent, ClientMessage, CursorEntry, CursorId, DatabaseCallbacksId,
    DatabaseId, HostMessage, Observation, ObserverId, Ticket, WorkerId,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::callbacks::CallbackRegistry;
use crate::config::DispatcherConfig;
use crate::cursor::CursorHandle;
use crate::database::DatabaseHandle;
use crate::error::DispatchError;
use crate::prefetch::{collect_blobs, CacheEffects, PrefetchCache};
use crate::request::{
    Callbacks, DatabaseEvent, DatabaseEventSink, DatabaseEvents, IdbOutcome, OpenRequest,
    Request,
};
use crate::transport::MessageSender;

/// Cursor-side bookkeeping. The handle owns the cache; the dispatcher only
/// needs to reach it for invalidation and prefetch responses.
struct CursorSlot {
    transaction: TransactionId,
    cache: Weak<RefCell<PrefetchCache>>,
}

struct ObserverSink {
    database: DatabaseId,
    tx: mpsc::UnboundedSender<Vec<Observation>>,
}

/// Work queued during demultiplexing and run after the borrow is released.
enum Delivery {
    Outcome(Callbacks, IdbOutcome),
    Event(DatabaseEventSink, DatabaseEvent),
    Observations(mpsc::UnboundedSender<Vec<Observation>>, Vec<Observation>),
}

impl Delivery {
    fn run(self) {
        match self {
            Delivery::Outcome(callbacks, outcome) => callbacks.deliver(outcome),
            Delivery::Event(sink, event) => sink.deliver(event),
            Delivery::Observations(tx, observations) => {
                let _ = tx.send(observations);
            }
        }
    }
}

struct DispatcherInner {
    worker: WorkerId,
    config: DispatcherConfig,
    sender: Rc<dyn MessageSender>,
    pending_callbacks: CallbackRegistry<CallbackId, Callbacks>,
    pending_database_callbacks: CallbackRegistry<DatabaseCallbacksId, DatabaseEventSink>,
    observers: HashMap<ObserverId, ObserverSink>,
    next_observer_id: i32,
    /// Open-cursor requests awaiting their first response
    cursor_transaction_ids: HashMap<CallbackId, TransactionId>,
    /// Factory opens awaiting success or error, with their event sink
    open_database_callbacks: HashMap<CallbackId, DatabaseCallbacksId>,
    cursors: BTreeMap<CursorId, CursorSlot>,
    running: bool,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<RefCell<DispatcherInner>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Dispatcher")
                .field("worker", &inner.worker)
                .field("pending", &inner.pending_callbacks.len())
                .field("cursors", &inner.cursors.len())
                .field("running", &inner.running)
                .finish(),
            Err(_) => f.write_str("Dispatcher { <busy> }"),
        }
    }
}

impl Dispatcher {
    pub fn new(worker: WorkerId, sender: Rc<dyn MessageSender>, config: DispatcherConfig) -> Self {
        debug!("{} dispatcher created for {}", prefix::DISPATCH, worker);
        Self {
            inner: Rc::new(RefCell::new(DispatcherInner {
                worker,
                config,
                sender,
                pending_callbacks: CallbackRegistry::new(),
                pending_database_callbacks: CallbackRegistry::new(),
                observers: HashMap::new(),
                next_observer_id: 0,
                cursor_transaction_ids: HashMap::new(),
                open_database_callbacks: HashMap::new(),
                cursors: BTreeMap::new(),
                running: true,
            })),
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.inner.borrow().worker
    }

    pub fn config(&self) -> DispatcherConfig {
        self.inner.borrow().config.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.borrow().running
    }

    /// Requests still waiting for a terminal response.
    pub fn pending_request_count(&self) -> usize {
        self.inner.borrow().pending_callbacks.len()
    }

    /// Connection event sinks still registered.
    pub fn pending_database_callback_count(&self) -> usize {
        self.inner.borrow().pending_database_callbacks.len()
    }

    /// Open-cursor requests that have not been answered yet.
    pub fn pending_cursor_transaction_count(&self) -> usize {
        self.inner.borrow().cursor_transaction_ids.len()
    }

    /// Live cursors known to this dispatcher.
    pub fn cursor_count(&self) -> usize {
        self.inner.borrow().cursors.len()
    }

    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    // Factory operations

    /// Open a connection. Connection-level events for the database arrive on
    /// the returned `events` stream for as long as the connection lives.
    pub fn open(
        &self,
        origin: &str,
        name: &str,
        version: Option<i64>,
        transaction: TransactionId,
    ) -> OpenRequest {
        let (callbacks, request) = Request::channel();
        let (sink, events) = DatabaseEvents::channel();

        let mut inner = self.inner.borrow_mut();
        let database_callbacks = inner.pending_database_callbacks.add(sink);
        debug!(
            "{} open {}/{} version={:?} {}",
            prefix::OPEN,
            origin,
            name,
            version,
            transaction
        );
        let issued = inner.submit(callbacks, |ticket| HostMessage::FactoryOpen {
            ticket,
            database_callbacks,
            origin: origin.to_string(),
            name: name.to_string(),
            version,
            transaction,
        });
        match issued {
            Some(id) => {
                inner.open_database_callbacks.insert(id, database_callbacks);
            }
            None => {
                inner.pending_database_callbacks.remove(database_callbacks);
            }
        }

        OpenRequest { request, events }
    }

    pub fn get_database_names(&self, origin: &str) -> Request {
        self.submit(None, |ticket| HostMessage::FactoryGetDatabaseNames {
            ticket,
            origin: origin.to_string(),
        })
    }

    pub fn delete_database(&self, origin: &str, name: &str) -> Request {
        self.submit(None, |ticket| HostMessage::FactoryDeleteDatabase {
            ticket,
            origin: origin.to_string(),
            name: name.to_string(),
        })
    }

    // Inbound

    /// Route one response or event from the backend.
    pub fn on_message_received(&self, message: ClientMessage) {
        let deliveries = {
            let mut inner = self.inner.borrow_mut();
            if message.worker != inner.worker {
                warn!(
                    "{} message for {} reached dispatcher of {}",
                    prefix::DISPATCH,
                    message.worker,
                    inner.worker
                );
                return;
            }
            if !inner.running {
                trace!("{} dropping message after shutdown", prefix::DISPATCH);
                return;
            }
            inner.demultiplex(self, message.event)
        };

        for delivery in deliveries {
            delivery.run();
        }
    }

    /// Fail every pending request with a `NotFoundError` and stop accepting
    /// work. Returns the number of requests that were abandoned.
    pub fn shutdown(&self) -> usize {
        let mut inner = self.inner.borrow_mut();
        if !inner.running {
            return 0;
        }
        let abandoned = inner.pending_callbacks.clear();
        inner.pending_database_callbacks.clear();
        inner.observers.clear();
        inner.cursor_transaction_ids.clear();
        inner.open_database_callbacks.clear();
        inner.cursors.clear();
        inner.running = false;
        info!(
            "{} dispatcher for {} shut down, {} pending request(s) abandoned",
            prefix::DISPATCH,
            inner.worker,
            abandoned
        );
        abandoned
    }

    // Used by handles

    /// Register a request and send it. With `invalidate`, every cursor in
    /// that transaction drops its prefetch cache first.
    pub(crate) fn submit<F>(&self, invalidate: Option<TransactionId>, build: F) -> Request
    where
        F: FnOnce(Ticket) -> HostMessage,
    {
        let (callbacks, request) = Request::channel();
        let mut inner = self.inner.borrow_mut();
        if let Some(transaction) = invalidate {
            inner.reset_cursor_prefetch_caches(transaction, None);
        }
        inner.submit(callbacks, build);
        request
    }

    /// Like `submit`, and remembers the transaction so the cursor created by
    /// the response can be tied to it.
    pub(crate) fn submit_open_cursor<F>(&self, transaction: TransactionId, build: F) -> Request
    where
        F: FnOnce(Ticket) -> HostMessage,
    {
        let (callbacks, request) = Request::channel();
        let mut inner = self.inner.borrow_mut();
        inner.reset_cursor_prefetch_caches(transaction, None);
        if let Some(id) = inner.submit(callbacks, build) {
            inner.cursor_transaction_ids.insert(id, transaction);
        }
        request
    }

    /// A cursor request. Sibling cursors in the transaction are reset; the
    /// cursor itself is left alone.
    pub(crate) fn submit_for_cursor<F>(
        &self,
        cursor: CursorId,
        transaction: TransactionId,
        build: F,
    ) -> Request
    where
        F: FnOnce(Ticket) -> HostMessage,
    {
        let (callbacks, request) = Request::channel();
        let mut inner = self.inner.borrow_mut();
        inner.reset_cursor_prefetch_caches(transaction, Some(cursor));
        inner.submit(callbacks, build);
        request
    }

    /// Fire-and-forget message. Dropped once the dispatcher has shut down.
    pub(crate) fn post(&self, message: HostMessage) {
        match self.inner.try_borrow() {
            Ok(inner) if inner.running => inner.send_or_log(message),
            Ok(_) => trace!("{} not sending {:?} after shutdown", prefix::DISPATCH, message),
            Err(_) => warn!("{} dispatcher busy, dropped {:?}", prefix::DISPATCH, message),
        }
    }

    pub(crate) fn apply_cache_effects(&self, cursor: CursorId, effects: CacheEffects) {
        if effects.is_empty() {
            return;
        }
        if let Ok(inner) = self.inner.try_borrow() {
            if inner.running {
                inner.send_cache_effects(cursor, effects);
            }
        }
    }

    /// Release the blob holds of an entry about to reach the caller.
    pub(crate) fn ack_entry(&self, entry: &CursorEntry) {
        let mut uuids = Vec::new();
        collect_blobs(entry, &mut uuids);
        if !uuids.is_empty() {
            self.post(HostMessage::AckReceivedBlobs { uuids });
        }
    }

    /// Forget a dropped cursor: release leftover blobs and tell the backend.
    pub(crate) fn forget_cursor(&self, cursor: CursorId, leftover_blobs: Vec<String>) {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            warn!("{} dispatcher busy, leaking {}", prefix::DISPATCH, cursor);
            return;
        };
        inner.cursors.remove(&cursor);
        if !inner.running {
            return;
        }
        if !leftover_blobs.is_empty() {
            inner.send_or_log(HostMessage::AckReceivedBlobs {
                uuids: leftover_blobs,
            });
        }
        if cursor.is_valid() {
            trace!("{} destroying {}", prefix::DISPATCH, cursor);
            inner.send_or_log(HostMessage::CursorDestroyed { cursor });
        }
    }

    pub(crate) fn add_observer(
        &self,
        database: DatabaseId,
        tx: mpsc::UnboundedSender<Vec<Observation>>,
    ) -> Option<ObserverId> {
        let mut inner = self.inner.borrow_mut();
        if !inner.running {
            return None;
        }
        let id = ObserverId(inner.next_observer_id);
        inner.next_observer_id += 1;
        inner.observers.insert(id, ObserverSink { database, tx });
        Some(id)
    }

    /// Drop the sinks of `ids` that belong to `database`, returning the ids
    /// actually removed.
    pub(crate) fn remove_observers(
        &self,
        database: DatabaseId,
        ids: &[ObserverId],
    ) -> Vec<ObserverId> {
        let Ok(mut inner) = self.inner.try_borrow_mut() else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        for id in ids {
            let owned = inner
                .observers
                .get(id)
                .is_some_and(|sink| sink.database == database);
            if owned {
                inner.observers.remove(id);
                removed.push(*id);
            }
        }
        removed
    }

    pub(crate) fn forget_database_callbacks(&self, id: DatabaseCallbacksId) {
        if let Ok(mut inner) = self.inner.try_borrow_mut() {
            inner.pending_database_callbacks.remove(id);
        }
    }

    pub(crate) fn not_running_error(&self) -> DispatchError {
        DispatchError::NotRunning(self.worker())
    }
}

impl DispatcherInner {
    fn send_or_log(&self, message: HostMessage) {
        if let Err(err) = self.sender.send(message) {
            warn!("{} send failed: {}", prefix::DISPATCH, err);
        }
    }

    fn submit<F>(&mut self, callbacks: Callbacks, build: F) -> Option<CallbackId>
    where
        F: FnOnce(Ticket) -> HostMessage,
    {
        if !self.running {
            callbacks.deliver(IdbOutcome::Error(
                DispatchError::NotRunning(self.worker).into(),
            ));
            return None;
        }

        let id = self.pending_callbacks.add(callbacks);
        let message = build(Ticket {
            worker: self.worker,
            callbacks: id,
        });
        trace!("{} {} -> {:?}", prefix::DISPATCH, id, message);

        if let Err(err) = self.sender.send(message) {
            warn!("{} {} could not be sent: {}", prefix::DISPATCH, id, err);
            if let Some(callbacks) = self.pending_callbacks.remove(id) {
                callbacks.deliver(IdbOutcome::Error(DispatchError::Transport(err).into()));
            }
            return None;
        }
        Some(id)
    }

    fn send_cache_effects(&self, cursor: CursorId, effects: CacheEffects) {
        if !effects.ack_blobs.is_empty() {
            self.send_or_log(HostMessage::AckReceivedBlobs {
                uuids: effects.ack_blobs,
            });
        }
        if let Some(reset) = effects.reset {
            debug!(
                "{} {} reset: used={} unused={}",
                prefix::PREFETCH,
                cursor,
                reset.used_prefetches,
                reset.unused_prefetches
            );
            self.send_or_log(HostMessage::CursorPrefetchReset {
                cursor,
                used_prefetches: reset.used_prefetches,
                unused_prefetches: reset.unused_prefetches,
            });
        }
    }

    fn ack_uuids(&self, uuids: Vec<String>) {
        if !uuids.is_empty() {
            self.send_or_log(HostMessage::AckReceivedBlobs { uuids });
        }
    }

    fn ack_values<'a>(&self, values: impl IntoIterator<Item = &'a IdbValue>) {
        self.ack_uuids(
            values
                .into_iter()
                .flat_map(|value| value.blob_uuids().map(str::to_owned))
                .collect(),
        );
    }

    fn ack_entry(&self, entry: &CursorEntry) {
        self.ack_values(entry.value.as_ref());
    }

    /// Reset the caches of every cursor in `transaction` other than `except`.
    fn reset_cursor_prefetch_caches(
        &mut self,
        transaction: TransactionId,
        except: Option<CursorId>,
    ) {
        let caches: Vec<(CursorId, Rc<RefCell<PrefetchCache>>)> = self
            .cursors
            .iter()
            .filter(|(id, slot)| slot.transaction == transaction && Some(**id) != except)
            .filter_map(|(id, slot)| slot.cache.upgrade().map(|cache| (*id, cache)))
            .collect();

        for (cursor, cache) in caches {
            let effects = match cache.try_borrow_mut() {
                Ok(mut cache) => cache.reset(),
                Err(_) => continue,
            };
            self.send_cache_effects(cursor, effects);
        }
    }

    fn register_cursor(
        &mut self,
        dispatcher: &Dispatcher,
        cursor: CursorId,
        transaction: TransactionId,
    ) -> CursorHandle {
        let cache = Rc::new(RefCell::new(PrefetchCache::new(self.config.prefetch)));
        self.cursors.insert(
            cursor,
            CursorSlot {
                transaction,
                cache: Rc::downgrade(&cache),
            },
        );
        CursorHandle::new(dispatcher.clone(), cursor, transaction, cache)
    }

    fn demultiplex(&mut self, dispatcher: &Dispatcher, event: ClientEvent) -> Vec<Delivery> {
        let mut out = Vec::new();
        match event {
            ClientEvent::SuccessCursor {
                callbacks,
                cursor,
                entry,
            } => {
                let transaction = self.cursor_transaction_ids.remove(&callbacks);
                let Some(handler) = self.pending_callbacks.remove(callbacks) else {
                    // Nobody will ever hold a handle to this cursor.
                    self.ack_entry(&entry);
                    self.send_or_log(HostMessage::CursorDestroyed { cursor });
                    return out;
                };
                let Some(transaction) = transaction else {
                    self.ack_entry(&entry);
                    self.send_or_log(HostMessage::CursorDestroyed { cursor });
                    out.push(Delivery::Outcome(
                        handler,
                        IdbOutcome::Error(
                            DispatchError::Protocol(format!(
                                "{cursor} answers {callbacks}, which did not open a cursor"
                            ))
                            .into(),
                        ),
                    ));
                    return out;
                };
                debug!("{} {} opened in {}", prefix::DISPATCH, cursor, transaction);
                let handle = self.register_cursor(dispatcher, cursor, transaction);
                self.ack_entry(&entry);
                out.push(Delivery::Outcome(
                    handler,
                    IdbOutcome::Cursor {
                        cursor: handle,
                        entry,
                    },
                ));
            }

            ClientEvent::SuccessCursorContinue {
                callbacks,
                cursor,
                entry,
            } => {
                self.ack_entry(&entry);
                let Some(handler) = self.pending_callbacks.remove(callbacks) else {
                    return out;
                };
                if !self.cursors.contains_key(&cursor) {
                    trace!("{} {} is gone, dropping continue", prefix::DISPATCH, cursor);
                    return out;
                }
                out.push(Delivery::Outcome(handler, IdbOutcome::CursorContinue(entry)));
            }

            ClientEvent::SuccessCursorPrefetch {
                callbacks,
                cursor,
                keys,
                primary_keys,
                values,
            } => {
                let handler = self.pending_callbacks.remove(callbacks);
                let cache = self.cursors.get(&cursor).and_then(|slot| slot.cache.upgrade());
                let (Some(handler), Some(cache)) = (handler, cache) else {
                    self.ack_values(values.iter().flatten());
                    return out;
                };

                let batch_blobs: Vec<String> = values
                    .iter()
                    .flatten()
                    .flat_map(|value| value.blob_uuids().map(str::to_owned))
                    .collect();
                let Ok(mut cache) = cache.try_borrow_mut() else {
                    self.ack_uuids(batch_blobs);
                    return out;
                };
                debug!("{} {} received {} entries", prefix::PREFETCH, cursor, keys.len());
                if let Err(err) = cache.set_prefetch_data(keys, primary_keys, values) {
                    self.ack_uuids(batch_blobs);
                    out.push(Delivery::Outcome(handler, IdbOutcome::Error(err.into())));
                    return out;
                }
                match cache.cached_continue() {
                    Some((entry, effects)) => {
                        drop(cache);
                        self.send_cache_effects(cursor, effects);
                        self.ack_entry(&entry);
                        out.push(Delivery::Outcome(handler, IdbOutcome::CursorContinue(entry)));
                    }
                    None => out.push(Delivery::Outcome(handler, IdbOutcome::Value(None))),
                }
            }

            ClientEvent::SuccessDatabase {
                callbacks,
                database_callbacks,
                database,
                metadata,
            } => {
                self.open_database_callbacks.remove(&callbacks);
                let Some(handler) = self.pending_callbacks.remove(callbacks) else {
                    // No handle will ever own this connection or its events.
                    self.pending_database_callbacks.remove(database_callbacks);
                    if let Some(database) = database {
                        self.send_or_log(HostMessage::DatabaseClose { database });
                    }
                    return out;
                };
                let database =
                    database.map(|db| DatabaseHandle::new(dispatcher.clone(), db, database_callbacks));
                out.push(Delivery::Outcome(
                    handler,
                    IdbOutcome::Database { database, metadata },
                ));
            }

            ClientEvent::UpgradeNeeded {
                callbacks,
                database_callbacks,
                database,
                old_version,
                data_loss,
                data_loss_message,
                metadata,
            } => {
                let Some(handler) = self.pending_callbacks.lookup(callbacks).cloned() else {
                    return out;
                };
                debug!(
                    "{} upgrade needed for {} from version {}",
                    prefix::OPEN,
                    metadata.name,
                    old_version
                );
                out.push(Delivery::Outcome(
                    handler,
                    IdbOutcome::UpgradeNeeded {
                        database: DatabaseHandle::new(dispatcher.clone(), database, database_callbacks),
                        old_version,
                        data_loss,
                        data_loss_message,
                        metadata,
                    },
                ));
            }

            ClientEvent::Blocked {
                callbacks,
                old_version,
            } => {
                if let Some(handler) = self.pending_callbacks.lookup(callbacks).cloned() {
                    out.push(Delivery::Outcome(handler, IdbOutcome::Blocked { old_version }));
                }
            }

            ClientEvent::SuccessKey { callbacks, key } => {
                self.finish(&mut out, callbacks, IdbOutcome::Key(key));
            }

            ClientEvent::SuccessStringList { callbacks, list } => {
                self.finish(&mut out, callbacks, IdbOutcome::StringList(list));
            }

            ClientEvent::SuccessArray { callbacks, values } => {
                self.ack_values(values.iter().map(|v| &v.value));
                self.finish(&mut out, callbacks, IdbOutcome::Array(values));
            }

            ClientEvent::SuccessValue { callbacks, value } => {
                self.cursor_transaction_ids.remove(&callbacks);
                self.ack_values(value.iter().map(|v| &v.value));
                self.finish(&mut out, callbacks, IdbOutcome::Value(value));
            }

            ClientEvent::SuccessValueWithKey {
                callbacks,
                value,
                primary_key,
                key_path,
            } => {
                self.ack_values(std::iter::once(&value));
                self.finish(
                    &mut out,
                    callbacks,
                    IdbOutcome::ValueWithKey {
                        value,
                        primary_key,
                        key_path,
                    },
                );
            }

            ClientEvent::SuccessInteger { callbacks, value } => {
                self.finish(&mut out, callbacks, IdbOutcome::Integer(value));
            }

            ClientEvent::SuccessUndefined { callbacks } => {
                self.finish(&mut out, callbacks, IdbOutcome::Undefined);
            }

            ClientEvent::Error { callbacks, error } => {
                self.cursor_transaction_ids.remove(&callbacks);
                if let Some(sink) = self.open_database_callbacks.remove(&callbacks) {
                    self.pending_database_callbacks.remove(sink);
                }
                debug!("{} {} failed: {}", prefix::DISPATCH, callbacks, error);
                self.finish(&mut out, callbacks, IdbOutcome::Error(error));
            }

            ClientEvent::ForcedClose { database_callbacks } => {
                self.connection_event(&mut out, database_callbacks, DatabaseEvent::ForcedClose);
            }

            ClientEvent::VersionChange {
                database_callbacks,
                old_version,
                new_version,
            } => {
                self.connection_event(
                    &mut out,
                    database_callbacks,
                    DatabaseEvent::VersionChange {
                        old_version,
                        new_version,
                    },
                );
            }

            ClientEvent::Abort {
                database_callbacks,
                transaction,
                error,
            } => {
                self.connection_event(
                    &mut out,
                    database_callbacks,
                    DatabaseEvent::Abort { transaction, error },
                );
            }

            ClientEvent::Complete {
                database_callbacks,
                transaction,
            } => {
                self.connection_event(
                    &mut out,
                    database_callbacks,
                    DatabaseEvent::Complete { transaction },
                );
            }

            ClientEvent::DatabaseChanges {
                database_callbacks,
                changes,
            } => {
                if !self.pending_database_callbacks.contains(database_callbacks) {
                    return out;
                }
                for observer in changes.observation_index_map.keys() {
                    if let Some(sink) = self.observers.get(observer) {
                        out.push(Delivery::Observations(
                            sink.tx.clone(),
                            changes.for_observer(*observer),
                        ));
                    }
                }
            }
        }
        out
    }

    /// Deliver a terminal outcome, or drop it if the request is unknown.
    fn finish(&mut self, out: &mut Vec<Delivery>, callbacks: CallbackId, outcome: IdbOutcome) {
        match self.pending_callbacks.remove(callbacks) {
            Some(handler) => out.push(Delivery::Outcome(handler, outcome)),
            None => trace!("{} no pending request for {}", prefix::DISPATCH, callbacks),
        }
    }

    fn connection_event(
        &self,
        out: &mut Vec<Delivery>,
        database_callbacks: DatabaseCallbacksId,
        event: DatabaseEvent,
    ) {
        match self.pending_database_callbacks.lookup(database_callbacks) {
            Some(sink) => out.push(Delivery::Event(sink.clone(), event)),
            None => trace!("{} no connection for {}", prefix::DB, database_callbacks),
        }
    }
}
