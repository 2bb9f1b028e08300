//! Dispatcher behaviour against scripted backend responses.

use std::rc::Rc;

use idbx_core::{
    BlobInfo, DatabaseError, DatabaseMetadata, ErrorCode, IdbKey, IdbValue, KeyRange, PutMode,
    ReturnValue, TransactionId, NO_INDEX,
};
use idbx_dispatch::{
    CursorHandle, CursorOptions, DatabaseEvent, DatabaseHandle, Dispatcher, DispatcherConfig,
    IdbOutcome, OpenRequest, PrefetchPolicy, RecordingSender,
};
use idbx_proto::{
    CallbackId, ClientEvent, ClientMessage, CursorEntry, CursorId, DatabaseId, HostMessage, Observation,
    ObserverChanges, ObserverOptions, OperationType, Ticket, WorkerId,
};
use pretty_assertions::assert_eq;

const WORKER: WorkerId = WorkerId(7);
const ORIGIN: &str = "https://example.test";

struct Harness {
    sender: Rc<RecordingSender>,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    fn with_config(config: DispatcherConfig) -> Self {
        idbx::tracing::try_init_for_tests();
        let sender = Rc::new(RecordingSender::new());
        let dispatcher = Dispatcher::new(WORKER, sender.clone(), config);
        Self { sender, dispatcher }
    }

    fn deliver(&self, event: ClientEvent) {
        self.dispatcher.on_message_received(ClientMessage {
            worker: WORKER,
            event,
        });
    }

    /// Ticket of the most recent request, clearing the recorded messages.
    fn take_ticket(&self) -> Ticket {
        let sent = self.sender.take();
        sent.iter()
            .rev()
            .find_map(HostMessage::ticket)
            .expect("a request was sent")
    }

    fn open_database(&self) -> (DatabaseHandle, OpenRequest) {
        let mut open = self
            .dispatcher
            .open(ORIGIN, "library", Some(1), TransactionId(100));
        let database_callbacks = match self.sender.last() {
            Some(HostMessage::FactoryOpen {
                database_callbacks, ..
            }) => database_callbacks,
            other => panic!("expected FactoryOpen, got {other:?}"),
        };
        let ticket = self.take_ticket();
        self.deliver(ClientEvent::SuccessDatabase {
            callbacks: ticket.callbacks,
            database_callbacks,
            database: Some(DatabaseId::from_raw(1)),
            metadata: DatabaseMetadata::new("library"),
        });
        match open.request.try_next() {
            Some(IdbOutcome::Database {
                database: Some(db), ..
            }) => (db, open),
            other => panic!("expected database, got {other:?}"),
        }
    }

    fn open_cursor(&self, db: &DatabaseHandle, transaction: i64, cursor: u64) -> CursorHandle {
        let mut request = db.open_cursor(TransactionId(transaction), CursorOptions::object_store(1));
        let ticket = self.take_ticket();
        self.deliver(ClientEvent::SuccessCursor {
            callbacks: ticket.callbacks,
            cursor: CursorId::from_raw(cursor),
            entry: entry(0),
        });
        match request.try_next() {
            Some(IdbOutcome::Cursor { cursor, .. }) => cursor,
            other => panic!("expected cursor, got {other:?}"),
        }
    }

    /// Continue a cursor until it asks for a prefetch, then answer with `n`
    /// entries starting at `first`. The first prefetched entry is consumed.
    fn prime(&self, cursor: &CursorHandle, first: i64, n: i64) {
        loop {
            let mut request = cursor.continue_next();
            let sent = self.sender.take();
            let ticket = sent
                .iter()
                .rev()
                .find_map(HostMessage::ticket)
                .expect("continue sends a request");

            if matches!(sent.last(), Some(HostMessage::CursorPrefetch { .. })) {
                self.deliver(prefetch_response(ticket, cursor.id(), first, n));
                match request.try_next() {
                    Some(IdbOutcome::CursorContinue(e)) => assert_eq!(e.key, key(first)),
                    other => panic!("expected first prefetched entry, got {other:?}"),
                }
                break;
            }

            self.deliver(ClientEvent::SuccessCursorContinue {
                callbacks: ticket.callbacks,
                cursor: cursor.id(),
                entry: entry(first - 1),
            });
            assert!(matches!(request.try_next(), Some(IdbOutcome::CursorContinue(_))));
        }
        self.sender.take();
    }
}

/// Prefetches on the first continue, so priming one cursor never goes
/// through a plain continue that would reset its siblings.
fn eager() -> Harness {
    Harness::with_config(DispatcherConfig::default().with_prefetch(PrefetchPolicy::new(0, 5, 100)))
}

fn key(n: i64) -> IdbKey {
    IdbKey::Number(n as f64)
}

fn entry(n: i64) -> CursorEntry {
    CursorEntry {
        key: key(n),
        primary_key: key(n),
        value: Some(IdbValue::new(format!("value-{n}").into_bytes())),
    }
}

fn prefetch_response(ticket: Ticket, cursor: CursorId, first: i64, n: i64) -> ClientEvent {
    let keys: Vec<IdbKey> = (first..first + n).map(key).collect();
    ClientEvent::SuccessCursorPrefetch {
        callbacks: ticket.callbacks,
        cursor,
        keys: keys.clone(),
        primary_keys: keys,
        values: (first..first + n).map(|i| entry(i).value).collect(),
    }
}

fn expect_error(outcome: Option<IdbOutcome>) -> DatabaseError {
    match outcome {
        Some(IdbOutcome::Error(err)) => err,
        other => panic!("expected error, got {other:?}"),
    }
}

// Open cursor scenarios

#[test]
fn test_open_cursor_yields_valid_cursor_and_clears_transaction_entry() {
    let h = Harness::new();
    let (db, _open) = h.open_database();

    let mut request = db.open_cursor(TransactionId(1234), CursorOptions::object_store(1));
    assert_eq!(h.dispatcher.pending_cursor_transaction_count(), 1);

    let ticket = h.take_ticket();
    h.deliver(ClientEvent::SuccessCursor {
        callbacks: ticket.callbacks,
        cursor: CursorId::from_raw(3),
        entry: entry(0),
    });

    match request.try_next() {
        Some(IdbOutcome::Cursor { cursor, entry: first }) => {
            assert!(cursor.id().is_valid());
            assert_eq!(cursor.transaction_id(), TransactionId(1234));
            assert_eq!(first.key, key(0));
        }
        other => panic!("expected cursor, got {other:?}"),
    }
    assert_eq!(h.dispatcher.pending_cursor_transaction_count(), 0);
    assert_eq!(h.dispatcher.pending_request_count(), 0);
}

#[test]
fn test_open_cursor_without_data_creates_no_handle() {
    let h = Harness::new();
    let (db, _open) = h.open_database();

    let mut request = db.open_cursor(TransactionId(1234), CursorOptions::object_store(1));
    let ticket = h.take_ticket();
    h.deliver(ClientEvent::SuccessValue {
        callbacks: ticket.callbacks,
        value: None,
    });

    assert!(matches!(request.try_next(), Some(IdbOutcome::Value(None))));
    assert_eq!(h.dispatcher.pending_cursor_transaction_count(), 0);
    assert_eq!(h.dispatcher.cursor_count(), 0);
}

#[test]
fn test_open_cursor_error_clears_transaction_entry() {
    let h = Harness::new();
    let (db, _open) = h.open_database();

    let mut request = db.open_cursor(TransactionId(5), CursorOptions::object_store(1));
    let ticket = h.take_ticket();
    h.deliver(ClientEvent::Error {
        callbacks: ticket.callbacks,
        error: DatabaseError::data("bad range"),
    });

    assert_eq!(expect_error(request.try_next()).code, ErrorCode::DataError);
    assert_eq!(h.dispatcher.pending_cursor_transaction_count(), 0);
}

// Oversize guard

#[test]
fn test_oversize_put_fails_locally_without_messages() {
    let h = Harness::with_config(DispatcherConfig::default().with_max_put_value_size(100));
    let (db, _open) = h.open_database();

    // 90 bytes of value + 16 + 2 * 6 bytes of key estimate
    let mut request = db.put(
        TransactionId(1),
        1,
        IdbValue::new(vec![0u8; 90]),
        Some(IdbKey::String("abcdef".into())),
        PutMode::AddOrUpdate,
        Vec::new(),
    );

    let err = expect_error(request.try_next());
    assert_eq!(err.code, ErrorCode::UnknownError);
    assert_eq!(
        err.message,
        "The serialized value is too large (size=118 bytes, max=100 bytes)."
    );
    assert!(h.sender.is_empty());
    assert_eq!(h.dispatcher.pending_request_count(), 0);
}

#[test]
fn test_put_at_limit_is_sent() {
    let h = Harness::with_config(DispatcherConfig::default().with_max_put_value_size(100));
    let (db, _open) = h.open_database();

    let _request = db.put(
        TransactionId(1),
        1,
        IdbValue::new(vec![0u8; 76]),
        Some(key(1)),
        PutMode::AddOnly,
        Vec::new(),
    );
    assert!(matches!(h.sender.last(), Some(HostMessage::DatabasePut { .. })));
    assert_eq!(h.dispatcher.pending_request_count(), 1);
}

// Cache invalidation

#[test]
fn test_data_operation_resets_only_cursors_in_same_transaction() {
    let h = eager();
    let (db, _open) = h.open_database();
    let a = h.open_cursor(&db, 1, 1);
    let b = h.open_cursor(&db, 1, 2);
    let c = h.open_cursor(&db, 2, 3);
    h.prime(&a, 10, 5);
    h.prime(&b, 20, 5);
    h.prime(&c, 30, 5);

    let _request = db.get(TransactionId(1), 1, NO_INDEX, KeyRange::only(key(1)), false);

    let sent = h.sender.take();
    assert_eq!(sent.len(), 3);
    assert_eq!(
        sent[0],
        HostMessage::CursorPrefetchReset {
            cursor: a.id(),
            used_prefetches: 1,
            unused_prefetches: 4,
        }
    );
    assert_eq!(
        sent[1],
        HostMessage::CursorPrefetchReset {
            cursor: b.id(),
            used_prefetches: 1,
            unused_prefetches: 4,
        }
    );
    assert!(matches!(sent[2], HostMessage::DatabaseGet { .. }));

    assert_eq!(a.prefetch_stats().cached, 0);
    assert_eq!(b.prefetch_stats().cached, 0);
    assert_eq!(c.prefetch_stats().cached, 4);
}

#[test]
fn test_every_data_operation_invalidates() {
    let h = Harness::new();
    let (db, _open) = h.open_database();
    let a = h.open_cursor(&db, 1, 1);
    let txn = TransactionId(1);

    for i in 0..7 {
        h.prime(&a, 100 * (i + 1), 3);
        let _request = match i {
            0 => db.get(txn, 1, NO_INDEX, KeyRange::unbounded(), false),
            1 => db.get_all(txn, 1, NO_INDEX, KeyRange::unbounded(), false, None),
            2 => db.put(
                txn,
                1,
                IdbValue::new(b"v".to_vec()),
                None,
                PutMode::AddOrUpdate,
                Vec::new(),
            ),
            3 => db.open_cursor(txn, CursorOptions::object_store(1)),
            4 => db.count(txn, 1, NO_INDEX, KeyRange::unbounded()),
            5 => db.delete_range(txn, 1, KeyRange::unbounded()),
            _ => db.clear(txn, 1),
        };
        let sent = h.sender.take();
        assert!(
            matches!(sent.first(), Some(HostMessage::CursorPrefetchReset { .. })),
            "operation {i} did not reset the cache: {sent:?}"
        );
        assert_eq!(a.prefetch_stats().cached, 0);
    }
}

#[test]
fn test_cursor_advance_resets_siblings_but_not_itself() {
    let h = eager();
    let (db, _open) = h.open_database();
    let a = h.open_cursor(&db, 1, 1);
    let b = h.open_cursor(&db, 1, 2);
    h.prime(&a, 10, 5);
    h.prime(&b, 20, 5);

    // Served from a's cache: nothing goes out and b keeps its entries.
    let mut request = a.advance(2);
    assert!(matches!(request.try_next(), Some(IdbOutcome::CursorContinue(_))));
    assert!(h.sender.is_empty());
    assert_eq!(b.prefetch_stats().cached, 4);

    // A continue to a key resets a (its own reset) and b (sibling), then asks the backend.
    let _request = a.continue_to(Some(key(50)), None);
    let sent = h.sender.take();
    assert_eq!(sent.len(), 3);
    assert!(matches!(sent[0], HostMessage::CursorPrefetchReset { cursor, .. } if cursor == a.id()));
    assert!(matches!(sent[1], HostMessage::CursorPrefetchReset { cursor, .. } if cursor == b.id()));
    assert!(matches!(sent[2], HostMessage::CursorContinue { cursor, .. } if cursor == a.id()));
}

// Prefetch state machine through the handle

#[test]
fn test_prefetch_requests_grow_monotonically_to_clamp() {
    let h = Harness::new();
    let (db, _open) = h.open_database();
    let cursor = h.open_cursor(&db, 1, 1);

    let _requests: Vec<_> = (0..9).map(|_| cursor.continue_next()).collect();

    let counts: Vec<u32> = h
        .sender
        .take()
        .into_iter()
        .filter_map(|message| match message {
            HostMessage::CursorPrefetch { count, .. } => Some(count),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![5, 10, 20, 40, 80, 100, 100]);
}

#[test]
fn test_cached_entries_are_served_in_order_once() {
    let h = Harness::new();
    let (db, _open) = h.open_database();
    let cursor = h.open_cursor(&db, 1, 1);
    h.prime(&cursor, 10, 5);

    let mut keys = Vec::new();
    for _ in 0..4 {
        let mut request = cursor.continue_next();
        match request.try_next() {
            Some(IdbOutcome::CursorContinue(e)) => keys.push(e.key),
            other => panic!("expected cached entry, got {other:?}"),
        }
    }

    assert_eq!(keys, vec![key(11), key(12), key(13), key(14)]);
    assert!(h.sender.is_empty());
    assert_eq!(cursor.prefetch_stats().cached, 0);
}

#[test]
fn test_advance_past_cache_falls_through_to_backend() {
    let h = Harness::new();
    let (db, _open) = h.open_database();
    let cursor = h.open_cursor(&db, 1, 1);
    h.prime(&cursor, 10, 5);

    let _request = cursor.advance(DispatcherConfig::default().prefetch.max_amount);

    let sent = h.sender.take();
    assert_eq!(
        sent[0],
        HostMessage::CursorPrefetchReset {
            cursor: cursor.id(),
            used_prefetches: 1,
            unused_prefetches: 4,
        }
    );
    assert!(matches!(sent[1], HostMessage::CursorAdvance { count: 100, .. }));
    assert_eq!(sent.len(), 2);
}

#[test]
fn test_reset_of_empty_cache_sends_nothing() {
    let h = Harness::new();
    let (db, _open) = h.open_database();
    let cursor = h.open_cursor(&db, 1, 1);

    cursor.reset_prefetch_cache();
    assert!(h.sender.is_empty());
}

#[test]
fn test_idle_cursor_releases_cache_after_success_handler() {
    let h = Harness::new();
    let (db, _open) = h.open_database();
    let cursor = h.open_cursor(&db, 1, 1);
    h.prime(&cursor, 10, 5);

    // The handler for entry 10 issues one more continue before returning.
    let _next = cursor.continue_next();
    cursor.post_success_handler_callback();
    assert!(h.sender.is_empty());

    // The handler for entry 11 returns without continuing.
    cursor.post_success_handler_callback();
    assert_eq!(
        h.sender.take(),
        vec![HostMessage::CursorPrefetchReset {
            cursor: cursor.id(),
            used_prefetches: 2,
            unused_prefetches: 3,
        }]
    );
    assert_eq!(cursor.prefetch_stats().cached, 0);
}

#[test]
fn test_prefetch_landing_after_reset_serves_one_entry() {
    let h = Harness::new();
    let (db, _open) = h.open_database();
    let cursor = h.open_cursor(&db, 1, 1);

    let _first = cursor.continue_next();
    let _second = cursor.continue_next();
    let mut prefetch = cursor.continue_next();
    let ticket = h.take_ticket();

    // Reset while the prefetch is in flight; the cache is empty so nothing is sent.
    cursor.reset_prefetch_cache();
    assert!(h.sender.is_empty());

    h.deliver(prefetch_response(ticket, cursor.id(), 40, 5));
    assert!(matches!(prefetch.try_next(), Some(IdbOutcome::CursorContinue(e)) if e.key == key(40)));
    assert_eq!(
        h.sender.take(),
        vec![HostMessage::CursorPrefetchReset {
            cursor: cursor.id(),
            used_prefetches: 1,
            unused_prefetches: 4,
        }]
    );
}

// Delivery guarantees

#[test]
fn test_response_delivered_at_most_once() {
    let h = Harness::new();
    let mut request = h.dispatcher.get_database_names(ORIGIN);
    let ticket = h.take_ticket();

    let answer = || ClientEvent::SuccessStringList {
        callbacks: ticket.callbacks,
        list: vec!["library".into()],
    };
    h.deliver(answer());
    h.deliver(answer());

    assert!(matches!(request.try_next(), Some(IdbOutcome::StringList(l)) if l == vec!["library"]));
    assert!(request.try_next().is_none());
    assert_eq!(h.dispatcher.pending_request_count(), 0);
}

#[test]
fn test_unknown_callback_is_silently_dropped() {
    let h = Harness::new();
    h.deliver(ClientEvent::SuccessInteger {
        callbacks: idbx_proto::CallbackId::from_raw(42),
        value: 3,
    });
    assert!(h.sender.is_empty());
}

#[test]
fn test_continue_response_for_dropped_cursor_is_ignored() {
    let h = Harness::new();
    let (db, _open) = h.open_database();
    let cursor = h.open_cursor(&db, 1, 1);
    let id = cursor.id();

    let mut request = cursor.continue_next();
    let ticket = h.take_ticket();
    drop(cursor);
    assert_eq!(h.sender.take(), vec![HostMessage::CursorDestroyed { cursor: id }]);

    h.deliver(ClientEvent::SuccessCursorContinue {
        callbacks: ticket.callbacks,
        cursor: id,
        entry: entry(1),
    });
    assert!(request.try_next().is_none());
    assert_eq!(h.dispatcher.cursor_count(), 0);
}

#[test]
fn test_message_for_other_worker_is_ignored() {
    let h = Harness::new();
    let mut request = h.dispatcher.get_database_names(ORIGIN);
    let ticket = h.take_ticket();

    h.dispatcher.on_message_received(ClientMessage {
        worker: WorkerId(8),
        event: ClientEvent::SuccessStringList {
            callbacks: ticket.callbacks,
            list: vec![],
        },
    });
    assert!(request.try_next().is_none());
    assert_eq!(h.dispatcher.pending_request_count(), 1);
}

#[test]
fn test_send_failure_reports_error() {
    let h = Harness::new();
    let (db, _open) = h.open_database();
    h.sender.close();

    let mut request = db.count(TransactionId(1), 1, NO_INDEX, KeyRange::unbounded());
    let err = expect_error(request.try_next());
    assert_eq!(err.code, ErrorCode::UnknownError);
    assert_eq!(h.dispatcher.pending_request_count(), 0);
}

// Teardown

#[test]
fn test_shutdown_fails_pending_requests_with_not_found() {
    let h = Harness::new();
    let mut names = h.dispatcher.get_database_names(ORIGIN);
    let mut delete = h.dispatcher.delete_database(ORIGIN, "library");

    assert_eq!(h.dispatcher.shutdown(), 2);
    let err = expect_error(names.try_next());
    assert_eq!(err.code, ErrorCode::NotFoundError);
    assert_eq!(
        err.message,
        "The request was dropped because its dispatcher shut down."
    );
    assert_eq!(expect_error(delete.try_next()).code, ErrorCode::NotFoundError);
    assert!(names.try_next().is_none());

    h.sender.take();
    let mut late = h.dispatcher.get_database_names(ORIGIN);
    assert_eq!(expect_error(late.try_next()).code, ErrorCode::AbortError);
    assert!(h.sender.is_empty());
}

#[test]
fn test_dropping_dispatcher_abandons_pending_requests() {
    let sender = Rc::new(RecordingSender::new());
    let dispatcher = Dispatcher::new(WORKER, sender, DispatcherConfig::default());
    let mut request = dispatcher.get_database_names(ORIGIN);
    drop(dispatcher);

    assert_eq!(expect_error(request.try_next()).code, ErrorCode::NotFoundError);
}

// Open flow and connection events

#[test]
fn test_blocked_and_upgrade_needed_are_not_terminal() {
    let h = Harness::new();
    let mut open = h.dispatcher.open(ORIGIN, "library", Some(2), TransactionId(9));
    let database_callbacks = match h.sender.last() {
        Some(HostMessage::FactoryOpen {
            database_callbacks, ..
        }) => database_callbacks,
        other => panic!("expected FactoryOpen, got {other:?}"),
    };
    let ticket = h.take_ticket();

    h.deliver(ClientEvent::Blocked {
        callbacks: ticket.callbacks,
        old_version: 1,
    });
    h.deliver(ClientEvent::UpgradeNeeded {
        callbacks: ticket.callbacks,
        database_callbacks,
        database: DatabaseId::from_raw(4),
        old_version: 1,
        data_loss: Default::default(),
        data_loss_message: String::new(),
        metadata: DatabaseMetadata::new("library"),
    });
    assert_eq!(h.dispatcher.pending_request_count(), 1);

    let outcome = open.request.try_next().unwrap();
    assert!(!outcome.is_terminal());
    assert!(matches!(outcome, IdbOutcome::Blocked { old_version: 1 }));

    let upgrade_db = match open.request.try_next() {
        Some(IdbOutcome::UpgradeNeeded { database, .. }) => database,
        other => panic!("expected upgrade, got {other:?}"),
    };
    assert_eq!(upgrade_db.id(), DatabaseId::from_raw(4));

    h.deliver(ClientEvent::SuccessDatabase {
        callbacks: ticket.callbacks,
        database_callbacks,
        database: None,
        metadata: DatabaseMetadata::new("library"),
    });
    assert!(matches!(
        open.request.try_next(),
        Some(IdbOutcome::Database { database: None, .. })
    ));
    assert_eq!(h.dispatcher.pending_request_count(), 0);
}

#[test]
fn test_connection_events_reach_event_stream_until_close() {
    let h = Harness::new();
    let (db, mut open) = h.open_database();
    let database_callbacks = db.database_callbacks_id();

    h.deliver(ClientEvent::VersionChange {
        database_callbacks,
        old_version: 1,
        new_version: Some(2),
    });
    h.deliver(ClientEvent::Complete {
        database_callbacks,
        transaction: TransactionId(3),
    });
    assert_eq!(
        open.events.try_next(),
        Some(DatabaseEvent::VersionChange {
            old_version: 1,
            new_version: Some(2)
        })
    );
    assert_eq!(
        open.events.try_next(),
        Some(DatabaseEvent::Complete {
            transaction: TransactionId(3)
        })
    );

    db.close();
    h.deliver(ClientEvent::ForcedClose { database_callbacks });
    assert!(open.events.try_next().is_none());
}

#[test]
fn test_failed_open_releases_event_sink() {
    let h = Harness::new();
    for _ in 0..3 {
        let mut open = h.dispatcher.open(ORIGIN, "library", Some(1), TransactionId(9));
        let ticket = h.take_ticket();
        h.deliver(ClientEvent::Error {
            callbacks: ticket.callbacks,
            error: DatabaseError::new(ErrorCode::VersionError, "The requested version is too low."),
        });
        assert!(matches!(open.request.try_next(), Some(IdbOutcome::Error(_))));
    }

    assert_eq!(h.dispatcher.pending_request_count(), 0);
    assert_eq!(h.dispatcher.pending_database_callback_count(), 0);
}

#[test]
fn test_successful_open_keeps_event_sink_until_handle_drops() {
    let h = Harness::new();
    for _ in 0..3 {
        let (db, _open) = h.open_database();
        assert_eq!(h.dispatcher.pending_database_callback_count(), 1);
        drop(db);
    }

    assert_eq!(h.dispatcher.pending_database_callback_count(), 0);
}

#[test]
fn test_unclaimed_open_success_closes_connection_and_releases_sink() {
    let h = Harness::new();
    let _open = h.dispatcher.open(ORIGIN, "library", Some(1), TransactionId(9));
    let database_callbacks = match h.sender.last() {
        Some(HostMessage::FactoryOpen {
            database_callbacks, ..
        }) => database_callbacks,
        other => panic!("expected FactoryOpen, got {other:?}"),
    };
    h.sender.take();

    h.deliver(ClientEvent::SuccessDatabase {
        callbacks: CallbackId::from_raw(999),
        database_callbacks,
        database: Some(DatabaseId::from_raw(5)),
        metadata: DatabaseMetadata::new("library"),
    });

    assert_eq!(
        h.sender.take(),
        vec![HostMessage::DatabaseClose {
            database: DatabaseId::from_raw(5)
        }]
    );
    assert_eq!(h.dispatcher.pending_database_callback_count(), 0);
}

#[test]
fn test_observer_receives_only_its_observations() {
    let h = Harness::new();
    let (db, _open) = h.open_database();
    let mut first = db.observe(TransactionId(1), ObserverOptions::default()).unwrap();
    let mut second = db.observe(TransactionId(1), ObserverOptions::default()).unwrap();

    let observation = |store| Observation {
        object_store_id: store,
        kind: OperationType::Put,
        key_range: Some(KeyRange::only(key(1))),
        value: None,
    };
    let mut changes = ObserverChanges {
        observations: vec![observation(1), observation(2)],
        ..Default::default()
    };
    changes.observation_index_map.insert(first.id, vec![1]);
    changes.observation_index_map.insert(second.id, vec![0, 1]);

    h.deliver(ClientEvent::DatabaseChanges {
        database_callbacks: db.database_callbacks_id(),
        changes,
    });

    assert_eq!(first.changes.try_next(), Some(vec![observation(2)]));
    assert_eq!(
        second.changes.try_next(),
        Some(vec![observation(1), observation(2)])
    );

    db.unobserve(&[first.id]);
    assert_eq!(h.dispatcher.observer_count(), 1);
}

// Blob acknowledgement

#[test]
fn test_delivered_and_discarded_blobs_are_acknowledged() {
    let h = Harness::new();
    let (db, _open) = h.open_database();

    let mut get = db.get(TransactionId(1), 1, NO_INDEX, KeyRange::only(key(1)), false);
    let ticket = h.take_ticket();
    let with_blob = |uuid: &str| {
        IdbValue::new(b"v".to_vec()).with_blobs(vec![BlobInfo::new(uuid, "text/plain", 1)])
    };
    h.deliver(ClientEvent::SuccessValue {
        callbacks: ticket.callbacks,
        value: Some(ReturnValue::from(with_blob("got"))),
    });
    assert!(matches!(get.try_next(), Some(IdbOutcome::Value(Some(_)))));
    assert_eq!(
        h.sender.take(),
        vec![HostMessage::AckReceivedBlobs {
            uuids: vec!["got".into()]
        }]
    );

    let cursor = h.open_cursor(&db, 1, 1);
    let _first = cursor.continue_next();
    let _second = cursor.continue_next();
    let _prefetch = cursor.continue_next();
    let ticket = h.take_ticket();
    h.deliver(ClientEvent::SuccessCursorPrefetch {
        callbacks: ticket.callbacks,
        cursor: cursor.id(),
        keys: vec![key(1), key(2)],
        primary_keys: vec![key(1), key(2)],
        values: vec![Some(with_blob("first")), Some(with_blob("second"))],
    });
    assert_eq!(
        h.sender.take(),
        vec![HostMessage::AckReceivedBlobs {
            uuids: vec!["first".into()]
        }]
    );

    cursor.reset_prefetch_cache();
    assert_eq!(
        h.sender.take(),
        vec![
            HostMessage::AckReceivedBlobs {
                uuids: vec!["second".into()]
            },
            HostMessage::CursorPrefetchReset {
                cursor: cursor.id(),
                used_prefetches: 1,
                unused_prefetches: 1,
            },
        ]
    );
}

#[tokio::test]
async fn test_request_resolves_asynchronously() {
    let h = Harness::new();
    let mut request = h.dispatcher.get_database_names(ORIGIN);
    let ticket = h.take_ticket();

    h.deliver(ClientEvent::SuccessStringList {
        callbacks: ticket.callbacks,
        list: vec!["a".into(), "b".into()],
    });

    match request.finish().await {
        Some(IdbOutcome::StringList(list)) => assert_eq!(list, vec!["a", "b"]),
        other => panic!("expected names, got {other:?}"),
    }
    assert!(request.next().await.is_none());
}
