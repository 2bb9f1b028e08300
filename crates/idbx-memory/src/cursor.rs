//! Backend-side cursors
//!
//! A cursor remembers its key, not an iterator, so writes between steps are
//! seen by the next step. A prefetch saves the position it started from;
//! `CursorPrefetchReset` restores it and replays the entries the client
//! actually consumed.

use idbx::tracing::prefix;
use idbx_core::{
    CursorDirection, DatabaseError, ErrorCode, IdbKey, IdbValue, IndexId, KeyRange,
    ObjectStoreId, TransactionId,
};
use idbx_proto::{ClientEvent, CursorEntry, CursorId, DatabaseId, Ticket};
use tracing::{debug, trace, warn};

use crate::backend::{transaction_inactive, MemoryBackend};
use crate::store::ObjectStore;

pub(crate) struct Cursor {
    database: DatabaseId,
    transaction: TransactionId,
    object_store: ObjectStoreId,
    range: KeyRange,
    direction: CursorDirection,
    key_only: bool,
    /// `None` once the cursor ran off the end of its range
    position: Option<IdbKey>,
    /// Where the last prefetch started
    saved_position: Option<IdbKey>,
}

impl Cursor {
    fn entry(&self, key: &IdbKey, value: &IdbValue) -> CursorEntry {
        CursorEntry {
            key: key.clone(),
            primary_key: key.clone(),
            value: (!self.key_only).then(|| value.clone()),
        }
    }

    /// Move one step, optionally jumping to `target`. Returns the new entry.
    fn step(&mut self, store: &ObjectStore, target: Option<&IdbKey>) -> Option<CursorEntry> {
        let position = self.position.as_ref()?;
        let found = store
            .step(&self.range, Some(position), target, self.direction.is_forward())
            .map(|(key, value)| (key.clone(), self.entry(key, value)));
        match found {
            Some((key, entry)) => {
                self.position = Some(key);
                Some(entry)
            }
            None => {
                self.position = None;
                None
            }
        }
    }
}

impl MemoryBackend {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn open_cursor(
        &mut self,
        ticket: Ticket,
        database: DatabaseId,
        transaction: TransactionId,
        object_store: ObjectStoreId,
        index: IndexId,
        range: KeyRange,
        direction: CursorDirection,
        key_only: bool,
    ) -> Result<ClientEvent, DatabaseError> {
        let store = self.read_store(database, transaction, object_store, index)?;
        let mut cursor = Cursor {
            database,
            transaction,
            object_store,
            range,
            direction,
            key_only,
            position: None,
            saved_position: None,
        };
        let first = store
            .step(&cursor.range, None, None, direction.is_forward())
            .map(|(key, value)| (key.clone(), cursor.entry(key, value)));
        let Some((key, entry)) = first else {
            return Ok(ClientEvent::SuccessValue {
                callbacks: ticket.callbacks,
                value: None,
            });
        };
        cursor.position = Some(key);
        let id = CursorId::from(self.cursors.insert(cursor));
        debug!("{} opened {} on store {}", prefix::STORE, id, object_store);
        Ok(ClientEvent::SuccessCursor {
            callbacks: ticket.callbacks,
            cursor: id,
            entry,
        })
    }

    pub(crate) fn continue_cursor(
        &mut self,
        ticket: Ticket,
        id: CursorId,
        key: Option<IdbKey>,
    ) -> Result<ClientEvent, DatabaseError> {
        let (cursor, store) = self.cursor_and_store(id)?;
        Ok(match cursor.step(store, key.as_ref()) {
            Some(entry) => ClientEvent::SuccessCursorContinue {
                callbacks: ticket.callbacks,
                cursor: id,
                entry,
            },
            None => ClientEvent::SuccessValue {
                callbacks: ticket.callbacks,
                value: None,
            },
        })
    }

    pub(crate) fn advance_cursor(
        &mut self,
        ticket: Ticket,
        id: CursorId,
        count: u32,
    ) -> Result<ClientEvent, DatabaseError> {
        if count == 0 {
            return Err(DatabaseError::new(
                ErrorCode::InvalidAccessError,
                "Cursors cannot advance by zero.",
            ));
        }
        let (cursor, store) = self.cursor_and_store(id)?;
        let mut last = None;
        for _ in 0..count {
            last = cursor.step(store, None);
            if last.is_none() {
                break;
            }
        }
        Ok(match last {
            Some(entry) => ClientEvent::SuccessCursorContinue {
                callbacks: ticket.callbacks,
                cursor: id,
                entry,
            },
            None => ClientEvent::SuccessValue {
                callbacks: ticket.callbacks,
                value: None,
            },
        })
    }

    /// Up to `count` entries in one response, leaving the cursor on the last.
    pub(crate) fn prefetch_cursor(
        &mut self,
        ticket: Ticket,
        id: CursorId,
        count: u32,
    ) -> Result<ClientEvent, DatabaseError> {
        let (cursor, store) = self.cursor_and_store(id)?;
        cursor.saved_position = cursor.position.clone();

        let mut keys = Vec::new();
        let mut primary_keys = Vec::new();
        let mut values = Vec::new();
        for _ in 0..count {
            let Some(entry) = cursor.step(store, None) else {
                break;
            };
            keys.push(entry.key);
            primary_keys.push(entry.primary_key);
            values.push(entry.value);
        }
        if keys.is_empty() {
            return Ok(ClientEvent::SuccessValue {
                callbacks: ticket.callbacks,
                value: None,
            });
        }
        // A short prefetch still leaves the cursor on its last entry
        if cursor.position.is_none() {
            cursor.position = keys.last().cloned();
        }
        trace!(
            "{} {} prefetched {} of {}",
            prefix::PREFETCH,
            id,
            keys.len(),
            count
        );
        Ok(ClientEvent::SuccessCursorPrefetch {
            callbacks: ticket.callbacks,
            cursor: id,
            keys,
            primary_keys,
            values,
        })
    }

    /// Return to where the last prefetch started and replay `used` steps.
    pub(crate) fn reset_cursor(&mut self, id: CursorId, used: u32, unused: u32) {
        let (cursor, store) = match self.cursor_and_store(id) {
            Ok(found) => found,
            Err(error) => {
                trace!("{} reset of {} ignored: {}", prefix::PREFETCH, id, error);
                return;
            }
        };
        let Some(saved) = cursor.saved_position.take() else {
            warn!("{} reset of {} without a prefetch", prefix::PREFETCH, id);
            return;
        };
        cursor.position = Some(saved);
        for _ in 0..used {
            if cursor.step(store, None).is_none() {
                break;
            }
        }
        debug!(
            "{} {} reset, {} used, {} discarded",
            prefix::PREFETCH,
            id,
            used,
            unused
        );
    }

    /// Forget the cursors of a connection, or of one of its transactions.
    pub(crate) fn drop_cursors_of(&mut self, database: DatabaseId, transaction: Option<TransactionId>) {
        let doomed: Vec<CursorId> = self
            .cursors
            .iter()
            .filter(|(_, c)| {
                c.database == database && transaction.map_or(true, |t| c.transaction == t)
            })
            .map(|(key, _)| CursorId::from(key))
            .collect();
        for id in doomed {
            self.cursors.remove(id.slot());
        }
    }

    fn cursor_and_store(&mut self, id: CursorId) -> Result<(&mut Cursor, &ObjectStore), DatabaseError> {
        let cursor = self
            .cursors
            .get_mut(id.slot())
            .ok_or_else(|| DatabaseError::not_found(format!("{id} does not exist.")))?;
        let connection = self
            .connections
            .get(cursor.database.slot())
            .ok_or_else(transaction_inactive)?;
        if !connection.transactions.contains_key(&cursor.transaction) {
            return Err(transaction_inactive());
        }
        let store = self
            .databases
            .get(&connection.database)
            .and_then(|db| db.stores.get(&cursor.object_store))
            .ok_or_else(|| DatabaseError::not_found("The object store was deleted."))?;
        Ok((cursor, store))
    }
}
