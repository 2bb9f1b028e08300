//! Client-side cursor handle.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use idbx_core::{IdbKey, TransactionId};
use idbx_proto::{CursorId, HostMessage};
use tracing::trace;

use idbx::tracing::prefix;

use crate::dispatcher::Dispatcher;
use crate::prefetch::{AdvancePlan, ContinuePlan, PrefetchCache, PrefetchStats};
use crate::request::{IdbOutcome, Request};

/// A cursor opened by `DatabaseHandle::open_cursor`.
///
/// Plain `continue_next()` calls are served from an adaptive prefetch cache
/// once the cursor is iterated sequentially. After handling each success
/// outcome, including any follow-up continue issued for it, the caller
/// reports back with `post_success_handler_callback()` so an idle cache can
/// be released.
///
/// Dropping the handle tells the backend the cursor is gone.
pub struct CursorHandle {
    id: CursorId,
    transaction: TransactionId,
    cache: Rc<RefCell<PrefetchCache>>,
    dispatcher: Dispatcher,
}

impl CursorHandle {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        id: CursorId,
        transaction: TransactionId,
        cache: Rc<RefCell<PrefetchCache>>,
    ) -> Self {
        Self {
            id,
            transaction,
            cache,
            dispatcher,
        }
    }

    /// A handle with no backend cursor behind it. It never receives prefetch
    /// data and sends nothing when dropped.
    pub fn detached(dispatcher: &Dispatcher, transaction: TransactionId) -> Self {
        let cache = Rc::new(RefCell::new(PrefetchCache::new(dispatcher.config().prefetch)));
        Self::new(dispatcher.clone(), CursorId::INVALID, transaction, cache)
    }

    pub fn id(&self) -> CursorId {
        self.id
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction
    }

    pub fn prefetch_stats(&self) -> PrefetchStats {
        self.cache.borrow().stats()
    }

    /// Move to the next entry.
    pub fn continue_next(&self) -> Request {
        self.continue_to(None, None)
    }

    /// Move to the next entry, or to the first entry at or past `key`
    /// (and `primary_key`) when given.
    pub fn continue_to(&self, key: Option<IdbKey>, primary_key: Option<IdbKey>) -> Request {
        if !self.dispatcher.is_running() {
            return Request::failed(self.dispatcher.not_running_error().into());
        }

        if key.is_none() && primary_key.is_none() {
            let plan = self.cache.borrow_mut().plan_continue();
            match plan {
                ContinuePlan::Cached(entry, effects) => {
                    trace!("{} {} served from cache", prefix::PREFETCH, self.id);
                    self.dispatcher.apply_cache_effects(self.id, effects);
                    self.dispatcher.ack_entry(&entry);
                    return Request::ready(IdbOutcome::CursorContinue(entry));
                }
                ContinuePlan::Prefetch(count) => {
                    trace!("{} {} prefetching {}", prefix::PREFETCH, self.id, count);
                    let cursor = self.id;
                    return self.dispatcher.submit(None, |ticket| HostMessage::CursorPrefetch {
                        ticket,
                        cursor,
                        count,
                    });
                }
                ContinuePlan::Single => {}
            }
        } else {
            self.reset_prefetch_cache();
        }

        let cursor = self.id;
        self.dispatcher
            .submit_for_cursor(cursor, self.transaction, |ticket| HostMessage::CursorContinue {
                ticket,
                cursor,
                key,
                primary_key,
            })
    }

    /// Skip `count - 1` entries and move to the next one.
    pub fn advance(&self, count: u32) -> Request {
        if !self.dispatcher.is_running() {
            return Request::failed(self.dispatcher.not_running_error().into());
        }

        let plan = self.cache.borrow_mut().plan_advance(count);
        match plan {
            AdvancePlan::Cached(entry, effects) => {
                trace!("{} {} advanced {} in cache", prefix::PREFETCH, self.id, count);
                self.dispatcher.apply_cache_effects(self.id, effects);
                self.dispatcher.ack_entry(&entry);
                Request::ready(IdbOutcome::CursorContinue(entry))
            }
            AdvancePlan::Direct(effects) => {
                self.dispatcher.apply_cache_effects(self.id, effects);
                let cursor = self.id;
                self.dispatcher
                    .submit_for_cursor(cursor, self.transaction, |ticket| {
                        HostMessage::CursorAdvance {
                            ticket,
                            cursor,
                            count,
                        }
                    })
            }
        }
    }

    /// Report that one success outcome for this cursor has been handled.
    pub fn post_success_handler_callback(&self) {
        let effects = self.cache.borrow_mut().post_success_handler_callback();
        self.dispatcher.apply_cache_effects(self.id, effects);
    }

    /// Drop whatever is cached and return to the cold state.
    pub fn reset_prefetch_cache(&self) {
        let effects = self.cache.borrow_mut().reset();
        self.dispatcher.apply_cache_effects(self.id, effects);
    }
}

impl fmt::Debug for CursorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorHandle")
            .field("id", &self.id)
            .field("transaction", &self.transaction)
            .finish()
    }
}

impl Drop for CursorHandle {
    fn drop(&mut self) {
        let leftover = match self.cache.try_borrow_mut() {
            Ok(mut cache) => cache.discard(),
            Err(_) => Vec::new(),
        };
        self.dispatcher.forget_cursor(self.id, leftover);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatcherConfig;
    use crate::transport::RecordingSender;
    use idbx_proto::WorkerId;

    #[test]
    fn test_detached_cursor_is_silent_on_drop() {
        let sender = Rc::new(RecordingSender::new());
        let dispatcher = Dispatcher::new(WorkerId::MAIN, sender.clone(), DispatcherConfig::default());

        let cursor = CursorHandle::detached(&dispatcher, TransactionId(1));
        assert_eq!(cursor.id(), CursorId::INVALID);
        drop(cursor);

        assert!(sender.is_empty());
    }

    #[test]
    fn test_detached_reset_with_empty_cache_sends_nothing() {
        let sender = Rc::new(RecordingSender::new());
        let dispatcher = Dispatcher::new(WorkerId::MAIN, sender.clone(), DispatcherConfig::default());

        let cursor = CursorHandle::detached(&dispatcher, TransactionId(1));
        cursor.reset_prefetch_cache();
        cursor.post_success_handler_callback();

        assert!(sender.is_empty());
    }

    #[test]
    fn test_cursor_ops_after_shutdown_abort() {
        let sender = Rc::new(RecordingSender::new());
        let dispatcher = Dispatcher::new(WorkerId(2), sender.clone(), DispatcherConfig::default());
        let cursor = CursorHandle::detached(&dispatcher, TransactionId(1));
        dispatcher.shutdown();

        let mut request = cursor.continue_next();
        match request.try_next() {
            Some(IdbOutcome::Error(err)) => {
                assert_eq!(err.code, idbx_core::ErrorCode::AbortError)
            }
            other => panic!("expected abort, got {other:?}"),
        }
        assert!(sender.is_empty());
    }
}
