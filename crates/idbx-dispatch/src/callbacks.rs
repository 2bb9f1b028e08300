//! Registry of in-flight handlers keyed by the opaque ids sent on the wire.
//!
//! Ids come from a generation-checked slot table: a stale or forged id from
//! the backend can never reach a handler registered later in the same slot.
//! Whatever is still registered when the registry goes away is told so
//! through `PendingHandler::abandon`.

use idbx_core::{SlotKey, Slots};
use idbx_proto::{CallbackId, DatabaseCallbacksId};

/// An id type minted by a `CallbackRegistry`.
pub trait RegistryId: Copy {
    fn from_slot(key: SlotKey) -> Self;
    fn slot(&self) -> SlotKey;
}

impl RegistryId for CallbackId {
    fn from_slot(key: SlotKey) -> Self {
        CallbackId::from(key)
    }

    fn slot(&self) -> SlotKey {
        CallbackId::slot(self)
    }
}

impl RegistryId for DatabaseCallbacksId {
    fn from_slot(key: SlotKey) -> Self {
        DatabaseCallbacksId::from(key)
    }

    fn slot(&self) -> SlotKey {
        DatabaseCallbacksId::slot(self)
    }
}

/// A handler that must hear about it when its answer will never come.
pub trait PendingHandler {
    /// Called for every handler left in the registry at teardown.
    fn abandon(self);
}

pub struct CallbackRegistry<Id: RegistryId, T: PendingHandler> {
    slots: Slots<T>,
    _id: std::marker::PhantomData<Id>,
}

impl<Id: RegistryId, T: PendingHandler> Default for CallbackRegistry<Id, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id: RegistryId, T: PendingHandler> CallbackRegistry<Id, T> {
    pub fn new() -> Self {
        Self {
            slots: Slots::new(),
            _id: std::marker::PhantomData,
        }
    }

    pub fn add(&mut self, handler: T) -> Id {
        Id::from_slot(self.slots.insert(handler))
    }

    /// Borrow without removing, for responses that are not the last one.
    pub fn lookup(&self, id: Id) -> Option<&T> {
        self.slots.get(id.slot())
    }

    pub fn remove(&mut self, id: Id) -> Option<T> {
        self.slots.remove(id.slot())
    }

    pub fn contains(&self, id: Id) -> bool {
        self.slots.contains(id.slot())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Abandon every registered handler. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        let handlers = self.slots.drain();
        let count = handlers.len();
        for handler in handlers {
            handler.abandon();
        }
        count
    }
}

impl<Id: RegistryId, T: PendingHandler> Drop for CallbackRegistry<Id, T> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Tracked {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl PendingHandler for Tracked {
        fn abandon(self) {
            self.log.borrow_mut().push(self.name);
        }
    }

    fn tracked(name: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Tracked {
        Tracked {
            name,
            log: log.clone(),
        }
    }

    #[test]
    fn test_remove_returns_handler_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry: CallbackRegistry<CallbackId, Tracked> = CallbackRegistry::new();
        let id = registry.add(tracked("a", &log));

        assert!(registry.lookup(id).is_some());
        assert_eq!(registry.remove(id).map(|p| p.name), Some("a"));
        assert!(registry.remove(id).is_none());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_reused_slot_rejects_stale_id() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry: CallbackRegistry<CallbackId, Tracked> = CallbackRegistry::new();
        let stale = registry.add(tracked("old", &log));
        registry.remove(stale);
        let fresh = registry.add(tracked("new", &log));

        assert_ne!(stale, fresh);
        assert!(registry.lookup(stale).is_none());
        assert_eq!(registry.lookup(fresh).map(|p| p.name), Some("new"));
    }

    #[test]
    fn test_drop_abandons_every_pending_handler() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let mut registry: CallbackRegistry<DatabaseCallbacksId, Tracked> =
                CallbackRegistry::new();
            registry.add(tracked("a", &log));
            let gone = registry.add(tracked("b", &log));
            registry.add(tracked("c", &log));
            registry.remove(gone);
        }
        let mut abandoned = log.borrow().clone();
        abandoned.sort();
        assert_eq!(abandoned, vec!["a", "c"]);
    }

    #[test]
    fn test_clear_reports_count_and_empties() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry: CallbackRegistry<CallbackId, Tracked> = CallbackRegistry::new();
        registry.add(tracked("a", &log));
        registry.add(tracked("b", &log));

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert_eq!(registry.clear(), 0);
    }
}
