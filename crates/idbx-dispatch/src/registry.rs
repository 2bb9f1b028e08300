//! Per-worker dispatcher ownership.
//!
//! Each client context runs on its own task loop (`WorkerLoop`). The loop
//! owns a `DispatcherContext`, which creates the worker's `Dispatcher` on
//! first use and tears it down when the loop stops. A stopped context never
//! hands out a dispatcher again.
//!
//! `WorkerRouter` is the only piece shared across threads: it maps worker ids
//! to inboxes so the backend side can deliver `ClientMessage`s without
//! knowing anything about dispatchers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use idbx::tracing::prefix;
use idbx_proto::{codec, ClientMessage, WorkerId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::DispatcherConfig;
use crate::dispatcher::Dispatcher;
use crate::transport::MessageSender;

/// Hook run just before a worker's task loop stops.
pub trait StopObserver {
    fn will_stop_worker(&self, worker: WorkerId);
}

enum ContextState {
    Idle,
    Running(Dispatcher),
    Stopped,
}

/// Owner of one worker's dispatcher.
pub struct DispatcherContext {
    worker: WorkerId,
    sender: Rc<dyn MessageSender>,
    config: DispatcherConfig,
    state: RefCell<ContextState>,
}

impl DispatcherContext {
    pub fn new(worker: WorkerId, sender: Rc<dyn MessageSender>, config: DispatcherConfig) -> Self {
        Self {
            worker,
            sender,
            config,
            state: RefCell::new(ContextState::Idle),
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// The worker's dispatcher, created on first use.
    ///
    /// # Panics
    ///
    /// Panics if the worker has already stopped. Nothing may touch a
    /// dispatcher on a worker that is shutting down.
    pub fn dispatcher(&self) -> Dispatcher {
        let mut state = self.state.borrow_mut();
        if let ContextState::Running(dispatcher) = &*state {
            return dispatcher.clone();
        }
        if matches!(*state, ContextState::Stopped) {
            panic!(
                "dispatcher for {} requested after its worker stopped",
                self.worker
            );
        }
        let dispatcher = Dispatcher::new(self.worker, self.sender.clone(), self.config.clone());
        *state = ContextState::Running(dispatcher.clone());
        dispatcher
    }

    /// The dispatcher if it has been created and is still running.
    pub fn existing(&self) -> Option<Dispatcher> {
        match &*self.state.borrow() {
            ContextState::Running(dispatcher) => Some(dispatcher.clone()),
            _ => None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(*self.state.borrow(), ContextState::Stopped)
    }

    /// Hand an inbound message to the dispatcher. Messages for a worker that
    /// never created one, or has stopped, are dropped.
    pub fn on_message_received(&self, message: ClientMessage) {
        match self.existing() {
            Some(dispatcher) => dispatcher.on_message_received(message),
            None => trace!(
                "{} no dispatcher on {}, dropping message",
                prefix::DISPATCH,
                self.worker
            ),
        }
    }
}

impl StopObserver for DispatcherContext {
    fn will_stop_worker(&self, worker: WorkerId) {
        // Drain before marking stopped so nothing pending is lost.
        if let Some(dispatcher) = self.existing() {
            dispatcher.shutdown();
        }
        *self.state.borrow_mut() = ContextState::Stopped;
        debug!("{} context for {} stopped", prefix::DISPATCH, worker);
    }
}

/// Process-wide map from worker id to that worker's inbox.
#[derive(Clone, Default)]
pub struct WorkerRouter {
    inboxes: Arc<Mutex<HashMap<WorkerId, mpsc::UnboundedSender<ClientMessage>>>>,
}

impl WorkerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the inbox for `worker`, replacing any previous one.
    pub fn register(&self, worker: WorkerId) -> mpsc::UnboundedReceiver<ClientMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inboxes.lock().insert(worker, tx).is_some() {
            warn!("{} {} registered twice, old inbox dropped", prefix::DISPATCH, worker);
        }
        rx
    }

    pub fn unregister(&self, worker: WorkerId) {
        self.inboxes.lock().remove(&worker);
    }

    /// Deliver to the addressed worker. Returns false when it is not running.
    pub fn route(&self, message: ClientMessage) -> bool {
        let inboxes = self.inboxes.lock();
        match inboxes.get(&message.worker) {
            Some(inbox) => inbox.send(message).is_ok(),
            None => {
                trace!(
                    "{} no inbox for {}, dropping message",
                    prefix::DISPATCH,
                    message.worker
                );
                false
            }
        }
    }

    /// Decode a frame and route it.
    pub fn route_bytes(&self, frame: &[u8]) -> idbx::Result<bool> {
        let message = codec::decode_client(frame)?;
        Ok(self.route(message))
    }

    pub fn worker_count(&self) -> usize {
        self.inboxes.lock().len()
    }

    pub fn is_registered(&self, worker: WorkerId) -> bool {
        self.inboxes.lock().contains_key(&worker)
    }
}

/// One worker's task loop: its inbox, its dispatcher context and the
/// observers to notify when it stops.
pub struct WorkerLoop {
    worker: WorkerId,
    context: Rc<DispatcherContext>,
    inbox: mpsc::UnboundedReceiver<ClientMessage>,
    router: WorkerRouter,
    stop_observers: Vec<Rc<dyn StopObserver>>,
    stopped: bool,
}

impl WorkerLoop {
    pub fn start(
        router: &WorkerRouter,
        worker: WorkerId,
        sender: Rc<dyn MessageSender>,
        config: DispatcherConfig,
    ) -> Self {
        let inbox = router.register(worker);
        let context = Rc::new(DispatcherContext::new(worker, sender, config));
        let mut stop_observers: Vec<Rc<dyn StopObserver>> = Vec::new();
        // The main context lives as long as the process.
        if !worker.is_main() {
            stop_observers.push(context.clone());
        }
        info!("{} worker loop started for {}", prefix::DISPATCH, worker);
        Self {
            worker,
            context,
            inbox,
            router: router.clone(),
            stop_observers,
            stopped: false,
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn context(&self) -> Rc<DispatcherContext> {
        self.context.clone()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.context.dispatcher()
    }

    pub fn add_stop_observer(&mut self, observer: Rc<dyn StopObserver>) {
        self.stop_observers.push(observer);
    }

    /// Dispatch every message already waiting. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(message) = self.inbox.try_recv() {
            self.context.on_message_received(message);
            handled += 1;
        }
        handled
    }

    /// Wait for one message and dispatch it. Returns false once the inbox is closed.
    pub async fn turn(&mut self) -> bool {
        match self.inbox.recv().await {
            Some(message) => {
                self.context.on_message_received(message);
                true
            }
            None => false,
        }
    }

    /// Dispatch messages until `shutdown` resolves or the inbox closes, then stop.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                message = self.inbox.recv() => match message {
                    Some(message) => self.context.on_message_received(message),
                    None => break,
                },
            }
        }
        self.stop();
    }

    /// Stop the loop: unroute the worker and notify stop observers.
    pub fn stop(mut self) {
        self.stop_in_place();
    }

    fn stop_in_place(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.router.unregister(self.worker);
        for observer in &self.stop_observers {
            observer.will_stop_worker(self.worker);
        }
        info!("{} worker loop stopped for {}", prefix::DISPATCH, self.worker);
    }
}

impl Drop for WorkerLoop {
    fn drop(&mut self) {
        self.stop_in_place();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingSender;
    use idbx_proto::{CallbackId, ClientEvent};

    fn context(worker: WorkerId) -> DispatcherContext {
        DispatcherContext::new(worker, Rc::new(RecordingSender::new()), DispatcherConfig::default())
    }

    #[test]
    fn test_dispatcher_created_lazily_once() {
        let context = context(WorkerId(1));
        assert!(context.existing().is_none());

        let first = context.dispatcher();
        let second = context.dispatcher();
        assert_eq!(first.worker(), WorkerId(1));
        assert!(context.existing().is_some());

        first.get_database_names("https://example.test");
        assert_eq!(second.pending_request_count(), 1);
    }

    #[test]
    fn test_stop_drains_and_marks_stopped() {
        let context = context(WorkerId(1));
        let dispatcher = context.dispatcher();
        let _request = dispatcher.get_database_names("https://example.test");

        context.will_stop_worker(WorkerId(1));
        assert!(context.is_stopped());
        assert!(context.existing().is_none());
        assert!(!dispatcher.is_running());
        assert_eq!(dispatcher.pending_request_count(), 0);
    }

    #[test]
    #[should_panic(expected = "after its worker stopped")]
    fn test_dispatcher_after_stop_panics() {
        let context = context(WorkerId(5));
        context.dispatcher();
        context.will_stop_worker(WorkerId(5));
        context.dispatcher();
    }

    #[test]
    fn test_router_drops_messages_for_unknown_workers() {
        let router = WorkerRouter::new();
        let mut inbox = router.register(WorkerId(2));

        let message = |worker| ClientMessage {
            worker,
            event: ClientEvent::SuccessUndefined {
                callbacks: CallbackId::from_raw(0),
            },
        };
        assert!(router.route(message(WorkerId(2))));
        assert!(!router.route(message(WorkerId(3))));
        assert!(inbox.try_recv().is_ok());

        router.unregister(WorkerId(2));
        assert!(!router.route(message(WorkerId(2))));
        assert_eq!(router.worker_count(), 0);
    }

    #[test]
    fn test_route_bytes_rejects_garbage() {
        let router = WorkerRouter::new();
        assert!(router.route_bytes(b"not json").is_err());
    }

    #[test]
    fn test_main_loop_keeps_dispatcher_running_on_stop() {
        let router = WorkerRouter::new();
        let sender: Rc<dyn MessageSender> = Rc::new(RecordingSender::new());
        let main = WorkerLoop::start(&router, WorkerId::MAIN, sender, DispatcherConfig::default());
        let context = main.context();
        let dispatcher = main.dispatcher();

        main.stop();
        assert!(!router.is_registered(WorkerId::MAIN));
        assert!(!context.is_stopped());
        assert!(dispatcher.is_running());
    }

    #[test]
    fn test_worker_loop_stop_notifies_observers_once() {
        struct Counter(RefCell<u32>);
        impl StopObserver for Counter {
            fn will_stop_worker(&self, _worker: WorkerId) {
                *self.0.borrow_mut() += 1;
            }
        }

        let router = WorkerRouter::new();
        let sender: Rc<dyn MessageSender> = Rc::new(RecordingSender::new());
        let mut worker = WorkerLoop::start(&router, WorkerId(9), sender, DispatcherConfig::default());
        let counter = Rc::new(Counter(RefCell::new(0)));
        worker.add_stop_observer(counter.clone());
        let context = worker.context();

        worker.stop();
        assert_eq!(*counter.0.borrow(), 1);
        assert!(context.is_stopped());
    }
}
