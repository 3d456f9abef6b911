//! Bloc: an event-routed state holder
//!
//! A [`Bloc`] wraps a [`Cubit`] and adds an inbound event queue. Events are
//! drained in FIFO order by one dispatcher thread, routed to the handler
//! registered for their kind, and each handled event that changed the state
//! is reported once as a [`Transition`].
//!
//! # Example
//!
//! ```
//! use bloc_core::{Bloc, Event};
//!
//! #[derive(Debug)]
//! enum CounterEvent {
//!     Increment,
//! }
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum CounterEventKind {
//!     Increment,
//! }
//!
//! impl Event for CounterEvent {
//!     type Kind = CounterEventKind;
//!
//!     fn kind(&self) -> CounterEventKind {
//!         CounterEventKind::Increment
//!     }
//! }
//!
//! let bloc = Bloc::<i32, CounterEvent>::builder(0)
//!     .name("counter")
//!     .on(CounterEventKind::Increment, |_, emit| {
//!         emit.emit(emit.state().unwrap_or_default() + 1);
//!     })
//!     .build()?;
//!
//! bloc.add(CounterEvent::Increment);
//! bloc.wait_idle();
//! assert_eq!(bloc.state(), 1);
//! # Ok::<(), bloc_core::BlocError>(())
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::broadcast::{Broadcast, Subscription};
use crate::change::Transition;
use crate::cubit::{Cubit, Emitter, State};
use crate::error::{BlocError, BoxError, Operation, Result};
use crate::event::{Event, Handler, HandlerTable};
use crate::hooks::{EventHooks, NoHooks, StateHooks};
use crate::sync::{lock, read, write};

/// Counts events that were enqueued but not yet processed
#[derive(Default)]
struct Backlog {
    queued: Mutex<usize>,
    idle: Condvar,
}

impl Backlog {
    fn enqueue(&self) {
        *lock(&self.queued) += 1;
    }

    fn complete(&self) {
        let mut queued = lock(&self.queued);
        *queued = queued.saturating_sub(1);
        if *queued == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut queued = lock(&self.queued);
        while *queued > 0 {
            queued = self
                .idle
                .wait(queued)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// State shared between the bloc handles and the dispatcher thread
struct Shared<S: State, E: Event> {
    name: Cow<'static, str>,
    cubit: Cubit<S>,
    handlers: RwLock<HandlerTable<S, E>>,
    transitions: Broadcast<Transition<S, E>>,
    hooks: Arc<dyn EventHooks<S, E>>,
    backlog: Backlog,
    dispatcher: OnceLock<ThreadId>,
}

impl<S: State, E: Event> Shared<S, E> {
    fn run(&self, mut events: UnboundedReceiver<E>) {
        let _ = self.dispatcher.set(thread::current().id());
        tracing::debug!(name = %self.name, "dispatcher started");

        while let Some(event) = events.blocking_recv() {
            if self.cubit.is_closed() {
                tracing::debug!(
                    name = %self.name,
                    kind = ?event.kind(),
                    "discarding event queued before close"
                );
            } else {
                let kind = event.kind();
                let dispatched = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(event)));
                if let Err(payload) = dispatched {
                    tracing::error!(
                        name = %self.name,
                        ?kind,
                        panic = %panic_message(payload.as_ref()),
                        "transition delivery panicked"
                    );
                }
            }
            self.backlog.complete();
        }

        tracing::debug!(name = %self.name, "dispatcher stopped");
    }

    fn dispatch(&self, event: E) {
        let kind = event.kind();
        let handler = read(&self.handlers).resolve(&event);
        let Some(handler) = handler else {
            self.cubit.report(BlocError::UnhandledEvent {
                name: self.name.clone(),
                kind: format!("{kind:?}"),
            });
            return;
        };

        let previous = self.cubit.state();
        let emitter = self.cubit.emitter();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&event, &emitter)));
        if let Err(payload) = outcome {
            self.cubit.report(BlocError::HandlerPanicked {
                name: self.name.clone(),
                kind: format!("{kind:?}"),
                message: panic_message(payload.as_ref()),
            });
        }

        let next = self.cubit.state();
        if next == previous || self.cubit.is_closed() {
            tracing::trace!(name = %self.name, ?kind, "no net change");
            return;
        }

        let transition = Transition::new(previous, event, next);
        self.hooks.on_transition(&transition);
        let delivered = self.transitions.publish(&transition);
        tracing::trace!(name = %self.name, ?kind, delivered, "transition published");
    }

    fn register(&self, kind: E::Kind, handler: Handler<S, E>) {
        if write(&self.handlers).register(kind, handler).is_some() {
            tracing::debug!(name = %self.name, ?kind, "replaced event handler");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

struct BlocInner<S: State, E: Event> {
    shared: Arc<Shared<S, E>>,
    sender: Mutex<Option<UnboundedSender<E>>>,
    worker: Option<JoinHandle<()>>,
}

impl<S: State, E: Event> BlocInner<S, E> {
    fn close(&self) -> bool {
        // Stop accepting events before the cubit reports closed
        lock(&self.sender).take();
        let closed = self.shared.cubit.close();
        self.shared.transitions.close();
        if closed {
            tracing::debug!(name = %self.shared.name, "bloc closed");
        }
        closed
    }
}

impl<S: State, E: Event> Drop for BlocInner<S, E> {
    fn drop(&mut self) {
        self.close();
        let Some(worker) = self.worker.take() else {
            return;
        };
        // Last handle dropped from inside a handler or subscriber
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            tracing::warn!(name = %self.shared.name, "dispatcher thread panicked");
        }
    }
}

/// An event-routed state holder
///
/// `Bloc` is a cheap handle: clones share the same state, handlers and
/// queue. Dropping the last handle closes the bloc and joins its dispatcher.
pub struct Bloc<S: State, E: Event> {
    inner: Arc<BlocInner<S, E>>,
}

impl<S: State, E: Event> Clone for Bloc<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: State, E: Event> Bloc<S, E> {
    /// Create an open bloc with no handlers
    pub fn new(initial: S) -> Result<Self> {
        Self::builder(initial).build()
    }

    pub fn builder(initial: S) -> BlocBuilder<S, E> {
        BlocBuilder::new(initial)
    }

    fn shared(&self) -> &Shared<S, E> {
        &self.inner.shared
    }

    pub fn name(&self) -> &str {
        &self.shared().name
    }

    /// The latest committed state
    pub fn state(&self) -> S {
        self.shared().cubit.state()
    }

    /// Broadcast of accepted states
    pub fn stream(&self) -> Broadcast<S> {
        self.shared().cubit.stream()
    }

    pub fn listen<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.shared().cubit.listen(callback)
    }

    /// Broadcast of transitions, from the point of subscription onward
    pub fn transition_stream(&self) -> Broadcast<Transition<S, E>> {
        self.shared().transitions.clone()
    }

    pub fn listen_transitions<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Transition<S, E>) + Send + Sync + 'static,
    {
        self.shared().transitions.listen(callback)
    }

    /// Register `handler` for events of `kind`, replacing any previous one
    pub fn on<F>(&self, kind: E::Kind, handler: F)
    where
        F: Fn(&E, &Emitter<S>) + Send + Sync + 'static,
    {
        self.shared().register(kind, Arc::new(handler));
    }

    /// Enqueue `event` for dispatch and return without waiting for it
    ///
    /// `on_event` runs on the calling thread while the queue is held, so it
    /// must not call `add` or `close` on the same bloc.
    pub fn add(&self, event: E) {
        let shared = self.shared();
        let rejected = {
            let sender = lock(&self.inner.sender);
            match sender.as_ref() {
                Some(sender) => {
                    shared.hooks.on_event(&event);
                    shared.backlog.enqueue();
                    let failed = sender.send(event).is_err();
                    if failed {
                        shared.backlog.complete();
                    }
                    failed
                }
                None => true,
            }
        };
        if rejected {
            self.reject_add();
        }
    }

    fn reject_add(&self) {
        self.shared().cubit.report(BlocError::Closed {
            name: self.shared().name.clone(),
            operation: Operation::Add,
        });
    }

    /// Emit directly, bypassing the event queue
    ///
    /// Produces a change but no transition.
    pub fn emit(&self, next: S) {
        self.shared().cubit.emit(next);
    }

    pub fn emitter(&self) -> Emitter<S> {
        self.shared().cubit.emitter()
    }

    /// Report an application error to the `on_error` hook
    pub fn add_error(&self, error: impl Into<BoxError>) {
        self.shared().cubit.add_error(error);
    }

    /// Block until every event added so far has been processed or discarded
    ///
    /// Returns immediately when called on the dispatcher thread.
    pub fn wait_idle(&self) {
        let shared = self.shared();
        if shared.dispatcher.get() == Some(&thread::current().id()) {
            tracing::warn!(name = %shared.name, "wait_idle called from the dispatcher thread");
            return;
        }
        shared.backlog.wait_idle();
    }

    /// Close the bloc: stop accepting events, discard queued ones, and
    /// cancel every state and transition subscription. Returns `false` if
    /// it was already closed.
    pub fn close(&self) -> bool {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.shared().cubit.is_closed()
    }
}

impl<S: State + fmt::Debug, E: Event> fmt::Debug for Bloc<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bloc")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("handlers", &read(&self.shared().handlers).len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for [`Bloc`]
pub struct BlocBuilder<S: State, E: Event> {
    initial: S,
    name: Cow<'static, str>,
    state_hooks: Arc<dyn StateHooks<S>>,
    event_hooks: Arc<dyn EventHooks<S, E>>,
    handlers: HandlerTable<S, E>,
}

impl<S: State, E: Event> BlocBuilder<S, E> {
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            name: Cow::Borrowed("bloc"),
            state_hooks: Arc::new(NoHooks),
            event_hooks: Arc::new(NoHooks),
            handlers: HandlerTable::new(),
        }
    }

    /// Name used in log fields, error values and the dispatcher thread name
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn hooks<H: EventHooks<S, E>>(mut self, hooks: H) -> Self {
        let hooks = Arc::new(hooks);
        let state_hooks: Arc<dyn StateHooks<S>> = hooks.clone();
        let event_hooks: Arc<dyn EventHooks<S, E>> = hooks;
        self.state_hooks = state_hooks;
        self.event_hooks = event_hooks;
        self
    }

    /// Register a handler before the dispatcher starts
    pub fn on<F>(mut self, kind: E::Kind, handler: F) -> Self
    where
        F: Fn(&E, &Emitter<S>) + Send + Sync + 'static,
    {
        if self.handlers.register(kind, Arc::new(handler)).is_some() {
            tracing::debug!(name = %self.name, ?kind, "replaced event handler");
        }
        self
    }

    /// Start the dispatcher thread and return the bloc
    pub fn build(self) -> Result<Bloc<S, E>> {
        let name = self.name;
        let handler_count = self.handlers.len();
        let cubit = Cubit::from_parts(self.initial, name.clone(), self.state_hooks);
        let (sender, receiver) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            name: name.clone(),
            cubit,
            handlers: RwLock::new(self.handlers),
            transitions: Broadcast::new(),
            hooks: self.event_hooks,
            backlog: Backlog::default(),
            dispatcher: OnceLock::new(),
        });

        let worker = thread::Builder::new()
            .name(format!("{name}-dispatch"))
            .spawn({
                let shared = Arc::clone(&shared);
                move || shared.run(receiver)
            })?;

        tracing::debug!(name = %name, handlers = handler_count, "bloc started");

        Ok(Bloc {
            inner: Arc::new(BlocInner {
                shared,
                sender: Mutex::new(Some(sender)),
                worker: Some(worker),
            }),
        })
    }
}
