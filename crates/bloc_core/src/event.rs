//! Event kinds and handler registration
//!
//! Events are routed by kind rather than by value. An event type exposes its
//! kind through [`Event::kind`], usually a fieldless enum mirroring the
//! variants of the event enum.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::cubit::{Emitter, State};

/// An input routed to a handler by its kind
///
/// ```
/// use bloc_core::Event;
///
/// enum CounterEvent {
///     Increment,
///     Add(i32),
/// }
///
/// #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// enum CounterEventKind {
///     Increment,
///     Add,
/// }
///
/// impl Event for CounterEvent {
///     type Kind = CounterEventKind;
///
///     fn kind(&self) -> CounterEventKind {
///         match self {
///             CounterEvent::Increment => CounterEventKind::Increment,
///             CounterEvent::Add(_) => CounterEventKind::Add,
///         }
///     }
/// }
/// ```
pub trait Event: Send + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Event handler function type
///
/// A handler runs to completion on the dispatcher thread and may emit any
/// number of times through the [`Emitter`] it is given.
pub type Handler<S, E> = Arc<dyn Fn(&E, &Emitter<S>) + Send + Sync>;

/// Maps each event kind to its single handler
pub struct HandlerTable<S: State, E: Event> {
    handlers: FxHashMap<E::Kind, Handler<S, E>>,
}

impl<S: State, E: Event> HandlerTable<S, E> {
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Register `handler` for `kind`, returning the handler it replaced
    pub fn register(&mut self, kind: E::Kind, handler: Handler<S, E>) -> Option<Handler<S, E>> {
        self.handlers.insert(kind, handler)
    }

    /// Look up the handler for an event's kind
    pub fn resolve(&self, event: &E) -> Option<Handler<S, E>> {
        self.handlers.get(&event.kind()).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }
}

impl<S: State, E: Event> Default for HandlerTable<S, E> {
    fn default() -> Self {
        Self::new()
    }
}
