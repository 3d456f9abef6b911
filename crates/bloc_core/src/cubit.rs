//! Cubit: a change-gated state holder
//!
//! A [`Cubit`] owns one current state value and broadcasts every accepted
//! change to its subscribers. Emitting a value equal to the current state is
//! a no-op.
//!
//! # Delivery
//!
//! A committed change is pushed onto an outbox. Exactly one thread drains the
//! outbox at a time, calling `on_change` and then the subscribers for each
//! change in commit order. An emit made while a delivery is in flight (from a
//! subscriber, a hook, or another thread) is committed at once and delivered
//! after the in-flight one completes.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::broadcast::{Broadcast, Subscription};
use crate::change::Change;
use crate::error::{BlocError, BoxError, Operation};
use crate::hooks::{NoHooks, StateHooks};
use crate::sync::{lock, read, write};

/// Bounds required of a state value
pub trait State: Clone + PartialEq + Send + Sync + 'static {}

impl<T> State for T where T: Clone + PartialEq + Send + Sync + 'static {}

struct Outbox<S> {
    pending: VecDeque<Change<S>>,
    draining: bool,
}

/// Releases the drain slot if a hook or subscriber panics mid-delivery
///
/// Changes queued behind the panicking delivery are dropped rather than left
/// for an unrelated later emit to deliver out of date.
struct DrainGuard<'a, S> {
    name: &'a str,
    outbox: &'a Mutex<Outbox<S>>,
}

impl<S> Drop for DrainGuard<'_, S> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut outbox = lock(self.outbox);
        outbox.draining = false;
        let dropped = outbox.pending.len();
        outbox.pending.clear();
        if dropped > 0 {
            tracing::warn!(name = %self.name, dropped, "delivery panicked, discarding queued changes");
        }
    }
}

pub(crate) struct CubitCore<S: State> {
    name: Cow<'static, str>,
    state: RwLock<S>,
    closed: AtomicBool,
    outbox: Mutex<Outbox<S>>,
    stream: Broadcast<S>,
    hooks: Arc<dyn StateHooks<S>>,
}

impl<S: State> CubitCore<S> {
    fn emit(&self, next: S) {
        let mut outbox = lock(&self.outbox);
        if self.closed.load(Ordering::Acquire) {
            drop(outbox);
            self.report(BlocError::Closed {
                name: self.name.clone(),
                operation: Operation::Emit,
            });
            return;
        }

        {
            let mut state = write(&self.state);
            if *state == next {
                tracing::trace!(name = %self.name, "emit skipped, state unchanged");
                return;
            }
            let previous = std::mem::replace(&mut *state, next.clone());
            outbox.pending.push_back(Change::new(previous, next));
        }

        if outbox.draining {
            return;
        }
        outbox.draining = true;
        drop(outbox);
        self.drain();
    }

    fn drain(&self) {
        let _guard = DrainGuard {
            name: &self.name,
            outbox: &self.outbox,
        };
        loop {
            let change = {
                let mut outbox = lock(&self.outbox);
                match outbox.pending.pop_front() {
                    Some(change) => change,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.hooks.on_change(&change);
            let delivered = self.stream.publish(change.next());
            tracing::trace!(name = %self.name, delivered, "change delivered");
        }
    }

    fn state(&self) -> S {
        read(&self.state).clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) -> bool {
        {
            let mut outbox = lock(&self.outbox);
            if self.closed.swap(true, Ordering::AcqRel) {
                return false;
            }
            let dropped = outbox.pending.len();
            outbox.pending.clear();
            if dropped > 0 {
                tracing::debug!(name = %self.name, dropped, "discarding undelivered changes");
            }
        }
        let cancelled = self.stream.close();
        tracing::debug!(name = %self.name, cancelled, "cubit closed");
        true
    }

    fn report(&self, error: BlocError) {
        self.hooks.on_error(&error);
    }

    fn add_error(&self, source: BoxError) {
        self.report(BlocError::Reported {
            name: self.name.clone(),
            source,
        });
    }
}

impl<S: State> Drop for CubitCore<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// A change-gated state holder
///
/// `Cubit` is a cheap handle: clones share the same state and subscribers.
/// Dropping the last handle closes the container.
pub struct Cubit<S: State> {
    core: Arc<CubitCore<S>>,
}

impl<S: State> Clone for Cubit<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S: State> Cubit<S> {
    /// Create an open cubit holding `initial`
    pub fn new(initial: S) -> Self {
        Self::builder(initial).build()
    }

    pub fn builder(initial: S) -> CubitBuilder<S> {
        CubitBuilder::new(initial)
    }

    pub(crate) fn from_parts(
        initial: S,
        name: Cow<'static, str>,
        hooks: Arc<dyn StateHooks<S>>,
    ) -> Self {
        Self {
            core: Arc::new(CubitCore {
                name,
                state: RwLock::new(initial),
                closed: AtomicBool::new(false),
                outbox: Mutex::new(Outbox {
                    pending: VecDeque::new(),
                    draining: false,
                }),
                stream: Broadcast::new(),
                hooks,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// The latest committed state
    pub fn state(&self) -> S {
        self.core.state()
    }

    /// Broadcast of accepted states, from the point of subscription onward
    pub fn stream(&self) -> Broadcast<S> {
        self.core.stream.clone()
    }

    /// Shorthand for `stream().listen(callback)`
    pub fn listen<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        self.core.stream.listen(callback)
    }

    /// Replace the state with `next` and notify subscribers, unless `next`
    /// equals the current state or the cubit is closed
    pub fn emit(&self, next: S) {
        self.core.emit(next);
    }

    /// A non-owning handle that can emit into this cubit
    pub fn emitter(&self) -> Emitter<S> {
        Emitter {
            core: Arc::downgrade(&self.core),
        }
    }

    /// Report an application error to the `on_error` hook
    pub fn add_error(&self, error: impl Into<BoxError>) {
        self.core.add_error(error.into());
    }

    pub(crate) fn report(&self, error: BlocError) {
        self.core.report(error);
    }

    /// Close the cubit. Later emits are ignored and every subscription is
    /// cancelled. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.core.close()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl<S: State + fmt::Debug> fmt::Debug for Cubit<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cubit")
            .field("name", &self.core.name)
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for [`Cubit`]
pub struct CubitBuilder<S: State> {
    initial: S,
    name: Cow<'static, str>,
    hooks: Arc<dyn StateHooks<S>>,
}

impl<S: State> CubitBuilder<S> {
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            name: Cow::Borrowed("cubit"),
            hooks: Arc::new(NoHooks),
        }
    }

    /// Name used in log fields and error values
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn hooks<H: StateHooks<S>>(mut self, hooks: H) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn build(self) -> Cubit<S> {
        Cubit::from_parts(self.initial, self.name, self.hooks)
    }
}

/// Emits into a cubit without keeping it alive
///
/// Handlers receive an `Emitter`; cloning it lets asynchronous work emit
/// after the handler returned. Such emits produce a [`Change`] but never a
/// [`Transition`](crate::Transition).
pub struct Emitter<S: State> {
    core: Weak<CubitCore<S>>,
}

impl<S: State> Clone for Emitter<S> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
        }
    }
}

impl<S: State> Emitter<S> {
    pub fn emit(&self, next: S) {
        match self.core.upgrade() {
            Some(core) => core.emit(next),
            None => tracing::warn!("emit after container was dropped, ignoring"),
        }
    }

    /// Current state, or `None` once the container was dropped
    pub fn state(&self) -> Option<S> {
        self.core.upgrade().map(|core| core.state())
    }

    pub fn is_closed(&self) -> bool {
        self.core.upgrade().map_or(true, |core| core.is_closed())
    }

    pub fn add_error(&self, error: impl Into<BoxError>) {
        let error: BoxError = error.into();
        match self.core.upgrade() {
            Some(core) => core.add_error(error),
            None => tracing::warn!(%error, "error reported after container was dropped"),
        }
    }
}
