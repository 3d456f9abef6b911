//! Lifecycle hooks
//!
//! Hooks are the extension points of a container. Every method has a default,
//! so implementors override only what they observe.
//!
//! ```
//! use bloc_core::{Change, Cubit, StateHooks};
//!
//! struct LogChanges;
//!
//! impl StateHooks<u32> for LogChanges {
//!     fn on_change(&self, change: &Change<u32>) {
//!         println!("{} -> {}", change.previous(), change.next());
//!     }
//! }
//!
//! let cubit = Cubit::builder(0u32).hooks(LogChanges).build();
//! cubit.emit(1);
//! ```

use std::sync::Arc;

use crate::change::{Change, Transition};
use crate::error::BlocError;

/// Hooks invoked by a [`Cubit`](crate::Cubit)
pub trait StateHooks<S>: Send + Sync + 'static {
    /// Called once per accepted emission, after the state is committed and
    /// before subscribers are notified
    fn on_change(&self, _change: &Change<S>) {}

    /// Called for every reported error. Never alters state.
    fn on_error(&self, error: &BlocError) {
        log_error(error);
    }
}

/// Hooks invoked by a [`Bloc`](crate::Bloc), in addition to [`StateHooks`]
pub trait EventHooks<S, E>: StateHooks<S> {
    /// Called for every event accepted by `add`, handled or not. Never
    /// called for an event rejected because the bloc is closed.
    fn on_event(&self, _event: &E) {}

    /// Called once per handled event that changed the state
    fn on_transition(&self, _transition: &Transition<S, E>) {}
}

/// Default error logging: expected conditions at warn, failures at error
pub fn log_error(error: &BlocError) {
    if error.is_recoverable() {
        tracing::warn!(%error, "ignored operation");
    } else {
        tracing::error!(%error, "container error");
    }
}

/// Hooks that only log errors
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl<S> StateHooks<S> for NoHooks {}

impl<S, E> EventHooks<S, E> for NoHooks {}

impl<S, H> StateHooks<S> for Arc<H>
where
    H: StateHooks<S> + ?Sized,
{
    fn on_change(&self, change: &Change<S>) {
        (**self).on_change(change)
    }

    fn on_error(&self, error: &BlocError) {
        (**self).on_error(error)
    }
}

impl<S, E, H> EventHooks<S, E> for Arc<H>
where
    H: EventHooks<S, E> + ?Sized,
{
    fn on_event(&self, event: &E) {
        (**self).on_event(event)
    }

    fn on_transition(&self, transition: &Transition<S, E>) {
        (**self).on_transition(transition)
    }
}
