//! Bloc Core Runtime
//!
//! This crate provides change-gated state containers that broadcast their
//! state to subscribers:
//!
//! - **Cubit**: holds one state value; `emit` replaces it and notifies
//!   subscribers unless the new value equals the current one
//! - **Bloc**: a cubit driven by events, dispatched FIFO on a dedicated
//!   thread to the handler registered for each event kind, reporting the
//!   net effect of every handled event as a transition
//! - **Broadcast**: synchronous, ordered multi-subscriber delivery with
//!   cancellable subscriptions
//!
//! # Example
//!
//! ```rust
//! use bloc_core::Cubit;
//! use std::sync::{Arc, Mutex};
//!
//! let cubit = Cubit::new(0);
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let seen_clone = seen.clone();
//! let _sub = cubit.listen(move |value| seen_clone.lock().unwrap().push(*value));
//!
//! cubit.emit(1);
//! cubit.emit(1); // equal to the current state, ignored
//! cubit.emit(2);
//!
//! assert_eq!(cubit.state(), 2);
//! assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
//! ```

pub mod bloc;
pub mod broadcast;
pub mod change;
pub mod cubit;
pub mod error;
pub mod event;
pub mod hooks;
mod sync;

pub use bloc::{Bloc, BlocBuilder};
pub use broadcast::{Broadcast, Subscription, SubscriptionId};
pub use change::{Change, Transition};
pub use cubit::{Cubit, CubitBuilder, Emitter, State};
pub use error::{BlocError, BoxError, Operation, Result};
pub use event::{Event, Handler, HandlerTable};
pub use hooks::{EventHooks, NoHooks, StateHooks};
