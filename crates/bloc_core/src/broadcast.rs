//! Synchronous multi-subscriber broadcast
//!
//! A [`Broadcast`] holds an ordered list of sinks. Publishing hands the value
//! to every active sink, in subscription order, on the publishing thread.
//! There is no buffering: a slow sink delays the publisher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;

use crate::sync::lock;

new_key_type! {
    /// Identifier for a subscription within one broadcast
    pub struct SubscriptionId;
}

struct Sink<T> {
    active: AtomicBool,
    callback: Box<dyn Fn(&T) + Send + Sync>,
}

struct Registry<T> {
    sinks: SlotMap<SubscriptionId, Arc<Sink<T>>>,
    order: Vec<SubscriptionId>,
    closed: bool,
}

struct BroadcastInner<T> {
    registry: Mutex<Registry<T>>,
}

/// Type-erased removal, so [`Subscription`] does not carry the value type
trait Detach: Send + Sync {
    fn detach(&self, id: SubscriptionId);
    fn contains(&self, id: SubscriptionId) -> bool;
}

impl<T> Detach for BroadcastInner<T> {
    fn detach(&self, id: SubscriptionId) {
        let mut registry = lock(&self.registry);
        if let Some(sink) = registry.sinks.remove(id) {
            sink.active.store(false, Ordering::Release);
            registry.order.retain(|other| *other != id);
        }
    }

    fn contains(&self, id: SubscriptionId) -> bool {
        lock(&self.registry).sinks.contains_key(id)
    }
}

/// A cloneable handle to a broadcast channel of `T` values
pub struct Broadcast<T> {
    inner: Arc<BroadcastInner<T>>,
}

impl<T> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Broadcast<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BroadcastInner {
                registry: Mutex::new(Registry {
                    sinks: SlotMap::with_key(),
                    order: Vec::new(),
                    closed: false,
                }),
            }),
        }
    }

    /// Register a subscriber for values published from now on
    ///
    /// Listening on a closed broadcast returns an inactive subscription.
    pub fn listen<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner.registry);
        if registry.closed {
            tracing::debug!("listen on closed broadcast, subscription is inactive");
            return Subscription::inactive();
        }

        let id = registry.sinks.insert(Arc::new(Sink {
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        }));
        registry.order.push(id);

        let weak: Weak<BroadcastInner<T>> = Arc::downgrade(&self.inner);
        let source: Weak<dyn Detach> = weak;
        Subscription {
            id,
            source: Some(source),
        }
    }

    /// Deliver `value` to every active subscriber, returning how many were
    /// called
    pub fn publish(&self, value: &T) -> usize {
        let sinks: SmallVec<[Arc<Sink<T>>; 4]> = {
            let registry = lock(&self.inner.registry);
            if registry.closed {
                return 0;
            }
            registry
                .order
                .iter()
                .filter_map(|id| registry.sinks.get(*id).cloned())
                .collect()
        };

        let mut delivered = 0;
        for sink in sinks {
            // Cancelled while an earlier sink was running
            if !sink.active.load(Ordering::Acquire) {
                continue;
            }
            (sink.callback)(value);
            delivered += 1;
        }
        delivered
    }

    /// Close the broadcast and drop every subscriber. Idempotent.
    ///
    /// Returns the number of subscriptions that were cancelled.
    pub fn close(&self) -> usize {
        let mut registry = lock(&self.inner.registry);
        registry.closed = true;
        registry.order.clear();
        let cancelled = registry.sinks.len();
        for (_, sink) in registry.sinks.drain() {
            sink.active.store(false, Ordering::Release);
        }
        cancelled
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.registry).closed
    }
}

impl<T: 'static> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation handle returned by [`Broadcast::listen`]
///
/// Dropping the handle cancels the subscription. Use [`Subscription::detach`]
/// to keep receiving values for the lifetime of the broadcast.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    id: SubscriptionId,
    source: Option<Weak<dyn Detach>>,
}

impl Subscription {
    fn inactive() -> Self {
        Self {
            id: SubscriptionId::default(),
            source: None,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether values are still delivered to this subscriber
    pub fn is_active(&self) -> bool {
        self.source
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|source| source.contains(self.id))
    }

    /// Stop delivery to this subscriber. Other subscribers are unaffected.
    pub fn cancel(mut self) {
        self.release();
    }

    /// Keep the subscriber registered without holding the handle
    pub fn detach(mut self) {
        self.source = None;
    }

    fn release(&mut self) {
        if let Some(source) = self.source.take().and_then(|weak| weak.upgrade()) {
            source.detach(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
