//! Observer identity and delivery callbacks.
//!
//! Callbacks are not comparable, so every observer carries a monotonic id
//! assigned at construction; the id is what the registry keys on, and it is
//! what makes "the same observer" well-defined across subscribe, publish,
//! and unsubscribe calls.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use relic_core::ObjectId;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// The payload handed to an observer on every publish: `None` is the
/// loading marker sent before data is resolved, `Some` the resolved view.
pub type ObserverView<T> = Option<IndexMap<ObjectId, T>>;

/// Delivery callback invoked by the registry.
pub type Callback<T> = Arc<dyn Fn(ObserverView<T>) + Send + Sync>;

/// Value predicate used by all-scoped subscriptions to narrow their view.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Wrap a closure as a [`Predicate`].
pub fn predicate<T, F>(filter: F) -> Predicate<T>
where
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    Arc::new(filter)
}

/// An observer: a delivery callback plus its stable identity.
///
/// Cloning shares both, so a clone refers to the same registration.
pub struct Observer<T> {
    id: ObserverId,
    deliver: Callback<T>,
}

impl<T> Observer<T> {
    /// Create an observer from a delivery callback.
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(ObserverView<T>) + Send + Sync + 'static,
    {
        Self {
            id: ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed)),
            deliver: Arc::new(deliver),
        }
    }

    /// This observer's identity.
    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub(crate) fn callback(&self) -> Callback<T> {
        Arc::clone(&self.deliver)
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            deliver: Arc::clone(&self.deliver),
        }
    }
}

impl<T> std::fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer").field("id", &self.id).finish()
    }
}
