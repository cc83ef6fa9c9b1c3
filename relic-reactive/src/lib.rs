//! RELIC Reactive - Cache, Subscriptions, and the Store Coordinator
//!
//! The coordination layer that lets many independent consumers observe a
//! shared pool of identified objects with minimal redundant fetching:
//!
//! - [`ObjectCache`] serves reads from a time-bounded cache and coalesces
//!   concurrent overlapping fetches into a single outstanding backend call.
//! - [`SubscriberRegistry`] tracks which observers want which objects and
//!   routes create/update/delete notifications to exactly the observers
//!   that care, evicting entries nobody watches anymore.
//! - [`ObjectStore`] glues a [`relic_storage::StorageBackend`] to the
//!   registry: writes go backend-first, then write-through into the cache,
//!   then out to affected observers.
//!
//! Designed for a single process: no cross-process synchronization, no
//! durability beyond what the backend offers.

pub mod cache;
pub mod observer;
pub mod registry;
pub mod store;

pub use cache::{
    CacheFetcher, ObjectCache, StoreConfig, StoreDirectory, DEFAULT_MAX_AGE_SECONDS, NEVER_EXPIRE,
};
pub use observer::{predicate, Callback, Observer, ObserverId, ObserverView, Predicate};
pub use registry::SubscriberRegistry;
pub use store::ObjectStore;
