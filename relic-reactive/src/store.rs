//! Store coordinator: wires the subscription registry to a backend.
//!
//! Every write goes backend-first, then write-through into the cache, then
//! out to exactly the affected observers. A subscriber is never notified
//! with data older than the write that triggered the notification, and
//! just-written objects are readable without any TTL wait.

use std::sync::Arc;

use indexmap::IndexMap;
use relic_core::{ObjectId, RelicResult, Storable, StorageError};
use relic_storage::StorageBackend;

use crate::cache::{CacheFetcher, ObjectCache, StoreConfig, StoreDirectory};
use crate::observer::{Observer, Predicate};
use crate::registry::SubscriberRegistry;

/// One model's store: backend plus registry (which exclusively owns the
/// cache).
pub struct ObjectStore<T: Storable, B: StorageBackend<T>> {
    backend: Arc<B>,
    registry: Arc<SubscriberRegistry<T>>,
}

impl<T, B> ObjectStore<T, B>
where
    T: Storable,
    B: StorageBackend<T> + 'static,
{
    /// Create a store registered in the process-wide store directory.
    pub fn new(config: StoreConfig, backend: Arc<B>) -> RelicResult<Self> {
        Self::with_directory(StoreDirectory::global(), config, backend)
    }

    /// Create a store registered in the given directory.
    pub fn with_directory(
        directory: &StoreDirectory,
        config: StoreConfig,
        backend: Arc<B>,
    ) -> RelicResult<Self> {
        let fetcher: Arc<dyn CacheFetcher<T>> = Arc::clone(&backend) as _;
        let cache = ObjectCache::with_directory(directory, config, fetcher)?;
        Ok(Self {
            backend,
            registry: Arc::new(SubscriberRegistry::new(cache)),
        })
    }

    /// The registry, for callers that manage publishes directly.
    pub fn registry(&self) -> &Arc<SubscriberRegistry<T>> {
        &self.registry
    }

    // ========================================================================
    // OBSERVER LIFECYCLE
    // ========================================================================

    /// Subscribe an observer to an id set and immediately publish current
    /// data to it alone, so it need not wait for someone else's write.
    pub async fn subscribe(&self, observer: &Observer<T>, ids: &[ObjectId]) -> RelicResult<()> {
        self.registry.subscribe(observer, ids);
        self.registry.publish(&[observer.id()]).await
    }

    /// Subscribe an observer to all objects (optionally filtered) and
    /// immediately publish current data to it alone.
    pub async fn subscribe_all(
        &self,
        observer: &Observer<T>,
        predicate: Option<Predicate<T>>,
    ) -> RelicResult<()> {
        self.registry.subscribe_all(observer, predicate);
        self.registry.publish(&[observer.id()]).await
    }

    /// Unsubscribe an observer, evicting newly orphaned cache entries.
    pub fn unsubscribe(&self, observer: &Observer<T>) {
        self.registry.unsubscribe(observer);
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Read the given ids through the cache. Missing ids are simply absent.
    pub async fn get(&self, ids: &[ObjectId]) -> RelicResult<IndexMap<ObjectId, T>> {
        self.registry.resolve(ids).await
    }

    /// Read the whole object set through the cache.
    pub async fn get_all(&self) -> RelicResult<IndexMap<ObjectId, T>> {
        self.registry.resolve_all().await
    }

    /// Strict single-object read; absence is an error.
    pub async fn get_one(&self, id: &str) -> RelicResult<T> {
        let mut resolved = self.registry.resolve(&[id.to_string()]).await?;
        resolved.shift_remove(id).ok_or_else(|| {
            StorageError::NotFound {
                model: T::model_name().to_string(),
                id: id.to_string(),
            }
            .into()
        })
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Persist a new object, make it immediately visible in the cache, and
    /// notify exactly the observers that care.
    pub async fn create(&self, value: T) -> RelicResult<T> {
        let created = self.backend.create(value).await?;
        self.notify_changed(created.clone()).await?;
        Ok(created)
    }

    /// Persist an update to an existing object, make it immediately visible
    /// in the cache, and notify exactly the observers that care.
    pub async fn update(&self, value: T) -> RelicResult<T> {
        let updated = self.backend.update(value).await?;
        self.notify_changed(updated.clone()).await?;
        Ok(updated)
    }

    /// Delete objects from the backend, drop them from the cache, and
    /// notify the observers that were watching them.
    pub async fn delete(&self, values: &[T]) -> RelicResult<()> {
        let ids: Vec<ObjectId> = values.iter().map(|v| v.object_id()).collect();
        self.backend.delete(&ids).await?;

        self.registry.evict(&ids);
        let pairs: Vec<(ObjectId, T)> = values
            .iter()
            .map(|v| (v.object_id(), v.clone()))
            .collect();
        self.registry.publish_deleted(&pairs).await
    }

    async fn notify_changed(&self, value: T) -> RelicResult<()> {
        let id = value.object_id();
        self.registry
            .apply_write([(id.clone(), value.clone())]);
        self.registry.publish_changed(&[(id, value)]).await
    }
}

impl<T: Storable, B: StorageBackend<T>> std::fmt::Debug for ObjectStore<T, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("registry", &self.registry)
            .finish()
    }
}
