//! RELIC Storage - Backend Contract and Engines
//!
//! Defines the persistence abstraction consumed by the reactive layer and
//! two engines implementing it: an in-process table and an LMDB-backed
//! persistent store. Every value a backend returns has already been run
//! through the model's migration chain, so callers only ever see
//! current-schema objects.

use async_trait::async_trait;
use indexmap::IndexMap;
use relic_core::{ObjectId, RelicResult, Storable};

pub mod in_memory;
pub mod lmdb;

pub use in_memory::InMemoryBackend;
pub use lmdb::{LmdbBackend, LmdbBackendError};

/// Persistence contract for one model.
///
/// Backends own the stored-record envelope and the migration chain; the
/// caching layer above treats them as the single source of truth. Reads for
/// missing ids are not errors; the id is simply absent from the result map.
#[async_trait]
pub trait StorageBackend<T: Storable>: Send + Sync {
    /// Fetch the requested objects. Missing ids are simply absent.
    async fn fetch_by_ids(&self, ids: &[ObjectId]) -> RelicResult<IndexMap<ObjectId, T>>;

    /// Fetch every stored object of this model.
    async fn fetch_all(&self) -> RelicResult<IndexMap<ObjectId, T>>;

    /// Persist a new object. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, value: T) -> RelicResult<T>;

    /// Replace an existing object. Fails with `NotFound` if the id is absent.
    async fn update(&self, value: T) -> RelicResult<T>;

    /// Remove the given objects. Deleting an absent id is a no-op.
    async fn delete(&self, ids: &[ObjectId]) -> RelicResult<()>;
}
