//! In-process storage engine.
//!
//! Stores record envelopes in an ordered map behind an `RwLock`. Reads
//! migrate on the way out, the same as the persistent engine, so schema
//! migrations are exercised even in tests and in-process deployments.

use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;
use relic_core::{
    MigrationChain, ObjectId, RelicResult, Storable, StorageError, StoredRecord,
};

use crate::StorageBackend;

/// In-memory storage backend for one model.
#[derive(Debug)]
pub struct InMemoryBackend<T: Storable> {
    records: RwLock<IndexMap<ObjectId, StoredRecord>>,
    migrations: Arc<MigrationChain>,
    _model: PhantomData<fn() -> T>,
}

impl<T: Storable> InMemoryBackend<T> {
    /// Create a backend with no migrations (schema version 1).
    pub fn new() -> Self {
        Self::with_migrations(Arc::new(MigrationChain::new(T::model_name())))
    }

    /// Create a backend with the given migration chain.
    pub fn with_migrations(migrations: Arc<MigrationChain>) -> Self {
        Self {
            records: RwLock::new(IndexMap::new()),
            migrations,
            _model: PhantomData,
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Whether the backend holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    /// Remove every stored record.
    pub fn clear(&self) {
        self.records.write().unwrap().clear();
    }

    /// Insert a raw record envelope directly, bypassing the schema version
    /// stamp. Lets tests and importers seed old-version records.
    pub fn insert_record(&self, id: ObjectId, record: StoredRecord) {
        self.records.write().unwrap().insert(id, record);
    }

    fn encode(&self, value: &T) -> RelicResult<StoredRecord> {
        StoredRecord::from_object(self.migrations.current_version(), value).map_err(|e| {
            StorageError::Serialization {
                model: T::model_name().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn decode(&self, record: &StoredRecord) -> RelicResult<T> {
        self.migrations
            .migrate_into(record.value.clone(), record.schema_version)
    }
}

impl<T: Storable> Default for InMemoryBackend<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Storable> StorageBackend<T> for InMemoryBackend<T> {
    async fn fetch_by_ids(&self, ids: &[ObjectId]) -> RelicResult<IndexMap<ObjectId, T>> {
        let records = self.records.read().unwrap();
        let mut out = IndexMap::new();
        for id in ids {
            if let Some(record) = records.get(id) {
                out.insert(id.clone(), self.decode(record)?);
            }
        }
        Ok(out)
    }

    async fn fetch_all(&self) -> RelicResult<IndexMap<ObjectId, T>> {
        let records = self.records.read().unwrap();
        let mut out = IndexMap::with_capacity(records.len());
        for (id, record) in records.iter() {
            out.insert(id.clone(), self.decode(record)?);
        }
        Ok(out)
    }

    async fn create(&self, value: T) -> RelicResult<T> {
        let id = value.object_id();
        let record = self.encode(&value)?;

        let mut records = self.records.write().unwrap();
        if records.contains_key(&id) {
            return Err(StorageError::AlreadyExists {
                model: T::model_name().to_string(),
                id,
            }
            .into());
        }
        records.insert(id, record);
        Ok(value)
    }

    async fn update(&self, value: T) -> RelicResult<T> {
        let id = value.object_id();
        let record = self.encode(&value)?;

        let mut records = self.records.write().unwrap();
        if !records.contains_key(&id) {
            return Err(StorageError::NotFound {
                model: T::model_name().to_string(),
                id,
            }
            .into());
        }
        records.insert(id, record);
        Ok(value)
    }

    async fn delete(&self, ids: &[ObjectId]) -> RelicResult<()> {
        let mut records = self.records.write().unwrap();
        for id in ids {
            records.shift_remove(id);
        }
        Ok(())
    }
}
