//! LMDB-backed storage engine.
//!
//! Uses the heed crate (Rust bindings for LMDB) as the persistent analog of
//! a browser's local storage: one memory-mapped environment holding record
//! envelopes as JSON bytes, keyed by `"{model}-{id}"`. The key prefix keeps
//! models sharing an environment isolated from each other.
//!
//! Records are migrated on read and are not rewritten in place; a stored
//! value keeps its original schema version until the object itself is
//! written again.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use indexmap::IndexMap;
use relic_core::{
    storage_key, MigrationChain, ObjectId, RelicError, RelicResult, Storable, StorageError,
    StoredRecord,
};

use crate::StorageBackend;

/// Error type for opening the LMDB environment.
#[derive(Debug, thiserror::Error)]
pub enum LmdbBackendError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// LMDB-backed storage for one model.
///
/// # Example
///
/// ```ignore
/// let users = LmdbBackend::<User>::open("/var/lib/app/store", 100, migrations)?;
/// let tasks = LmdbBackend::<Task>::with_env(users.env().clone(), task_migrations)?;
/// ```
pub struct LmdbBackend<T: Storable> {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Str, Bytes>,
    migrations: Arc<MigrationChain>,
    _model: PhantomData<fn() -> T>,
}

impl<T: Storable> LmdbBackend<T> {
    /// Open (creating if needed) an LMDB environment at `path` and bind this
    /// model to it.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    /// * `migrations` - The model's migration chain
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_size_mb: usize,
        migrations: Arc<MigrationChain>,
    ) -> Result<Self, LmdbBackendError> {
        // Ensure directory exists
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbBackendError::EnvOpen(e.to_string()))?;

        Self::with_env(env, migrations)
    }

    /// Bind this model to an already-open environment. Models sharing an
    /// environment stay isolated through their key prefixes.
    pub fn with_env(
        env: Env,
        migrations: Arc<MigrationChain>,
    ) -> Result<Self, LmdbBackendError> {
        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;

        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;

        Ok(Self {
            env,
            db,
            migrations,
            _model: PhantomData,
        })
    }

    /// The underlying environment, for sharing between models.
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Write a raw record envelope directly, bypassing the schema version
    /// stamp. Lets tests and importers seed old-version records.
    pub fn insert_record(&self, id: &str, record: &StoredRecord) -> RelicResult<()> {
        let key = storage_key(T::model_name(), id);
        let bytes = serde_json::to_vec(record).map_err(Self::serialization_err)?;

        let mut wtxn = self.env.write_txn().map_err(Self::write_err)?;
        self.db
            .put(&mut wtxn, &key, &bytes)
            .map_err(Self::write_err)?;
        wtxn.commit().map_err(Self::write_err)?;
        Ok(())
    }

    fn fetch_err(e: impl ToString) -> RelicError {
        StorageError::FetchFailed {
            model: T::model_name().to_string(),
            reason: e.to_string(),
        }
        .into()
    }

    fn write_err(e: impl ToString) -> RelicError {
        StorageError::WriteFailed {
            model: T::model_name().to_string(),
            reason: e.to_string(),
        }
        .into()
    }

    fn serialization_err(e: impl ToString) -> RelicError {
        StorageError::Serialization {
            model: T::model_name().to_string(),
            reason: e.to_string(),
        }
        .into()
    }

    fn encode(&self, value: &T) -> RelicResult<Vec<u8>> {
        let record = StoredRecord::from_object(self.migrations.current_version(), value)
            .map_err(Self::serialization_err)?;
        serde_json::to_vec(&record).map_err(Self::serialization_err)
    }

    fn decode(&self, bytes: &[u8]) -> RelicResult<T> {
        let record: StoredRecord =
            serde_json::from_slice(bytes).map_err(Self::serialization_err)?;
        self.migrations
            .migrate_into(record.value, record.schema_version)
    }
}

#[async_trait]
impl<T: Storable> StorageBackend<T> for LmdbBackend<T> {
    async fn fetch_by_ids(&self, ids: &[ObjectId]) -> RelicResult<IndexMap<ObjectId, T>> {
        let rtxn = self.env.read_txn().map_err(Self::fetch_err)?;

        let mut out = IndexMap::new();
        for id in ids {
            let key = storage_key(T::model_name(), id);
            if let Some(bytes) = self.db.get(&rtxn, &key).map_err(Self::fetch_err)? {
                out.insert(id.clone(), self.decode(bytes)?);
            }
        }
        Ok(out)
    }

    async fn fetch_all(&self) -> RelicResult<IndexMap<ObjectId, T>> {
        let rtxn = self.env.read_txn().map_err(Self::fetch_err)?;
        let prefix = format!("{}-", T::model_name());

        let mut out = IndexMap::new();
        let iter = self.db.iter(&rtxn).map_err(Self::fetch_err)?;
        for result in iter {
            let (key, bytes) = result.map_err(Self::fetch_err)?;
            if let Some(id) = key.strip_prefix(&prefix) {
                out.insert(id.to_string(), self.decode(bytes)?);
            }
        }
        Ok(out)
    }

    async fn create(&self, value: T) -> RelicResult<T> {
        let id = value.object_id();
        let key = storage_key(T::model_name(), &id);
        let bytes = self.encode(&value)?;

        let mut wtxn = self.env.write_txn().map_err(Self::write_err)?;
        if self.db.get(&wtxn, &key).map_err(Self::write_err)?.is_some() {
            return Err(StorageError::AlreadyExists {
                model: T::model_name().to_string(),
                id,
            }
            .into());
        }
        self.db
            .put(&mut wtxn, &key, &bytes)
            .map_err(Self::write_err)?;
        wtxn.commit().map_err(Self::write_err)?;
        Ok(value)
    }

    async fn update(&self, value: T) -> RelicResult<T> {
        let id = value.object_id();
        let key = storage_key(T::model_name(), &id);
        let bytes = self.encode(&value)?;

        let mut wtxn = self.env.write_txn().map_err(Self::write_err)?;
        if self.db.get(&wtxn, &key).map_err(Self::write_err)?.is_none() {
            return Err(StorageError::NotFound {
                model: T::model_name().to_string(),
                id,
            }
            .into());
        }
        self.db
            .put(&mut wtxn, &key, &bytes)
            .map_err(Self::write_err)?;
        wtxn.commit().map_err(Self::write_err)?;
        Ok(value)
    }

    async fn delete(&self, ids: &[ObjectId]) -> RelicResult<()> {
        let mut wtxn = self.env.write_txn().map_err(Self::write_err)?;
        for id in ids {
            let key = storage_key(T::model_name(), id);
            self.db.delete(&mut wtxn, &key).map_err(Self::write_err)?;
        }
        wtxn.commit().map_err(Self::write_err)?;
        Ok(())
    }
}
