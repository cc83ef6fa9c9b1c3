//! RELIC Core - Identity, Records, and Migrations
//!
//! Pure data types shared by every other crate: object identity, the
//! persisted record envelope, the [`Storable`] contract that binds a Rust
//! type to a named model, the schema migration chain, and the error
//! taxonomy. No storage or caching logic lives here.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub mod error;
pub mod migration;

pub use error::{CacheError, MigrationError, RelicError, RelicResult, StorageError};
pub use migration::{MigrationChain, MigrationStep};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Object identifier, derived from an object by its model's id function.
///
/// Ids are plain strings so that any caller-chosen identity scheme works:
/// usernames, composite keys, stringified integers.
pub type ObjectId = String;

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Compute the backend key for an object of a named model.
///
/// Backends that share one physical store between models (e.g. one LMDB
/// environment) rely on this prefix scheme for isolation, so the format is
/// part of the persisted layout: `"{model}-{id}"`.
pub fn storage_key(model: &str, id: &str) -> String {
    format!("{model}-{id}")
}

// ============================================================================
// STORED RECORD ENVELOPE
// ============================================================================

/// The persisted form of an object: its raw JSON value plus the schema
/// version it was written at.
///
/// Backends store this envelope and run it through the model's
/// [`MigrationChain`] before handing values to anyone else, so readers only
/// ever see current-schema objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Schema version the value was written at.
    pub schema_version: u32,
    /// The object as written, untouched by later migrations.
    pub value: serde_json::Value,
}

impl StoredRecord {
    /// Envelope a value at the given schema version.
    pub fn new(schema_version: u32, value: serde_json::Value) -> Self {
        Self {
            schema_version,
            value,
        }
    }

    /// Envelope a serializable object at the given schema version.
    pub fn from_object<T: Serialize>(
        schema_version: u32,
        object: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            schema_version,
            value: serde_json::to_value(object)?,
        })
    }
}

// ============================================================================
// STORABLE CONTRACT
// ============================================================================

/// Contract binding a Rust type to a named storage model.
///
/// `model_name()` must return the same value for all instances; it namespaces
/// backend keys and cache names. `object_id()` must be stable for the
/// lifetime of the object: it is the identity under which the object is
/// cached, subscribed to, and deleted.
pub trait Storable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Unique name of the model this type belongs to.
    fn model_name() -> &'static str;

    /// Extract the unique id of this object.
    fn object_id(&self) -> ObjectId;
}
