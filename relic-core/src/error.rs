//! Error types for relic operations

use crate::ObjectId;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Object not found: {model} with id \"{id}\"")]
    NotFound { model: String, id: ObjectId },

    #[error("Object already exists: {model} with id \"{id}\"")]
    AlreadyExists { model: String, id: ObjectId },

    #[error("Backend fetch failed for {model}: {reason}")]
    FetchFailed { model: String, reason: String },

    #[error("Backend write failed for {model}: {reason}")]
    WriteFailed { model: String, reason: String },

    #[error("Serialization failed for {model}: {reason}")]
    Serialization { model: String, reason: String },
}

/// Schema migration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("No migration from version {from} to version {to} of model {model} found")]
    MissingStep { model: String, from: u32, to: u32 },

    #[error("Failed to migrate object from version {from} to version {to} of model {model}: {reason}")]
    StepFailed {
        model: String,
        from: u32,
        to: u32,
        reason: String,
    },

    #[error("Migrated value of model {model} does not match the current schema: {reason}")]
    Decode { model: String, reason: String },

    #[error("Stored version {stored} of model {model} is newer than current version {current}")]
    VersionAhead {
        model: String,
        stored: u32,
        current: u32,
    },
}

/// Cache registration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error(
        "A cached store with name \"{name}\" already exists. This likely means there is some error in the code."
    )]
    DuplicateStore { name: String },
}

/// Master error type for all relic errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelicError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Result type alias for relic operations.
pub type RelicResult<T> = Result<T, RelicError>;
