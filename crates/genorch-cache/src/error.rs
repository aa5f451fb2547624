//! Error types for the cache crate

use thiserror::Error;

/// Failure inside a [`PersistenceAdapter`](crate::PersistenceAdapter)
///
/// These never escape [`CacheStore`](crate::CacheStore); the store logs them
/// and keeps working in memory.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Persisted snapshot is not a JSON array")]
    NotAnArray,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// A configuration that cannot be fingerprinted
#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("Config is not representable as JSON: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unknown fingerprint algorithm '{0}' (valid: rolling, sha256)")]
    UnknownAlgorithm(String),
}
