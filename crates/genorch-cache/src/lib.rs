//! Artifact cache for the generation orchestrator
//!
//! This crate provides the storage half of genorch: configuration
//! fingerprints, the TTL-bounded [`CacheStore`] and the persistence
//! adapters that let cached artifacts survive restarts.

pub mod clock;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod persistence;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheEntry, EntryMetadata, CACHE_FORMAT_VERSION};
pub use error::{FingerprintError, StorageError};
pub use fingerprint::{ConfigFingerprint, Fingerprinter, RollingHashFingerprint, Sha256Fingerprint};
pub use persistence::{FilePersistence, MemoryPersistence, PersistenceAdapter};
pub use store::{CacheSettings, CacheStore, CacheStoreStats};
