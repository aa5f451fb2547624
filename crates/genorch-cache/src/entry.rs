//! Cache entry structure and metadata

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Current persisted entry format - increment when the record shape changes
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Free-form hints stored next to an artifact (size, complexity, ...)
pub type EntryMetadata = BTreeMap<String, Value>;

/// A cached artifact for one (subject, fingerprint) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<A> {
    /// Record format version
    pub version: u32,

    /// Subject the artifact was generated for (goal id, learner id, ...)
    pub subject_id: String,

    /// Fingerprint of the configuration the artifact was generated with
    pub fingerprint: String,

    /// The generated artifact
    pub artifact: A,

    /// When this entry was created
    pub created_at: DateTime<Utc>,

    /// `created_at + ttl`, saturated at the representable range
    pub expires_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: EntryMetadata,
}

impl<A> CacheEntry<A> {
    /// Create a new cache entry expiring `ttl` after `created_at`
    pub fn new(
        subject_id: String,
        fingerprint: String,
        artifact: A,
        created_at: DateTime<Utc>,
        ttl: Duration,
        metadata: EntryMetadata,
    ) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            subject_id,
            fingerprint,
            artifact,
            created_at,
            expires_at: expiry(created_at, ttl),
            metadata,
        }
    }

    /// Live until and including `expires_at`
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_live(now)
    }

    /// Registry-style key: `subject_id:fingerprint`
    pub fn key(&self) -> String {
        format!("{}:{}", self.subject_id, self.fingerprint)
    }
}

fn expiry(created_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    created_at.checked_add_signed(ttl).unwrap_or(if ttl < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}
