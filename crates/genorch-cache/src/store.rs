//! Bounded, TTL-based artifact store with snapshot persistence

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::clock::Clock;
use crate::entry::{CacheEntry, EntryMetadata, CACHE_FORMAT_VERSION};
use crate::persistence::PersistenceAdapter;

/// Size and lifetime limits for a [`CacheStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// How long an entry stays live after creation
    pub ttl: Duration,

    /// Maximum number of entries; 0 disables caching
    pub max_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            max_size: 50,
        }
    }
}

/// Point-in-time statistics of a [`CacheStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStoreStats {
    pub count: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Sum of the serialized JSON size of every entry
    pub total_size_bytes: u64,
}

type EntryKey = (String, String);

/// Key → artifact store keyed by `(subject_id, fingerprint)`
///
/// Expiry is lazy: a stale entry is dropped when it is read. When the
/// store is full the entry with the oldest `created_at` is evicted. Every
/// mutation writes the full snapshot through the [`PersistenceAdapter`];
/// storage failures are logged and the store carries on in memory.
pub struct CacheStore<A> {
    entries: HashMap<EntryKey, CacheEntry<A>>,
    settings: CacheSettings,
    persistence: Box<dyn PersistenceAdapter>,
    clock: Arc<dyn Clock>,
}

impl<A> CacheStore<A>
where
    A: Serialize + DeserializeOwned + Clone,
{
    /// Build a store from whatever the adapter has persisted
    ///
    /// Records with an unknown version or shape and records that already
    /// expired are dropped. A failing adapter yields an empty store.
    pub fn load(
        persistence: Box<dyn PersistenceAdapter>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let records = match persistence.load() {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Failed to load cache snapshot, starting empty: {}", e);
                Vec::new()
            }
        };

        let mut store = Self {
            entries: HashMap::new(),
            settings,
            persistence,
            clock,
        };

        let now = store.clock.now();
        let total = records.len();
        let mut dropped = 0usize;

        for record in records {
            match decode_record::<A>(record) {
                Some(entry) if entry.is_live(now) => {
                    let key = (entry.subject_id.clone(), entry.fingerprint.clone());
                    let newer = store
                        .entries
                        .get(&key)
                        .map_or(true, |existing| existing.created_at <= entry.created_at);
                    if newer {
                        store.entries.insert(key, entry);
                    } else {
                        dropped += 1;
                    }
                }
                _ => dropped += 1,
            }
        }

        while store.entries.len() > store.settings.max_size {
            if !store.evict_oldest() {
                break;
            }
            dropped += 1;
        }

        log::info!(
            "Cache loaded: {} entries ({} of {} persisted records dropped)",
            store.entries.len(),
            dropped,
            total
        );

        if dropped > 0 {
            store.persist();
        }

        store
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live artifact for the key; a stale entry is removed as a side effect
    pub fn get(&mut self, subject_id: &str, fingerprint: &str) -> Option<A> {
        self.get_entry(subject_id, fingerprint)
            .map(|entry| entry.artifact)
    }

    /// Live entry for the key; a stale entry is removed as a side effect
    pub fn get_entry(&mut self, subject_id: &str, fingerprint: &str) -> Option<CacheEntry<A>> {
        let key = (subject_id.to_string(), fingerprint.to_string());
        let now = self.clock.now();

        match self.entries.get(&key) {
            Some(entry) if entry.is_live(now) => Some(entry.clone()),
            Some(_) => {
                self.entries.remove(&key);
                log::debug!("Cache entry expired: {}:{}", subject_id, fingerprint);
                self.persist();
                None
            }
            None => None,
        }
    }

    /// Newest live entry of a subject under any fingerprint
    pub fn latest(&mut self, subject_id: &str) -> Option<CacheEntry<A>> {
        let now = self.clock.now();
        let stale: Vec<EntryKey> = self
            .entries
            .iter()
            .filter(|((subject, _), entry)| subject == subject_id && entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        if !stale.is_empty() {
            for key in &stale {
                self.entries.remove(key);
            }
            log::debug!("Cache entries expired for {}: {}", subject_id, stale.len());
            self.persist();
        }

        self.entries
            .values()
            .filter(|entry| entry.subject_id == subject_id)
            .max_by_key(|entry| entry.created_at)
            .cloned()
    }

    /// Store an artifact, evicting the oldest entry first when full
    pub fn put(
        &mut self,
        subject_id: &str,
        fingerprint: &str,
        artifact: A,
        metadata: EntryMetadata,
    ) {
        if self.settings.max_size == 0 {
            log::debug!("Cache disabled (max_size = 0), not storing {}:{}", subject_id, fingerprint);
            return;
        }

        let key = (subject_id.to_string(), fingerprint.to_string());
        if !self.entries.contains_key(&key) && self.entries.len() >= self.settings.max_size {
            self.evict_oldest();
        }

        let entry = CacheEntry::new(
            subject_id.to_string(),
            fingerprint.to_string(),
            artifact,
            self.clock.now(),
            self.settings.ttl,
            metadata,
        );
        self.entries.insert(key, entry);
        log::debug!("Cache stored: {}:{}", subject_id, fingerprint);

        self.persist();
    }

    /// Remove one entry, or every entry of the subject when `fingerprint` is `None`
    pub fn remove(&mut self, subject_id: &str, fingerprint: Option<&str>) -> usize {
        let before = self.entries.len();

        match fingerprint {
            Some(fp) => {
                self.entries
                    .remove(&(subject_id.to_string(), fp.to_string()));
            }
            None => self.entries.retain(|(subject, _), _| subject != subject_id),
        }

        let removed = before - self.entries.len();
        if removed > 0 {
            log::debug!("Cache entries removed for {}: {}", subject_id, removed);
            self.persist();
        }
        removed
    }

    /// Remove every entry
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.persist();
        removed
    }

    /// Eagerly drop every expired entry
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));

        let removed = before - self.entries.len();
        if removed > 0 {
            log::debug!("Purged {} expired cache entries", removed);
            self.persist();
        }
        removed
    }

    pub fn stats(&self) -> CacheStoreStats {
        let total_size_bytes = self
            .entries
            .values()
            .map(|entry| serde_json::to_vec(entry).map_or(0, |bytes| bytes.len() as u64))
            .sum();

        CacheStoreStats {
            count: self.entries.len(),
            oldest: self.entries.values().map(|e| e.created_at).min(),
            newest: self.entries.values().map(|e| e.created_at).max(),
            total_size_bytes,
        }
    }

    /// `(subject_id, fingerprint)` of every entry, live or not
    pub fn keys(&self) -> Vec<(String, String)> {
        let mut keys: Vec<(String, String)> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of all entries, oldest first
    pub fn entries(&self) -> Vec<CacheEntry<A>> {
        let mut entries: Vec<CacheEntry<A>> = self.entries.values().cloned().collect();
        entries.sort_by_key(|entry| entry.created_at);
        entries
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(key, _)| key.clone());

        match oldest {
            Some(key) => {
                log::debug!("Evicting oldest cache entry: {}:{}", key.0, key.1);
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    fn persist(&self) {
        let mut records: Vec<Value> = Vec::with_capacity(self.entries.len());
        for entry in self.entries() {
            match serde_json::to_value(&entry) {
                Ok(value) => records.push(value),
                Err(e) => log::warn!("Skipping unserializable cache entry {}: {}", entry.key(), e),
            }
        }

        if let Err(e) = self.persistence.save(&records) {
            log::warn!("Failed to persist cache snapshot, continuing in memory: {}", e);
        }
    }
}

impl<A> fmt::Debug for CacheStore<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("settings", &self.settings)
            .finish()
    }
}

fn decode_record<A: DeserializeOwned>(record: Value) -> Option<CacheEntry<A>> {
    let version = record.get("version").and_then(Value::as_u64);
    if version != Some(u64::from(CACHE_FORMAT_VERSION)) {
        log::debug!("Dropping cache record with unsupported version {:?}", version);
        return None;
    }

    match serde_json::from_value(record) {
        Ok(entry) => Some(entry),
        Err(e) => {
            log::debug!("Dropping malformed cache record: {}", e);
            None
        }
    }
}
