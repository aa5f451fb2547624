//! Configuration fingerprints used as cache and task keys

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::FingerprintError;

/// Hash algorithm applied to the canonical JSON form of a configuration
pub trait ConfigFingerprint: Send + Sync {
    /// Short, stable name of the algorithm
    fn name(&self) -> &'static str;

    /// Hash an already canonicalised configuration string
    fn digest(&self, canonical: &str) -> String;
}

/// 32-bit `h * 31 + unit` rolling hash rendered in base36
///
/// Hashes UTF-16 code units so fingerprints match the ones produced by
/// browser-side clients for the same canonical string.
#[derive(Debug, Default, Clone, Copy)]
pub struct RollingHashFingerprint;

impl ConfigFingerprint for RollingHashFingerprint {
    fn name(&self) -> &'static str {
        "rolling"
    }

    fn digest(&self, canonical: &str) -> String {
        let mut hash: i32 = 0;
        for unit in canonical.encode_utf16() {
            hash = hash.wrapping_mul(31).wrapping_add(unit as i32);
        }
        to_base36(hash.unsigned_abs())
    }
}

/// SHA-256 truncated to 16 hex characters
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Fingerprint;

impl ConfigFingerprint for Sha256Fingerprint {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn digest(&self, canonical: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hex = format!("{:x}", hasher.finalize());
        hex[..16].to_string()
    }
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if n == 0 {
        return "0".to_string();
    }

    let mut buf = Vec::with_capacity(7);
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// Turns configuration values into fingerprints
///
/// The configuration is serialized to JSON, top-level fields listed in
/// `ignored_fields` are stripped, and object keys are sorted recursively
/// before hashing, so field order and instance identity never matter.
pub struct Fingerprinter {
    algorithm: Box<dyn ConfigFingerprint>,
    ignored_fields: BTreeSet<String>,
}

impl Fingerprinter {
    /// Rolling hash with no ignored fields
    pub fn new() -> Self {
        Self::with_algorithm(Box::new(RollingHashFingerprint))
    }

    pub fn with_algorithm(algorithm: Box<dyn ConfigFingerprint>) -> Self {
        Self {
            algorithm,
            ignored_fields: BTreeSet::new(),
        }
    }

    /// Select an algorithm by name ("rolling" or "sha256")
    pub fn from_name(name: &str) -> Result<Self, FingerprintError> {
        match name {
            "rolling" => Ok(Self::with_algorithm(Box::new(RollingHashFingerprint))),
            "sha256" => Ok(Self::with_algorithm(Box::new(Sha256Fingerprint))),
            other => Err(FingerprintError::UnknownAlgorithm(other.to_string())),
        }
    }

    /// Exclude a top-level field that does not affect the generated artifact
    pub fn ignore_field(mut self, field: impl Into<String>) -> Self {
        self.ignored_fields.insert(field.into());
        self
    }

    pub fn ignore_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_fields
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    /// Fingerprint a configuration value
    pub fn fingerprint<C: Serialize + ?Sized>(&self, config: &C) -> Result<String, FingerprintError> {
        let canonical = self.canonical_form(config)?;
        Ok(self.algorithm.digest(&canonical))
    }

    /// Canonical JSON string that gets hashed
    pub fn canonical_form<C: Serialize + ?Sized>(&self, config: &C) -> Result<String, FingerprintError> {
        let mut value = serde_json::to_value(config)?;

        if let Value::Object(map) = &mut value {
            map.retain(|key, _| !self.ignored_fields.contains(key));
        }

        Ok(serde_json::to_string(&canonicalize(value))?)
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fingerprinter")
            .field("algorithm", &self.algorithm.name())
            .field("ignored_fields", &self.ignored_fields)
            .finish()
    }
}

// serde_json may be built with `preserve_order`, so sort explicitly.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
