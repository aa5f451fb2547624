//! Durable storage for cache snapshots

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::StorageError;

/// Load/save contract for the full cache snapshot
///
/// Records are handed over as plain JSON so that a snapshot written by an
/// older build can still be read: the store decides record by record what
/// it understands.
pub trait PersistenceAdapter: Send + Sync {
    /// Read every persisted record; an absent snapshot is an empty list
    fn load(&self) -> Result<Vec<Value>, StorageError>;

    /// Overwrite the persisted snapshot with `records`
    fn save(&self, records: &[Value]) -> Result<(), StorageError>;
}

/// Snapshot stored as a single JSON array in a file
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl PersistenceAdapter for FilePersistence {
    fn load(&self) -> Result<Vec<Value>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(&content)? {
            Value::Array(records) => Ok(records),
            _ => Err(StorageError::NotAnArray),
        }
    }

    fn save(&self, records: &[Value]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write then rename so a crash never leaves a half-written snapshot.
        let content = serde_json::to_string_pretty(records)?;
        let temp = self.temp_path();
        fs::write(&temp, content)?;
        fs::rename(&temp, &self.path)?;

        log::debug!("Cache snapshot saved: {} ({} records)", self.path.display(), records.len());

        Ok(())
    }
}

/// In-memory snapshot; clones share the same backing storage
///
/// Handing a clone to a second store simulates a process restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<Value>,
    saves: usize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot
    pub fn with_records(records: Vec<Value>) -> Self {
        let persistence = Self::default();
        persistence.lock().records = records;
        persistence
    }

    /// Current snapshot
    pub fn records(&self) -> Vec<Value> {
        self.lock().records.clone()
    }

    /// Number of `save` calls observed
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PersistenceAdapter for MemoryPersistence {
    fn load(&self) -> Result<Vec<Value>, StorageError> {
        Ok(self.records())
    }

    fn save(&self, records: &[Value]) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.records = records.to_vec();
        state.saves += 1;
        Ok(())
    }
}
