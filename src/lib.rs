pub mod cli;
pub mod compute;
pub mod config;
pub mod error;
pub mod listener;
pub mod orchestrator;
pub mod registry;
pub mod task;

// Re-export the public surface for convenience
pub use compute::{CommandCompute, CommandComputeError, ComputeFunction, FnCompute, ProgressReporter};
pub use error::{GenerationError, OrchestratorError};
pub use listener::{EventRecorder, GenerationEvent, GenerationListener, ListenerHub, ListenerId};
pub use orchestrator::{CacheStats, Orchestrator, OrchestratorBuilder, OrchestratorSettings, StartOutcome};
pub use registry::TaskRegistry;
pub use task::{GenerationTask, Status, TaskKey};

pub use genorch_cache::{
    CacheEntry, CacheSettings, Clock, EntryMetadata, FilePersistence, Fingerprinter, ManualClock, MemoryPersistence,
    PersistenceAdapter, RollingHashFingerprint, Sha256Fingerprint, StorageError, SystemClock,
};
