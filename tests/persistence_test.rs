use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use genorch::{
    CacheSettings, ComputeFunction, EntryMetadata, FilePersistence, FnCompute, GenerationEvent, ManualClock,
    MemoryPersistence, Orchestrator, OrchestratorSettings, PersistenceAdapter, ProgressReporter, StartOutcome, Status,
    StorageError,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LearningPath {
    goal: String,
    steps: Vec<String>,
}

type PathOrchestrator = Orchestrator<Value, LearningPath>;

fn planner(calls: Arc<AtomicUsize>) -> impl ComputeFunction<Value, LearningPath> {
    FnCompute::new(move |subject: String, config: Value, _progress: ProgressReporter| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move {
            let weeks = config["weeks"].as_u64().unwrap_or(1);
            Ok::<_, anyhow::Error>(LearningPath {
                goal: subject,
                steps: (1..=weeks).map(|week| format!("week {}", week)).collect(),
            })
        }
    })
}

/// Start a generation and wait until it settles
async fn generate(orchestrator: &PathOrchestrator, subject: &str, config: Value) -> Status {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = orchestrator.subscribe(move |event: &GenerationEvent<LearningPath>| {
        if let Some(status) = event.status_change() {
            let _ = tx.send(status);
        }
    });

    let outcome = assert_ok!(orchestrator.start_generation(subject, config, false));
    assert_eq!(outcome, StartOutcome::Started);

    let status = loop {
        let status = rx.recv().await.expect("event channel closed");
        if status.is_terminal() {
            break status;
        }
    };
    orchestrator.unsubscribe(id);
    status
}

fn config() -> Value {
    json!({"style": "balanced", "weeks": 3})
}

#[tokio::test]
async fn test_file_cache_survives_restart() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("cache.json");

    let first_calls = Arc::new(AtomicUsize::new(0));
    let first: PathOrchestrator = Orchestrator::new(
        planner(first_calls.clone()),
        FilePersistence::new(&cache_path),
        OrchestratorSettings::default(),
    );
    assert_eq!(generate(&first, "goal-1", config()).await, Status::Completed);
    assert!(cache_path.exists());
    drop(first);

    let second_calls = Arc::new(AtomicUsize::new(0));
    let second: PathOrchestrator = Orchestrator::new(
        planner(second_calls.clone()),
        FilePersistence::new(&cache_path),
        OrchestratorSettings::default(),
    );

    assert_eq!(assert_ok!(second.status("goal-1", Some(&config()))), Status::Cached);
    assert_eq!(
        assert_ok!(second.start_generation("goal-1", config(), false)),
        StartOutcome::Cached
    );

    let path = assert_ok!(second.result("goal-1", Some(&config()))).expect("cached path");
    assert_eq!(path.goal, "goal-1");
    assert_eq!(path.steps, vec!["week 1", "week 2", "week 3"]);
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_snapshot_records_are_versioned() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("cache.json");
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator: PathOrchestrator = Orchestrator::new(
        planner(calls),
        FilePersistence::new(&cache_path),
        OrchestratorSettings::default(),
    );

    generate(&orchestrator, "goal-1", config()).await;

    let records: Vec<Value> = serde_json::from_str(&fs::read_to_string(&cache_path).unwrap()).unwrap();
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record["version"], json!(1));
    assert_eq!(record["subject_id"], json!("goal-1"));
    assert_eq!(
        record["fingerprint"],
        json!(orchestrator.fingerprint(&config()).unwrap())
    );
    assert_eq!(record["artifact"]["goal"], json!("goal-1"));
    assert!(record["created_at"].is_string());
    assert!(record["expires_at"].is_string());
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty_and_is_rewritten() {
    let dir = tempdir().unwrap();
    let cache_path = dir.path().join("cache.json");
    fs::write(&cache_path, "{ this is not a cache").unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator: PathOrchestrator = Orchestrator::new(
        planner(calls),
        FilePersistence::new(&cache_path),
        OrchestratorSettings::default(),
    );
    assert_eq!(orchestrator.cache_stats().total_cached, 0);

    assert_eq!(generate(&orchestrator, "goal-1", config()).await, Status::Completed);

    let records: Vec<Value> = serde_json::from_str(&fs::read_to_string(&cache_path).unwrap()).unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn test_restart_drops_entries_that_expired_meanwhile() {
    let persistence = MemoryPersistence::new();
    let clock = Arc::new(ManualClock::default());
    let settings = OrchestratorSettings {
        cache: CacheSettings {
            ttl: chrono::Duration::hours(2),
            max_size: 10,
        },
        ..OrchestratorSettings::default()
    };

    let calls = Arc::new(AtomicUsize::new(0));
    let first: PathOrchestrator = Orchestrator::builder(planner(calls.clone()))
        .persistence(persistence.clone())
        .settings(settings.clone())
        .clock(clock.clone())
        .build();
    generate(&first, "goal-1", config()).await;
    generate(&first, "goal-2", json!({"style": "fast", "weeks": 1})).await;
    assert_eq!(persistence.records().len(), 2);

    clock.advance(chrono::Duration::hours(3));

    let second: PathOrchestrator = Orchestrator::builder(planner(calls))
        .persistence(persistence.clone())
        .settings(settings)
        .clock(clock.clone())
        .build();

    assert_eq!(second.cache_stats().total_cached, 0);
    assert_eq!(assert_ok!(second.status("goal-1", None)), Status::Idle);
}

#[tokio::test]
async fn test_zero_max_size_never_caches() {
    let calls = Arc::new(AtomicUsize::new(0));
    let settings = OrchestratorSettings {
        cache: CacheSettings {
            ttl: chrono::Duration::hours(1),
            max_size: 0,
        },
        ..OrchestratorSettings::default()
    };
    let orchestrator: PathOrchestrator = Orchestrator::builder(planner(calls.clone()))
        .settings(settings)
        .build();

    assert_eq!(generate(&orchestrator, "goal-1", config()).await, Status::Completed);
    assert_eq!(generate(&orchestrator, "goal-1", config()).await, Status::Completed);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(orchestrator.cache_stats().total_cached, 0);
}

/// Storage that is always unavailable
struct UnreachableStorage;

impl PersistenceAdapter for UnreachableStorage {
    fn load(&self) -> Result<Vec<Value>, StorageError> {
        Err(StorageError::Backend("connection refused".to_string()))
    }

    fn save(&self, _records: &[Value]) -> Result<(), StorageError> {
        Err(StorageError::Backend("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_storage_failure_keeps_cache_in_memory() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator: PathOrchestrator =
        Orchestrator::new(planner(calls.clone()), UnreachableStorage, OrchestratorSettings::default());

    assert_eq!(generate(&orchestrator, "goal-1", config()).await, Status::Completed);

    assert_eq!(assert_ok!(orchestrator.status("goal-1", Some(&config()))), Status::Cached);
    assert_eq!(
        assert_ok!(orchestrator.start_generation("goal-1", config(), false)),
        StartOutcome::Cached
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

struct SizedPlanner;

#[async_trait::async_trait]
impl ComputeFunction<Value, LearningPath> for SizedPlanner {
    async fn compute(&self, subject_id: &str, _config: &Value, _progress: ProgressReporter) -> anyhow::Result<LearningPath> {
        Ok(LearningPath {
            goal: subject_id.to_string(),
            steps: vec!["read".to_string(), "practice".to_string()],
        })
    }

    fn metadata(&self, artifact: &LearningPath) -> EntryMetadata {
        let mut metadata = EntryMetadata::new();
        metadata.insert("steps".to_string(), json!(artifact.steps.len()));
        metadata
    }
}

#[tokio::test]
async fn test_metadata_is_stored_with_entry() {
    let persistence = MemoryPersistence::new();
    let orchestrator: PathOrchestrator =
        Orchestrator::new(SizedPlanner, persistence.clone(), OrchestratorSettings::default());

    generate(&orchestrator, "goal-1", config()).await;

    let entries = orchestrator.cache_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].metadata.get("steps"), Some(&json!(2)));
    assert_eq!(persistence.records()[0]["metadata"]["steps"], json!(2));
}
