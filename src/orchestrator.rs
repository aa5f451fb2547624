//! The public façade: dedup, cache, compute, notify

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use genorch_cache::{
    CacheEntry, CacheSettings, CacheStore, Clock, EntryMetadata, Fingerprinter, MemoryPersistence, PersistenceAdapter,
    SystemClock,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::compute::{ComputeFunction, ProgressReporter, ProgressSink};
use crate::error::{panic_message, GenerationError, OrchestratorError};
use crate::listener::{GenerationEvent, GenerationListener, ListenerHub, ListenerId};
use crate::registry::TaskRegistry;
use crate::task::{GenerationTask, Status, TaskKey};

/// Tuning knobs for an [`Orchestrator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub cache: CacheSettings,

    /// How long a finished task stays readable before it is retired
    pub task_grace_period: Duration,

    /// Deadline for one compute call; expiry fails the task as `TimedOut`
    pub generation_timeout: Option<Duration>,

    /// Computes allowed to run at once across all keys; 0 means unbounded
    pub max_concurrent: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            task_grace_period: Duration::ZERO,
            generation_timeout: None,
            max_concurrent: 0,
        }
    }
}

/// What [`Orchestrator::start_generation`] decided to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A task for the same key is already generating
    AlreadyRunning,
    /// Served from the cache; no compute was started
    Cached,
    /// A new compute was spawned
    Started,
}

/// Snapshot returned by [`Orchestrator::cache_stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_cached: usize,
    pub active_generations: usize,
    pub oldest_cache: Option<DateTime<Utc>>,
    pub newest_cache: Option<DateTime<Utc>>,
    pub total_size_bytes: u64,
}

struct State<A> {
    cache: CacheStore<A>,
    tasks: TaskRegistry<A>,
}

struct Inner<C, A> {
    state: Mutex<State<A>>,
    listeners: ListenerHub<A>,
    compute: Arc<dyn ComputeFunction<C, A>>,
    fingerprinter: Fingerprinter,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
    permits: Option<Arc<Semaphore>>,
    next_task_id: AtomicU64,
}

/// Turns an expensive computation into a deduplicated, cached, cancellable
/// background operation
///
/// At most one task generates per `(subject_id, fingerprint)`. Outcomes are
/// never returned to the caller of [`start_generation`](Self::start_generation);
/// they are delivered to listeners and can be polled through
/// [`status`](Self::status) and [`result`](Self::result).
///
/// Cancellation is cooperative: a running compute is never interrupted, its
/// outcome is discarded when it settles because its task is no longer the
/// one registered for the key. When a stop races with completion, whichever
/// takes the state lock first wins.
///
/// Cloning is cheap and every clone drives the same state.
pub struct Orchestrator<C, A> {
    inner: Arc<Inner<C, A>>,
}

impl<C, A> Clone for Orchestrator<C, A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder<C, A> {
    compute: Arc<dyn ComputeFunction<C, A>>,
    persistence: Option<Box<dyn PersistenceAdapter>>,
    settings: OrchestratorSettings,
    fingerprinter: Option<Fingerprinter>,
    clock: Option<Arc<dyn Clock>>,
}

impl<C, A> OrchestratorBuilder<C, A>
where
    C: Serialize + Send + Sync + 'static,
    A: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn persistence<P>(mut self, persistence: P) -> Self
    where
        P: PersistenceAdapter + 'static,
    {
        self.persistence = Some(Box::new(persistence));
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn fingerprinter(mut self, fingerprinter: Fingerprinter) -> Self {
        self.fingerprinter = Some(fingerprinter);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Loads the persisted cache and assembles the orchestrator
    pub fn build(self) -> Orchestrator<C, A> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let persistence = self
            .persistence
            .unwrap_or_else(|| Box::new(MemoryPersistence::new()));
        let cache = CacheStore::load(persistence, self.settings.cache, clock.clone());
        let permits = match self.settings.max_concurrent {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        Orchestrator {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    cache,
                    tasks: TaskRegistry::new(),
                }),
                listeners: ListenerHub::new(),
                compute: self.compute,
                fingerprinter: self.fingerprinter.unwrap_or_default(),
                clock,
                settings: self.settings,
                permits,
                next_task_id: AtomicU64::new(1),
            }),
        }
    }
}

impl<C, A> Orchestrator<C, A>
where
    C: Serialize + Send + Sync + 'static,
    A: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn builder<F>(compute: F) -> OrchestratorBuilder<C, A>
    where
        F: ComputeFunction<C, A> + 'static,
    {
        let compute: Arc<dyn ComputeFunction<C, A>> = Arc::new(compute);
        OrchestratorBuilder {
            compute,
            persistence: None,
            settings: OrchestratorSettings::default(),
            fingerprinter: None,
            clock: None,
        }
    }

    pub fn new<F, P>(compute: F, persistence: P, settings: OrchestratorSettings) -> Self
    where
        F: ComputeFunction<C, A> + 'static,
        P: PersistenceAdapter + 'static,
    {
        Self::builder(compute)
            .persistence(persistence)
            .settings(settings)
            .build()
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    pub fn fingerprint(&self, config: &C) -> Result<String, OrchestratorError> {
        Ok(self.inner.fingerprinter.fingerprint(config)?)
    }

    /// Status of a key, or of the subject as a whole when `config` is `None`
    pub fn status(&self, subject_id: &str, config: Option<&C>) -> Result<Status, OrchestratorError> {
        let fingerprint = self.fingerprint_opt(config)?;
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        let status = match fingerprint {
            Some(fingerprint) => {
                let key = TaskKey::new(subject_id, fingerprint);
                if let Some(task) = state.tasks.get(&key) {
                    task.status
                } else if state.cache.get(&key.subject_id, &key.fingerprint).is_some() {
                    Status::Cached
                } else {
                    Status::Idle
                }
            }
            None => {
                let tasks = state.tasks.for_subject(subject_id);
                let task = tasks
                    .iter()
                    .find(|task| task.is_active())
                    .or_else(|| tasks.iter().max_by_key(|task| (task.started_at, task.id)));

                if let Some(task) = task {
                    task.status
                } else if state.cache.latest(subject_id).is_some() {
                    Status::Cached
                } else {
                    Status::Idle
                }
            }
        };

        Ok(status)
    }

    /// Completed task result, else live cached artifact; never computes
    pub fn result(&self, subject_id: &str, config: Option<&C>) -> Result<Option<A>, OrchestratorError> {
        let fingerprint = self.fingerprint_opt(config)?;
        let mut guard = self.inner.lock();
        let state = &mut *guard;

        let result = match fingerprint {
            Some(fingerprint) => {
                let key = TaskKey::new(subject_id, fingerprint);
                match state.tasks.get(&key).and_then(|task| task.result.clone()) {
                    Some(result) => Some(result),
                    None => state.cache.get(&key.subject_id, &key.fingerprint),
                }
            }
            None => {
                let completed = state
                    .tasks
                    .for_subject(subject_id)
                    .into_iter()
                    .filter(|task| task.result.is_some())
                    .max_by_key(|task| (task.started_at, task.id))
                    .and_then(|task| task.result.clone());

                match completed {
                    Some(result) => Some(result),
                    None => state.cache.latest(subject_id).map(|entry| entry.artifact),
                }
            }
        };

        Ok(result)
    }

    /// Serve from cache, join a running task, or spawn a new compute
    ///
    /// Returns as soon as the decision is made. Must be called from within a
    /// Tokio runtime; the compute runs as a spawned task.
    pub fn start_generation(
        &self,
        subject_id: &str,
        config: C,
        force_refresh: bool,
    ) -> Result<StartOutcome, OrchestratorError> {
        let fingerprint = self.inner.fingerprinter.fingerprint(&config)?;
        let runtime = Handle::try_current().map_err(|_| OrchestratorError::NoRuntime)?;
        let key = TaskKey::new(subject_id, fingerprint);

        let task_id = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;

            if !force_refresh {
                if state.tasks.get(&key).map_or(false, |task| task.is_active()) {
                    debug!("Generation already running for {}", key);
                    return Ok(StartOutcome::AlreadyRunning);
                }

                if let Some(entry) = state.cache.get_entry(&key.subject_id, &key.fingerprint) {
                    debug!("Cache hit for {}", key);

                    self.inner.listeners.publish(GenerationEvent::CacheHit {
                        subject_id: key.subject_id.clone(),
                        fingerprint: key.fingerprint.clone(),
                        artifact: entry.artifact.clone(),
                        metadata: entry.metadata,
                    });
                    self.inner.listeners.publish(GenerationEvent::StatusChanged {
                        subject_id: key.subject_id,
                        fingerprint: key.fingerprint,
                        status: Status::Cached,
                        result: Some(entry.artifact),
                        error: None,
                    });
                    drop(guard);
                    self.inner.listeners.flush();
                    return Ok(StartOutcome::Cached);
                }
            }

            let task_id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
            let task = GenerationTask::new(task_id, &key, self.inner.clock.now());
            if let Some(replaced) = state.tasks.set(key.clone(), task) {
                if replaced.is_active() {
                    debug!("Task {} for {} superseded by task {}", replaced.id, key, task_id);
                }
            }
            self.inner
                .listeners
                .publish(GenerationEvent::status(&key, Status::Generating));
            task_id
        };

        info!("Starting generation for {} (task {})", key, task_id);
        self.inner.listeners.flush();

        runtime.spawn(Inner::run(self.inner.clone(), key, task_id, config));
        Ok(StartOutcome::Started)
    }

    /// Cancel generating tasks of the subject (one key when `config` is given)
    ///
    /// Returns how many tasks were cancelled. Their computes keep running
    /// and their outcome is discarded.
    pub fn stop_generation(&self, subject_id: &str, config: Option<&C>) -> Result<usize, OrchestratorError> {
        let fingerprint = self.fingerprint_opt(config)?;
        let now = self.inner.clock.now();

        let cancelled: Vec<(TaskKey, u64)> = {
            let mut state = self.inner.lock();
            let keys: Vec<TaskKey> = state
                .tasks
                .for_subject(subject_id)
                .into_iter()
                .filter(|task| task.is_active())
                .filter(|task| fingerprint.as_deref().map_or(true, |fp| task.fingerprint == fp))
                .map(|task| task.key())
                .collect();

            let mut cancelled = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(task) = state.tasks.get_mut(&key) {
                    task.fail(GenerationError::Cancelled, now);
                    self.inner.listeners.publish(GenerationEvent::StatusChanged {
                        subject_id: key.subject_id.clone(),
                        fingerprint: key.fingerprint.clone(),
                        status: Status::Failed,
                        result: None,
                        error: Some(GenerationError::Cancelled),
                    });
                    cancelled.push((key, task.id));
                }
            }
            cancelled
        };

        self.inner.listeners.flush();
        for (key, task_id) in &cancelled {
            info!("Cancelled generation for {} (task {})", key, task_id);
            self.inner.retire(key.clone(), *task_id);
        }

        Ok(cancelled.len())
    }

    /// Drop cached artifacts and task bookkeeping of the subject
    ///
    /// In-flight computes are not cancelled; their results will not be
    /// cached. Returns the number of cache entries removed.
    pub fn clear_cache(&self, subject_id: &str, config: Option<&C>) -> Result<usize, OrchestratorError> {
        let fingerprint = self.fingerprint_opt(config)?;

        let removed = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;

            let mut affected: BTreeSet<TaskKey> = state
                .cache
                .keys()
                .into_iter()
                .filter(|(subject, fp)| {
                    subject == subject_id && fingerprint.as_deref().map_or(true, |wanted| fp == wanted)
                })
                .map(|(subject, fp)| TaskKey::new(subject, fp))
                .collect();

            let removed = state.cache.remove(subject_id, fingerprint.as_deref());
            let tasks = state.tasks.remove_subject(subject_id, fingerprint.as_deref());
            affected.extend(tasks.iter().map(GenerationTask::key));
            for key in &affected {
                self.inner.listeners.publish(GenerationEvent::status(key, Status::Idle));
            }
            removed
        };

        info!("Cleared cache for {}: {} entries", subject_id, removed);
        self.inner.listeners.flush();

        Ok(removed)
    }

    /// Drop every cached artifact and all task bookkeeping
    pub fn clear_all_cache(&self) -> usize {
        let removed = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;

            let mut affected: BTreeSet<TaskKey> = state
                .cache
                .keys()
                .into_iter()
                .map(|(subject, fp)| TaskKey::new(subject, fp))
                .collect();

            let removed = state.cache.clear();
            affected.extend(state.tasks.clear().iter().map(GenerationTask::key));
            for key in &affected {
                self.inner.listeners.publish(GenerationEvent::status(key, Status::Idle));
            }
            removed
        };

        info!("Cleared all cache: {} entries", removed);
        self.inner.listeners.flush();

        removed
    }

    /// Snapshot of registered tasks, including finished ones still inside
    /// their grace window
    pub fn active_tasks(&self) -> Vec<GenerationTask<A>> {
        self.inner.lock().tasks.list()
    }

    pub fn cache_stats(&self) -> CacheStats {
        let state = self.inner.lock();
        let stats = state.cache.stats();

        CacheStats {
            total_cached: stats.count,
            active_generations: state.tasks.active_count(),
            oldest_cache: stats.oldest,
            newest_cache: stats.newest,
            total_size_bytes: stats.total_size_bytes,
        }
    }

    /// Snapshot of cached entries, oldest first
    pub fn cache_entries(&self) -> Vec<CacheEntry<A>> {
        self.inner.lock().cache.entries()
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.lock().cache.purge_expired()
    }

    pub fn subscribe<L>(&self, listener: L) -> ListenerId
    where
        L: GenerationListener<A> + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    /// Record progress for generating tasks of the subject
    ///
    /// Compute functions normally report through their [`ProgressReporter`].
    /// Returns false when no generating task matched.
    pub fn update_progress(
        &self,
        subject_id: &str,
        config: Option<&C>,
        progress: f64,
        stage: Option<&str>,
    ) -> Result<bool, OrchestratorError> {
        let fingerprint = self.fingerprint_opt(config)?;

        let targets: Vec<(TaskKey, u64)> = self
            .inner
            .lock()
            .tasks
            .for_subject(subject_id)
            .into_iter()
            .filter(|task| task.is_active())
            .filter(|task| fingerprint.as_deref().map_or(true, |fp| task.fingerprint == fp))
            .map(|task| (task.key(), task.id))
            .collect();

        let mut updated = false;
        for (key, task_id) in &targets {
            updated |= self
                .inner
                .record_progress(key, *task_id, progress, stage.map(str::to_string));
        }
        Ok(updated)
    }

    fn fingerprint_opt(&self, config: Option<&C>) -> Result<Option<String>, OrchestratorError> {
        config.map(|config| self.fingerprint(config)).transpose()
    }
}

impl<C, A> Inner<C, A>
where
    C: Serialize + Send + Sync + 'static,
    A: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, State<A>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_live_task(&self, key: &TaskKey, task_id: u64) -> bool {
        self.lock()
            .tasks
            .get(key)
            .map_or(false, |task| task.id == task_id && task.is_active())
    }

    async fn run(inner: Arc<Self>, key: TaskKey, task_id: u64, config: C) {
        let _permit = match &inner.permits {
            Some(permits) => permits.clone().acquire_owned().await.ok(),
            None => None,
        };

        if !inner.is_live_task(&key, task_id) {
            debug!("Task {} for {} retired before its compute started", task_id, key);
            return;
        }

        let sink: Weak<dyn ProgressSink> = Arc::downgrade(&inner) as Weak<dyn ProgressSink>;
        let reporter = ProgressReporter::new(sink, key.clone(), task_id);
        let compute = inner.compute.clone();
        let subject_id = key.subject_id.clone();

        let guarded = AssertUnwindSafe(async move { compute.compute(&subject_id, &config, reporter).await })
            .catch_unwind();

        let settled = match inner.settings.generation_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(settled) => settled,
                Err(_) => {
                    warn!("Generation for {} timed out after {:?}", key, limit);
                    inner.settle(&key, task_id, Err(GenerationError::TimedOut { after: limit }));
                    return;
                }
            },
            None => guarded.await,
        };

        let outcome = match settled {
            Ok(Ok(artifact)) => Ok(artifact),
            Ok(Err(e)) => Err(GenerationError::Compute(format!("{:#}", e))),
            Err(payload) => Err(GenerationError::Panicked(panic_message(payload.as_ref()))),
        };

        inner.settle(&key, task_id, outcome);
    }

    /// Commit an outcome if `task_id` is still the generating task for `key`
    fn settle(self: &Arc<Self>, key: &TaskKey, task_id: u64, outcome: Result<A, GenerationError>) {
        let metadata = match &outcome {
            Ok(artifact) => catch_unwind(AssertUnwindSafe(|| self.compute.metadata(artifact))).unwrap_or_else(|_| {
                warn!("Metadata hook panicked for {}, storing without metadata", key);
                EntryMetadata::new()
            }),
            Err(_) => EntryMetadata::new(),
        };

        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let now = self.clock.now();

            let task = match state.tasks.get_mut(key) {
                Some(task) if task.id == task_id && task.is_active() => task,
                _ => {
                    debug!("Discarding stale outcome of task {} for {}", task_id, key);
                    return;
                }
            };

            let event = match outcome {
                Ok(artifact) => {
                    state
                        .cache
                        .put(&key.subject_id, &key.fingerprint, artifact.clone(), metadata);
                    task.complete(artifact.clone(), now);
                    info!("Generation completed for {} (task {})", key, task_id);

                    GenerationEvent::StatusChanged {
                        subject_id: key.subject_id.clone(),
                        fingerprint: key.fingerprint.clone(),
                        status: Status::Completed,
                        result: Some(artifact),
                        error: None,
                    }
                }
                Err(error) => {
                    task.fail(error.clone(), now);
                    warn!("Generation failed for {} (task {}): {}", key, task_id, error);

                    GenerationEvent::StatusChanged {
                        subject_id: key.subject_id.clone(),
                        fingerprint: key.fingerprint.clone(),
                        status: Status::Failed,
                        result: None,
                        error: Some(error),
                    }
                }
            };
            self.listeners.publish(event);
        }

        self.listeners.flush();
        self.retire(key.clone(), task_id);
    }

    /// Remove a finished task once its grace window has passed
    fn retire(self: &Arc<Self>, key: TaskKey, task_id: u64) {
        let grace = self.settings.task_grace_period;
        if grace.is_zero() {
            self.lock().tasks.delete_if_current(&key, task_id);
            return;
        }

        match Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::downgrade(self);
                runtime.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(inner) = inner.upgrade() {
                        inner.lock().tasks.delete_if_current(&key, task_id);
                    }
                });
            }
            Err(_) => {
                self.lock().tasks.delete_if_current(&key, task_id);
            }
        }
    }

    fn record_progress(&self, key: &TaskKey, task_id: u64, progress: f64, stage: Option<String>) -> bool {
        let updated = {
            let mut state = self.lock();
            let task = match state.tasks.get_mut(key) {
                Some(task) if task.id == task_id => task,
                _ => return false,
            };

            let updated = task.set_progress(progress, stage);
            if updated {
                self.listeners.publish(GenerationEvent::Progress {
                    subject_id: key.subject_id.clone(),
                    fingerprint: key.fingerprint.clone(),
                    progress: task.progress,
                    stage: task.stage.clone(),
                });
            }
            updated
        };

        if updated {
            self.listeners.flush();
        }
        updated
    }
}

impl<C, A> ProgressSink for Inner<C, A>
where
    C: Serialize + Send + Sync + 'static,
    A: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn report(&self, key: &TaskKey, task_id: u64, progress: f64, stage: Option<String>) -> bool {
        self.record_progress(key, task_id, progress, stage)
    }

    fn is_current(&self, key: &TaskKey, task_id: u64) -> bool {
        self.is_live_task(key, task_id)
    }
}

impl<C, A> std::fmt::Debug for Orchestrator<C, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.inner.settings)
            .field("fingerprinter", &self.inner.fingerprinter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::FnCompute;
    use serde_json::{json, Value};
    use tokio::sync::{mpsc, Notify};

    type Events = mpsc::UnboundedReceiver<GenerationEvent<String>>;

    fn gated(gate: Arc<Notify>, calls: Arc<AtomicU64>) -> impl ComputeFunction<Value, String> {
        FnCompute::new(move |subject: String, config: Value, _progress: ProgressReporter| {
            let gate = gate.clone();
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                gate.notified().await;
                Ok::<_, anyhow::Error>(format!("{} path ({})", subject, config["style"]))
            }
        })
    }

    fn events(orchestrator: &Orchestrator<Value, String>) -> Events {
        let (tx, rx) = mpsc::unbounded_channel();
        orchestrator.subscribe(move |event: &GenerationEvent<String>| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    async fn next_status(rx: &mut Events) -> Status {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if let Some(status) = event.status_change() {
                return status;
            }
        }
    }

    #[tokio::test]
    async fn test_generate_then_serve_from_cache() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicU64::new(0));
        let orchestrator = Orchestrator::builder(gated(gate.clone(), calls.clone())).build();
        let mut rx = events(&orchestrator);
        let config = json!({"style": "balanced"});

        assert_eq!(orchestrator.status("goal-1", Some(&config)).unwrap(), Status::Idle);

        let outcome = orchestrator.start_generation("goal-1", config.clone(), false).unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        assert_eq!(next_status(&mut rx).await, Status::Generating);
        assert_eq!(orchestrator.status("goal-1", Some(&config)).unwrap(), Status::Generating);

        gate.notify_one();
        assert_eq!(next_status(&mut rx).await, Status::Completed);

        let outcome = orchestrator.start_generation("goal-1", config.clone(), false).unwrap();
        assert_eq!(outcome, StartOutcome::Cached);
        assert_eq!(orchestrator.status("goal-1", Some(&config)).unwrap(), Status::Cached);
        assert_eq!(
            orchestrator.result("goal-1", Some(&config)).unwrap().as_deref(),
            Some(r#"goal-1 path ("balanced")"#)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_discards_late_result() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicU64::new(0));
        let orchestrator = Orchestrator::builder(gated(gate.clone(), calls)).build();
        let mut rx = events(&orchestrator);
        let config = json!({"style": "fast"});

        orchestrator.start_generation("goal-1", config.clone(), false).unwrap();
        assert_eq!(next_status(&mut rx).await, Status::Generating);

        assert_eq!(orchestrator.stop_generation("goal-1", None).unwrap(), 1);
        assert_eq!(next_status(&mut rx).await, Status::Failed);

        gate.notify_one();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(orchestrator.result("goal-1", Some(&config)).unwrap().is_none());
        assert_eq!(orchestrator.cache_stats().total_cached, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_update_progress_only_while_generating() {
        let gate = Arc::new(Notify::new());
        let calls = Arc::new(AtomicU64::new(0));
        let orchestrator = Orchestrator::builder(gated(gate.clone(), calls)).build();
        let config = json!({"style": "deep"});

        assert!(!orchestrator.update_progress("goal-1", None, 10.0, None).unwrap());

        orchestrator.start_generation("goal-1", config.clone(), false).unwrap();
        assert!(orchestrator
            .update_progress("goal-1", Some(&config), 140.0, Some("ranking"))
            .unwrap());

        let tasks = orchestrator.active_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].progress, 100);
        assert_eq!(tasks[0].stage.as_deref(), Some("ranking"));
    }

    #[test]
    fn test_start_outside_runtime_is_rejected() {
        let orchestrator: Orchestrator<Value, String> = Orchestrator::builder(FnCompute::new(
            |_subject: String, _config: Value, _progress: ProgressReporter| async {
                Ok::<_, anyhow::Error>(String::new())
            },
        ))
        .build();

        let err = orchestrator
            .start_generation("goal-1", json!({}), false)
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::NoRuntime));
        assert!(orchestrator.active_tasks().is_empty());
    }
}
