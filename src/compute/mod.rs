//! The computation an orchestrator caches and deduplicates

pub mod command;

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Weak;

use anyhow::Result;
use async_trait::async_trait;
use genorch_cache::EntryMetadata;

use crate::task::TaskKey;

pub use command::{CommandCompute, CommandComputeError};

/// Expensive, possibly AI-backed generation of an artifact
///
/// The orchestrator never interrupts a running computation. Long-running
/// implementations can poll [`ProgressReporter::is_active`] and stop early
/// once their task has been cancelled or replaced.
#[async_trait]
pub trait ComputeFunction<C, A>: Send + Sync {
    async fn compute(&self, subject_id: &str, config: &C, progress: ProgressReporter) -> Result<A>;

    /// Hints stored next to the cached artifact (size, complexity, ...)
    fn metadata(&self, _artifact: &A) -> EntryMetadata {
        EntryMetadata::new()
    }
}

pub(crate) trait ProgressSink: Send + Sync {
    fn report(&self, key: &TaskKey, task_id: u64, progress: f64, stage: Option<String>) -> bool;

    fn is_current(&self, key: &TaskKey, task_id: u64) -> bool;
}

/// Progress callback handed to a running computation
///
/// Bound to one task: once that task is cancelled, cleared or replaced,
/// reports are ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    target: Option<ReportTarget>,
}

#[derive(Clone)]
struct ReportTarget {
    sink: Weak<dyn ProgressSink>,
    key: TaskKey,
    task_id: u64,
}

impl ProgressReporter {
    pub(crate) fn new(sink: Weak<dyn ProgressSink>, key: TaskKey, task_id: u64) -> Self {
        Self {
            target: Some(ReportTarget { sink, key, task_id }),
        }
    }

    /// A reporter attached to nothing, for calling a compute function directly
    pub fn detached() -> Self {
        Self { target: None }
    }

    /// Report progress in percent (clamped to 0..=100)
    ///
    /// Returns false when the report was dropped because the task is no
    /// longer generating.
    pub fn report(&self, progress: f64, stage: Option<&str>) -> bool {
        match &self.target {
            Some(target) => target.sink.upgrade().map_or(false, |sink| {
                sink.report(&target.key, target.task_id, progress, stage.map(str::to_string))
            }),
            None => false,
        }
    }

    /// Whether the task this reporter belongs to is still the live one
    pub fn is_active(&self) -> bool {
        match &self.target {
            Some(target) => target
                .sink
                .upgrade()
                .map_or(false, |sink| sink.is_current(&target.key, target.task_id)),
            None => true,
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => f
                .debug_struct("ProgressReporter")
                .field("key", &target.key)
                .field("task_id", &target.task_id)
                .finish(),
            None => f.write_str("ProgressReporter(detached)"),
        }
    }
}

/// Adapts an async closure into a [`ComputeFunction`]
///
/// ```ignore
/// let compute = FnCompute::new(|subject: String, config: PathConfig, _progress| async move {
///     Ok(generate_path(&subject, &config).await?)
/// });
/// ```
pub struct FnCompute<F, C, A> {
    func: F,
    _marker: PhantomData<fn(C) -> A>,
}

impl<F, C, A> FnCompute<F, C, A> {
    pub fn new(func: F) -> Self {
        Self {
            func,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, C, A> ComputeFunction<C, A> for FnCompute<F, C, A>
where
    F: Fn(String, C, ProgressReporter) -> Fut + Send + Sync,
    Fut: Future<Output = Result<A>> + Send + 'static,
    C: Clone + Send + Sync + 'static,
    A: Send + 'static,
{
    async fn compute(&self, subject_id: &str, config: &C, progress: ProgressReporter) -> Result<A> {
        (self.func)(subject_id.to_string(), config.clone(), progress).await
    }
}
