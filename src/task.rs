//! Generation task state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GenerationError;

/// Externally reported state of a (subject, fingerprint) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Idle,
    Generating,
    Completed,
    Failed,
    /// Served from the cache without an active task
    Cached,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Idle => "IDLE",
            Status::Generating => "GENERATING",
            Status::Completed => "COMPLETED",
            Status::Failed => "FAILED",
            Status::Cached => "CACHED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry key, displayed as `subject_id:fingerprint`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskKey {
    pub subject_id: String,
    pub fingerprint: String,
}

impl TaskKey {
    pub fn new(subject_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_id, self.fingerprint)
    }
}

/// One generation for one (subject, fingerprint) pair
#[derive(Debug, Clone)]
pub struct GenerationTask<A> {
    /// Unique per orchestrator; tells a replaced task apart from its successor
    pub id: u64,
    pub subject_id: String,
    pub fingerprint: String,
    pub status: Status,
    /// 0..=100
    pub progress: u8,
    pub stage: Option<String>,
    pub result: Option<A>,
    pub error: Option<GenerationError>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl<A> GenerationTask<A> {
    /// A freshly started task in `GENERATING` at 0%
    pub fn new(id: u64, key: &TaskKey, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            subject_id: key.subject_id.clone(),
            fingerprint: key.fingerprint.clone(),
            status: Status::Generating,
            progress: 0,
            stage: None,
            result: None,
            error: None,
            started_at,
            ended_at: None,
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.subject_id.clone(), self.fingerprint.clone())
    }

    /// Only a `GENERATING` task blocks a new start for the same key
    pub fn is_active(&self) -> bool {
        self.status == Status::Generating
    }

    /// Clamp to `[0, 100]` and record; ignored once the task is terminal
    pub fn set_progress(&mut self, progress: f64, stage: Option<String>) -> bool {
        if !self.is_active() {
            return false;
        }

        self.progress = clamp_progress(progress);
        if stage.is_some() {
            self.stage = stage;
        }
        true
    }

    pub fn complete(&mut self, result: A, now: DateTime<Utc>) {
        self.status = Status::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
        self.ended_at = Some(now);
    }

    pub fn fail(&mut self, error: GenerationError, now: DateTime<Utc>) {
        self.status = Status::Failed;
        self.error = Some(error);
        self.ended_at = Some(now);
    }
}

pub(crate) fn clamp_progress(progress: f64) -> u8 {
    if progress.is_nan() {
        return 0;
    }
    progress.clamp(0.0, 100.0).round() as u8
}
