//! Bookkeeping for in-flight generations

use std::collections::HashMap;

use crate::task::{GenerationTask, TaskKey};

/// Tasks by `subject_id:fingerprint`
///
/// Holds no business logic; the orchestrator decides when tasks are added
/// and retired. `list` hands out a snapshot so callers can iterate while the
/// registry keeps changing.
#[derive(Debug)]
pub struct TaskRegistry<A> {
    tasks: HashMap<TaskKey, GenerationTask<A>>,
}

impl<A> Default for TaskRegistry<A> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }
}

impl<A: Clone> TaskRegistry<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &TaskKey) -> Option<&GenerationTask<A>> {
        self.tasks.get(key)
    }

    pub fn get_mut(&mut self, key: &TaskKey) -> Option<&mut GenerationTask<A>> {
        self.tasks.get_mut(key)
    }

    /// Insert or replace; returns the replaced task
    pub fn set(&mut self, key: TaskKey, task: GenerationTask<A>) -> Option<GenerationTask<A>> {
        self.tasks.insert(key, task)
    }

    pub fn delete(&mut self, key: &TaskKey) -> Option<GenerationTask<A>> {
        self.tasks.remove(key)
    }

    /// Delete only if the registered task is still `task_id`
    pub fn delete_if_current(&mut self, key: &TaskKey, task_id: u64) -> bool {
        if self.is_current(key, task_id) {
            self.tasks.remove(key);
            true
        } else {
            false
        }
    }

    /// Whether `task_id` is the task currently registered under `key`
    pub fn is_current(&self, key: &TaskKey, task_id: u64) -> bool {
        self.tasks.get(key).map_or(false, |task| task.id == task_id)
    }

    /// Snapshot of every task, oldest first
    pub fn list(&self) -> Vec<GenerationTask<A>> {
        let mut tasks: Vec<GenerationTask<A>> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|task| (task.started_at, task.id));
        tasks
    }

    /// Tasks of a subject under any fingerprint
    pub fn for_subject(&self, subject_id: &str) -> Vec<&GenerationTask<A>> {
        self.tasks
            .values()
            .filter(|task| task.subject_id == subject_id)
            .collect()
    }

    /// Remove the subject's tasks, optionally restricted to one fingerprint
    pub fn remove_subject(&mut self, subject_id: &str, fingerprint: Option<&str>) -> Vec<GenerationTask<A>> {
        let keys: Vec<TaskKey> = self
            .tasks
            .keys()
            .filter(|key| {
                key.subject_id == subject_id && fingerprint.map_or(true, |fp| key.fingerprint == fp)
            })
            .cloned()
            .collect();

        keys.iter()
            .filter_map(|key| self.tasks.remove(key))
            .collect()
    }

    pub fn clear(&mut self) -> Vec<GenerationTask<A>> {
        self.tasks.drain().map(|(_, task)| task).collect()
    }

    pub fn active_count(&self) -> usize {
        self.tasks.values().filter(|task| task.is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
