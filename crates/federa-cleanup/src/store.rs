//! Persistence of cleanup tasks.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use federa_core::Result;

use crate::task::{CleanupTask, TaskStatus, TaskType};

#[async_trait]
pub trait CleanupStore: Send + Sync {
    async fn get(&self, job_id: &str, task_type: TaskType) -> Result<Option<CleanupTask>>;

    /// Insert `task` unless a row for its key exists; return the stored row.
    async fn insert_if_absent(&self, task: CleanupTask) -> Result<CleanupTask>;

    /// Insert `task`, or put a completed or failed row for its key back to
    /// pending with `task.max_retries`. A pending or running row is returned
    /// unchanged.
    async fn rearm(&self, task: CleanupTask) -> Result<CleanupTask>;

    /// Atomically move a redrivable task to running. `None` when the task is
    /// missing, completed, running or out of retries.
    async fn claim(&self, job_id: &str, task_type: TaskType) -> Result<Option<CleanupTask>>;

    /// Persist status, retry count and error of a claimed task.
    async fn update(&self, task: &CleanupTask) -> Result<()>;

    /// Redrivable tasks, oldest first. `page` is zero-based.
    async fn list_redrivable(&self, page: u32, page_size: u32) -> Result<Vec<CleanupTask>>;

    /// Running tasks last updated before `cutoff` lost their executor. Each
    /// is charged one failed attempt and returned to the retry cycle.
    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<CleanupTask>>;
}

pub(crate) const INTERRUPTED: &str = "interrupted while running";

/// Store used when no database is configured.
#[derive(Default)]
pub struct MemoryCleanupStore {
    tasks: Mutex<HashMap<(String, TaskType), CleanupTask>>,
}

impl MemoryCleanupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<(String, TaskType), CleanupTask>) -> T) -> T {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut tasks)
    }
}

#[async_trait]
impl CleanupStore for MemoryCleanupStore {
    async fn get(&self, job_id: &str, task_type: TaskType) -> Result<Option<CleanupTask>> {
        Ok(self.with(|t| t.get(&(job_id.to_string(), task_type)).cloned()))
    }

    async fn insert_if_absent(&self, task: CleanupTask) -> Result<CleanupTask> {
        Ok(self.with(|t| {
            t.entry((task.job_id.clone(), task.task_type))
                .or_insert(task)
                .clone()
        }))
    }

    async fn rearm(&self, task: CleanupTask) -> Result<CleanupTask> {
        Ok(self.with(|t| {
            let max_retries = task.max_retries;
            let stored = t.entry((task.job_id.clone(), task.task_type)).or_insert(task);
            if matches!(stored.status, TaskStatus::Completed | TaskStatus::Failed) {
                stored.rearm(max_retries);
            }
            stored.clone()
        }))
    }

    async fn claim(&self, job_id: &str, task_type: TaskType) -> Result<Option<CleanupTask>> {
        Ok(self.with(|t| {
            let task = t.get_mut(&(job_id.to_string(), task_type))?;
            if !task.is_redrivable() {
                return None;
            }
            task.status = TaskStatus::Running;
            task.updated_at = Utc::now();
            Some(task.clone())
        }))
    }

    async fn update(&self, task: &CleanupTask) -> Result<()> {
        self.with(|t| {
            t.insert((task.job_id.clone(), task.task_type), task.clone());
        });
        Ok(())
    }

    async fn list_redrivable(&self, page: u32, page_size: u32) -> Result<Vec<CleanupTask>> {
        let mut tasks: Vec<CleanupTask> =
            self.with(|t| t.values().filter(|t| t.is_redrivable()).cloned().collect());
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks
            .into_iter()
            .skip(page as usize * page_size as usize)
            .take(page_size as usize)
            .collect())
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<CleanupTask>> {
        Ok(self.with(|t| {
            t.values_mut()
                .filter(|task| task.status == TaskStatus::Running && task.updated_at < cutoff)
                .map(|task| {
                    task.record_failure(INTERRUPTED.to_string());
                    task.clone()
                })
                .collect()
        }))
    }
}
