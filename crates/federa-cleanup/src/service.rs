//! Cleanup service: idempotent registration, guarded execution and the
//! listing used to re-drive unfinished tasks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use federa_core::{validate_job_id, FederaError, Result};
use tracing::{info, warn};

use crate::store::CleanupStore;
use crate::task::{CleanupTask, TaskStatus, TaskType};
use crate::teardown::Teardown;

/// Result of one re-drive sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedriveReport {
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct CleanupService {
    store: Arc<dyn CleanupStore>,
    teardown: Arc<dyn Teardown>,
    max_retries: u32,
}

impl CleanupService {
    pub fn new(store: Arc<dyn CleanupStore>, teardown: Arc<dyn Teardown>, max_retries: u32) -> Self {
        Self {
            store,
            teardown,
            max_retries,
        }
    }

    /// Existing task for the key whatever its state, or a new pending one.
    pub async fn get_or_create(&self, job_id: &str, task_type: TaskType) -> Result<CleanupTask> {
        self.store
            .insert_if_absent(CleanupTask::new(job_id, task_type, self.max_retries))
            .await
    }

    /// Register every task a new run of a job needs. Tasks finished by an
    /// earlier run under the same id are re-armed, since this run creates
    /// its state afresh.
    pub async fn register_job(&self, job_id: &str, types: &[TaskType]) -> Result<Vec<CleanupTask>> {
        validate_job_id(job_id)?;
        let mut tasks = Vec::with_capacity(types.len());
        for &t in types {
            let task = self
                .store
                .rearm(CleanupTask::new(job_id, t, self.max_retries))
                .await?;
            if task.status == TaskStatus::Running {
                warn!("Cleanup {}/{} of an earlier run is still running", job_id, t);
            }
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Run the teardown for one task.
    ///
    /// A completed task is returned unchanged. A teardown failure is recorded
    /// on the task (pending again, or failed once retries are spent) and the
    /// updated task is returned; only store errors and non-executable tasks
    /// are errors.
    pub async fn execute(&self, job_id: &str, task_type: TaskType) -> Result<CleanupTask> {
        let Some(mut task) = self.store.claim(job_id, task_type).await? else {
            return match self.store.get(job_id, task_type).await? {
                Some(t) if t.status == TaskStatus::Completed => Ok(t),
                Some(t) if t.status == TaskStatus::Running => Err(FederaError::Reconciliation(
                    format!("cleanup {}/{} is already running", job_id, task_type),
                )),
                Some(t) => Err(FederaError::Reconciliation(format!(
                    "cleanup {}/{} exhausted {} retries: {}",
                    job_id,
                    task_type,
                    t.retry_count,
                    t.last_error.unwrap_or_default()
                ))),
                None => Err(FederaError::Reconciliation(format!(
                    "no cleanup task {}/{}",
                    job_id, task_type
                ))),
            };
        };

        match self.teardown.run(job_id, task_type).await {
            Ok(()) => {
                task.record_success();
                info!("Cleanup {}/{} completed", job_id, task_type);
            }
            Err(e) => {
                task.record_failure(e.to_string());
                warn!(
                    "Cleanup {}/{} failed (attempt {}/{}, now {}): {}",
                    job_id,
                    task_type,
                    task.retry_count,
                    task.max_retries,
                    task.status.as_str(),
                    e
                );
            }
        }
        self.store.update(&task).await?;
        Ok(task)
    }

    /// Put tasks stuck in running for longer than `timeout` back in the
    /// retry cycle. Their executor is presumed dead.
    pub async fn reclaim_stale(&self, timeout: Duration) -> Result<Vec<CleanupTask>> {
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| FederaError::Config(format!("running timeout: {}", e)))?;
        let reclaimed = self.store.reclaim_stale(Utc::now() - timeout).await?;
        for task in &reclaimed {
            warn!(
                "Cleanup {}/{} stuck in running, reclaimed as {} (attempt {}/{})",
                task.job_id,
                task.task_type,
                task.status.as_str(),
                task.retry_count,
                task.max_retries
            );
        }
        Ok(reclaimed)
    }

    pub async fn list_redrivable(&self, page: u32, page_size: u32) -> Result<Vec<CleanupTask>> {
        self.store.list_redrivable(page, page_size.max(1)).await
    }

    /// Execute every redrivable task once. The listing is snapshotted first
    /// so tasks that go back to pending are not retried within one sweep.
    pub async fn redrive(&self, page_size: u32) -> Result<RedriveReport> {
        let mut pending = Vec::new();
        let mut page = 0;
        loop {
            let batch = self.list_redrivable(page, page_size).await?;
            let done = (batch.len() as u32) < page_size.max(1);
            pending.extend(batch);
            if done {
                break;
            }
            page += 1;
        }

        let mut report = RedriveReport::default();
        for task in pending {
            match self.execute(&task.job_id, task.task_type).await {
                Ok(t) => match t.status {
                    TaskStatus::Completed => report.completed += 1,
                    TaskStatus::Failed => report.failed += 1,
                    _ => report.retrying += 1,
                },
                Err(e) => warn!("Re-drive of {}/{} skipped: {}", task.job_id, task.task_type, e),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCleanupStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Teardown that fails its first `failures` runs.
    struct Scripted {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Teardown for Scripted {
        async fn run(&self, _job_id: &str, _task_type: TaskType) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(FederaError::Warehouse("Lost connection to backend".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn service(failures: u32) -> (CleanupService, Arc<Scripted>) {
        let teardown = Arc::new(Scripted {
            failures,
            calls: AtomicU32::new(0),
        });
        (
            CleanupService::new(Arc::new(MemoryCleanupStore::new()), teardown.clone(), 3),
            teardown,
        )
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (svc, _) = service(0);
        let a = svc.get_or_create("j1", TaskType::WarehouseJob).await.unwrap();
        let b = svc.get_or_create("j1", TaskType::WarehouseJob).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.status, TaskStatus::Pending);

        let done = svc.execute("j1", TaskType::WarehouseJob).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        let again = svc.get_or_create("j1", TaskType::WarehouseJob).await.unwrap();
        assert_eq!(again.id, a.id);
        assert_eq!(again.status, TaskStatus::Completed);

        let noop = svc.execute("j1", TaskType::WarehouseJob).await.unwrap();
        assert_eq!(noop.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn three_failures_end_in_failed() {
        let (svc, teardown) = service(10);
        svc.get_or_create("j2", TaskType::ExportParts).await.unwrap();

        let first = svc.execute("j2", TaskType::ExportParts).await.unwrap();
        assert_eq!((first.status, first.retry_count), (TaskStatus::Pending, 1));
        svc.execute("j2", TaskType::ExportParts).await.unwrap();
        let last = svc.execute("j2", TaskType::ExportParts).await.unwrap();
        assert_eq!((last.status, last.retry_count), (TaskStatus::Failed, 3));
        assert!(last.last_error.unwrap().contains("Lost connection"));

        assert!(svc.execute("j2", TaskType::ExportParts).await.is_err());
        assert_eq!(teardown.calls.load(Ordering::SeqCst), 3);
        assert!(svc.list_redrivable(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn redrive_runs_each_task_once_per_sweep() {
        let (svc, _) = service(1);
        svc.register_job("a", &[TaskType::WarehouseJob, TaskType::ExportParts])
            .await
            .unwrap();
        svc.get_or_create("b", TaskType::ExportParts).await.unwrap();

        let report = svc.redrive(2).await.unwrap();
        assert_eq!(report.completed + report.retrying, 3);
        assert_eq!(report.retrying, 1);

        let report = svc.redrive(2).await.unwrap();
        assert_eq!(report, RedriveReport { completed: 1, retrying: 0, failed: 0 });
        assert!(svc.list_redrivable(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reused_job_id_is_torn_down_again() {
        let (svc, teardown) = service(0);
        svc.register_job("r1", &[TaskType::ExportParts]).await.unwrap();
        svc.execute("r1", TaskType::ExportParts).await.unwrap();

        let rearmed = svc.register_job("r1", &[TaskType::ExportParts]).await.unwrap();
        assert_eq!(rearmed[0].status, TaskStatus::Pending);
        let second = svc.execute("r1", TaskType::ExportParts).await.unwrap();
        assert_eq!(second.status, TaskStatus::Completed);
        assert_eq!(teardown.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalid_job_id_is_not_registered() {
        let (svc, _) = service(0);
        for id in ["", "a/b", "a-b"] {
            let err = svc.register_job(id, &[TaskType::ExportParts]).await.unwrap_err();
            assert!(matches!(err, FederaError::Config(_)));
        }
        assert!(svc.list_redrivable(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_running_task_is_redriven_after_reclaim() {
        let store = Arc::new(MemoryCleanupStore::new());
        let teardown = Arc::new(Scripted {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let svc = CleanupService::new(store.clone(), teardown.clone(), 3);
        svc.register_job("crashed", &[TaskType::WarehouseJob]).await.unwrap();
        // An executor claimed the task and never reported back.
        store.claim("crashed", TaskType::WarehouseJob).await.unwrap().unwrap();

        assert!(svc.reclaim_stale(Duration::from_secs(600)).await.unwrap().is_empty());
        assert_eq!(svc.redrive(10).await.unwrap(), RedriveReport::default());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let reclaimed = svc.reclaim_stale(Duration::ZERO).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].status, TaskStatus::Pending);

        let report = svc.redrive(10).await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(teardown.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_task_cannot_execute() {
        let (svc, _) = service(0);
        assert!(svc.execute("ghost", TaskType::ExportParts).await.is_err());
    }
}
