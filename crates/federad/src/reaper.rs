//! Reaper: background task that reclaims abandoned cleanup, re-drives
//! pending cleanup and evicts idle stream sessions.

use std::sync::Arc;
use std::time::Duration;

use federa_cleanup::CleanupService;
use federa_stream::SessionRegistry;
use tracing::{info, warn};

use crate::metrics::FederaMetrics;

const REDRIVE_PAGE_SIZE: u32 = 100;

/// How long things may sit idle before the reaper steps in.
#[derive(Debug, Clone, Copy)]
pub struct ReaperTimeouts {
    pub cleanup_running: Duration,
    pub session_idle: Duration,
}

/// Spawn reaper as a background tokio task.
pub fn spawn_reaper(
    cleanup: CleanupService,
    sessions: Arc<SessionRegistry>,
    metrics: FederaMetrics,
    interval_secs: u64,
    timeouts: ReaperTimeouts,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            reap(&cleanup, &sessions, &metrics, timeouts).await;
        }
    });
}

async fn reap(
    cleanup: &CleanupService,
    sessions: &SessionRegistry,
    metrics: &FederaMetrics,
    timeouts: ReaperTimeouts,
) {
    // Reclaim first so abandoned tasks are re-driven in the same pass.
    match cleanup.reclaim_stale(timeouts.cleanup_running).await {
        Ok(reclaimed) if !reclaimed.is_empty() => {
            info!("Reaper reclaimed {} abandoned cleanup task(s)", reclaimed.len());
            metrics.reaper_reclaimed.inc_by(reclaimed.len() as u64);
        }
        Ok(_) => {}
        Err(e) => warn!("Reaper reclaim error: {}", e),
    }

    match cleanup.redrive(REDRIVE_PAGE_SIZE).await {
        Ok(report) => {
            if report.completed + report.retrying + report.failed > 0 {
                info!(
                    "Reaper re-drove cleanup: {} completed, {} retrying, {} failed",
                    report.completed, report.retrying, report.failed
                );
            }
            metrics.reaper_redriven.inc_by(report.completed as u64);
            metrics.reaper_failed.inc_by(report.failed as u64);
        }
        Err(e) => warn!("Reaper error: {}", e),
    }

    let evicted = sessions.sweep(timeouts.session_idle);
    if evicted > 0 {
        info!("Reaper evicted {} idle stream session(s)", evicted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use federa_cleanup::{CleanupStore, MemoryCleanupStore, TaskStatus, TaskType, Teardown};
    use federa_core::{FederaError, Result};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTeardown(AtomicU32);

    #[async_trait]
    impl Teardown for FlakyTeardown {
        async fn run(&self, _job_id: &str, _task_type: TaskType) -> Result<()> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(FederaError::Warehouse("database is locked".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn reap_redrives_and_sweeps() {
        let cleanup = CleanupService::new(
            Arc::new(MemoryCleanupStore::new()),
            Arc::new(FlakyTeardown(AtomicU32::new(0))),
            3,
        );
        cleanup.register_job("j1", &[TaskType::ExportParts]).await.unwrap();
        let first = cleanup.execute("j1", TaskType::ExportParts).await.unwrap();
        assert_eq!(first.status, TaskStatus::Pending);

        let sessions = SessionRegistry::new();
        sessions.open("stale", vec!["p0".into()]);
        let metrics = FederaMetrics::new();

        let timeouts = ReaperTimeouts {
            cleanup_running: Duration::from_secs(600),
            session_idle: Duration::ZERO,
        };
        reap(&cleanup, &sessions, &metrics, timeouts).await;

        let task = cleanup.get_or_create("j1", TaskType::ExportParts).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(sessions.is_empty());
        assert!(metrics.encode().contains("federa_reaper_redriven_total 1"));
    }

    #[tokio::test]
    async fn reap_recovers_a_task_left_running() {
        let store = Arc::new(MemoryCleanupStore::new());
        let cleanup = CleanupService::new(
            store.clone(),
            Arc::new(FlakyTeardown(AtomicU32::new(1))),
            3,
        );
        cleanup.register_job("j2", &[TaskType::WarehouseJob]).await.unwrap();
        // The process that claimed it went away mid-teardown.
        store.claim("j2", TaskType::WarehouseJob).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let metrics = FederaMetrics::new();
        let timeouts = ReaperTimeouts {
            cleanup_running: Duration::ZERO,
            session_idle: Duration::from_secs(600),
        };
        reap(&cleanup, &SessionRegistry::new(), &metrics, timeouts).await;

        let task = cleanup.get_or_create("j2", TaskType::WarehouseJob).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 1);
        let text = metrics.encode();
        assert!(text.contains("federa_reaper_reclaimed_total 1"));
        assert!(text.contains("federa_reaper_redriven_total 1"));
    }
}
