//! Postgres-backed cleanup store, shared by every server instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use federa_core::{FederaError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::store::{CleanupStore, INTERRUPTED};
use crate::task::{CleanupTask, TaskType};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS cleanup_tasks (
    id UUID PRIMARY KEY,
    job_id TEXT NOT NULL,
    task_type TEXT NOT NULL,
    status TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (job_id, task_type)
)";

const COLUMNS: &str =
    "id, job_id, task_type, status, retry_count, max_retries, last_error, created_at, updated_at";

type TaskRow = (
    Uuid,
    String,
    String,
    String,
    i32,
    i32,
    Option<String>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn db_err(e: sqlx::Error) -> FederaError {
    FederaError::Reconciliation(format!("cleanup store: {}", e))
}

fn from_row(row: TaskRow) -> Result<CleanupTask> {
    let (id, job_id, task_type, status, retry_count, max_retries, last_error, created_at, updated_at) =
        row;
    Ok(CleanupTask {
        id,
        job_id,
        task_type: task_type.parse()?,
        status: status.parse()?,
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        last_error,
        created_at,
        updated_at,
    })
}

pub struct PgCleanupStore {
    pool: PgPool,
}

impl PgCleanupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        info!("Cleanup task table ready");
        Ok(())
    }
}

#[async_trait]
impl CleanupStore for PgCleanupStore {
    async fn get(&self, job_id: &str, task_type: TaskType) -> Result<Option<CleanupTask>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM cleanup_tasks WHERE job_id = $1 AND task_type = $2",
            COLUMNS
        ))
        .bind(job_id)
        .bind(task_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(from_row).transpose()
    }

    async fn insert_if_absent(&self, task: CleanupTask) -> Result<CleanupTask> {
        sqlx::query(
            "INSERT INTO cleanup_tasks (id, job_id, task_type, status, retry_count, max_retries, last_error, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (job_id, task_type) DO NOTHING",
        )
        .bind(task.id)
        .bind(&task.job_id)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(task.retry_count as i32)
        .bind(task.max_retries as i32)
        .bind(&task.last_error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.get(&task.job_id, task.task_type).await?.ok_or_else(|| {
            FederaError::Reconciliation(format!(
                "cleanup task {}/{} vanished after insert",
                task.job_id, task.task_type
            ))
        })
    }

    async fn rearm(&self, task: CleanupTask) -> Result<CleanupTask> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "INSERT INTO cleanup_tasks (id, job_id, task_type, status, retry_count, max_retries, last_error, created_at, updated_at)
             VALUES ($1, $2, $3, 'pending', 0, $4, NULL, $5, $5)
             ON CONFLICT (job_id, task_type) DO UPDATE
             SET status = 'pending', retry_count = 0, max_retries = EXCLUDED.max_retries,
                 last_error = NULL, updated_at = now()
             WHERE cleanup_tasks.status IN ('completed', 'failed')
             RETURNING {}",
            COLUMNS
        ))
        .bind(task.id)
        .bind(&task.job_id)
        .bind(task.task_type.as_str())
        .bind(task.max_retries as i32)
        .bind(task.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => from_row(row),
            // Conflict on a pending or running row: left as it is.
            None => self.get(&task.job_id, task.task_type).await?.ok_or_else(|| {
                FederaError::Reconciliation(format!(
                    "cleanup task {}/{} vanished after re-arm",
                    task.job_id, task.task_type
                ))
            }),
        }
    }

    async fn claim(&self, job_id: &str, task_type: TaskType) -> Result<Option<CleanupTask>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE cleanup_tasks SET status = 'running', updated_at = now()
             WHERE job_id = $1 AND task_type = $2
               AND (status = 'pending' OR (status = 'failed' AND retry_count < max_retries))
             RETURNING {}",
            COLUMNS
        ))
        .bind(job_id)
        .bind(task_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(from_row).transpose()
    }

    async fn update(&self, task: &CleanupTask) -> Result<()> {
        sqlx::query(
            "UPDATE cleanup_tasks
             SET status = $3, retry_count = $4, last_error = $5, updated_at = $6
             WHERE job_id = $1 AND task_type = $2",
        )
        .bind(&task.job_id)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(task.retry_count as i32)
        .bind(&task.last_error)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_redrivable(&self, page: u32, page_size: u32) -> Result<Vec<CleanupTask>> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM cleanup_tasks
             WHERE status = 'pending' OR (status = 'failed' AND retry_count < max_retries)
             ORDER BY created_at, id
             LIMIT $1 OFFSET $2",
            COLUMNS
        ))
        .bind(page_size as i64)
        .bind(page as i64 * page_size as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(from_row).collect()
    }

    async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<CleanupTask>> {
        // SET expressions read the pre-update row.
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "UPDATE cleanup_tasks
             SET retry_count = retry_count + 1,
                 status = CASE WHEN retry_count + 1 < max_retries THEN 'pending' ELSE 'failed' END,
                 last_error = $2,
                 updated_at = now()
             WHERE status = 'running' AND updated_at < $1
             RETURNING {}",
            COLUMNS
        ))
        .bind(cutoff)
        .bind(INTERRUPTED)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;

    #[test]
    fn rows_map_to_tasks() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let task = from_row((
            id,
            "j1".into(),
            "export_parts".into(),
            "failed".into(),
            2,
            3,
            Some("timeout".into()),
            now,
            now,
        ))
        .unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.task_type, TaskType::ExportParts);
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.is_redrivable());
    }

    #[test]
    fn unknown_status_is_rejected() {
        let now = Utc::now();
        let row = (Uuid::new_v4(), "j".into(), "export_parts".into(), "lost".into(), 0, 3, None, now, now);
        assert!(from_row(row).is_err());
    }
}
