//! Cleanup task model.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use federa_core::FederaError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a task tears down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Job database, its file resources, the JDBC resource and TLS objects.
    WarehouseJob,
    /// Exported part files under `{job_id}/`.
    ExportParts,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::WarehouseJob => "warehouse_job",
            TaskType::ExportParts => "export_parts",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = FederaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warehouse_job" => Ok(TaskType::WarehouseJob),
            "export_parts" => Ok(TaskType::ExportParts),
            other => Err(FederaError::Config(format!("unknown cleanup task type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = FederaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(FederaError::Config(format!("unknown cleanup status '{}'", other))),
        }
    }
}

/// One row per `(job_id, task_type)`. Rows are kept after completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupTask {
    pub id: Uuid,
    pub job_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CleanupTask {
    pub fn new(job_id: impl Into<String>, task_type: TaskType, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_id: job_id.into(),
            task_type,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Pending, or failed with retries left.
    pub fn is_redrivable(&self) -> bool {
        match self.status {
            TaskStatus::Pending => true,
            TaskStatus::Failed => self.has_retries_left(),
            TaskStatus::Running | TaskStatus::Completed => false,
        }
    }

    /// Record a failed attempt: back to pending, or failed once the retry
    /// budget is spent.
    pub fn record_failure(&mut self, error: String) {
        self.retry_count += 1;
        self.status = if self.has_retries_left() {
            TaskStatus::Pending
        } else {
            TaskStatus::Failed
        };
        self.last_error = Some(error);
        self.updated_at = Utc::now();
    }

    pub fn record_success(&mut self) {
        self.status = TaskStatus::Completed;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    /// Start over for a new run of the same job with a fresh retry budget.
    pub fn rearm(&mut self, max_retries: u32) {
        self.status = TaskStatus::Pending;
        self.retry_count = 0;
        self.max_retries = max_retries;
        self.last_error = None;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_exhaust_into_failed() {
        let mut task = CleanupTask::new("j1", TaskType::WarehouseJob, 3);
        task.record_failure("boom".into());
        task.record_failure("boom".into());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.is_redrivable());
        task.record_failure("boom".into());
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 3);
        assert!(!task.is_redrivable());
    }

    #[test]
    fn rearm_restores_the_retry_budget() {
        let mut task = CleanupTask::new("j1", TaskType::ExportParts, 1);
        task.record_failure("boom".into());
        assert_eq!(task.status, TaskStatus::Failed);
        task.rearm(3);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!((task.retry_count, task.max_retries), (0, 3));
        assert!(task.last_error.is_none());
    }

    #[test]
    fn names_parse_back() {
        for t in [TaskType::WarehouseJob, TaskType::ExportParts] {
            assert_eq!(t.as_str().parse::<TaskType>().unwrap(), t);
        }
        assert!("nope".parse::<TaskType>().is_err());
        assert_eq!("failed".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
    }
}
