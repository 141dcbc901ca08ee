//! Read and write orchestration behind the RPC endpoints.
//!
//! A read resolves its source to a warehouse table (provisioning and
//! importing first when the source is external), exports it to the object
//! store and streams the parts back. Cleanup tasks are registered before any
//! state is created and executed in the background once the read ends,
//! whatever the outcome.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use arrow::ipc::reader::StreamReader;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use federa_cleanup::{CleanupService, TaskType};
use federa_connectors::{describe_table, FilterCondition, S3Config, SortRule, StreamLoadClient, StreamLoadResult};
use federa_core::{columnar_to_warehouse_type, validate_job_id, ConnectionInfo, FederaError, RetryPolicy};
use federa_provision::ddl::{self, synthetic_pk_name};
use federa_provision::{job_database, provision_and_import, FederationContext, ImportLocks};
use federa_stream::{
    build_select, encode_csv, export_schema, outfile_sql, run_export, stream_parts, BatchSink,
    ExportFormat, ExportTarget, SessionRegistry, StreamSettings, StreamStats,
};
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::FederaMetrics;

/// Bulk load of one delimited batch into a warehouse table.
#[async_trait]
pub trait BulkLoader: Send + Sync {
    async fn load(
        &self,
        database: &str,
        table: &str,
        label: &str,
        columns: &[String],
        body: Vec<u8>,
    ) -> federa_core::Result<StreamLoadResult>;
}

#[async_trait]
impl BulkLoader for StreamLoadClient {
    async fn load(
        &self,
        database: &str,
        table: &str,
        label: &str,
        columns: &[String],
        body: Vec<u8>,
    ) -> federa_core::Result<StreamLoadResult> {
        StreamLoadClient::load(self, database, table, label, columns, body).await
    }
}

pub struct AppState {
    pub ctx: Arc<FederationContext>,
    pub export_store: Arc<dyn ObjectStore>,
    pub s3: S3Config,
    pub export_bucket: String,
    pub export_format: ExportFormat,
    pub export_max_file_size: String,
    pub stream: StreamSettings,
    pub send_timeout: Duration,
    pub channel_capacity: usize,
    pub loader: Arc<dyn BulkLoader>,
    pub cleanup: CleanupService,
    pub sessions: Arc<SessionRegistry>,
    pub metrics: FederaMetrics,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadSource {
    /// A live relational table, staged through a per-job external table.
    External {
        connection: ConnectionInfo,
        #[serde(default)]
        pk_column: Option<String>,
        #[serde(default)]
        batch_size: Option<u64>,
    },
    /// An existing warehouse table.
    Internal { database: String, table: String },
    /// A table already staged by an earlier job.
    Staged { job_id: String, table: String },
}

impl ReadSource {
    /// Cleanup owed by a read of this source.
    fn cleanup_tasks(&self) -> Vec<TaskType> {
        match self {
            ReadSource::External { .. } => vec![TaskType::WarehouseJob, TaskType::ExportParts],
            _ => vec![TaskType::ExportParts],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadRequest {
    #[serde(default)]
    pub job_id: Option<String>,
    pub source: ReadSource,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub sort: Vec<SortRule>,
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
}

impl ReadRequest {
    /// The caller's job id, or a fresh one. Every id the read will turn into
    /// object-store prefixes or warehouse names is checked here.
    pub fn resolve_job_id(&mut self) -> federa_core::Result<String> {
        let job_id = self
            .job_id
            .get_or_insert_with(|| Uuid::new_v4().simple().to_string())
            .clone();
        validate_job_id(&job_id)?;
        if let ReadSource::Staged { job_id: staged, .. } = &self.source {
            validate_job_id(staged)?;
        }
        Ok(job_id)
    }
}

/// Run a read end to end, streaming batches into `sink`.
pub async fn run_read(
    state: &AppState,
    job_id: &str,
    req: &ReadRequest,
    sink: &dyn BatchSink,
) -> Result<StreamStats> {
    validate_job_id(job_id)?;
    let tasks = req.source.cleanup_tasks();
    state
        .cleanup
        .register_job(job_id, &tasks)
        .await
        .context("Failed to register cleanup")?;

    let result = read_inner(state, job_id, req, sink).await;
    spawn_cleanup(state.cleanup.clone(), state.metrics.clone(), job_id.to_string(), tasks);
    result
}

async fn read_inner(
    state: &AppState,
    job_id: &str,
    req: &ReadRequest,
    sink: &dyn BatchSink,
) -> Result<StreamStats> {
    let (database, table, default_columns) = match &req.source {
        ReadSource::External {
            connection,
            pk_column,
            batch_size,
        } => {
            let (job, report) = provision_and_import(
                &state.ctx,
                job_id,
                connection,
                pk_column.as_deref(),
                *batch_size,
            )
            .await
            .map_err(|e| {
                state.metrics.import_ranges_failed.inc();
                e
            })
            .with_context(|| format!("Import from {} failed", connection.redacted()))?;
            state
                .metrics
                .import_ranges_completed
                .inc_by(report.ranges as u64);
            let columns = connection.columns.iter().map(|c| c.name.clone()).collect();
            (job.names.database, job.names.internal_table, columns)
        }
        ReadSource::Internal { database, table } => (database.clone(), table.clone(), Vec::new()),
        ReadSource::Staged { job_id: staged, table } => (job_database(staged), table.clone(), Vec::new()),
    };

    let warehouse = state.ctx.warehouse.as_ref();
    let described = describe_table(warehouse, &database, &table)
        .await
        .with_context(|| format!("Failed to describe {}.{}", database, table))?;
    let projection = if req.columns.is_empty() {
        &default_columns
    } else {
        &req.columns
    };
    let (schema, names) = export_schema(&described, projection)?;

    let select = build_select(&database, &table, &names, &req.filters, &req.sort)?;
    let target = ExportTarget {
        bucket: &state.export_bucket,
        job_id,
        format: state.export_format,
        s3: &state.s3,
        max_file_size: &state.export_max_file_size,
    };
    run_export(warehouse, &outfile_sql(&select, &target), job_id)
        .await
        .context("Export failed")?;

    state.metrics.active_streams.inc();
    let streamed = stream_parts(
        &state.export_store,
        job_id,
        state.export_format,
        &schema,
        &state.stream,
        sink,
        &state.sessions,
    )
    .await;
    state.metrics.active_streams.dec();

    let stats = streamed.context("Stream failed")?;
    state.metrics.batches_sent.inc_by(stats.batches as u64);
    state.metrics.parts_downloaded.inc_by(stats.parts as u64);
    Ok(stats)
}

/// Execute a job's cleanup tasks without blocking the caller. Failures stay
/// pending for the reaper.
pub fn spawn_cleanup(cleanup: CleanupService, metrics: FederaMetrics, job_id: String, tasks: Vec<TaskType>) {
    tokio::spawn(async move {
        for task_type in tasks {
            match cleanup.execute(&job_id, task_type).await {
                Ok(task) => metrics.record_cleanup(&task),
                Err(e) => warn!("Cleanup {}/{} not executed: {}", job_id, task_type, e),
            }
        }
    });
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    pub batches: usize,
    pub rows: usize,
}

/// Load an Arrow IPC stream into `database.table`, creating the table from
/// the stream's schema when it does not exist.
pub async fn run_write(state: &AppState, database: &str, table: &str, body: Bytes) -> Result<WriteSummary> {
    let reader = StreamReader::try_new(Cursor::new(body), None).context("Invalid Arrow IPC stream")?;
    let schema = reader.schema();
    if schema.fields().is_empty() {
        bail!("write stream has no columns");
    }
    let batches = reader
        .collect::<std::result::Result<Vec<RecordBatch>, _>>()
        .context("Invalid Arrow IPC batch")?;

    let columns: Vec<(String, String)> = schema
        .fields()
        .iter()
        .map(|f| (f.name().clone(), columnar_to_warehouse_type(f.data_type())))
        .collect();
    let names: Vec<String> = columns.iter().map(|(n, _)| n.clone()).collect();

    let ctx = &state.ctx;
    let settings = &ctx.settings;
    let policy = RetryPolicy::exponential(
        settings.import_max_retry,
        settings.import_retry_delay,
        settings.import_retry_delay * 16,
    );

    let key = ImportLocks::key(database, table);
    let summary = ctx
        .locks
        .with_lock(&key, || async {
            ctx.warehouse.execute(&ddl::create_database(database)).await?;
            ctx.warehouse
                .execute(&ddl::create_table_if_not_exists(
                    database,
                    table,
                    &synthetic_pk_name(),
                    &columns,
                    settings.replication_num,
                ))
                .await?;

            let mut summary = WriteSummary::default();
            for batch in batches.iter().filter(|b| b.num_rows() > 0) {
                let payload = encode_csv(batch)?;
                let label = format!("federa_{}_{}", Uuid::new_v4().simple(), summary.batches);
                let what = format!("stream load {}", label);
                policy
                    .run(
                        &what,
                        |_| state.loader.load(database, table, &label, &names, payload.clone()),
                        FederaError::is_retryable,
                    )
                    .await?;
                summary.batches += 1;
                summary.rows += batch.num_rows();
            }
            Ok::<_, FederaError>(summary)
        })
        .await
        .with_context(|| format!("Write into {}.{} failed", database, table))?;

    state.metrics.rows_written.inc_by(summary.rows as u64);
    info!(
        "Wrote {} row(s) in {} batch(es) into {}.{}",
        summary.rows, summary.batches, database, table
    );
    Ok(summary)
}
