//! Phase B: list, download, decode and stream a job's part files.
//!
//! All parts are downloaded before any is processed. The job's staging
//! directory is removed on every exit path, including cancellation.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use federa_core::{FederaError, Result, RetryPolicy};
use object_store::ObjectStore;
use tracing::{debug, info, warn};

use crate::decode::decode_part;
use crate::download::download_part;
use crate::export::ExportFormat;
use crate::frame::encode_batch;
use crate::parts::list_parts;
use crate::session::SessionRegistry;
use crate::sink::{send_with_retry, BatchSink};

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub csv_batch_rows: usize,
    pub parquet_batch_rows: usize,
    pub staging_dir: PathBuf,
    pub download_policy: RetryPolicy,
    pub send_policy: RetryPolicy,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            csv_batch_rows: 8192,
            parquet_batch_rows: 8192,
            staging_dir: PathBuf::from("./staging"),
            download_policy: RetryPolicy::exponential(
                3,
                Duration::from_millis(200),
                Duration::from_secs(5),
            ),
            send_policy: RetryPolicy::linear(3, Duration::from_millis(100)),
        }
    }
}

impl StreamSettings {
    fn batch_rows(&self, format: ExportFormat) -> usize {
        match format {
            ExportFormat::Csv => self.csv_batch_rows,
            ExportFormat::Parquet => self.parquet_batch_rows,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub parts: usize,
    pub batches: usize,
    pub rows: usize,
    pub bytes: usize,
}

/// Stream every part of `job_id` to `sink` in sequence order.
///
/// A job without rows still produces exactly one (empty) batch carrying
/// `schema`. Progress is recorded in `sessions` under the job id.
pub async fn stream_parts(
    store: &Arc<dyn ObjectStore>,
    job_id: &str,
    format: ExportFormat,
    schema: &SchemaRef,
    settings: &StreamSettings,
    sink: &dyn BatchSink,
    sessions: &SessionRegistry,
) -> Result<StreamStats> {
    let staging = settings.staging_dir.join(job_id);
    tokio::fs::create_dir_all(&staging).await?;

    let result = run(store, job_id, format, schema, settings, sink, sessions, &staging).await;

    remove_staging(&staging).await;
    match &result {
        Ok(stats) => info!(
            "Job {}: streamed {} part(s), {} batch(es), {} row(s)",
            job_id, stats.parts, stats.batches, stats.rows
        ),
        Err(e) => warn!("Job {}: stream aborted: {}", job_id, e),
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn run(
    store: &Arc<dyn ObjectStore>,
    job_id: &str,
    format: ExportFormat,
    schema: &SchemaRef,
    settings: &StreamSettings,
    sink: &dyn BatchSink,
    sessions: &SessionRegistry,
    staging: &FsPath,
) -> Result<StreamStats> {
    let parts = list_parts(store, job_id).await?;
    sessions.open(
        job_id,
        parts.iter().map(|p| p.file_name().to_string()).collect(),
    );

    let mut local = Vec::with_capacity(parts.len());
    for part in &parts {
        ensure_open(sink)?;
        local.push(download_part(store, part, staging, &settings.download_policy).await?);
    }

    let mut stats = StreamStats {
        parts: parts.len(),
        ..Default::default()
    };
    let batch_rows = settings.batch_rows(format);
    for (index, path) in local.into_iter().enumerate() {
        ensure_open(sink)?;
        let batches = decode_blocking(path, format, schema.clone(), batch_rows).await?;
        for batch in &batches {
            send(sink, batch, settings, &mut stats).await?;
        }
        sessions.complete(job_id, index);
        debug!("Job {}: part {} sent ({} batch(es))", job_id, index, batches.len());
    }

    if stats.batches == 0 {
        send(sink, &RecordBatch::new_empty(schema.clone()), settings, &mut stats).await?;
    }
    Ok(stats)
}

fn ensure_open(sink: &dyn BatchSink) -> Result<()> {
    if sink.is_cancelled() {
        return Err(FederaError::StreamLost("client disconnected".to_string()));
    }
    Ok(())
}

async fn send(
    sink: &dyn BatchSink,
    batch: &RecordBatch,
    settings: &StreamSettings,
    stats: &mut StreamStats,
) -> Result<()> {
    let payload = encode_batch(batch)?;
    let len = payload.len();
    send_with_retry(sink, payload, &settings.send_policy).await?;
    stats.batches += 1;
    stats.rows += batch.num_rows();
    stats.bytes += len;
    Ok(())
}

async fn decode_blocking(
    path: PathBuf,
    format: ExportFormat,
    schema: SchemaRef,
    batch_rows: usize,
) -> Result<Vec<RecordBatch>> {
    tokio::task::spawn_blocking(move || decode_part(&path, format, &schema, batch_rows))
        .await
        .map_err(|e| FederaError::Io(std::io::Error::other(e)))?
}

async fn remove_staging(dir: &FsPath) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staging dir {}: {}", dir.display(), e),
    }
}
