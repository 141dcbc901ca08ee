//! Read, write, progress and cleanup endpoints.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use federa_cleanup::{CleanupTask, TaskType};
use federa_core::FederaError;
use federa_stream::{ChannelSink, SessionProgress};
use futures::stream;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::jobs::{run_read, run_write, AppState, ReadRequest};

pub const JOB_ID_HEADER: &str = "x-federa-job-id";

pub fn rpc_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/read", post(read))
        .route("/v1/write", post(write))
        .route("/v1/jobs/:job_id/progress", get(progress))
        .route("/v1/cleanup/pending", get(pending_cleanup))
        .route("/v1/cleanup/:job_id/:task_type", post(execute_cleanup))
        .with_state(state)
}

/// POST /v1/read: stream the selected rows as framed Arrow IPC batches.
///
/// The response starts as soon as the job is accepted. A failure after that
/// point arrives as a terminal error frame.
async fn read(State(state): State<Arc<AppState>>, Json(mut req): Json<ReadRequest>) -> Response {
    let job_id = match req.resolve_job_id() {
        Ok(id) => id,
        Err(e) => {
            warn!("Read rejected: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    let (sink, rx) = ChannelSink::channel(state.channel_capacity, state.send_timeout);

    let task_state = state.clone();
    let task_job = job_id.clone();
    tokio::spawn(async move {
        if let Err(e) = run_read(&task_state, &task_job, &req, &sink).await {
            warn!("Read job {} failed: {:#}", task_job, e);
            sink.send_error(format!("{:#}", e)).await;
        }
    });

    // An unencodable frame ends the body early; the client sees a
    // truncated stream rather than a false end of stream.
    let frames = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| {
            let encoded = frame.encode();
            if let Err(e) = &encoded {
                warn!("Dropping read stream: {}", e);
            }
            (encoded, rx)
        })
    });
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::HeaderName::from_static(JOB_ID_HEADER), job_id),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct WriteParams {
    pub db: String,
    pub table: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WriteResponse {
    pub success: bool,
    pub message: String,
}

/// POST /v1/write: import an Arrow IPC stream into a warehouse table.
async fn write(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WriteParams>,
    body: Bytes,
) -> (StatusCode, Json<WriteResponse>) {
    match run_write(&state, &params.db, &params.table, body).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(WriteResponse {
                success: true,
                message: format!("imported {} row(s) in {} batch(es)", summary.rows, summary.batches),
            }),
        ),
        Err(e) => {
            warn!("Write into {}.{} failed: {:#}", params.db, params.table, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(WriteResponse {
                    success: false,
                    message: format!("{:#}", e),
                }),
            )
        }
    }
}

/// GET /v1/jobs/:job_id/progress
async fn progress(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<SessionProgress>, StatusCode> {
    state
        .sessions
        .progress(&job_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    100
}

fn cleanup_error(e: FederaError) -> (StatusCode, String) {
    let status = match &e {
        FederaError::Reconciliation(_) => StatusCode::CONFLICT,
        FederaError::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// GET /v1/cleanup/pending: tasks an external scheduler may re-drive.
async fn pending_cleanup(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Result<Json<Vec<CleanupTask>>, (StatusCode, String)> {
    state
        .cleanup
        .list_redrivable(params.page, params.page_size)
        .await
        .map(Json)
        .map_err(cleanup_error)
}

/// POST /v1/cleanup/:job_id/:task_type: execute one task now.
async fn execute_cleanup(
    State(state): State<Arc<AppState>>,
    Path((job_id, task_type)): Path<(String, String)>,
) -> Result<Json<CleanupTask>, (StatusCode, String)> {
    let task_type: TaskType = task_type.parse().map_err(cleanup_error)?;
    let task = state
        .cleanup
        .execute(&job_id, task_type)
        .await
        .map_err(cleanup_error)?;
    state.metrics.record_cleanup(&task);
    info!("Cleanup {}/{} is {}", job_id, task_type, task.status.as_str());
    Ok(Json(task))
}
