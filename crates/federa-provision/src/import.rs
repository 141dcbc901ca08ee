//! Batched import from the external table into the internal table.
//!
//! Without a declared key the whole table is copied by one
//! `INSERT ... SELECT`. With a key, `[MIN(pk), MAX(pk)]` is split into
//! consecutive ranges of `batch_size` keys and each range is copied and
//! retried on its own. A range that runs out of retries fails the job.

use federa_connectors::warehouse::quote;
use federa_connectors::{KeyBounds, ProbeTarget};
use federa_core::{ConnectionInfo, FederaError, Result, RetryPolicy};
use futures::{StreamExt, TryStreamExt};
use tracing::{info, warn};

use crate::context::FederationContext;
use crate::ddl;
use crate::locks::ImportLocks;
use crate::provisioner::ProvisionedJob;

/// Split `[min, max]` into consecutive inclusive ranges of `width` keys.
/// The last range keeps its full width even when it ends past `max`.
pub fn key_ranges(min: i64, max: i64, width: u64) -> Vec<(i64, i64)> {
    if width == 0 || min > max {
        return vec![];
    }
    let step = i64::try_from(width).unwrap_or(i64::MAX);
    let mut ranges = Vec::new();
    let mut start = min;
    loop {
        let end = start.saturating_add(step - 1);
        ranges.push((start, end));
        if end >= max {
            break;
        }
        start = end + 1;
    }
    ranges
}

/// Outcome of one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportReport {
    /// `db.table` that received the rows.
    pub target: String,
    /// Ranges issued; 1 for the single-statement path.
    pub ranges: usize,
    /// Attempts beyond the first, summed over ranges.
    pub retries: u32,
    pub rows: u64,
}

fn is_import_retryable(e: &FederaError) -> bool {
    !matches!(
        e,
        FederaError::Connection(_) | FederaError::Schema(_) | FederaError::Config(_)
    )
}

/// Copy the job's source rows into its internal table while holding the
/// destination lock.
pub async fn import_data(
    ctx: &FederationContext,
    job: &ProvisionedJob,
    conn: &ConnectionInfo,
    pk_column: Option<&str>,
    batch_size: Option<u64>,
) -> Result<ImportReport> {
    let key = ImportLocks::key(&job.config.database, &job.config.internal_table);
    ctx.locks
        .with_lock(&key, move || {
            import_unlocked(ctx, job, conn, pk_column, batch_size)
        })
        .await
}

async fn import_unlocked(
    ctx: &FederationContext,
    job: &ProvisionedJob,
    conn: &ConnectionInfo,
    pk_column: Option<&str>,
    batch_size: Option<u64>,
) -> Result<ImportReport> {
    let cfg = &job.config;
    let policy = RetryPolicy::exponential(
        ctx.settings.import_max_retry,
        ctx.settings.import_retry_delay,
        ctx.settings.import_retry_delay * 16,
    );

    let bounds = match pk_column {
        Some(pk) => {
            if !cfg.columns.iter().any(|c| c.name.eq_ignore_ascii_case(pk)) {
                return Err(FederaError::Schema(format!(
                    "key column '{}' is not among the imported columns",
                    pk
                )));
            }
            ctx.probe
                .key_bounds(ProbeTarget {
                    connection: conn,
                    pk_column: pk,
                    database: &cfg.database,
                    external_table: &cfg.external_table,
                })
                .await?
        }
        None => None,
    };

    let statements: Vec<(String, String)> = match (pk_column, bounds) {
        (Some(pk), Some(KeyBounds { min, max })) => {
            let width = batch_size.unwrap_or(ctx.settings.import_batch_size);
            key_ranges(min, max, width)
                .into_iter()
                .map(|(start, end)| {
                    let pred = ddl::key_range_predicate(cfg.dialect, pk, start, end);
                    (format!("[{}, {}]", start, end), ddl::insert_select(cfg, Some(&pred)))
                })
                .collect()
        }
        (Some(_), None) => {
            info!("Job {}: source is empty, importing with one statement", job.job_id);
            vec![("all".to_string(), ddl::insert_select(cfg, None))]
        }
        (None, _) => vec![("all".to_string(), ddl::insert_select(cfg, None))],
    };

    let ranges = statements.len();
    let parallelism = ctx.settings.import_parallelism.max(1);
    let retries: Vec<u32> = futures::stream::iter(statements)
        .map(|(label, sql)| {
            let policy = &policy;
            let wh = ctx.warehouse.as_ref();
            let job_id = job.job_id.as_str();
            async move {
                let mut attempts = 0;
                policy
                    .run(
                        &format!("job {} range {}", job_id, label),
                        |attempt| {
                            attempts = attempt;
                            let sql = sql.as_str();
                            async move { wh.execute(sql).await }
                        },
                        is_import_retryable,
                    )
                    .await
                    .map_err(|e| {
                        warn!("Job {}: range {} failed: {}", job_id, label, e);
                        e
                    })?;
                Ok::<u32, FederaError>(attempts.saturating_sub(1))
            }
        })
        .buffered(parallelism)
        .try_collect()
        .await?;

    let rows = count_rows(ctx, &cfg.database, &cfg.internal_table).await?;
    let report = ImportReport {
        target: format!("{}.{}", cfg.database, cfg.internal_table),
        ranges,
        retries: retries.iter().sum(),
        rows,
    };
    info!(
        "Job {}: imported {} rows into {} in {} range(s)",
        job.job_id, report.rows, report.target, report.ranges
    );
    Ok(report)
}

pub async fn count_rows(ctx: &FederationContext, database: &str, table: &str) -> Result<u64> {
    let result = ctx
        .warehouse
        .query(&format!(
            "SELECT COUNT(*) AS cnt FROM {}.{}",
            quote(database),
            quote(table)
        ))
        .await?;
    match result.get(0, "cnt") {
        Some(v) => v.trim().parse::<u64>().map_err(|_| {
            FederaError::Warehouse(format!(
                "row count of {}.{} is not a number: '{}'",
                database, table, v
            ))
        }),
        None => Ok(0),
    }
}
