//! Warehouse SQL client.
//!
//! The warehouse speaks the MySQL wire protocol. DDL such as
//! `CREATE EXTERNAL RESOURCE` is not preparable, so every statement goes over
//! the text protocol via `sqlx::raw_sql`.

use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use federa_core::{ColumnInfo, FederaError, Result};
use regex::Regex;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row};
use tracing::{debug, info};

use crate::error::sql_err;

/// Rows returned by a warehouse query, every value in its text form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    pub fn new(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(|v| v.map(str::to_string)).collect())
                .collect(),
        }
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))
    }

    /// Value of `column` in row `row`, `None` for SQL NULL or unknown column.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.index_of(column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Minimal SQL surface the engine needs from the warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a statement that returns no rows.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Run a statement and collect its rows.
    async fn query(&self, sql: &str) -> Result<QueryResult>;
}

/// Warehouse reached through a MySQL-protocol connection pool.
pub struct DorisWarehouse {
    pool: MySqlPool,
}

impl DorisWarehouse {
    /// Connect to the warehouse frontend, e.g. `mysql://root:pw@fe:9030`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(sql_err)?;
        info!("Connected to warehouse");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl Warehouse for DorisWarehouse {
    async fn execute(&self, sql: &str) -> Result<()> {
        debug!("warehouse execute: {}", redact_sql(sql));
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<QueryResult> {
        debug!("warehouse query: {}", redact_sql(sql));
        let rows: Vec<MySqlRow> = sqlx::raw_sql(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;

        let columns = rows
            .first()
            .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(row.len());
            for i in 0..row.len() {
                // Text protocol: every value arrives as its textual form.
                let v: Option<String> = row.try_get_unchecked(i).map_err(sql_err)?;
                values.push(v);
            }
            out.push(values);
        }
        Ok(QueryResult { columns, rows: out })
    }
}

struct SecretPatterns {
    property: Regex,
    url_param: Regex,
}

fn secret_patterns() -> Option<&'static SecretPatterns> {
    static PATTERNS: OnceLock<Option<SecretPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(SecretPatterns {
                // "password" = "...", "s3.secret_key" = "...", "s3.access_key" = "..."
                property: Regex::new(
                    r#"(?i)("[^"]*(?:password|secret|access_key)[^"]*"\s*=\s*)"(?:[^"\\]|\\.)*""#,
                )
                .ok()?,
                // keyStorePassword=... inside a JDBC URL or sslfactoryarg list
                url_param: Regex::new(r#"(?i)([a-z_.]*password=)[^&;,"\s]*"#).ok()?,
            })
        })
        .as_ref()
}

/// Statement text safe for logs: credential values are masked.
pub fn redact_sql(sql: &str) -> String {
    match secret_patterns() {
        Some(p) => {
            let masked = p.property.replace_all(sql, r#"${1}"***""#);
            p.url_param.replace_all(&masked, "${1}***").into_owned()
        }
        None => sql.split_whitespace().take(2).collect::<Vec<_>>().join(" "),
    }
}

/// Quote a warehouse identifier.
pub fn quote(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote a string literal for warehouse SQL.
pub fn literal(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Introspect a warehouse table with `DESCRIBE`.
pub async fn describe_table(
    warehouse: &dyn Warehouse,
    database: &str,
    table: &str,
) -> Result<Vec<ColumnInfo>> {
    let result = warehouse
        .query(&format!("DESCRIBE {}.{}", quote(database), quote(table)))
        .await?;
    if result.is_empty() {
        return Err(FederaError::Schema(format!(
            "table {}.{} has no columns",
            database, table
        )));
    }
    let mut columns = Vec::with_capacity(result.len());
    for i in 0..result.len() {
        let name = result
            .get(i, "Field")
            .ok_or_else(|| FederaError::Schema("DESCRIBE row without Field".to_string()))?;
        let source_type = result.get(i, "Type").unwrap_or("STRING");
        columns.push(ColumnInfo {
            name: name.to_string(),
            source_type: source_type.to_string(),
            nullable: result
                .get(i, "Null")
                .map(|n| n.eq_ignore_ascii_case("yes"))
                .unwrap_or(true),
            default_expr: result.get(i, "Default").map(str::to_string),
        });
    }
    Ok(columns)
}

/// Names of file resources registered in `database` under `catalog`.
pub async fn list_files(
    warehouse: &dyn Warehouse,
    database: &str,
    catalog: &str,
) -> Result<Vec<String>> {
    let result = warehouse
        .query(&format!("SHOW FILE FROM {}", quote(database)))
        .await?;
    Ok((0..result.len())
        .filter(|&i| result.get(i, "Catalog").map_or(true, |c| c == catalog))
        .filter_map(|i| result.get(i, "FileName").map(str::to_string))
        .collect())
}

/// Whether a warehouse error means the object is already gone.
pub fn is_missing_object(err: &FederaError) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("unknown database")
        || msg.contains("does not exist")
        || msg.contains("doesn't exist")
        || msg.contains("not exist")
        || msg.contains("unknown table")
}

// ---------------------------------------------------------------------------
// In-process warehouse used by tests across the workspace
// ---------------------------------------------------------------------------

struct ScriptedFailure {
    pattern: String,
    remaining: usize,
    message: String,
}

/// Records every statement and answers queries from canned results.
///
/// Failures are scripted by substring: the next `times` statements that
/// contain `pattern` fail with `message`.
#[derive(Default)]
pub struct RecordingWarehouse {
    statements: Mutex<Vec<String>>,
    failures: Mutex<Vec<ScriptedFailure>>,
    responses: Mutex<Vec<(String, VecDeque<QueryResult>)>>,
}

impl RecordingWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, pattern: &str, times: usize, message: &str) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ScriptedFailure {
                pattern: pattern.to_string(),
                remaining: times,
                message: message.to_string(),
            });
    }

    /// Answer queries starting with `prefix`; results are served in order and
    /// the last one repeats.
    pub fn respond(&self, prefix: &str, result: QueryResult) {
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, queue)) = responses.iter_mut().find(|(p, _)| p == prefix) {
            queue.push_back(result);
        } else {
            responses.push((prefix.to_string(), VecDeque::from([result])));
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn statements_containing(&self, needle: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.contains(needle))
            .collect()
    }

    fn record(&self, sql: &str) -> Result<()> {
        self.statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sql.to_string());
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(f) = failures
            .iter_mut()
            .find(|f| f.remaining > 0 && sql.contains(&f.pattern))
        {
            f.remaining -= 1;
            return Err(FederaError::from_sql_message(f.message.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn execute(&self, sql: &str) -> Result<()> {
        self.record(sql)
    }

    async fn query(&self, sql: &str) -> Result<QueryResult> {
        self.record(sql)?;
        let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        let found = responses
            .iter_mut()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()));
        Ok(match found {
            Some((_, queue)) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some((_, queue)) => queue.front().cloned().unwrap_or_default(),
            None => QueryResult::default(),
        })
    }
}
