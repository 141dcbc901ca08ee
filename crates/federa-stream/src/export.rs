//! Phase A: stage query results into the object store as ordered part files
//! with the warehouse's own `SELECT ... INTO OUTFILE`.

use std::str::FromStr;
use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use federa_connectors::warehouse::{literal, quote, Warehouse};
use federa_connectors::{build_order_clause, build_where_clause, FilterCondition, S3Config, SortRule};
use federa_core::{to_columnar_type, ColumnInfo, FederaError, Result, TypeSystem};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Parquet,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Parquet => "parquet",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = FederaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "parquet" => Ok(ExportFormat::Parquet),
            other => Err(FederaError::Config(format!("unknown export format '{}'", other))),
        }
    }
}

/// Where part files go.
#[derive(Debug, Clone)]
pub struct ExportTarget<'a> {
    pub bucket: &'a str,
    pub job_id: &'a str,
    pub format: ExportFormat,
    pub s3: &'a S3Config,
    /// Upper bound of a single part file, e.g. "256MB".
    pub max_file_size: &'a str,
}

impl ExportTarget<'_> {
    /// File-name prefix handed to the warehouse; it appends
    /// `<queryId>_<n>.<ext>`.
    pub fn uri_prefix(&self) -> String {
        format!("s3://{}/{}/data_", self.bucket, self.job_id)
    }
}

/// `SELECT cols FROM db.table [WHERE ..] [ORDER BY ..]`.
pub fn build_select(
    database: &str,
    table: &str,
    columns: &[String],
    filters: &[FilterCondition],
    sort: &[SortRule],
) -> Result<String> {
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
    };
    let filter = build_where_clause(filters).map_err(FederaError::Schema)?;
    Ok(format!(
        "SELECT {} FROM {}.{}{}{}",
        projection,
        quote(database),
        quote(table),
        filter,
        build_order_clause(sort)
    ))
}

/// Wrap a query in `INTO OUTFILE`.
pub fn outfile_sql(select: &str, target: &ExportTarget<'_>) -> String {
    let mut props: Vec<(&str, String)> = target.s3.warehouse_properties();
    props.push(("max_file_size", target.max_file_size.to_string()));
    if target.format == ExportFormat::Csv {
        props.push(("column_separator", "\\x01".to_string()));
        props.push(("line_delimiter", "\\n".to_string()));
    }
    let rendered: Vec<String> = props
        .iter()
        .map(|(k, v)| format!("{} = {}", literal(k), literal(v)))
        .collect();
    format!(
        "{} INTO OUTFILE {} FORMAT AS {} PROPERTIES ({})",
        select,
        literal(&target.uri_prefix()),
        target.format.extension().to_uppercase(),
        rendered.join(", ")
    )
}

/// Resolve a projection against the described columns and build the Arrow
/// schema of the export. An empty projection selects every column.
pub fn export_schema(described: &[ColumnInfo], projection: &[String]) -> Result<(SchemaRef, Vec<String>)> {
    let selected: Vec<&ColumnInfo> = if projection.is_empty() {
        described.iter().collect()
    } else {
        projection
            .iter()
            .map(|name| {
                described
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| FederaError::Schema(format!("column '{}' does not exist", name)))
            })
            .collect::<Result<_>>()?
    };
    let fields: Vec<Field> = selected
        .iter()
        .map(|c| {
            Field::new(
                c.name.clone(),
                to_columnar_type(TypeSystem::Warehouse, &c.source_type),
                true,
            )
        })
        .collect();
    let names = selected.iter().map(|c| c.name.clone()).collect();
    Ok((Arc::new(Schema::new(fields)), names))
}

/// What the warehouse reports after an export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub files: u64,
    pub rows: u64,
    pub bytes: u64,
}

/// Run the export. Returns the counts reported by the warehouse.
pub async fn run_export(warehouse: &dyn Warehouse, sql: &str, job_id: &str) -> Result<ExportSummary> {
    let result = warehouse.query(sql).await?;
    let num = |col: &str| {
        (0..result.len())
            .filter_map(|i| result.get(i, col))
            .filter_map(|v| v.parse::<u64>().ok())
            .sum::<u64>()
    };
    let summary = ExportSummary {
        files: num("FileNumber"),
        rows: num("TotalRows"),
        bytes: num("FileSize"),
    };
    info!(
        "Job {}: exported {} rows into {} file(s), {} bytes",
        job_id, summary.rows, summary.files, summary.bytes
    );
    Ok(summary)
}
