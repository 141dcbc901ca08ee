//! Warehouse DDL rendering.
//!
//! Everything here is a pure function of its inputs so the exact statements
//! can be asserted in tests.

use federa_connectors::warehouse::{literal, quote};
use federa_core::{ColumnInfo, Dialect, ExternalTableConfig};
use rand::Rng;

/// Catalog under which TLS file resources are registered.
pub const FILE_CATALOG: &str = "federa";

/// Warehouse object names derived from a job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNames {
    pub database: String,
    pub resource: String,
    pub external_table: String,
    pub internal_table: String,
}

/// Lowercase alphanumerics and underscores only.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl JobNames {
    pub fn new(job_id: &str, source_table: &str) -> Self {
        let table = sanitize(source_table);
        Self {
            database: job_database(job_id),
            resource: job_resource(job_id),
            external_table: format!("ext_{}", table),
            internal_table: format!("int_{}", table),
        }
    }
}

/// Warehouse database that holds every object of one job.
pub fn job_database(job_id: &str) -> String {
    format!("job_{}", sanitize(job_id))
}

/// External JDBC resource of one job.
pub fn job_resource(job_id: &str) -> String {
    format!("res_{}", sanitize(job_id))
}

/// `pk_` followed by five random hex digits.
pub fn synthetic_pk_name() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..0x10_0000);
    format!("pk_{:05x}", n)
}

fn properties(pairs: &[(&str, &str)]) -> String {
    let rendered: Vec<String> = pairs
        .iter()
        .map(|(k, v)| format!("{} = {}", literal(k), literal(v)))
        .collect();
    format!("PROPERTIES ({})", rendered.join(", "))
}

pub fn create_database(database: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", quote(database))
}

pub fn drop_database(database: &str) -> String {
    format!("DROP DATABASE IF EXISTS {} FORCE", quote(database))
}

pub fn drop_table(database: &str, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}.{} FORCE", quote(database), quote(table))
}

pub fn drop_resource(resource: &str) -> String {
    format!("DROP RESOURCE IF EXISTS {}", quote(resource))
}

/// `table_type` property of a JDBC external table.
pub fn jdbc_table_type(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::MySql | Dialect::MariaDb => "mysql",
        Dialect::Postgres => "postgresql",
        Dialect::SqlServer => "sqlserver",
    }
}

pub fn create_resource(cfg: &ExternalTableConfig) -> String {
    format!(
        "CREATE EXTERNAL RESOURCE {} {}",
        quote(&cfg.resource_name),
        properties(&[
            ("type", "jdbc"),
            ("user", &cfg.user),
            ("password", &cfg.password),
            ("jdbc_url", &cfg.jdbc_url),
            ("driver_url", &cfg.driver_url),
            ("driver_class", &cfg.driver_class),
        ])
    )
}

fn column_defs(columns: &[ColumnInfo], dialect: Dialect) -> Vec<String> {
    columns
        .iter()
        .map(|c| {
            format!(
                "{} {} NULL",
                quote(&c.name),
                dialect.profile().warehouse_type(&c.source_type)
            )
        })
        .collect()
}

pub fn create_external_table(cfg: &ExternalTableConfig) -> String {
    format!(
        "CREATE EXTERNAL TABLE {}.{} ({}) ENGINE=JDBC {}",
        quote(&cfg.database),
        quote(&cfg.external_table),
        column_defs(&cfg.columns, cfg.dialect).join(", "),
        properties(&[
            ("resource", &cfg.resource_name),
            ("table", &cfg.source_table),
            ("table_type", jdbc_table_type(cfg.dialect)),
        ])
    )
}

/// OLAP table keyed by the synthetic auto-increment column.
pub fn create_internal_table(cfg: &ExternalTableConfig, replication_num: u16) -> String {
    olap_table(
        "CREATE TABLE",
        &cfg.database,
        &cfg.internal_table,
        &cfg.pk_column,
        column_defs(&cfg.columns, cfg.dialect),
        replication_num,
    )
}

/// Like [`create_internal_table`] but for columns already in warehouse types.
pub fn create_table_if_not_exists(
    database: &str,
    table: &str,
    pk_column: &str,
    columns: &[(String, String)],
    replication_num: u16,
) -> String {
    let defs = columns
        .iter()
        .map(|(name, ty)| format!("{} {} NULL", quote(name), ty))
        .collect();
    olap_table(
        "CREATE TABLE IF NOT EXISTS",
        database,
        table,
        pk_column,
        defs,
        replication_num,
    )
}

fn olap_table(
    verb: &str,
    database: &str,
    table: &str,
    pk_column: &str,
    mut defs: Vec<String>,
    replication_num: u16,
) -> String {
    let pk = quote(pk_column);
    defs.insert(0, format!("{} BIGINT NOT NULL AUTO_INCREMENT", pk));
    let replication = replication_num.to_string();
    format!(
        "{} {}.{} ({}) ENGINE=OLAP UNIQUE KEY({}) DISTRIBUTED BY HASH({}) BUCKETS AUTO {}",
        verb,
        quote(database),
        quote(table),
        defs.join(", "),
        pk,
        pk,
        properties(&[("replication_num", &replication)])
    )
}

fn column_list(columns: &[ColumnInfo]) -> String {
    columns
        .iter()
        .map(|c| quote(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT INTO internal (cols) SELECT cols FROM external [WHERE ...]`.
pub fn insert_select(cfg: &ExternalTableConfig, predicate: Option<&str>) -> String {
    let cols = column_list(&cfg.columns);
    let mut sql = format!(
        "INSERT INTO {}.{} ({}) SELECT {} FROM {}.{}",
        quote(&cfg.database),
        quote(&cfg.internal_table),
        cols,
        cols,
        quote(&cfg.database),
        quote(&cfg.external_table)
    );
    if let Some(p) = predicate {
        sql.push_str(" WHERE ");
        sql.push_str(p);
    }
    sql
}

/// Range predicate on the source key, quoted for the source dialect.
pub fn key_range_predicate(dialect: Dialect, pk_column: &str, start: i64, end: i64) -> String {
    format!(
        "{} BETWEEN {} AND {}",
        dialect.profile().quote_identifier(pk_column),
        start,
        end
    )
}

pub fn create_file(database: &str, file_name: &str, url: &str) -> String {
    format!(
        "CREATE FILE {} IN {} {}",
        literal(file_name),
        quote(database),
        properties(&[("url", url), ("catalog", FILE_CATALOG)])
    )
}

pub fn drop_file(database: &str, file_name: &str) -> String {
    format!(
        "DROP FILE {} FROM {} {}",
        literal(file_name),
        quote(database),
        properties(&[("catalog", FILE_CATALOG)])
    )
}
