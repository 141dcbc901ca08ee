//! Federa Connectors - clients for everything outside the process
//!
//! - [`warehouse`]: MySQL-protocol SQL client, schema introspection and an
//!   in-process recording double
//! - [`s3`]: object-store construction and URI helpers
//! - [`pem`]: decoding of caller-supplied TLS material
//! - [`source`]: MIN/MAX probes against source tables
//! - [`stream_load`]: HTTP bulk load with result checking
//! - [`filter`]: filter and sort rendering

pub mod error;
pub mod filter;
pub mod pem;
pub mod s3;
pub mod source;
pub mod stream_load;
pub mod warehouse;

pub use error::{http_err, is_not_found, sql_err, store_err};
pub use filter::{build_order_clause, build_where_clause, FilterCondition, FilterOp, FilterValue, SortRule};
pub use pem::decode_pem;
pub use s3::{build_store, parse_s3_uri, public_url, S3Config};
pub use source::{
    mysql_options, pg_options, FixedProbe, KeyBounds, ProbeTarget, SourceProbe, SourceTls, SqlxProbe,
};
pub use stream_load::{StreamLoadClient, StreamLoadResult};
pub use warehouse::{describe_table, DorisWarehouse, QueryResult, RecordingWarehouse, Warehouse};
