//! Federa Core - shared model, dialect profiles and type bridge
//!
//! This crate has no I/O of its own. It defines the data model every other
//! crate passes around, the per-dialect capability set, the mapping between
//! source, warehouse and Arrow types, and the retry policy used by the
//! import and streaming pipelines.

pub mod dialect;
pub mod error;
pub mod model;
pub mod retry;
pub mod types;

pub use dialect::{Dialect, DialectProfile, ParamStyle, TlsUrls, TruststoreFormat};
pub use error::{classify_connection_error, FederaError, Result};
pub use model::{
    ensure_unique_columns, validate_job_id, ColumnInfo, ConnectionInfo, ExternalTableConfig,
    TlsArtifact, TlsArtifactSet, TlsConfig, TlsRole, MAX_JOB_ID_LEN,
};
pub use retry::{Backoff, RetryPolicy};
pub use types::{columnar_to_warehouse_type, to_columnar_type, to_warehouse_type, TypeSystem};
