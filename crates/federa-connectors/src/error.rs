//! Mapping of driver and client errors into the shared taxonomy.

use federa_core::FederaError;

/// Classify a sqlx error.
pub fn sql_err(e: sqlx::Error) -> FederaError {
    match e {
        sqlx::Error::Io(io) => FederaError::Connection(io.to_string()),
        sqlx::Error::Tls(tls) => FederaError::Connection(format!("tls: {}", tls)),
        sqlx::Error::PoolTimedOut => {
            FederaError::Connection("timed out acquiring a connection".to_string())
        }
        sqlx::Error::Database(db) => FederaError::from_sql_message(db.message().to_string()),
        other => FederaError::from_sql_message(other.to_string()),
    }
}

/// Classify an object-store error. Missing objects are reported as
/// non-retryable so callers can treat them as no-ops.
pub fn store_err(e: object_store::Error) -> FederaError {
    match e {
        object_store::Error::NotFound { path, .. } => {
            FederaError::ObjectStore(format!("object not found: {}", path))
        }
        object_store::Error::Generic { store, source } => {
            let msg = source.to_string();
            if is_transient(&msg) {
                FederaError::Retryable(format!("{}: {}", store, msg))
            } else {
                FederaError::ObjectStore(format!("{}: {}", store, msg))
            }
        }
        other => {
            let msg = other.to_string();
            if is_transient(&msg) {
                FederaError::Retryable(msg)
            } else {
                FederaError::ObjectStore(msg)
            }
        }
    }
}

/// Classify a reqwest error.
pub fn http_err(e: reqwest::Error) -> FederaError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        FederaError::Retryable(e.to_string())
    } else if e.status().is_some_and(|s| s.is_server_error()) {
        FederaError::Retryable(e.to_string())
    } else {
        FederaError::Warehouse(e.to_string())
    }
}

const TRANSIENT_PATTERNS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection closed",
    "broken pipe",
    "temporarily unavailable",
    "slowdown",
    "slow down",
    "503",
    "502",
    "500 internal",
    "error sending request",
];

fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Whether an object-store error means the object simply is not there.
pub fn is_not_found(e: &object_store::Error) -> bool {
    matches!(e, object_store::Error::NotFound { .. })
}
