//! Typed errors shared by every Federa crate.

use thiserror::Error;

/// Errors raised while provisioning, importing, streaming or cleaning up a job.
#[derive(Debug, Error)]
pub enum FederaError {
    /// The source could not be reached (refused, TLS handshake, auth).
    /// Always fatal to the current job and never retried blindly.
    #[error("connection failed: {0}")]
    Connection(String),
    /// A transient network failure against the object store or the stream.
    #[error("retryable failure: {0}")]
    Retryable(String),
    /// The transport succeeded but the load itself reported a failure.
    #[error("business failure: {0}")]
    Business(String),
    /// A required column is missing or the schema cannot be built.
    #[error("schema error: {0}")]
    Schema(String),
    /// Cleanup teardown failed.
    #[error("reconciliation failed: {0}")]
    Reconciliation(String),
    /// The caller went away; the stream cannot be resumed.
    #[error("stream lost: {0}")]
    StreamLost(String),
    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    Config(String),
    /// A warehouse statement failed.
    #[error("warehouse error: {0}")]
    Warehouse(String),
    /// An object-store call failed with a non-retryable error.
    #[error("object store error: {0}")]
    ObjectStore(String),
    /// Part files of an export are not dense.
    #[error("part sequence error: {0}")]
    PartSequence(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl FederaError {
    /// Whether the failure is transient and worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FederaError::Retryable(_) | FederaError::Io(_))
    }

    /// Map a raw driver message to a connection error when it looks like one,
    /// otherwise to a warehouse error.
    pub fn from_sql_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if classify_connection_error(&message) {
            FederaError::Connection(message)
        } else {
            FederaError::Warehouse(message)
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, FederaError>;

const CONNECTION_PATTERNS: &[&str] = &[
    "connection refused",
    "communications link failure",
    "connect timed out",
    "connection timed out",
    "handshake",
    "certificate",
    "unknown host",
    "no route to host",
    "name or service not known",
    "access denied",
    "password authentication failed",
    "login failed",
];

/// Matched only at the start of a word, so "classloader" is not SSL.
const CONNECTION_WORD_PREFIXES: &[&str] = &["ssl", "tls"];

fn starts_word(haystack: &str, prefix: &str) -> bool {
    haystack.match_indices(prefix).any(|(i, _)| {
        haystack[..i]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_ascii_alphanumeric())
    })
}

/// Recognise source connection failures by message pattern.
pub fn classify_connection_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONNECTION_PATTERNS.iter().any(|p| lower.contains(p))
        || CONNECTION_WORD_PREFIXES.iter().any(|p| starts_word(&lower, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_refused_connection() {
        assert!(classify_connection_error(
            "errCode = 2, detailMessage = Communications link failure"
        ));
        assert!(classify_connection_error("SSL handshake aborted"));
        assert!(classify_connection_error("Access denied for user 'x'@'y'"));
    }

    #[test]
    fn ordinary_sql_errors_are_not_connection_errors() {
        assert!(!classify_connection_error("Unknown column 'foo' in 'field list'"));
        assert!(!classify_connection_error("Table 'db.t' doesn't exist"));
    }

    #[test]
    fn ssl_matches_whole_words_only() {
        assert!(classify_connection_error("javax.net.ssl.SSLException: Received fatal alert"));
        assert!(classify_connection_error("TLS protocol version mismatch"));
        assert!(!classify_connection_error(
            "java.lang.ClassNotFoundException: failed in classloader for driver"
        ));
        assert!(!classify_connection_error("column 'outlsize' not found"));
    }

    #[test]
    fn from_sql_message_splits_taxonomy() {
        assert!(matches!(
            FederaError::from_sql_message("connection refused"),
            FederaError::Connection(_)
        ));
        assert!(matches!(
            FederaError::from_sql_message("syntax error near 'FROM'"),
            FederaError::Warehouse(_)
        ));
    }

    #[test]
    fn retryable_classification() {
        assert!(FederaError::Retryable("503".into()).is_retryable());
        assert!(!FederaError::Connection("refused".into()).is_retryable());
        assert!(!FederaError::Business("0 rows".into()).is_retryable());
    }
}
