//! Warehouse stream-load over HTTP.
//!
//! A stream load can return HTTP 200 and still have loaded nothing, so the
//! JSON body is always inspected before a load is considered durable.

use std::time::Duration;

use federa_core::{FederaError, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::http_err;

/// Field separator for loaded CSV. Non-printable so user data never collides.
pub const FIELD_SEPARATOR: u8 = 0x01;
/// Textual NULL marker.
pub const NULL_MARKER: &str = "\\N";

const PUBLISH_TIMEOUT: &str = "Publish Timeout";
const COMMITTED_HINT: &str = "transaction commit successfully";

/// Body of a stream-load response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamLoadResult {
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "Message", alias = "Msg", default)]
    pub message: String,
    #[serde(rename = "Label", default)]
    pub label: String,
    #[serde(rename = "NumberTotalRows", alias = "TotalRows", default)]
    pub total_rows: u64,
    #[serde(rename = "NumberLoadedRows", alias = "LoadedRows", default)]
    pub loaded_rows: u64,
    #[serde(rename = "NumberFilteredRows", alias = "FailLoadRows", default)]
    pub filtered_rows: u64,
    #[serde(rename = "ErrorURL", default)]
    pub error_url: Option<String>,
}

impl StreamLoadResult {
    /// Accept the load only when it is committed and every row landed.
    ///
    /// A "Publish Timeout" whose message says the transaction committed is
    /// accepted: the data is durable and only visibility is delayed. This is
    /// the only non-"Success" status treated as success.
    pub fn check(&self) -> Result<()> {
        let committed = self.status == "Success"
            || (self.status == PUBLISH_TIMEOUT
                && self.message.to_lowercase().contains(COMMITTED_HINT));
        if !committed {
            return Err(FederaError::Business(format!(
                "stream load {} returned status '{}': {}",
                self.label, self.status, self.message
            )));
        }
        if self.total_rows > 0 && self.loaded_rows == 0 {
            return Err(FederaError::Business(format!(
                "stream load {} loaded 0 of {} rows",
                self.label, self.total_rows
            )));
        }
        if self.filtered_rows > 0 {
            return Err(FederaError::Business(format!(
                "stream load {} rejected {} of {} rows{}",
                self.label,
                self.filtered_rows,
                self.total_rows,
                self.error_url
                    .as_deref()
                    .map(|u| format!(" (see {})", u))
                    .unwrap_or_default()
            )));
        }
        Ok(())
    }
}

/// Parse and check a raw response body.
pub fn parse_response(body: &str) -> Result<StreamLoadResult> {
    let result: StreamLoadResult = serde_json::from_str(body).map_err(|e| {
        FederaError::Warehouse(format!("unreadable stream load response: {}", e))
    })?;
    result.check()?;
    Ok(result)
}

/// HTTP client for `PUT /api/{db}/{table}/_stream_load`.
#[derive(Clone)]
pub struct StreamLoadClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl std::fmt::Debug for StreamLoadClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLoadClient")
            .field("base_url", &self.base_url)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

impl StreamLoadClient {
    pub fn new(base_url: &str, user: &str, password: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| FederaError::Config(format!("stream load client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    pub fn endpoint(&self, database: &str, table: &str) -> String {
        format!("{}/api/{}/{}/_stream_load", self.base_url, database, table)
    }

    /// Load `body` (separator-delimited CSV, `\N` nulls) into `database.table`.
    pub async fn load(
        &self,
        database: &str,
        table: &str,
        label: &str,
        columns: &[String],
        body: Vec<u8>,
    ) -> Result<StreamLoadResult> {
        let bytes = body.len();
        let response = self
            .http
            .put(self.endpoint(database, table))
            .basic_auth(&self.user, Some(&self.password))
            .header("Expect", "100-continue")
            .header("label", label)
            .header("format", "csv")
            .header("column_separator", "\\x01")
            .header("columns", columns.join(","))
            .body(body)
            .send()
            .await
            .map_err(http_err)?;

        let status = response.status();
        let text = response.text().await.map_err(http_err)?;
        if status.is_server_error() {
            return Err(FederaError::Retryable(format!(
                "stream load HTTP {}: {}",
                status, text
            )));
        }
        if !status.is_success() {
            return Err(FederaError::Warehouse(format!(
                "stream load HTTP {}: {}",
                status, text
            )));
        }

        match parse_response(&text) {
            Ok(result) => {
                info!(
                    "Stream load {} into {}.{}: {} rows, {} bytes",
                    label, database, table, result.loaded_rows, bytes
                );
                Ok(result)
            }
            Err(e) => {
                warn!("Stream load {} into {}.{} failed: {}", label, database, table, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_passes() {
        let r = parse_response(
            r#"{"Label":"l1","Status":"Success","Message":"OK",
                "NumberTotalRows":100,"NumberLoadedRows":100,"NumberFilteredRows":0}"#,
        )
        .unwrap();
        assert_eq!(r.loaded_rows, 100);
    }

    #[test]
    fn zero_loaded_with_success_status_is_business_failure() {
        let err = parse_response(
            r#"{"Status":"Success","TotalRows":10000,"LoadedRows":0,"FailLoadRows":10000}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FederaError::Business(_)));
        assert!(err.to_string().contains("loaded 0 of 10000"));
    }

    #[test]
    fn filtered_rows_fail_the_load() {
        let err = parse_response(
            r#"{"Status":"Success","NumberTotalRows":10,"NumberLoadedRows":9,
                "NumberFilteredRows":1,"ErrorURL":"http://be/err"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FederaError::Business(_)));
        assert!(err.to_string().contains("http://be/err"));
    }

    #[test]
    fn empty_load_is_fine() {
        parse_response(r#"{"Status":"Success","NumberTotalRows":0,"NumberLoadedRows":0}"#)
            .unwrap();
    }

    #[test]
    fn publish_timeout_after_commit_is_accepted() {
        parse_response(
            r#"{"Status":"Publish Timeout",
                "Message":"transaction commit successfully, BUT data will be visible later",
                "NumberTotalRows":5,"NumberLoadedRows":5}"#,
        )
        .unwrap();
    }

    #[test]
    fn other_statuses_fail() {
        for body in [
            r#"{"Status":"Publish Timeout","Message":"publish timed out","NumberTotalRows":5,"NumberLoadedRows":5}"#,
            r#"{"Status":"Fail","Message":"too many filtered rows"}"#,
            r#"{"Status":"Label Already Exists"}"#,
        ] {
            assert!(matches!(parse_response(body), Err(FederaError::Business(_))));
        }
    }

    #[test]
    fn garbage_body_is_warehouse_error() {
        assert!(matches!(
            parse_response("<html>502</html>"),
            Err(FederaError::Warehouse(_))
        ));
    }

    #[test]
    fn endpoint_and_debug() {
        let c = StreamLoadClient::new("http://be:8040/", "root", "secret").unwrap();
        assert_eq!(c.endpoint("db", "t"), "http://be:8040/api/db/t/_stream_load");
        assert!(!format!("{:?}", c).contains("secret"));
    }
}
