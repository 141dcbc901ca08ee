//! Data model shared across provisioning, import, streaming and cleanup.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dialect::{Dialect, DialectProfile};
use crate::error::{FederaError, Result};

/// One column as reported by schema introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub source_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub default_expr: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            nullable: true,
            default_expr: None,
        }
    }
}

/// Reject column sets with duplicate names.
pub fn ensure_unique_columns(columns: &[ColumnInfo]) -> Result<()> {
    let mut seen = HashSet::with_capacity(columns.len());
    for col in columns {
        if !seen.insert(col.name.to_lowercase()) {
            return Err(FederaError::Schema(format!(
                "duplicate column '{}'",
                col.name
            )));
        }
    }
    Ok(())
}

/// Base64-encoded PEM material supplied with a source connection.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca_cert: Option<String>,
    #[serde(default)]
    pub client_cert: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("ca_cert", &self.ca_cert.as_ref().map(|_| "<pem>"))
            .field("client_cert", &self.client_cert.as_ref().map(|_| "<pem>"))
            .field("client_key", &self.client_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl TlsConfig {
    pub fn has_client_bundle(&self) -> bool {
        self.client_cert.is_some() && self.client_key.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.ca_cert.is_none() && self.client_cert.is_none() && self.client_key.is_none()
    }

    /// A client certificate and its key come as a pair.
    pub fn validate(&self) -> Result<()> {
        match (&self.client_cert, &self.client_key) {
            (Some(_), None) => Err(FederaError::Config(
                "tls client_cert was given without client_key".to_string(),
            )),
            (None, Some(_)) => Err(FederaError::Config(
                "tls client_key was given without client_cert".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Longest job id whose `job_` database name still fits the warehouse limit.
pub const MAX_JOB_ID_LEN: usize = 60;

/// Job ids become object-store prefixes and warehouse names verbatim, so
/// only lowercase ASCII letters, digits and underscores are accepted.
pub fn validate_job_id(job_id: &str) -> Result<()> {
    if job_id.is_empty() {
        return Err(FederaError::Config("job_id is empty".to_string()));
    }
    if job_id.len() > MAX_JOB_ID_LEN {
        return Err(FederaError::Config(format!(
            "job_id is longer than {} characters",
            MAX_JOB_ID_LEN
        )));
    }
    if let Some(c) = job_id
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
    {
        return Err(FederaError::Config(format!(
            "job_id '{}' contains '{}'; use lowercase letters, digits and '_'",
            job_id, c
        )));
    }
    Ok(())
}

/// One relational endpoint. Immutable once constructed.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dialect: Dialect,
    pub database: String,
    pub table: String,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("dialect", &self.dialect)
            .field("database", &self.database)
            .field("table", &self.table)
            .field("columns", &self.columns.len())
            .field("tls", &self.tls)
            .finish()
    }
}

impl ConnectionInfo {
    /// Validate and build a connection description.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        dialect: Dialect,
        database: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<ColumnInfo>,
        tls: Option<TlsConfig>,
    ) -> Result<Self> {
        let info = Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            dialect,
            database: database.into(),
            table: table.into(),
            columns,
            tls,
        };
        info.validate()?;
        Ok(info)
    }

    /// Check the invariants a deserialized value may not satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(FederaError::Config("connection host is empty".to_string()));
        }
        if self.database.is_empty() || self.table.is_empty() {
            return Err(FederaError::Config(
                "connection database and table are required".to_string(),
            ));
        }
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        ensure_unique_columns(&self.columns)
    }

    pub fn profile(&self) -> &'static dyn DialectProfile {
        self.dialect.profile()
    }

    /// TLS settings, if any material was supplied.
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref().filter(|t| !t.is_empty())
    }

    /// Log-safe description of the endpoint.
    pub fn redacted(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}.{}",
            self.dialect, self.user, self.host, self.port, self.database, self.table
        )
    }
}

/// Everything needed to issue the provisioning DDL for one job.
#[derive(Clone)]
pub struct ExternalTableConfig {
    pub database: String,
    pub resource_name: String,
    pub external_table: String,
    pub internal_table: String,
    pub jdbc_url: String,
    pub driver_url: String,
    pub driver_class: String,
    pub user: String,
    pub password: String,
    pub columns: Vec<ColumnInfo>,
    pub source_table: String,
    pub dialect: Dialect,
    /// Synthetic auto-increment key of the internal table (`pk_<5 hex>`).
    pub pk_column: String,
}

impl fmt::Debug for ExternalTableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalTableConfig")
            .field("database", &self.database)
            .field("resource_name", &self.resource_name)
            .field("external_table", &self.external_table)
            .field("internal_table", &self.internal_table)
            .field("driver_class", &self.driver_class)
            .field("source_table", &self.source_table)
            .field("columns", &self.columns.len())
            .field("pk_column", &self.pk_column)
            .finish()
    }
}

/// Role of a TLS artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsRole {
    Ca,
    Client,
}

impl TlsRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TlsRole::Ca => "ca",
            TlsRole::Client => "client",
        }
    }
}

/// One uploaded and registered TLS artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsArtifact {
    pub role: TlsRole,
    /// Object key in the TLS bucket, `{requestId}_{role}.{ext}`.
    pub object_key: String,
    /// Name of the warehouse file resource.
    pub file_name: String,
    /// URL the JDBC driver fetches the artifact from.
    pub url: String,
}

/// TLS artifacts created for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsArtifactSet {
    pub request_id: String,
    pub ca: Option<TlsArtifact>,
    pub client: Option<TlsArtifact>,
}

impl TlsArtifactSet {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ca: None,
            client: None,
        }
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &TlsArtifact> {
        self.ca.iter().chain(self.client.iter())
    }

    pub fn object_keys(&self) -> Vec<String> {
        self.artifacts().map(|a| a.object_key.clone()).collect()
    }

    pub fn warehouse_files(&self) -> Vec<String> {
        self.artifacts().map(|a| a.file_name.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ca.is_none() && self.client.is_none()
    }
}
