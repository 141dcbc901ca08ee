//! Object-store access for export part files and TLS artifacts.
//!
//! `S3Config` carries credentials and endpoint, `build_store` turns it into an
//! `ObjectStore` bound to one bucket.

use std::sync::Arc;

use anyhow::{Context, Result};
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use url::Url;

/// Configuration for connecting to S3-compatible storage.
///
/// Secrets are redacted in `Debug` output.
#[derive(Clone)]
pub struct S3Config {
    /// AWS region (e.g. "us-east-1")
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint for MinIO / LocalStack
    pub endpoint_url: Option<String>,
    pub allow_http: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("access_key_id", &"***")
            .field("secret_access_key", &"***")
            .field("endpoint_url", &self.endpoint_url)
            .field("allow_http", &self.allow_http)
            .finish()
    }
}

impl S3Config {
    /// Build from AWS_REGION, AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY,
    /// AWS_ENDPOINT_URL and AWS_ALLOW_HTTP.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID")
                .context("AWS_ACCESS_KEY_ID not set")?,
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY")
                .context("AWS_SECRET_ACCESS_KEY not set")?,
            endpoint_url: std::env::var("AWS_ENDPOINT_URL").ok(),
            allow_http: std::env::var("AWS_ALLOW_HTTP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }

    /// Properties the warehouse needs to write into or read from a bucket.
    pub fn warehouse_properties(&self) -> Vec<(&'static str, String)> {
        let mut props = vec![
            ("s3.region", self.region.clone()),
            ("s3.access_key", self.access_key_id.clone()),
            ("s3.secret_key", self.secret_access_key.clone()),
        ];
        if let Some(endpoint) = &self.endpoint_url {
            props.push(("s3.endpoint", endpoint.clone()));
            props.push(("use_path_style", "true".to_string()));
        }
        props
    }
}

/// Build an object store bound to `bucket`.
pub fn build_store(config: &S3Config, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    let mut builder = AmazonS3Builder::new()
        .with_region(&config.region)
        .with_bucket_name(bucket)
        .with_access_key_id(&config.access_key_id)
        .with_secret_access_key(&config.secret_access_key);

    if let Some(ref endpoint) = config.endpoint_url {
        builder = builder.with_endpoint(endpoint);
    }
    if config.allow_http {
        builder = builder.with_allow_http(true);
    }

    let store = builder
        .build()
        .with_context(|| format!("failed to build S3 object store for bucket {}", bucket))?;
    Ok(Arc::new(store))
}

/// Parse an `s3://bucket/key` URI into (bucket, key).
pub fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let url = Url::parse(uri).context("invalid S3 URI")?;
    anyhow::ensure!(url.scheme() == "s3", "URI scheme must be s3://");
    let bucket = url
        .host_str()
        .context("missing bucket in S3 URI")?
        .to_string();
    let key = url.path().trim_start_matches('/').to_string();
    anyhow::ensure!(!key.is_empty(), "missing object key in S3 URI");
    Ok((bucket, key))
}

/// Public HTTP URL of an object, as fetched by the warehouse JDBC driver.
pub fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key.trim_start_matches('/'))
}
