//! TLS artifact pipeline.
//!
//! Source TLS material arrives as base64-encoded PEM. Depending on what the
//! dialect's JDBC driver accepts, the CA certificate is either passed through
//! as PEM or bundled into a PKCS12 truststore. Client certificate and key are
//! always bundled as PKCS12. Each artifact is uploaded to the TLS bucket as
//! `{requestId}_{role}.{ext}` and registered as a warehouse file resource.

use std::sync::Arc;

use federa_connectors::warehouse::{is_missing_object, list_files, Warehouse};
use federa_connectors::{decode_pem, public_url, store_err};
use federa_core::{
    Dialect, FederaError, Result, TlsArtifact, TlsArtifactSet, TlsConfig, TlsRole, TlsUrls,
    TruststoreFormat,
};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::PKey;
use openssl::stack::Stack;
use openssl::x509::X509;
use tracing::{info, warn};

use crate::ddl::{self, FILE_CATALOG};

fn tls_err(what: &str, e: openssl::error::ErrorStack) -> FederaError {
    FederaError::Config(format!("{}: {}", what, e))
}

/// CA truststore in the format the driver expects.
pub fn ca_truststore(pem: &[u8], format: TruststoreFormat, password: &str) -> Result<Vec<u8>> {
    let certs = X509::stack_from_pem(pem).map_err(|e| tls_err("invalid CA certificate", e))?;
    if certs.is_empty() {
        return Err(FederaError::Config("CA bundle has no certificates".to_string()));
    }
    match format {
        TruststoreFormat::Pem => Ok(pem.to_vec()),
        TruststoreFormat::Pkcs12 => {
            let mut stack = Stack::new().map_err(|e| tls_err("stack", e))?;
            for cert in certs {
                stack.push(cert).map_err(|e| tls_err("stack", e))?;
            }
            let mut builder = Pkcs12::builder();
            builder.ca(stack);
            let p12 = builder
                .build2(password)
                .map_err(|e| tls_err("failed to build PKCS12 truststore", e))?;
            p12.to_der().map_err(|e| tls_err("failed to encode PKCS12", e))
        }
    }
}

/// Client certificate and private key as a PKCS12 keystore.
pub fn client_keystore(cert_pem: &[u8], key_pem: &[u8], password: &str) -> Result<Vec<u8>> {
    let mut chain = X509::stack_from_pem(cert_pem)
        .map_err(|e| tls_err("invalid client certificate", e))?
        .into_iter();
    let leaf = chain
        .next()
        .ok_or_else(|| FederaError::Config("client certificate is empty".to_string()))?;
    let key =
        PKey::private_key_from_pem(key_pem).map_err(|e| tls_err("invalid client key", e))?;

    let mut builder = Pkcs12::builder();
    builder.name("client").pkey(&key).cert(&leaf);
    let rest: Vec<X509> = chain.collect();
    if !rest.is_empty() {
        let mut stack = Stack::new().map_err(|e| tls_err("stack", e))?;
        for cert in rest {
            stack.push(cert).map_err(|e| tls_err("stack", e))?;
        }
        builder.ca(stack);
    }
    let p12 = builder
        .build2(password)
        .map_err(|e| tls_err("failed to build PKCS12 keystore", e))?;
    p12.to_der().map_err(|e| tls_err("failed to encode PKCS12", e))
}

/// Object key of an artifact.
pub fn artifact_key(request_id: &str, role: TlsRole, format: TruststoreFormat) -> String {
    format!("{}_{}.{}", request_id, role.as_str(), format.extension())
}

/// Every key an artifact of `request_id` can have.
pub fn candidate_keys(request_id: &str) -> Vec<String> {
    vec![
        artifact_key(request_id, TlsRole::Ca, TruststoreFormat::Pem),
        artifact_key(request_id, TlsRole::Ca, TruststoreFormat::Pkcs12),
        artifact_key(request_id, TlsRole::Client, TruststoreFormat::Pkcs12),
    ]
}

/// Uploads, registers and removes TLS artifacts.
#[derive(Clone)]
pub struct TlsPipeline {
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    public_base_url: String,
    keystore_password: String,
}

impl TlsPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        public_base_url: impl Into<String>,
        keystore_password: impl Into<String>,
    ) -> Self {
        Self {
            store,
            warehouse,
            public_base_url: public_base_url.into(),
            keystore_password: keystore_password.into(),
        }
    }

    /// URLs the JDBC driver should use for an artifact set.
    pub fn urls(&self, set: &TlsArtifactSet) -> TlsUrls {
        TlsUrls {
            ca_url: set.ca.as_ref().map(|a| a.url.clone()),
            client_url: set.client.as_ref().map(|a| a.url.clone()),
            keystore_password: self.keystore_password.clone(),
        }
    }

    /// Convert, upload and register the artifacts for one request. On
    /// failure everything this call created is removed before returning.
    pub async fn provision(
        &self,
        request_id: &str,
        dialect: Dialect,
        tls: &TlsConfig,
        database: &str,
    ) -> Result<TlsArtifactSet> {
        let mut set = TlsArtifactSet::new(request_id);
        match self.provision_into(&mut set, dialect, tls, database).await {
            Ok(()) => {
                info!(
                    "Provisioned {} TLS artifact(s) for request {}",
                    set.artifacts().count(),
                    request_id
                );
                Ok(set)
            }
            Err(e) => {
                warn!("TLS provisioning for {} failed, rolling back: {}", request_id, e);
                self.remove(&set, database).await;
                Err(e)
            }
        }
    }

    async fn provision_into(
        &self,
        set: &mut TlsArtifactSet,
        dialect: Dialect,
        tls: &TlsConfig,
        database: &str,
    ) -> Result<()> {
        tls.validate()?;
        if let Some(ca) = &tls.ca_cert {
            let format = dialect.profile().truststore_format();
            let pem = decode_pem(ca)?;
            let bytes = ca_truststore(&pem, format, &self.keystore_password)?;
            let key = artifact_key(&set.request_id, TlsRole::Ca, format);
            self.upload_and_register(set, TlsRole::Ca, key, bytes, database)
                .await?;
        }
        if let (Some(cert), Some(key_pem)) = (&tls.client_cert, &tls.client_key) {
            let bytes = client_keystore(
                &decode_pem(cert)?,
                &decode_pem(key_pem)?,
                &self.keystore_password,
            )?;
            let key = artifact_key(&set.request_id, TlsRole::Client, TruststoreFormat::Pkcs12);
            self.upload_and_register(set, TlsRole::Client, key, bytes, database)
                .await?;
        }
        Ok(())
    }

    async fn upload_and_register(
        &self,
        set: &mut TlsArtifactSet,
        role: TlsRole,
        key: String,
        bytes: Vec<u8>,
        database: &str,
    ) -> Result<()> {
        self.store
            .put(&Path::from(key.as_str()), PutPayload::from(bytes))
            .await
            .map_err(store_err)?;
        let artifact = TlsArtifact {
            role,
            url: public_url(&self.public_base_url, &key),
            file_name: key.clone(),
            object_key: key,
        };
        // Recorded before registration so a failed CREATE FILE still
        // removes the uploaded object.
        let sql = ddl::create_file(database, &artifact.file_name, &artifact.url);
        match role {
            TlsRole::Ca => set.ca = Some(artifact),
            TlsRole::Client => set.client = Some(artifact),
        }
        self.warehouse.execute(&sql).await
    }

    /// Best-effort removal of a known artifact set.
    pub async fn remove(&self, set: &TlsArtifactSet, database: &str) {
        for file in set.warehouse_files() {
            if let Err(e) = self.warehouse.execute(&ddl::drop_file(database, &file)).await {
                if !is_missing_object(&e) {
                    warn!("Failed to drop TLS file {} in {}: {}", file, database, e);
                }
            }
        }
        for key in set.object_keys() {
            if let Err(e) = self.store.delete(&Path::from(key.as_str())).await {
                if !federa_connectors::is_not_found(&e) {
                    warn!("Failed to delete TLS object {}: {}", key, e);
                }
            }
        }
    }

    /// Remove every artifact of `request_id`, whether or not the set is
    /// known. Missing files and objects are not errors. Returns the number
    /// of items removed.
    pub async fn teardown(&self, request_id: &str, database: &str) -> Result<usize> {
        let mut removed = 0;
        let prefix = format!("{}_", request_id);

        match list_files(self.warehouse.as_ref(), database, FILE_CATALOG).await {
            Ok(files) => {
                for file in files.iter().filter(|f| f.starts_with(&prefix)) {
                    match self.warehouse.execute(&ddl::drop_file(database, file)).await {
                        Ok(()) => removed += 1,
                        Err(e) if is_missing_object(&e) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            Err(e) if is_missing_object(&e) => {}
            Err(e) => return Err(e),
        }

        for key in candidate_keys(request_id) {
            let path = Path::from(key.as_str());
            match self.store.head(&path).await {
                Ok(_) => {}
                Err(e) if federa_connectors::is_not_found(&e) => continue,
                Err(e) => return Err(store_err(e)),
            }
            match self.store.delete(&path).await {
                Ok(()) => removed += 1,
                Err(e) if federa_connectors::is_not_found(&e) => {}
                Err(e) => return Err(store_err(e)),
            }
        }
        Ok(removed)
    }
}
