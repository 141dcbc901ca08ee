//! Process-wide federation state, created once at startup and passed
//! explicitly to every provisioning and import call.

use std::sync::Arc;
use std::time::Duration;

use federa_connectors::warehouse::Warehouse;
use federa_connectors::SourceProbe;
use federa_core::{FederaError, Result};
use object_store::ObjectStore;
use tracing::info;

use crate::ddl;
use crate::locks::ImportLocks;
use crate::tls::TlsPipeline;

/// Plain values that shape provisioning and import.
#[derive(Clone)]
pub struct ProvisionSettings {
    /// Database for objects that outlive a single job.
    pub catalog_database: String,
    /// Base URL under which the TLS bucket is served to the JDBC driver.
    pub tls_public_base_url: String,
    pub keystore_password: String,
    /// Directory URL the warehouse downloads JDBC driver jars from.
    pub driver_dir_url: String,
    pub import_batch_size: u64,
    pub import_max_retry: u32,
    pub import_parallelism: usize,
    pub import_retry_delay: Duration,
    pub replication_num: u16,
}

impl std::fmt::Debug for ProvisionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionSettings")
            .field("catalog_database", &self.catalog_database)
            .field("tls_public_base_url", &self.tls_public_base_url)
            .field("keystore_password", &"***")
            .field("driver_dir_url", &self.driver_dir_url)
            .field("import_batch_size", &self.import_batch_size)
            .field("import_max_retry", &self.import_max_retry)
            .field("import_parallelism", &self.import_parallelism)
            .field("replication_num", &self.replication_num)
            .finish()
    }
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            catalog_database: "federa".to_string(),
            tls_public_base_url: "http://localhost:9000/federa-tls".to_string(),
            keystore_password: "changeit".to_string(),
            driver_dir_url: "http://localhost:9000/jdbc-drivers".to_string(),
            import_batch_size: 5000,
            import_max_retry: 3,
            import_parallelism: 1,
            import_retry_delay: Duration::from_millis(500),
            replication_num: 1,
        }
    }
}

pub struct FederationContext {
    pub warehouse: Arc<dyn Warehouse>,
    pub tls_store: Arc<dyn ObjectStore>,
    pub tls: TlsPipeline,
    pub probe: Arc<dyn SourceProbe>,
    pub locks: Arc<ImportLocks>,
    pub settings: ProvisionSettings,
}

impl FederationContext {
    /// Assemble a context without touching the warehouse.
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        tls_store: Arc<dyn ObjectStore>,
        probe: Arc<dyn SourceProbe>,
        settings: ProvisionSettings,
    ) -> Self {
        let tls = TlsPipeline::new(
            tls_store.clone(),
            warehouse.clone(),
            settings.tls_public_base_url.clone(),
            settings.keystore_password.clone(),
        );
        Self {
            warehouse,
            tls_store,
            tls,
            probe,
            locks: Arc::new(ImportLocks::new()),
            settings,
        }
    }

    /// Build the context and verify the warehouse is usable. Any failure
    /// here should abort startup.
    pub async fn start(
        warehouse: Arc<dyn Warehouse>,
        tls_store: Arc<dyn ObjectStore>,
        probe: Arc<dyn SourceProbe>,
        settings: ProvisionSettings,
    ) -> Result<Self> {
        if settings.import_batch_size == 0 {
            return Err(FederaError::Config("import batch size must be positive".to_string()));
        }
        warehouse
            .query("SELECT 1")
            .await
            .map_err(|e| FederaError::Connection(format!("warehouse unreachable: {}", e)))?;
        warehouse
            .execute(&ddl::create_database(&settings.catalog_database))
            .await?;
        info!(
            "Federation context ready (catalog database {})",
            settings.catalog_database
        );
        Ok(Self::new(warehouse, tls_store, probe, settings))
    }

    /// URL of the driver jar for a dialect.
    pub fn driver_url(&self, jar: &str) -> String {
        format!("{}/{}", self.settings.driver_dir_url.trim_end_matches('/'), jar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federa_connectors::warehouse::RecordingWarehouse;
    use federa_connectors::FixedProbe;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn start_checks_warehouse_and_creates_catalog() {
        let wh = Arc::new(RecordingWarehouse::new());
        let ctx = FederationContext::start(
            wh.clone(),
            Arc::new(InMemory::new()),
            Arc::new(FixedProbe(None)),
            ProvisionSettings::default(),
        )
        .await
        .unwrap();
        assert_eq!(
            wh.statements(),
            vec!["SELECT 1", "CREATE DATABASE IF NOT EXISTS `federa`"]
        );
        assert_eq!(
            ctx.driver_url("mysql.jar"),
            "http://localhost:9000/jdbc-drivers/mysql.jar"
        );
    }

    #[tokio::test]
    async fn start_aborts_when_warehouse_is_down() {
        let wh = Arc::new(RecordingWarehouse::new());
        wh.fail_on("SELECT 1", 1, "Connection refused");
        let err = FederationContext::start(
            wh,
            Arc::new(InMemory::new()),
            Arc::new(FixedProbe(None)),
            ProvisionSettings::default(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, FederaError::Connection(_)));
    }

    #[test]
    fn settings_debug_hides_password() {
        let s = ProvisionSettings {
            keystore_password: "topsecret".to_string(),
            ..Default::default()
        };
        assert!(!format!("{:?}", s).contains("topsecret"));
    }
}
