//! External resource and table provisioning.
//!
//! A job moves through `start -> resource-created -> external-table-created
//! -> internal-table-created`. Every object is recorded in a
//! [`ProvisionScope`] as it is created; if any step fails the scope is rolled
//! back in reverse order before the error is returned.

use federa_connectors::warehouse::is_missing_object;
use federa_core::{
    validate_job_id, ConnectionInfo, ExternalTableConfig, FederaError, Result, TlsArtifactSet,
};
use tracing::{info, warn};

use crate::context::FederationContext;
use crate::ddl::{self, JobNames};

/// Everything provisioned for one job.
#[derive(Debug, Clone)]
pub struct ProvisionedJob {
    pub job_id: String,
    pub names: JobNames,
    pub config: ExternalTableConfig,
    pub tls: TlsArtifactSet,
}

#[derive(Debug)]
enum Created {
    Database(String),
    Resource(String),
    Table { database: String, table: String },
    Tls { database: String, set: TlsArtifactSet },
}

/// Objects created so far by one provisioning call.
pub struct ProvisionScope<'a> {
    ctx: &'a FederationContext,
    created: Vec<Created>,
    finished: bool,
}

impl<'a> ProvisionScope<'a> {
    pub fn new(ctx: &'a FederationContext) -> Self {
        Self {
            ctx,
            created: Vec::new(),
            finished: false,
        }
    }

    fn record(&mut self, created: Created) {
        self.created.push(created);
    }

    /// Keep everything that was created.
    pub fn commit(mut self) {
        self.finished = true;
        self.created.clear();
    }

    /// Drop everything that was created, newest first. Errors are logged and
    /// the remaining objects are still attempted.
    pub async fn rollback(mut self) {
        self.finished = true;
        let created = std::mem::take(&mut self.created);
        for item in created.into_iter().rev() {
            let outcome = match &item {
                Created::Database(db) => {
                    self.ctx.warehouse.execute(&ddl::drop_database(db)).await
                }
                Created::Resource(res) => {
                    self.ctx.warehouse.execute(&ddl::drop_resource(res)).await
                }
                Created::Table { database, table } => {
                    self.ctx
                        .warehouse
                        .execute(&ddl::drop_table(database, table))
                        .await
                }
                Created::Tls { database, set } => {
                    self.ctx.tls.remove(set, database).await;
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                if !is_missing_object(&e) {
                    warn!("Rollback of {:?} failed: {}", item, e);
                }
            }
        }
    }
}

impl Drop for ProvisionScope<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.created.is_empty() {
            warn!(
                "Provision scope dropped with {} object(s) neither committed nor rolled back",
                self.created.len()
            );
        }
    }
}

/// Create the resource, external table and internal table for a job. On
/// failure nothing created by this call survives.
pub async fn provision(
    ctx: &FederationContext,
    job_id: &str,
    conn: &ConnectionInfo,
) -> Result<ProvisionedJob> {
    let mut scope = ProvisionScope::new(ctx);
    match provision_in_scope(ctx, &mut scope, job_id, conn).await {
        Ok(job) => {
            scope.commit();
            info!(
                "Job {}: provisioned {}.{} from {}",
                job_id,
                job.names.database,
                job.names.internal_table,
                conn.redacted()
            );
            Ok(job)
        }
        Err(e) => {
            warn!("Job {}: provisioning failed, rolling back: {}", job_id, e);
            scope.rollback().await;
            Err(e)
        }
    }
}

async fn provision_in_scope(
    ctx: &FederationContext,
    scope: &mut ProvisionScope<'_>,
    job_id: &str,
    conn: &ConnectionInfo,
) -> Result<ProvisionedJob> {
    validate_job_id(job_id)?;
    conn.validate()?;
    if conn.columns.is_empty() {
        return Err(FederaError::Schema(format!(
            "no columns known for {}",
            conn.redacted()
        )));
    }
    let names = JobNames::new(job_id, &conn.table);
    let wh = ctx.warehouse.as_ref();

    wh.execute(&ddl::create_database(&names.database)).await?;
    scope.record(Created::Database(names.database.clone()));

    // Retried jobs start from a clean slate.
    wh.execute(&ddl::drop_table(&names.database, &names.external_table))
        .await?;
    wh.execute(&ddl::drop_table(&names.database, &names.internal_table))
        .await?;
    wh.execute(&ddl::drop_resource(&names.resource)).await?;
    ctx.tls.teardown(job_id, &names.database).await?;

    let profile = conn.profile();
    let tls = match conn.tls() {
        Some(tls) => {
            let set = ctx
                .tls
                .provision(job_id, conn.dialect, tls, &names.database)
                .await?;
            scope.record(Created::Tls {
                database: names.database.clone(),
                set: set.clone(),
            });
            set
        }
        None => TlsArtifactSet::new(job_id),
    };
    let tls_urls = (!tls.is_empty()).then(|| ctx.tls.urls(&tls));

    let config = ExternalTableConfig {
        database: names.database.clone(),
        resource_name: names.resource.clone(),
        external_table: names.external_table.clone(),
        internal_table: names.internal_table.clone(),
        jdbc_url: profile.jdbc_url(&conn.host, conn.port, &conn.database, tls_urls.as_ref()),
        driver_url: ctx.driver_url(profile.driver_jar()),
        driver_class: profile.driver_class().to_string(),
        user: conn.user.clone(),
        password: conn.password.clone(),
        columns: conn.columns.clone(),
        source_table: conn.table.clone(),
        dialect: conn.dialect,
        pk_column: ddl::synthetic_pk_name(),
    };

    wh.execute(&ddl::create_resource(&config)).await?;
    scope.record(Created::Resource(config.resource_name.clone()));
    info!("Job {}: resource-created", job_id);

    wh.execute(&ddl::create_external_table(&config)).await?;
    scope.record(Created::Table {
        database: config.database.clone(),
        table: config.external_table.clone(),
    });
    info!("Job {}: external-table-created", job_id);

    wh.execute(&ddl::create_internal_table(
        &config,
        ctx.settings.replication_num,
    ))
    .await?;
    scope.record(Created::Table {
        database: config.database.clone(),
        table: config.internal_table.clone(),
    });
    info!("Job {}: internal-table-created", job_id);

    Ok(ProvisionedJob {
        job_id: job_id.to_string(),
        names,
        config,
        tls,
    })
}

impl ProvisionedJob {
    /// Drop every object of the job, TLS artifacts included.
    pub async fn discard(&self, ctx: &FederationContext) -> Result<()> {
        ctx.warehouse
            .execute(&ddl::drop_resource(&self.config.resource_name))
            .await?;
        ctx.tls.teardown(&self.job_id, &self.names.database).await?;
        ctx.warehouse
            .execute(&ddl::drop_database(&self.names.database))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProvisionSettings;
    use crate::tls::tests::test_material;
    use federa_connectors::warehouse::RecordingWarehouse;
    use federa_connectors::FixedProbe;
    use federa_core::{ColumnInfo, Dialect, TlsConfig};
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use object_store::ObjectStore;
    use std::sync::Arc;

    fn ctx(wh: Arc<RecordingWarehouse>, store: Arc<InMemory>) -> FederationContext {
        FederationContext::new(wh, store, Arc::new(FixedProbe(None)), ProvisionSettings::default())
    }

    fn conn(dialect: Dialect, tls: Option<TlsConfig>) -> ConnectionInfo {
        ConnectionInfo::new(
            "src",
            3306,
            "reader",
            "pw",
            dialect,
            "shop",
            "orders",
            vec![ColumnInfo::new("id", "bigint"), ColumnInfo::new("note", "text")],
            tls,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn provisions_in_order() {
        let wh = Arc::new(RecordingWarehouse::new());
        let ctx = ctx(wh.clone(), Arc::new(InMemory::new()));
        let job = provision(&ctx, "42", &conn(Dialect::MySql, None)).await.unwrap();

        assert_eq!(job.names.database, "job_42");
        assert!(job.config.pk_column.starts_with("pk_"));
        assert!(job.config.jdbc_url.starts_with("jdbc:mysql://src:3306/shop?"));
        assert!(job.config.jdbc_url.ends_with("useSSL=false"));

        let ddl: Vec<String> = wh
            .statements()
            .into_iter()
            .filter(|s| s.starts_with("CREATE"))
            .collect();
        assert_eq!(ddl.len(), 4);
        assert!(ddl[0].starts_with("CREATE DATABASE IF NOT EXISTS `job_42`"));
        assert!(ddl[1].starts_with("CREATE EXTERNAL RESOURCE `res_42`"));
        assert!(ddl[2].starts_with("CREATE EXTERNAL TABLE `job_42`.`ext_orders`"));
        assert!(ddl[3].starts_with("CREATE TABLE `job_42`.`int_orders`"));
    }

    #[tokio::test]
    async fn re_entry_drops_previous_tables_first() {
        let wh = Arc::new(RecordingWarehouse::new());
        let ctx = ctx(wh.clone(), Arc::new(InMemory::new()));
        provision(&ctx, "7", &conn(Dialect::MySql, None)).await.unwrap();

        let stmts = wh.statements();
        let drop_ext = stmts
            .iter()
            .position(|s| s == "DROP TABLE IF EXISTS `job_7`.`ext_orders` FORCE")
            .unwrap();
        let create_ext = stmts
            .iter()
            .position(|s| s.starts_with("CREATE EXTERNAL TABLE"))
            .unwrap();
        assert!(drop_ext < create_ext);
        assert!(stmts.contains(&"DROP RESOURCE IF EXISTS `res_7`".to_string()));
    }

    #[tokio::test]
    async fn failure_rolls_back_everything_including_tls() {
        let (cert, key) = test_material();
        let wh = Arc::new(RecordingWarehouse::new());
        wh.fail_on("CREATE TABLE `job_9`", 1, "errCode = 2, detailMessage = disk full");
        let store = Arc::new(InMemory::new());
        let ctx = ctx(wh.clone(), store.clone());
        let tls = TlsConfig {
            ca_cert: Some(cert.clone()),
            client_cert: Some(cert),
            client_key: Some(key),
        };

        let err = provision(&ctx, "9", &conn(Dialect::MySql, Some(tls)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));

        let stmts = wh.statements();
        let tail: Vec<&String> = stmts
            .iter()
            .skip_while(|s| !s.starts_with("CREATE TABLE `job_9`"))
            .skip(1)
            .collect();
        assert_eq!(tail[0], "DROP TABLE IF EXISTS `job_9`.`ext_orders` FORCE");
        assert_eq!(tail[1], "DROP RESOURCE IF EXISTS `res_9`");
        assert!(tail[2].starts_with("DROP FILE \"9_ca.p12\""));
        assert!(tail[3].starts_with("DROP FILE \"9_client.p12\""));
        assert_eq!(tail.last().unwrap().as_str(), "DROP DATABASE IF EXISTS `job_9` FORCE");
        assert!(store.head(&Path::from("9_ca.p12")).await.is_err());
        assert!(store.head(&Path::from("9_client.p12")).await.is_err());
    }

    #[tokio::test]
    async fn tls_urls_flow_into_jdbc_url() {
        let (cert, _) = test_material();
        let wh = Arc::new(RecordingWarehouse::new());
        let ctx = ctx(wh, Arc::new(InMemory::new()));
        let tls = TlsConfig {
            ca_cert: Some(cert),
            ..Default::default()
        };
        let job = provision(&ctx, "5", &conn(Dialect::Postgres, Some(tls))).await.unwrap();
        assert!(job.config.jdbc_url.contains("sslfactoryarg="));
        assert!(job.config.jdbc_url.contains("5_ca.pem"));
        assert_eq!(job.tls.object_keys(), vec!["5_ca.pem"]);
    }

    #[tokio::test]
    async fn missing_columns_is_a_schema_error() {
        let wh = Arc::new(RecordingWarehouse::new());
        let ctx = ctx(wh.clone(), Arc::new(InMemory::new()));
        let mut c = conn(Dialect::MySql, None);
        c.columns.clear();
        let err = provision(&ctx, "1", &c).await.unwrap_err();
        assert!(matches!(err, FederaError::Schema(_)));
        assert!(wh.statements().is_empty());
    }

    #[tokio::test]
    async fn colliding_job_id_is_refused_before_any_ddl() {
        let wh = Arc::new(RecordingWarehouse::new());
        let ctx = ctx(wh.clone(), Arc::new(InMemory::new()));
        for id in ["a-b", "", "A_B"] {
            let err = provision(&ctx, id, &conn(Dialect::MySql, None)).await.unwrap_err();
            assert!(matches!(err, FederaError::Config(_)));
        }
        assert!(wh.statements().is_empty());
    }
}
