//! Federa Provision - warehouse-side setup of a federated job
//!
//! Given a source connection this crate creates the external JDBC resource,
//! the external table that mirrors the source and the internal table that
//! materializes it, converting and registering TLS artifacts on the way. It
//! then copies the data across in key-range batches, one writer per
//! destination at a time.

pub mod context;
pub mod ddl;
pub mod import;
pub mod locks;
pub mod provisioner;
pub mod tls;

pub use context::{FederationContext, ProvisionSettings};
pub use ddl::{job_database, job_resource, JobNames};
pub use import::{import_data, key_ranges, ImportReport};
pub use locks::ImportLocks;
pub use provisioner::{provision, ProvisionScope, ProvisionedJob};
pub use tls::TlsPipeline;

use federa_core::{ConnectionInfo, Result};
use tracing::warn;

/// Provision a job and import its source rows. If the import fails, the
/// provisioned objects are discarded before the error is returned.
pub async fn provision_and_import(
    ctx: &FederationContext,
    job_id: &str,
    conn: &ConnectionInfo,
    pk_column: Option<&str>,
    batch_size: Option<u64>,
) -> Result<(ProvisionedJob, ImportReport)> {
    let job = provision(ctx, job_id, conn).await?;
    match import_data(ctx, &job, conn, pk_column, batch_size).await {
        Ok(report) => Ok((job, report)),
        Err(e) => {
            if let Err(cleanup) = job.discard(ctx).await {
                warn!("Job {}: discard after failed import also failed: {}", job_id, cleanup);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federa_connectors::warehouse::RecordingWarehouse;
    use federa_connectors::FixedProbe;
    use federa_core::{ColumnInfo, Dialect};
    use object_store::memory::InMemory;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn failed_import_discards_the_job() {
        let wh = Arc::new(RecordingWarehouse::new());
        wh.fail_on("INSERT INTO", 5, "errCode = 2, detailMessage = Memory exceed limit");
        let ctx = FederationContext::new(
            wh.clone(),
            Arc::new(InMemory::new()),
            Arc::new(FixedProbe(None)),
            ProvisionSettings {
                import_retry_delay: Duration::from_millis(1),
                ..Default::default()
            },
        );
        let conn = ConnectionInfo::new(
            "pg",
            5432,
            "u",
            "p",
            Dialect::Postgres,
            "app",
            "events",
            vec![ColumnInfo::new("id", "bigint")],
            None,
        )
        .unwrap();

        let err = provision_and_import(&ctx, "x1", &conn, None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Memory exceed limit"));
        assert_eq!(wh.statements_containing("INSERT INTO").len(), 3);
        assert_eq!(
            wh.statements().last().unwrap(),
            "DROP DATABASE IF EXISTS `job_x1` FORCE"
        );
    }
}
