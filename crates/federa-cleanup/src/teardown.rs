//! Type-specific teardown. Every step treats an already-missing object as
//! done, so a task can be executed any number of times.

use std::sync::Arc;

use async_trait::async_trait;
use federa_connectors::{is_not_found, store_err, Warehouse};
use federa_core::{validate_job_id, Result};
use federa_provision::{ddl, job_database, job_resource, TlsPipeline};
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::{debug, info};

use crate::task::TaskType;

#[async_trait]
pub trait Teardown: Send + Sync {
    async fn run(&self, job_id: &str, task_type: TaskType) -> Result<()>;
}

/// Tears down warehouse objects, TLS artifacts and exported parts.
pub struct ResourceTeardown {
    warehouse: Arc<dyn Warehouse>,
    tls: TlsPipeline,
    export_store: Arc<dyn ObjectStore>,
}

impl ResourceTeardown {
    pub fn new(warehouse: Arc<dyn Warehouse>, tls: TlsPipeline, export_store: Arc<dyn ObjectStore>) -> Self {
        Self {
            warehouse,
            tls,
            export_store,
        }
    }

    async fn warehouse_job(&self, job_id: &str) -> Result<()> {
        let database = job_database(job_id);
        self.warehouse.execute(&ddl::drop_resource(&job_resource(job_id))).await?;
        let tls_removed = self.tls.teardown(job_id, &database).await?;
        self.warehouse.execute(&ddl::drop_database(&database)).await?;
        info!(
            "Job {}: dropped {} and {} TLS artifact(s)",
            job_id, database, tls_removed
        );
        Ok(())
    }

    async fn export_parts(&self, job_id: &str) -> Result<()> {
        let prefix = Path::from(job_id);
        let objects: Vec<_> = self
            .export_store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(store_err)?;
        let mut removed = 0;
        for meta in objects {
            match self.export_store.delete(&meta.location).await {
                Ok(()) => removed += 1,
                Err(e) if is_not_found(&e) => debug!("{} already gone", meta.location),
                Err(e) => return Err(store_err(e)),
            }
        }
        info!("Job {}: deleted {} exported object(s)", job_id, removed);
        Ok(())
    }
}

#[async_trait]
impl Teardown for ResourceTeardown {
    async fn run(&self, job_id: &str, task_type: TaskType) -> Result<()> {
        // An empty or nested id would widen the export prefix to other jobs.
        validate_job_id(job_id)?;
        match task_type {
            TaskType::WarehouseJob => self.warehouse_job(job_id).await,
            TaskType::ExportParts => self.export_parts(job_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federa_connectors::warehouse::{QueryResult, RecordingWarehouse};
    use federa_core::FederaError;
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    fn teardown(wh: Arc<RecordingWarehouse>, tls: Arc<InMemory>, export: Arc<InMemory>) -> ResourceTeardown {
        let pipeline = TlsPipeline::new(tls, wh.clone(), "http://minio:9000/federa-tls", "changeit");
        ResourceTeardown::new(wh, pipeline, export)
    }

    #[tokio::test]
    async fn export_parts_deletes_only_the_job_prefix() {
        let export = Arc::new(InMemory::new());
        for key in ["j1/data_q_0.csv", "j1/data_q_1.csv", "j2/data_q_0.csv"] {
            export.put(&Path::from(key), PutPayload::from_static(b"x")).await.unwrap();
        }
        let t = teardown(Arc::new(RecordingWarehouse::new()), Arc::new(InMemory::new()), export.clone());

        t.run("j1", TaskType::ExportParts).await.unwrap();
        t.run("j1", TaskType::ExportParts).await.unwrap();

        let left: Vec<_> = export.list(None).try_collect().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].location.as_ref(), "j2/data_q_0.csv");
    }

    #[tokio::test]
    async fn malformed_job_id_deletes_nothing() {
        let export = Arc::new(InMemory::new());
        for key in ["j1/data_q_0.csv", "j2/data_q_0.csv"] {
            export.put(&Path::from(key), PutPayload::from_static(b"x")).await.unwrap();
        }
        let wh = Arc::new(RecordingWarehouse::new());
        let t = teardown(wh.clone(), Arc::new(InMemory::new()), export.clone());

        for id in ["", "j1/..", "J1"] {
            for task_type in [TaskType::ExportParts, TaskType::WarehouseJob] {
                let err = t.run(id, task_type).await.unwrap_err();
                assert!(matches!(err, FederaError::Config(_)));
            }
        }
        let left: Vec<_> = export.list(None).try_collect().await.unwrap();
        assert_eq!(left.len(), 2);
        assert!(wh.statements().is_empty());
    }

    #[tokio::test]
    async fn warehouse_job_drops_tls_files_and_database() {
        let wh = Arc::new(RecordingWarehouse::new());
        wh.respond(
            "SHOW FILE",
            QueryResult::new(
                &["FileName", "Catalog"],
                vec![vec![Some("j1_ca.pem"), Some("federa")]],
            ),
        );
        let tls = Arc::new(InMemory::new());
        tls.put(&Path::from("j1_ca.pem"), PutPayload::from_static(b"pem")).await.unwrap();

        let t = teardown(wh.clone(), tls.clone(), Arc::new(InMemory::new()));
        t.run("j1", TaskType::WarehouseJob).await.unwrap();

        let stmts = wh.statements();
        assert!(stmts[0].starts_with("DROP RESOURCE IF EXISTS"));
        assert_eq!(wh.statements_containing("DROP FILE").len(), 1);
        assert!(stmts.last().unwrap().starts_with("DROP DATABASE IF EXISTS `job_j1`"));
        assert!(tls.head(&Path::from("j1_ca.pem")).await.is_err());
    }

    #[tokio::test]
    async fn warehouse_failure_surfaces() {
        let wh = Arc::new(RecordingWarehouse::new());
        wh.fail_on("DROP DATABASE", 1, "Lost connection to backend");
        let t = teardown(wh, Arc::new(InMemory::new()), Arc::new(InMemory::new()));
        assert!(t.run("j1", TaskType::WarehouseJob).await.is_err());
    }
}
