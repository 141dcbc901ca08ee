//! Prometheus metrics for streams, imports and cleanup.

use std::sync::Arc;

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct TaskTypeLabel(pub String);

impl EncodeLabelSet for TaskTypeLabel {
    fn encode(&self, mut encoder: LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("task_type", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct FederaMetrics {
    pub active_streams: Gauge,
    pub batches_sent: Counter,
    pub parts_downloaded: Counter,
    pub import_ranges_completed: Counter,
    pub import_ranges_failed: Counter,
    pub cleanup_completed: Family<TaskTypeLabel, Counter>,
    pub cleanup_failed: Family<TaskTypeLabel, Counter>,
    pub rows_written: Counter,
    pub reaper_redriven: Counter,
    pub reaper_failed: Counter,
    pub reaper_reclaimed: Counter,
    pub registry: Arc<Registry>,
}

impl FederaMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let active_streams = Gauge::default();
        registry.register(
            "federa_active_streams",
            "Read streams currently open",
            active_streams.clone(),
        );

        let batches_sent = Counter::default();
        registry.register(
            "federa_batches_sent",
            "Arrow batches sent to readers",
            batches_sent.clone(),
        );

        let parts_downloaded = Counter::default();
        registry.register(
            "federa_parts_downloaded",
            "Export part files downloaded",
            parts_downloaded.clone(),
        );

        let import_ranges_completed = Counter::default();
        registry.register(
            "federa_import_ranges_completed",
            "Import statements that succeeded",
            import_ranges_completed.clone(),
        );

        let import_ranges_failed = Counter::default();
        registry.register(
            "federa_import_failures",
            "Imports that failed after retries",
            import_ranges_failed.clone(),
        );

        let cleanup_completed = Family::<TaskTypeLabel, Counter>::default();
        registry.register(
            "federa_cleanup_completed",
            "Cleanup tasks completed by type",
            cleanup_completed.clone(),
        );

        let cleanup_failed = Family::<TaskTypeLabel, Counter>::default();
        registry.register(
            "federa_cleanup_failed",
            "Cleanup tasks that exhausted their retries, by type",
            cleanup_failed.clone(),
        );

        let rows_written = Counter::default();
        registry.register(
            "federa_rows_written",
            "Rows stream-loaded through the write endpoint",
            rows_written.clone(),
        );

        let reaper_redriven = Counter::default();
        registry.register(
            "federa_reaper_redriven",
            "Cleanup tasks completed by the reaper",
            reaper_redriven.clone(),
        );

        let reaper_failed = Counter::default();
        registry.register(
            "federa_reaper_failed",
            "Cleanup tasks the reaper marked terminally failed",
            reaper_failed.clone(),
        );

        let reaper_reclaimed = Counter::default();
        registry.register(
            "federa_reaper_reclaimed",
            "Cleanup tasks the reaper took back from a dead executor",
            reaper_reclaimed.clone(),
        );

        Self {
            active_streams,
            batches_sent,
            parts_downloaded,
            import_ranges_completed,
            import_ranges_failed,
            cleanup_completed,
            cleanup_failed,
            rows_written,
            reaper_redriven,
            reaper_failed,
            reaper_reclaimed,
            registry: Arc::new(registry),
        }
    }

    /// Count a cleanup outcome.
    pub fn record_cleanup(&self, task: &federa_cleanup::CleanupTask) {
        let label = TaskTypeLabel(task.task_type.as_str().to_string());
        match task.status {
            federa_cleanup::TaskStatus::Completed => {
                self.cleanup_completed.get_or_create(&label).inc();
            }
            federa_cleanup::TaskStatus::Failed => {
                self.cleanup_failed.get_or_create(&label).inc();
            }
            _ => {}
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Err(e) = encode(&mut buf, &self.registry) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        buf
    }
}
