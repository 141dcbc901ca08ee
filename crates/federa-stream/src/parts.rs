//! Part-file discovery and ordering.
//!
//! Export writes `{jobId}/data_<queryId>_<n>.<ext>` objects. The sequence
//! number is the integer after the last underscore of the file stem; the
//! numbers of one job must be exactly `0..n`.

use std::sync::Arc;

use federa_connectors::store_err;
use federa_core::{validate_job_id, FederaError, Result};
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRef {
    pub location: Path,
    pub sequence: u64,
    pub size: usize,
}

impl PartRef {
    pub fn file_name(&self) -> &str {
        self.location.filename().unwrap_or_default()
    }
}

/// Sequence number encoded in a part file name.
pub fn part_sequence(file_name: &str) -> Option<u64> {
    let stem = file_name.split('.').next()?;
    let (_, suffix) = stem.rsplit_once('_')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Prefix under which a job's parts live. Ids that would name the bucket
/// root or another job's directory are refused.
pub fn job_prefix(job_id: &str) -> Result<Path> {
    validate_job_id(job_id)?;
    Ok(Path::from(job_id))
}

/// Sort parts and verify the sequence is dense and zero-based.
pub fn order_parts(mut parts: Vec<PartRef>) -> Result<Vec<PartRef>> {
    parts.sort_by_key(|p| p.sequence);
    for (expected, part) in parts.iter().enumerate() {
        if part.sequence != expected as u64 {
            return Err(FederaError::PartSequence(format!(
                "expected part {} but found {} ({})",
                expected, part.sequence, part.location
            )));
        }
    }
    Ok(parts)
}

/// List a job's part files in sequence order.
pub async fn list_parts(store: &Arc<dyn ObjectStore>, job_id: &str) -> Result<Vec<PartRef>> {
    let prefix = job_prefix(job_id)?;
    let objects: Vec<_> = store
        .list(Some(&prefix))
        .try_collect()
        .await
        .map_err(store_err)?;

    let mut parts = Vec::with_capacity(objects.len());
    for meta in objects {
        let name = meta.location.filename().unwrap_or_default().to_string();
        match part_sequence(&name) {
            Some(sequence) => parts.push(PartRef {
                location: meta.location,
                sequence,
                size: meta.size,
            }),
            None => warn!("Ignoring non-part object {} under {}", meta.location, prefix),
        }
    }
    let parts = order_parts(parts)?;
    debug!("Job {}: {} part file(s)", job_id, parts.len());
    Ok(parts)
}
