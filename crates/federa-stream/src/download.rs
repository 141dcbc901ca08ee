//! Download part files to local staging with bounded retry.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use federa_connectors::store_err;
use federa_core::{FederaError, Result, RetryPolicy};
use object_store::ObjectStore;
use tracing::debug;

use crate::parts::PartRef;

/// Fetch one part into `dir`. Only retryable failures are retried.
pub async fn download_part(
    store: &Arc<dyn ObjectStore>,
    part: &PartRef,
    dir: &FsPath,
    policy: &RetryPolicy,
) -> Result<PathBuf> {
    let target = dir.join(part.file_name());
    let what = format!("download {}", part.location);
    let dest: &FsPath = &target;
    policy
        .run(
            &what,
            |_| fetch(store, part, dest),
            FederaError::is_retryable,
        )
        .await?;
    Ok(target)
}

async fn fetch(store: &Arc<dyn ObjectStore>, part: &PartRef, target: &FsPath) -> Result<()> {
    let result = store.get(&part.location).await.map_err(store_err)?;
    let bytes = result.bytes().await.map_err(store_err)?;
    tokio::fs::write(target, &bytes).await?;
    debug!("Downloaded {} ({} bytes)", part.location, bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::BoxStream;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use object_store::{
        GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, PutMultipartOpts,
        PutOptions, PutPayload, PutResult,
    };
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Store whose first `failures` GETs time out.
    #[derive(Debug)]
    struct Flaky {
        inner: InMemory,
        failures: u32,
        calls: AtomicU32,
        message: &'static str,
    }

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Flaky")
        }
    }

    #[async_trait]
    impl ObjectStore for Flaky {
        async fn put_opts(&self, location: &Path, payload: PutPayload, opts: PutOptions) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }
        async fn put_multipart_opts(&self, location: &Path, opts: PutMultipartOpts) -> object_store::Result<Box<dyn MultipartUpload>> {
            self.inner.put_multipart_opts(location, opts).await
        }
        async fn get_opts(&self, location: &Path, options: GetOptions) -> object_store::Result<GetResult> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(object_store::Error::Generic {
                    store: "Flaky",
                    source: self.message.into(),
                });
            }
            self.inner.get_opts(location, options).await
        }
        async fn delete(&self, location: &Path) -> object_store::Result<()> {
            self.inner.delete(location).await
        }
        fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }
        async fn list_with_delimiter(&self, prefix: Option<&Path>) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }
        async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }
        async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    async fn flaky(failures: u32, message: &'static str) -> (Arc<Flaky>, PartRef) {
        let store = Arc::new(Flaky {
            inner: InMemory::new(),
            failures,
            calls: AtomicU32::new(0),
            message,
        });
        let location = Path::from("j/data_q_0.csv");
        store
            .put(&location, PutPayload::from(Bytes::from_static(b"1\x01a\n")))
            .await
            .unwrap();
        (store, PartRef { location, sequence: 0, size: 4 })
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::exponential(3, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (store, part) = flaky(2, "request timed out").await;
        let dyn_store: Arc<dyn ObjectStore> = store.clone();
        let path = download_part(&dyn_store, &part, dir.path(), &policy()).await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"1\x01a\n");
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let (store, part) = flaky(10, "request timed out").await;
        let dyn_store: Arc<dyn ObjectStore> = store.clone();
        let err = download_part(&dyn_store, &part, dir.path(), &policy()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_fatal_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (store, part) = flaky(10, "AccessDenied").await;
        let dyn_store: Arc<dyn ObjectStore> = store.clone();
        assert!(download_part(&dyn_store, &part, dir.path(), &policy()).await.is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
