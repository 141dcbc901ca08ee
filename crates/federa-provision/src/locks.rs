//! Per-destination import locks.
//!
//! One async mutex per `db.table`, created on first use and kept for the life
//! of the process. The number of entries is bounded by the number of
//! distinct destination tables.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

#[derive(Default)]
pub struct ImportLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ImportLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(database: &str, table: &str) -> String {
        format!("{}.{}", database, table)
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Run `f` while holding the lock for `key`.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.entry(key);
        let _guard = lock.lock().await;
        debug!("import lock acquired: {}", key);
        f().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
