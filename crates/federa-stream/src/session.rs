//! In-memory progress of running streams, keyed by file id.
//!
//! Sessions are never persisted. A periodic sweep evicts the ones that have
//! not been touched for the idle timeout.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

struct ChunkSession {
    chunks: Vec<String>,
    completed: HashSet<usize>,
    last_access: Instant,
    last_access_at: DateTime<Utc>,
}

impl ChunkSession {
    fn touch(&mut self) {
        self.last_access = Instant::now();
        self.last_access_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionProgress {
    pub file_id: String,
    pub parts_total: usize,
    pub parts_completed: usize,
    pub last_access: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, ChunkSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut HashMap<String, ChunkSession>) -> T) -> T {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut sessions)
    }

    /// Start (or restart) tracking `file_id` with its ordered chunk names.
    pub fn open(&self, file_id: &str, chunks: Vec<String>) {
        self.with(|s| {
            s.insert(
                file_id.to_string(),
                ChunkSession {
                    chunks,
                    completed: HashSet::new(),
                    last_access: Instant::now(),
                    last_access_at: Utc::now(),
                },
            );
        });
    }

    /// Mark chunk `index` done. Unknown sessions and indexes are ignored.
    pub fn complete(&self, file_id: &str, index: usize) {
        self.with(|s| {
            if let Some(session) = s.get_mut(file_id) {
                if index < session.chunks.len() {
                    session.completed.insert(index);
                }
                session.touch();
            }
        });
    }

    pub fn progress(&self, file_id: &str) -> Option<SessionProgress> {
        self.with(|s| {
            s.get_mut(file_id).map(|session| {
                session.touch();
                SessionProgress {
                    file_id: file_id.to_string(),
                    parts_total: session.chunks.len(),
                    parts_completed: session.completed.len(),
                    last_access: session.last_access_at,
                }
            })
        })
    }

    pub fn close(&self, file_id: &str) {
        self.with(|s| {
            s.remove(file_id);
        });
    }

    /// Evict sessions idle for longer than `idle`. Returns how many went.
    pub fn sweep(&self, idle: Duration) -> usize {
        self.with(|s| {
            let before = s.len();
            s.retain(|id, session| {
                let keep = session.last_access.elapsed() < idle;
                if !keep {
                    debug!("Evicting idle stream session {}", id);
                }
                keep
            });
            before - s.len()
        })
    }

    pub fn len(&self) -> usize {
        self.with(|s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
