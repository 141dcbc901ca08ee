//! Federa Cleanup - eventual removal of job state
//!
//! Every job registers cleanup tasks. A task is executed inline when the job
//! finishes and re-driven in the background until it completes or runs out
//! of retries. Tasks are kept after completion.

pub mod pg_store;
pub mod service;
pub mod store;
pub mod task;
pub mod teardown;

pub use pg_store::PgCleanupStore;
pub use service::{CleanupService, RedriveReport};
pub use store::{CleanupStore, MemoryCleanupStore};
pub use task::{CleanupTask, TaskStatus, TaskType};
pub use teardown::{ResourceTeardown, Teardown};
