//! queuectl-core: a durable shell-command job queue.
//!
//! Jobs live in a transactional SQLite store (`queuectl.db` in the
//! working directory), are claimed atomically by worker processes,
//! executed through `sh -c` under a hard deadline, retried with
//! exponential backoff, and parked in a dead-letter state once the retry
//! budget is exhausted.
//!
//! See [`store::Store`] for the persistence contract, [`jobs::Worker`]
//! for the execution loop, and [`jobs::Supervisor`] for pool management.

pub mod config;
pub mod error;
pub mod jobs;
pub mod store;

// Re-export commonly used types
pub use error::{Error, Result};
pub use jobs::{Job, JobOutcome, JobSpec, JobState, Supervisor, Worker};
pub use store::Store;

/// Current version of queuectl.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
