//! Durable job execution
//!
//! This module provides the execution half of the queue:
//! - Job types and the enqueue envelope
//! - Exponential backoff retry policy with a hard ceiling
//! - Shell subprocess supervision under a per-job deadline
//! - The single-job-at-a-time worker loop with cooperative shutdown
//! - The worker-pool supervisor (OS processes, pid file, signals)
//!
//! The store (`crate::store`) owns all persistence; everything here
//! consumes it. A pool is N independent worker processes racing on
//! `Store::claim`, which guarantees no two of them ever hold the same
//! job.

pub mod backoff;
pub mod executor;
pub mod job;
pub mod supervisor;
pub mod worker;

// Re-export main types
pub use executor::CommandOutput;
pub use job::{Job, JobOutcome, JobSpec, JobState};
pub use supervisor::{Supervisor, WorkerProcess, PID_FILE};
pub use worker::Worker;
