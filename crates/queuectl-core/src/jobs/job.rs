//! Job types and the enqueue envelope.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Job execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting to be claimed (possibly delayed by a retry backoff).
    Pending,

    /// Claimed by exactly one worker and executing.
    Processing,

    /// Finished successfully. Terminal.
    Completed,

    /// Exhausted all retries. Terminal until `dlq_retry`.
    Dead,
}

impl JobState {
    /// All states, in the order `status` reports them.
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Dead,
    ];

    /// String form as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }

    /// Check if the state is terminal without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "dead" => Ok(JobState::Dead),
            other => Err(Error::Other(format!("unknown job state: {other}"))),
        }
    }
}

/// A job record as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    /// Unique id, caller-supplied or generated at enqueue.
    pub id: String,

    /// Shell command, executed verbatim via `sh -c`.
    pub command: String,

    pub state: JobState,

    /// Completed execution attempts.
    pub attempts: i64,

    /// Attempt ceiling; a failure at or past it moves the job to `dead`.
    pub max_retries: i64,

    pub created_at: DateTime<Utc>,

    /// Timestamp of the last state transition.
    pub updated_at: DateTime<Utc>,

    /// Earliest wall clock (epoch seconds) a pending job may be claimed;
    /// 0 means immediately.
    pub available_at: f64,

    /// Per-job timeout override in seconds; 0 means the global default.
    pub timeout: i64,

    /// Short diagnostic from the most recent failed attempt.
    pub last_error: Option<String>,

    /// Captured output of the most recent attempt.
    pub stdout: Option<String>,
    pub stderr: Option<String>,

    /// Wall time of the most recent attempt, in seconds.
    pub duration: Option<f64>,

    /// Whether the most recent attempt was killed by its deadline.
    pub timed_out: bool,
}

impl Job {
    /// Resolve the effective execution timeout against the global default.
    pub fn effective_timeout(&self, default_secs: u64) -> u64 {
        if self.timeout > 0 {
            self.timeout as u64
        } else {
            default_secs
        }
    }
}

/// The JSON envelope accepted by `enqueue`. Everything except `command`
/// is optional and defaulted by the store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSpec {
    /// Shell command to execute. Required.
    pub command: Option<String>,

    /// Job id; a UUID is generated when absent.
    pub id: Option<String>,

    /// Retry ceiling; defaults from the `max_retries` config key.
    pub max_retries: Option<i64>,

    /// Timeout in seconds; 0 (or absent) means the global default.
    pub timeout: Option<i64>,

    /// Creation timestamp (ISO-8601); defaults to now UTC.
    pub created_at: Option<DateTime<Utc>>,
}

impl JobSpec {
    /// Envelope for a bare command, everything else defaulted.
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    /// Set an explicit job id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the per-job timeout in seconds.
    pub fn with_timeout(mut self, timeout_secs: i64) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }
}

/// The outcome of one execution attempt, as recorded by `finish`.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub success: bool,

    /// Attempt count after this run (post-increment).
    pub attempts: i64,

    pub max_retries: i64,

    /// Short diagnostic, e.g. `exit=1` or `exit=-1, timeout`.
    pub error: Option<String>,

    pub stdout: Option<String>,
    pub stderr: Option<String>,

    /// Wall time of the attempt, in seconds.
    pub duration: f64,

    pub timed_out: bool,

    /// Backoff delay in seconds before the next attempt; consulted only
    /// when the job goes back to `pending`.
    pub next_delay: u64,
}

impl JobOutcome {
    /// Whether this outcome exhausts the retry budget. The cap is
    /// inclusive: `attempts == max_retries` on a failure means dead.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }
}
