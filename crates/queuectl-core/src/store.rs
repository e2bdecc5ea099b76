//! Durable SQLite-backed job store.
//!
//! The store is the single shared resource between the CLI and every
//! worker process. Writes are serialized by SQLite (WAL journal, 30 s
//! busy timeout); `claim` is one conditional UPDATE so that concurrent
//! workers can never observe the same pending job.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

use crate::config::{self, WorkerSettings};
use crate::error::{Error, Result};
use crate::jobs::{Job, JobOutcome, JobSpec, JobState};

/// Store file name, resolved relative to the working directory at call
/// time.
pub const STORE_FILE: &str = "queuectl.db";

/// SQLite-backed job store handle. Cheap to clone; all clones share one
/// connection pool.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

impl Store {
    /// Open (or create) the store at `queuectl.db` in the current working
    /// directory.
    pub async fn open() -> Result<Self> {
        Self::open_at(STORE_FILE).await
    }

    /// Open (or create) a store at an explicit path.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                command TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at TEXT,
                updated_at TEXT,
                available_at REAL DEFAULT 0,
                last_error TEXT,
                stdout TEXT,
                stderr TEXT,
                duration REAL,
                timed_out INTEGER DEFAULT 0,
                timeout INTEGER DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_state_available ON jobs(state, available_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE TABLE IF NOT EXISTS config (key TEXT PRIMARY KEY, value TEXT)")
            .execute(&self.pool)
            .await?;

        self.migrate_columns().await?;
        self.seed_config().await?;
        Ok(())
    }

    /// Add columns introduced after the first release to stores created
    /// by older versions. Best-effort: a failed ALTER leaves existing
    /// data untouched.
    async fn migrate_columns(&self) -> Result<()> {
        let rows = sqlx::query("PRAGMA table_info(jobs)")
            .fetch_all(&self.pool)
            .await?;
        let existing: Vec<String> = rows
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        const ADDED: [(&str, &str); 5] = [
            ("stdout", "TEXT"),
            ("stderr", "TEXT"),
            ("duration", "REAL"),
            ("timed_out", "INTEGER DEFAULT 0"),
            ("timeout", "INTEGER DEFAULT 0"),
        ];
        for (column, ty) in ADDED {
            if !existing.iter().any(|name| name == column) {
                let ddl = format!("ALTER TABLE jobs ADD COLUMN {column} {ty}");
                if let Err(err) = sqlx::query(&ddl).execute(&self.pool).await {
                    tracing::warn!(column, "schema migration skipped: {err}");
                }
            }
        }
        Ok(())
    }

    async fn seed_config(&self) -> Result<()> {
        for (key, value) in config::default_entries() {
            sqlx::query("INSERT OR IGNORE INTO config(key, value) VALUES (?1, ?2)")
                .bind(key)
                .bind(value.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Insert a new pending job and return its id.
    pub async fn enqueue(&self, spec: JobSpec) -> Result<String> {
        let command = match spec.command.as_deref() {
            Some(command) if !command.trim().is_empty() => command.to_string(),
            _ => return Err(Error::invalid_spec("missing command")),
        };

        let id = spec.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let max_retries = match spec.max_retries {
            Some(max_retries) => max_retries,
            None => self.default_max_retries().await,
        };
        let created_at = spec.created_at.unwrap_or_else(Utc::now);
        let timeout = spec.timeout.unwrap_or(0);

        sqlx::query(
            r#"
            INSERT INTO jobs(id, command, state, attempts, max_retries,
                             created_at, updated_at, available_at, timeout)
            VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5, 0, ?6)
            "#,
        )
        .bind(&id)
        .bind(&command)
        .bind(JobState::Pending)
        .bind(max_retries)
        .bind(created_at.to_rfc3339())
        .bind(timeout)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn default_max_retries(&self) -> i64 {
        match self.get_config(config::MAX_RETRIES).await {
            Ok(Some(value)) => value.as_i64().unwrap_or(config::DEFAULT_MAX_RETRIES),
            _ => config::DEFAULT_MAX_RETRIES,
        }
    }

    /// Atomically claim the oldest ready job, moving it to `processing`
    /// and returning its full record.
    ///
    /// Eligibility check and transition happen in one UPDATE that
    /// re-checks the prior state, so two concurrent callers can never
    /// claim the same job.
    pub async fn claim(&self) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
               SET state = ?1, updated_at = ?2
             WHERE id = (SELECT id FROM jobs
                          WHERE state = ?3 AND available_at <= ?4
                          ORDER BY created_at
                          LIMIT 1)
               AND state = ?3
            RETURNING *
            "#,
        )
        .bind(JobState::Processing)
        .bind(Utc::now().to_rfc3339())
        .bind(JobState::Pending)
        .bind(now_epoch())
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    /// Record the outcome of an execution attempt and transition the job:
    /// success goes to `completed`, an exhausted failure to `dead`, and a
    /// retryable failure back to `pending` with `available_at` pushed out
    /// by the outcome's backoff delay.
    pub async fn finish(&self, id: &str, outcome: &JobOutcome) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();

        if outcome.success {
            sqlx::query(
                r#"
                UPDATE jobs
                   SET state = ?1, attempts = ?2, updated_at = ?3, last_error = NULL,
                       stdout = ?4, stderr = ?5, duration = ?6, timed_out = ?7
                 WHERE id = ?8
                "#,
            )
            .bind(JobState::Completed)
            .bind(outcome.attempts)
            .bind(&updated_at)
            .bind(&outcome.stdout)
            .bind(&outcome.stderr)
            .bind(outcome.duration)
            .bind(outcome.timed_out)
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else if outcome.is_exhausted() {
            sqlx::query(
                r#"
                UPDATE jobs
                   SET state = ?1, attempts = ?2, updated_at = ?3, last_error = ?4,
                       stdout = ?5, stderr = ?6, duration = ?7, timed_out = ?8
                 WHERE id = ?9
                "#,
            )
            .bind(JobState::Dead)
            .bind(outcome.attempts)
            .bind(&updated_at)
            .bind(&outcome.error)
            .bind(&outcome.stdout)
            .bind(&outcome.stderr)
            .bind(outcome.duration)
            .bind(outcome.timed_out)
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else {
            let available_at = now_epoch() + outcome.next_delay as f64;
            sqlx::query(
                r#"
                UPDATE jobs
                   SET state = ?1, attempts = ?2, updated_at = ?3, available_at = ?4,
                       last_error = ?5, stdout = ?6, stderr = ?7, duration = ?8,
                       timed_out = ?9
                 WHERE id = ?10
                "#,
            )
            .bind(JobState::Pending)
            .bind(outcome.attempts)
            .bind(&updated_at)
            .bind(available_at)
            .bind(&outcome.error)
            .bind(&outcome.stdout)
            .bind(&outcome.stderr)
            .bind(outcome.duration)
            .bind(outcome.timed_out)
            .bind(id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Fetch a single job by id.
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Aggregate job counts per state.
    pub async fn status_counts(&self) -> Result<HashMap<JobState, i64>> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS cnt FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            let state: JobState = row.get("state");
            counts.insert(state, row.get::<i64, _>("cnt"));
        }
        Ok(counts)
    }

    /// List jobs, optionally filtered by state, oldest first.
    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let jobs = match state {
            Some(state) => {
                sqlx::query_as::<_, Job>(
                    "SELECT * FROM jobs WHERE state = ?1 ORDER BY created_at",
                )
                .bind(state)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>("SELECT * FROM jobs ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(jobs)
    }

    /// Return a dead job to `pending` with a cleared retry budget.
    pub async fn dlq_retry(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
               SET state = ?1, attempts = 0, available_at = 0, updated_at = ?2,
                   last_error = NULL
             WHERE id = ?3 AND state = ?4
            "#,
        )
        .bind(JobState::Pending)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(JobState::Dead)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotDead);
        }
        Ok(())
    }

    /// Store a JSON-encoded config value.
    pub async fn set_config(&self, key: &str, value: &Value) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO config(key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch a config value; `None` when the key has never been set.
    pub async fn get_config(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value FROM config WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(serde_json::from_str(&row.get::<String, _>("value"))?)),
            None => Ok(None),
        }
    }

    /// Snapshot of the worker-relevant config keys, with defaults for
    /// anything missing or mistyped.
    pub async fn worker_settings(&self) -> WorkerSettings {
        let backoff_base = self.get_config(config::BACKOFF_BASE).await.ok().flatten();
        let job_timeout = self.get_config(config::JOB_TIMEOUT).await.ok().flatten();
        WorkerSettings::from_values(backoff_base, job_timeout)
    }
}
