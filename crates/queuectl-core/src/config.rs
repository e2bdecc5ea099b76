//! Queue configuration: recognized keys, seeded defaults, and the
//! worker's startup snapshot.
//!
//! Values live in the store's `config` table as JSON-encoded scalars.
//! Only the three keys below are consumed by the system; anything else an
//! operator sets is carried along as an opaque key/value scratchpad.

use std::time::Duration;

use serde_json::{json, Value};

/// Config key: retry ceiling for jobs enqueued without one.
pub const MAX_RETRIES: &str = "max_retries";

/// Config key: base of the exponential retry delay.
pub const BACKOFF_BASE: &str = "backoff_base";

/// Config key: fallback execution timeout for jobs with `timeout == 0`.
pub const JOB_TIMEOUT: &str = "job_timeout";

pub const DEFAULT_MAX_RETRIES: i64 = 3;
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 10;

/// Rows seeded into the config table when a store is opened. Seeding is
/// idempotent; operator overrides are never clobbered.
pub fn default_entries() -> [(&'static str, Value); 3] {
    [
        (MAX_RETRIES, json!(DEFAULT_MAX_RETRIES)),
        (BACKOFF_BASE, json!(2)),
        (JOB_TIMEOUT, json!(DEFAULT_JOB_TIMEOUT_SECS)),
    ]
}

/// The worker's startup snapshot of the config keys it consumes.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Base of the exponential retry delay.
    pub backoff_base: f64,

    /// Fallback execution timeout in seconds.
    pub job_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
        }
    }
}

impl WorkerSettings {
    /// Build from raw config values, falling back to defaults for keys
    /// that are missing or hold a value of the wrong JSON type.
    pub fn from_values(backoff_base: Option<Value>, job_timeout: Option<Value>) -> Self {
        Self {
            backoff_base: backoff_base
                .and_then(|v| v.as_f64())
                .unwrap_or(DEFAULT_BACKOFF_BASE),
            job_timeout_secs: job_timeout
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_JOB_TIMEOUT_SECS),
        }
    }

    /// Get the fallback job timeout as a `Duration`.
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = WorkerSettings::default();
        assert_eq!(settings.backoff_base, 2.0);
        assert_eq!(settings.job_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_values() {
        let settings = WorkerSettings::from_values(Some(json!(1.5)), Some(json!(60)));
        assert_eq!(settings.backoff_base, 1.5);
        assert_eq!(settings.job_timeout_secs, 60);
    }

    #[test]
    fn test_mistyped_values_fall_back() {
        let settings = WorkerSettings::from_values(Some(json!("two")), Some(json!(-3)));
        assert_eq!(settings.backoff_base, DEFAULT_BACKOFF_BASE);
        assert_eq!(settings.job_timeout_secs, DEFAULT_JOB_TIMEOUT_SECS);
    }

    #[test]
    fn test_seeded_entries_cover_all_keys() {
        let keys: Vec<&str> = default_entries().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![MAX_RETRIES, BACKOFF_BASE, JOB_TIMEOUT]);
    }
}
