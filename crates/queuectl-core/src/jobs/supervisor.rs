//! Worker pool supervision: process spawning, pid tracking, shutdown.
//!
//! Workers are independent OS processes so a runaway job can only wedge
//! its own worker, and the OS reclaims everything when one crashes. The
//! pid file is the supervisor's source of truth; entries for workers that
//! died without cleanup are reported as stale rather than hidden.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::error::Result;

/// Pid file name, resolved relative to the working directory at call
/// time.
pub const PID_FILE: &str = "queuectl_workers.pid";

/// Status of one tracked worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerProcess {
    pub pid: u32,

    /// Whether the pid currently responds to a no-op signal. A dead entry
    /// is stale bookkeeping from a worker that exited without cleanup.
    pub alive: bool,
}

/// Spawns and signals worker processes. It never executes jobs itself.
pub struct Supervisor {
    program: PathBuf,
    args: Vec<String>,
    pid_file: PathBuf,
}

impl Supervisor {
    /// Supervisor that re-invokes the current executable with
    /// `worker run --worker-id <i>`.
    pub fn new() -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::with_command(program, ["worker", "run"]))
    }

    /// Supervisor for an arbitrary worker command; `--worker-id <i>` is
    /// appended to the given arguments.
    pub fn with_command<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            pid_file: PathBuf::from(PID_FILE),
        }
    }

    /// Use a different pid file location.
    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = path.into();
        self
    }

    /// Spawn `count` detached worker processes with ids `1..=count` and
    /// record their pids. Pids already tracked are kept, so a second
    /// `start` grows the pool.
    pub fn start(&self, count: u32) -> Result<Vec<u32>> {
        let mut tracked = self.read_pids().unwrap_or_default();
        let mut spawned = Vec::with_capacity(count as usize);

        for worker_id in 1..=count {
            let child = Command::new(&self.program)
                .args(&self.args)
                .arg("--worker-id")
                .arg(worker_id.to_string())
                .stdin(Stdio::null())
                .spawn()?;
            let pid = child.id();
            info!(worker = worker_id, pid, "spawned worker process");
            spawned.push(pid);
            tracked.push(pid);
        }

        self.write_pids(&tracked)?;
        Ok(spawned)
    }

    /// Signal every tracked worker to stop after its in-flight job and
    /// drop the pid file. `None` means there was no pid file; otherwise
    /// the tracked pids are returned, vanished ones included.
    pub fn stop(&self) -> Result<Option<Vec<u32>>> {
        if !self.pid_file.exists() {
            return Ok(None);
        }

        let pids = self.read_pids()?;
        for pid in &pids {
            if !signal(*pid, libc::SIGTERM) {
                warn!(pid, "worker pid already gone");
            }
        }

        if let Err(err) = fs::remove_file(&self.pid_file) {
            warn!("could not remove pid file: {err}");
        }
        Ok(Some(pids))
    }

    /// Probe every tracked pid, distinguishing live workers from stale
    /// entries. An absent pid file means an empty pool.
    pub fn status(&self) -> Result<Vec<WorkerProcess>> {
        if !self.pid_file.exists() {
            return Ok(Vec::new());
        }
        let pids = self.read_pids()?;
        Ok(pids
            .into_iter()
            .map(|pid| WorkerProcess {
                pid,
                alive: signal(pid, 0),
            })
            .collect())
    }

    /// Path of the pid file this supervisor reads and writes.
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    fn read_pids(&self) -> Result<Vec<u32>> {
        let raw = fs::read_to_string(&self.pid_file)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_pids(&self, pids: &[u32]) -> Result<()> {
        fs::write(&self.pid_file, serde_json::to_string(pids)?)?;
        Ok(())
    }
}

/// Deliver `sig` to `pid` (0 probes without delivering). True when the
/// process exists and accepted the signal.
fn signal(pid: u32, sig: libc::c_int) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, sig) == 0 }
}
