//! Shell command execution under a hard deadline.
//!
//! Commands run through `sh -c` in their own process group so that a
//! deadline kill reaches the whole tree, not just the shell. Output is
//! drained concurrently; whatever was captured before a kill is kept.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

/// Captured result of one command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Process exit code; `-1` when the process was killed or never
    /// spawned.
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,

    /// Wall time in seconds.
    pub duration: f64,

    /// Whether the deadline expired and the process group was killed.
    pub timed_out: bool,
}

impl CommandOutput {
    /// A clean exit with status 0. A timed-out run is never a success.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Short diagnostic recorded as the job's `last_error` on failure.
    pub fn error_label(&self) -> Option<String> {
        if self.success() {
            None
        } else if self.timed_out {
            Some("exit=-1, timeout".to_string())
        } else {
            Some(format!("exit={}", self.exit_code))
        }
    }

    fn spawn_failure(err: std::io::Error, started: Instant) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: err.to_string(),
            duration: started.elapsed().as_secs_f64(),
            timed_out: false,
        }
    }
}

/// Run `command` through `sh -c` with stdout/stderr captured, killing the
/// whole process group if `deadline` expires.
pub async fn run_with_deadline(command: &str, deadline: Duration) -> CommandOutput {
    let started = Instant::now();

    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
    {
        Ok(child) => child,
        Err(err) => return CommandOutput::spawn_failure(err, started),
    };

    let pid = child.id();
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let mut timed_out = false;
    let status = match tokio::time::timeout(deadline, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            timed_out = true;
            debug!(pid, "deadline expired, killing process group");
            kill_group(pid);
            child.wait().await
        }
    };

    let exit_code = if timed_out {
        -1
    } else {
        status.ok().and_then(|s| s.code()).unwrap_or(-1)
    };

    CommandOutput {
        exit_code,
        stdout: collect(stdout).await,
        stderr: collect(stderr).await,
        duration: started.elapsed().as_secs_f64(),
        timed_out,
    }
}

/// Read a child pipe to EOF on its own task so output keeps flowing while
/// we wait on the process.
fn drain<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    })
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    match handle {
        Some(handle) => String::from_utf8_lossy(&handle.await.unwrap_or_default()).into_owned(),
        None => String::new(),
    }
}

/// SIGKILL the child's process group. A group that is already gone is
/// not an error.
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command() {
        let output = run_with_deadline("echo hello-executor", Duration::from_secs(5)).await;
        assert!(output.success());
        assert_eq!(output.exit_code, 0);
        assert!(output.stdout.contains("hello-executor"));
        assert!(output.error_label().is_none());
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let output = run_with_deadline("exit 3", Duration::from_secs(5)).await;
        assert!(!output.success());
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.error_label().as_deref(), Some("exit=3"));
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn test_unknown_command_reports_stderr() {
        let output =
            run_with_deadline("nonexistent-command-xyz", Duration::from_secs(5)).await;
        assert!(!output.success());
        assert_ne!(output.exit_code, 0);
        assert!(!output.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_kills_and_classifies() {
        let output = run_with_deadline("sleep 10", Duration::from_millis(300)).await;
        assert!(output.timed_out);
        assert!(!output.success());
        assert_eq!(output.exit_code, -1);
        assert_eq!(output.error_label().as_deref(), Some("exit=-1, timeout"));
        assert!(output.duration < 5.0);
    }

    #[tokio::test]
    async fn test_partial_output_survives_kill() {
        let output =
            run_with_deadline("echo partial-line; sleep 10", Duration::from_millis(500)).await;
        assert!(output.timed_out);
        assert!(output.stdout.contains("partial-line"));
    }

    #[tokio::test]
    async fn test_captures_stderr_stream() {
        let output = run_with_deadline("echo oops >&2; exit 1", Duration::from_secs(5)).await;
        assert_eq!(output.exit_code, 1);
        assert!(output.stderr.contains("oops"));
    }
}
