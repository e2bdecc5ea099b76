//! End-to-end queue behavior driven through the library API: real SQLite
//! stores, real subprocesses, in-process worker loops.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use queuectl_core::{Job, JobSpec, JobState, Store, Worker};

async fn open_store(dir: &TempDir) -> Store {
    Store::open_at(dir.path().join("queuectl.db"))
        .await
        .expect("open store")
}

async fn spawn_worker(
    store: &Store,
    id: u32,
    shutdown: &CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let worker = Worker::new(id, store.clone(), shutdown.clone()).await;
    tokio::spawn(async move { worker.run().await })
}

/// Poll until the job reaches `state` or `timeout` elapses.
async fn wait_for_state(
    store: &Store,
    id: &str,
    state: JobState,
    timeout: Duration,
) -> Option<Job> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(job) = store.get_job(id).await.expect("get_job") {
            if job.state == state {
                return Some(job);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn basic_job_completes() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store.set_config("backoff_base", &json!(1)).await.unwrap();

    let spec: JobSpec = serde_json::from_value(json!({
        "id": "basic-1",
        "command": "echo test-basic",
        "max_retries": 1,
    }))
    .unwrap();
    store.enqueue(spec).await.unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(&store, 1, &shutdown).await;

    let job = wait_for_state(&store, "basic-1", JobState::Completed, Duration::from_secs(5))
        .await
        .expect("job should complete within five seconds");
    assert!(job.stdout.as_deref().unwrap_or("").contains("test-basic"));
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.is_none());

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_job_retries_and_moves_to_dlq() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store.set_config("backoff_base", &json!(1)).await.unwrap();

    store
        .enqueue(JobSpec::command("/bin/false").with_id("fail-1").with_max_retries(2))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(&store, 1, &shutdown).await;

    let job = wait_for_state(&store, "fail-1", JobState::Dead, Duration::from_secs(10))
        .await
        .expect("job should reach the dead-letter queue");
    assert!(job.attempts >= 2);
    assert_eq!(job.last_error.as_deref(), Some("exit=1"));
    assert!(!job.timed_out);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multiple_workers_share_the_queue_without_overlap() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store.set_config("backoff_base", &json!(1)).await.unwrap();

    let total = 6;
    for i in 0..total {
        store
            .enqueue(
                JobSpec::command(format!("echo worker-job-{i}"))
                    .with_id(format!("m{i}"))
                    .with_max_retries(1),
            )
            .await
            .unwrap();
    }

    let shutdown = CancellationToken::new();
    let first = spawn_worker(&store, 1, &shutdown).await;
    let second = spawn_worker(&store, 2, &shutdown).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let counts = store.status_counts().await.unwrap();
        if counts.get(&JobState::Completed).copied().unwrap_or(0) >= total {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "all jobs should complete within ten seconds"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for job in store.list_jobs(Some(JobState::Completed)).await.unwrap() {
        // Every attempt count of 1 means no job was ever claimed twice.
        assert_eq!(job.attempts, 1);
        assert!(!job.stdout.as_deref().unwrap_or("").is_empty());
    }

    shutdown.cancel();
    first.await.unwrap();
    second.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_command_fails_gracefully() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store.set_config("backoff_base", &json!(1)).await.unwrap();

    store
        .enqueue(
            JobSpec::command("nonexistent-command-xyz")
                .with_id("invalid-1")
                .with_max_retries(1),
        )
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(&store, 1, &shutdown).await;

    let job = wait_for_state(&store, "invalid-1", JobState::Dead, Duration::from_secs(10))
        .await
        .expect("unknown command should land in the dead-letter queue");
    let stderr = job.stderr.as_deref().unwrap_or("");
    let last_error = job.last_error.as_deref().unwrap_or("");
    assert!(!stderr.is_empty() || !last_error.is_empty());

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn jobs_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("queuectl.db");

    // Enqueue with no worker running, then drop the store entirely.
    {
        let store = Store::open_at(&path).await.unwrap();
        store
            .enqueue(
                JobSpec::command("echo persisted")
                    .with_id("persist-1")
                    .with_max_retries(1),
            )
            .await
            .unwrap();
    }
    assert!(path.exists());

    let store = Store::open_at(&path).await.unwrap();
    let job = store.get_job("persist-1").await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Pending);

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(&store, 1, &shutdown).await;

    wait_for_state(&store, "persist-1", JobState::Completed, Duration::from_secs(5))
        .await
        .expect("restored job should complete");

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_job_is_classified() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store.set_config("job_timeout", &json!(1)).await.unwrap();

    let id = store
        .enqueue(JobSpec::command("sleep 10").with_max_retries(1))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(&store, 1, &shutdown).await;

    let job = wait_for_state(&store, &id, JobState::Dead, Duration::from_secs(10))
        .await
        .expect("sleeping job should be killed and buried");
    assert!(job.timed_out);
    assert_eq!(job.last_error.as_deref(), Some("exit=-1, timeout"));
    let duration = job.duration.expect("duration recorded");
    assert!(duration >= 0.5 && duration < 5.0, "duration was {duration}");

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dlq_retry_gives_a_dead_job_another_run() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    store.set_config("backoff_base", &json!(1)).await.unwrap();

    // `sh -c` exits 0 only once the marker file exists, so the first run
    // dies and the post-retry run succeeds.
    let marker = dir.path().join("marker");
    let command = format!("test -f {}", marker.display());
    store
        .enqueue(JobSpec::command(command).with_id("revive-1").with_max_retries(1))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let handle = spawn_worker(&store, 1, &shutdown).await;

    wait_for_state(&store, "revive-1", JobState::Dead, Duration::from_secs(10))
        .await
        .expect("first run should fail into the dead-letter queue");

    std::fs::write(&marker, b"ready").unwrap();
    store.dlq_retry("revive-1").await.unwrap();

    let job = wait_for_state(&store, "revive-1", JobState::Completed, Duration::from_secs(10))
        .await
        .expect("revived job should complete");
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.is_none());

    shutdown.cancel();
    handle.await.unwrap();
}
