//! Integration tests for durable-store mirroring, fail-closed submission,
//! terminal callbacks, and crash recovery.
//!
//! The `MemoryStore` doubles as the durable store here: sharing one `Arc`
//! across two engine instances simulates a process restart without needing
//! PostgreSQL (the `conveyor-db` suite covers the real backend).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::sleep;
use uuid::Uuid;

use conveyor_jobs::{
    new_v7, DurableStore, EngineBuilder, EngineConfig, EngineHandle, Error, Job, JobCallback,
    JobContext, JobHandler, JobPriority, JobRequest, JobResult, JobState, MemoryStore, Result,
};

// ============================================================================
// HELPERS
// ============================================================================

/// Install the test log subscriber once; `RUST_LOG` controls verbosity.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config(workers: usize) -> EngineConfig {
    init_tracing();
    EngineConfig::default()
        .with_workers(workers)
        .with_poll_interval(10)
        .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
}

async fn wait_for_state(
    handle: &EngineHandle,
    job_id: Uuid,
    expected: JobState,
    timeout_ms: u64,
) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if let Ok(job) = handle.status(job_id).await {
            if job.state == expected {
                return true;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    fn job_type(&self) -> &str {
        "echo"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        JobResult::Success(Some(ctx.payload().clone()))
    }
}

struct AlwaysFailHandler;

#[async_trait]
impl JobHandler for AlwaysFailHandler {
    fn job_type(&self) -> &str {
        "always_fail"
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Failed("Intentional test failure".to_string())
    }
}

/// Store that refuses every write, to exercise the fail-closed path.
struct OfflineStore;

#[async_trait]
impl DurableStore for OfflineStore {
    async fn persist(&self, _job: &Job) -> Result<()> {
        Err(Error::Store("store offline".to_string()))
    }

    async fn archive_dead_letter(&self, _job: &Job) -> Result<()> {
        Err(Error::Store("store offline".to_string()))
    }

    async fn load_recoverable(&self) -> Result<Vec<Job>> {
        Ok(Vec::new())
    }

    async fn list_dead_letters(&self, _limit: i64) -> Result<Vec<Job>> {
        Ok(Vec::new())
    }
}

fn stored_job(job_type: &str, state: JobState, priority: JobPriority) -> Job {
    Job {
        id: new_v7(),
        job_type: job_type.to_string(),
        payload: json!({"recovered": true}),
        priority,
        state,
        attempt_count: if state == JobState::Running { 1 } else { 0 },
        max_attempts: 3,
        timeout_ms: 300_000,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        result: None,
        error: None,
    }
}

// ============================================================================
// MIRRORING & CALLBACKS
// ============================================================================

#[tokio::test]
async fn store_mirrors_lifecycle_transitions() {
    let store = MemoryStore::shared();

    let handle = EngineBuilder::new()
        .with_config(test_config(2))
        .with_handler(EchoHandler)
        .with_store(store.clone())
        .build()
        .start()
        .await
        .expect("engine starts");

    let job_id = handle
        .submit(JobRequest::new("echo", json!({"n": 7})))
        .await
        .expect("submit");

    assert!(wait_for_state(&handle, job_id, JobState::Completed, 5_000).await);
    // Mirror writes trail the in-memory transition slightly
    sleep(Duration::from_millis(100)).await;

    let mirrored = store.get(job_id).await.expect("mirrored record");
    assert_eq!(mirrored.state, JobState::Completed);
    assert_eq!(mirrored.result, Some(json!({"n": 7})));
    assert!(mirrored.completed_at.is_some());

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn dead_letters_are_archived_durably() {
    let store = MemoryStore::shared();

    let handle = EngineBuilder::new()
        .with_config(test_config(1))
        .with_handler(AlwaysFailHandler)
        .with_store(store.clone())
        .build()
        .start()
        .await
        .expect("engine starts");

    let job_id = handle
        .submit(JobRequest::new("always_fail", json!({})).with_max_attempts(2))
        .await
        .expect("submit");

    assert!(wait_for_state(&handle, job_id, JobState::DeadLettered, 10_000).await);
    sleep(Duration::from_millis(100)).await;

    let archived = handle.dead_letters(10).await.expect("dead letters");
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].id, job_id);
    assert_eq!(archived[0].attempt_count, 2);
    assert_eq!(
        archived[0].error.as_deref(),
        Some("Intentional test failure")
    );

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn callback_fires_once_per_terminal_state() {
    struct CountingCallback {
        fired: Arc<AtomicUsize>,
        last_state: Arc<Mutex<Option<JobState>>>,
    }

    #[async_trait]
    impl JobCallback for CountingCallback {
        async fn on_terminal(&self, job: &Job) {
            self.fired.fetch_add(1, Ordering::SeqCst);
            *self.last_state.lock().await = Some(job.state);
        }
    }

    let fired = Arc::new(AtomicUsize::new(0));
    let last_state = Arc::new(Mutex::new(None));

    let handle = EngineBuilder::new()
        .with_config(test_config(1))
        .with_handler(AlwaysFailHandler)
        .build()
        .start()
        .await
        .expect("engine starts");

    let job_id = handle
        .submit_with_callback(
            JobRequest::new("always_fail", json!({})).with_max_attempts(2),
            Arc::new(CountingCallback {
                fired: fired.clone(),
                last_state: last_state.clone(),
            }),
        )
        .await
        .expect("submit");

    assert!(wait_for_state(&handle, job_id, JobState::DeadLettered, 10_000).await);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(*last_state.lock().await, Some(JobState::DeadLettered));

    handle.shutdown().await.expect("shutdown");
}

// ============================================================================
// FAIL-CLOSED SUBMISSION
// ============================================================================

#[tokio::test]
async fn submission_fails_closed_when_store_is_unavailable() {
    let handle = EngineBuilder::new()
        .with_config(test_config(1))
        .with_handler(EchoHandler)
        .with_store(Arc::new(OfflineStore))
        .build()
        .start()
        .await
        .expect("engine starts");

    let err = handle
        .submit(JobRequest::new("echo", json!({})))
        .await
        .expect_err("submit must fail closed");
    assert!(matches!(err, Error::Store(_)));

    // The rejected job was neither tracked nor enqueued
    let metrics = handle.metrics().await;
    assert_eq!(metrics.total_submitted, 0);
    assert_eq!(metrics.lane_depths.total(), 0);

    handle.shutdown().await.expect("shutdown");
}

// ============================================================================
// CRASH RECOVERY
// ============================================================================

#[tokio::test]
async fn recovery_reenqueues_unfinished_jobs() {
    let store = MemoryStore::shared();

    // Simulate the leftovers of a crashed process: one job never dispatched,
    // one mid-attempt, one already finished.
    let pending = stored_job("echo", JobState::Pending, JobPriority::Normal);
    let running = stored_job("echo", JobState::Running, JobPriority::High);
    let mut done = stored_job("echo", JobState::Completed, JobPriority::Low);
    done.completed_at = Some(Utc::now());

    for job in [&pending, &running, &done] {
        store.persist(job).await.expect("seed store");
    }

    let handle = EngineBuilder::new()
        .with_config(test_config(2))
        .with_handler(EchoHandler)
        .with_store(store.clone())
        .build()
        .start()
        .await
        .expect("engine starts");

    // Both unfinished jobs run to completion; at-least-once means the
    // interrupted attempt simply runs again.
    assert!(wait_for_state(&handle, pending.id, JobState::Completed, 5_000).await);
    assert!(wait_for_state(&handle, running.id, JobState::Completed, 5_000).await);

    let rerun = handle.status(running.id).await.expect("status");
    assert_eq!(rerun.attempt_count, 2, "interrupted attempt already counted");

    // The finished job is not resurrected
    assert!(matches!(
        handle.status(done.id).await,
        Err(Error::JobNotFound(_))
    ));

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn retrying_job_survives_restart() {
    let store = MemoryStore::shared();

    // First process: a job fails once and is parked in RETRYING with a long
    // backoff, then the process shuts down before the timer fires.
    let counter = Arc::new(AtomicUsize::new(0));

    struct FailOnceHandler {
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for FailOnceHandler {
        fn job_type(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _ctx: JobContext) -> JobResult {
            if self.counter.fetch_add(1, Ordering::SeqCst) == 0 {
                JobResult::Failed("first attempt fails".to_string())
            } else {
                JobResult::Success(Some(json!({"ok": true})))
            }
        }
    }

    let first = EngineBuilder::new()
        .with_config(
            test_config(1).with_backoff(Duration::from_secs(30), Duration::from_secs(30)),
        )
        .with_handler(FailOnceHandler {
            counter: counter.clone(),
        })
        .with_store(store.clone())
        .build()
        .start()
        .await
        .expect("first engine starts");

    let job_id = first
        .submit(JobRequest::new("flaky", json!({})).with_max_attempts(3))
        .await
        .expect("submit");

    assert!(wait_for_state(&first, job_id, JobState::Retrying, 5_000).await);
    first.shutdown().await.expect("shutdown first engine");

    // Second process: the RETRYING record is recovered as PENDING and
    // dispatched immediately, skipping the remainder of the backoff.
    let second = EngineBuilder::new()
        .with_config(test_config(1))
        .with_handler(FailOnceHandler { counter })
        .with_store(store.clone())
        .build()
        .start()
        .await
        .expect("second engine starts");

    assert!(wait_for_state(&second, job_id, JobState::Completed, 5_000).await);

    let job = second.status(job_id).await.expect("status");
    assert_eq!(job.attempt_count, 2);
    assert_eq!(job.result, Some(json!({"ok": true})));

    second.shutdown().await.expect("shutdown second engine");
}
