//! Worker pool, dispatch loop, and the submission API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use conveyor_core::{
    defaults, new_v7, DurableStore, Error, Job, JobCallback, JobRequest, JobState, MetricsSnapshot,
    Result,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::queue::PriorityQueueSet;
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;
use crate::tracker::JobTracker;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration for the job engine, immutable after `start()`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent workers in the pool.
    pub workers: usize,
    /// Safety-net polling interval when all lanes are empty, in milliseconds.
    pub poll_interval_ms: u64,
    /// Retry ceiling applied to jobs that don't override it.
    pub default_max_attempts: i32,
    /// Hard per-attempt timeout applied to jobs that don't override it, in
    /// milliseconds.
    pub default_timeout_ms: u64,
    /// Base delay for exponential retry backoff, in milliseconds.
    pub backoff_base_delay_ms: u64,
    /// Cap on the retry backoff delay, in milliseconds.
    pub backoff_max_delay_ms: u64,
    /// Sliding-window size for processing-time statistics.
    pub metrics_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: defaults::JOB_WORKERS,
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            default_max_attempts: defaults::JOB_MAX_ATTEMPTS,
            default_timeout_ms: defaults::JOB_TIMEOUT_MS,
            backoff_base_delay_ms: defaults::BACKOFF_BASE_DELAY_MS,
            backoff_max_delay_ms: defaults::BACKOFF_MAX_DELAY_MS,
            metrics_window: defaults::METRICS_WINDOW,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKERS` | `4` | Concurrent workers in the pool |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when lanes are empty |
    /// | `JOB_MAX_ATTEMPTS` | `3` | Default retry ceiling |
    /// | `JOB_TIMEOUT_MS` | `300000` | Default per-attempt timeout |
    /// | `JOB_BACKOFF_BASE_MS` | `1000` | Base retry delay |
    /// | `JOB_BACKOFF_MAX_MS` | `60000` | Retry delay cap |
    /// | `JOB_METRICS_WINDOW` | `1000` | Processing-time window size |
    pub fn from_env() -> Self {
        fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<T>().ok())
                .unwrap_or(default)
        }

        Self {
            workers: parse_var("JOB_WORKERS", defaults::JOB_WORKERS).max(1),
            poll_interval_ms: parse_var("JOB_POLL_INTERVAL_MS", defaults::JOB_POLL_INTERVAL_MS),
            default_max_attempts: parse_var("JOB_MAX_ATTEMPTS", defaults::JOB_MAX_ATTEMPTS).max(1),
            default_timeout_ms: parse_var("JOB_TIMEOUT_MS", defaults::JOB_TIMEOUT_MS),
            backoff_base_delay_ms: parse_var("JOB_BACKOFF_BASE_MS", defaults::BACKOFF_BASE_DELAY_MS),
            backoff_max_delay_ms: parse_var("JOB_BACKOFF_MAX_MS", defaults::BACKOFF_MAX_DELAY_MS),
            metrics_window: parse_var("JOB_METRICS_WINDOW", defaults::METRICS_WINDOW).max(1),
        }
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the empty-queue polling interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the default retry ceiling.
    pub fn with_default_max_attempts(mut self, max_attempts: i32) -> Self {
        self.default_max_attempts = max_attempts;
        self
    }

    /// Set the default per-attempt timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the retry backoff bounds.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base_delay_ms = base.as_millis() as u64;
        self.backoff_max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Set the processing-time window size.
    pub fn with_metrics_window(mut self, window: usize) -> Self {
        self.metrics_window = window;
        self
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.backoff_base_delay_ms),
            Duration::from_millis(self.backoff_max_delay_ms),
        )
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Event emitted by the worker pool.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job attempt was started.
    JobStarted {
        job_id: Uuid,
        job_type: String,
        attempt: i32,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: String },
    /// A job attempt failed (it may still be retried).
    JobFailed {
        job_id: Uuid,
        job_type: String,
        error: String,
    },
    /// A failed job was scheduled for retry.
    JobRetried {
        job_id: Uuid,
        attempt: i32,
        delay_ms: u64,
    },
    /// A job exhausted its attempts and was dead-lettered.
    JobDeadLettered { job_id: Uuid, job_type: String },
    /// A pending or retrying job was cancelled.
    JobCancelled { job_id: Uuid },
    /// A worker task started.
    WorkerStarted { worker_id: usize },
    /// A worker task stopped.
    WorkerStopped { worker_id: usize },
}

// =============================================================================
// ENGINE
// =============================================================================

/// Shared state behind every worker, retry timer, and handle.
struct EngineShared {
    config: EngineConfig,
    registry: HandlerRegistry,
    queue: PriorityQueueSet,
    tracker: JobTracker,
    policy: RetryPolicy,
    store: Option<Arc<dyn DurableStore>>,
    callbacks: Mutex<HashMap<Uuid, Arc<dyn JobCallback>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    shutdown_rx: watch::Receiver<bool>,
}

impl EngineShared {
    fn emit(&self, event: WorkerEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Mirror a record to the durable store; transitions already applied
    /// in memory are never rolled back over a mirror failure.
    async fn mirror(&self, job: &Job) {
        if let Some(store) = &self.store {
            if let Err(e) = store.persist(job).await {
                warn!(
                    subsystem = "engine",
                    job_id = %job.id,
                    state = %job.state,
                    error = %e,
                    "Failed to mirror job record to durable store"
                );
            }
        }
    }

    /// Invoke and discard the job's callback, outside any tracker lock.
    async fn fire_callback(&self, job: &Job) {
        let callback = self.callbacks.lock().await.remove(&job.id);
        if let Some(callback) = callback {
            callback.on_terminal(job).await;
        }
    }
}

/// Builder for a job engine with handlers registered up front.
pub struct EngineBuilder {
    config: EngineConfig,
    registry: HandlerRegistry,
    store: Option<Arc<dyn DurableStore>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Create a new engine builder.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: HandlerRegistry::new(),
            store: None,
        }
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a handler. All handlers must be registered before `start()`;
    /// the registry is frozen afterwards.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.registry.register(Arc::new(handler));
        self
    }

    /// Attach a durable store. With a store configured, submissions fail
    /// closed when the store is unavailable, and unfinished jobs are
    /// recovered on the next `start()`.
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the engine.
    pub fn build(self) -> JobEngine {
        JobEngine {
            config: self.config,
            registry: self.registry,
            store: self.store,
        }
    }
}

/// A configured, not-yet-running job engine.
pub struct JobEngine {
    config: EngineConfig,
    registry: HandlerRegistry,
    store: Option<Arc<dyn DurableStore>>,
}

impl JobEngine {
    /// Recover unfinished jobs from the store, spawn the worker pool, and
    /// return the submission handle.
    pub async fn start(self) -> Result<EngineHandle> {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let policy = self.config.retry_policy();
        let shared = Arc::new(EngineShared {
            registry: self.registry,
            queue: PriorityQueueSet::new(),
            tracker: JobTracker::new(self.config.metrics_window),
            policy,
            store: self.store,
            callbacks: Mutex::new(HashMap::new()),
            event_tx,
            shutdown_rx: shutdown_rx.clone(),
            config: self.config,
        });

        let recovered = recover_jobs(&shared).await?;
        if recovered > 0 {
            info!(
                subsystem = "engine",
                op = "recover",
                recovered, "Recovered unfinished jobs from durable store"
            );
        }

        let workers = shared.config.workers.max(1);
        info!(
            subsystem = "engine",
            op = "start",
            workers,
            poll_interval_ms = shared.config.poll_interval_ms,
            "Job engine started"
        );

        let mut tasks = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let shared = shared.clone();
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                worker_loop(worker_id, shared, shutdown).await;
            }));
        }

        Ok(EngineHandle {
            shared,
            shutdown_tx,
            workers: tasks,
        })
    }
}

/// Reload unfinished records from the store into the tracker and lanes.
///
/// A RUNNING record from a dead process is reset to PENDING and simply runs
/// again (at-least-once, never silent loss). Attempt counts are preserved.
async fn recover_jobs(shared: &Arc<EngineShared>) -> Result<usize> {
    let Some(store) = &shared.store else {
        return Ok(0);
    };

    let jobs = store.load_recoverable().await?;
    let mut recovered = 0;
    for mut job in jobs {
        if !shared.registry.contains(&job.job_type) {
            // Handler set changed between runs; dispatch will fail the job
            // into the normal retry/dead-letter path instead of dropping it.
            warn!(
                subsystem = "engine",
                op = "recover",
                job_id = %job.id,
                job_type = %job.job_type,
                "Recovered job has no registered handler"
            );
        }
        job.state = JobState::Pending;
        shared.mirror(&job).await;

        let id = job.id;
        let priority = job.priority;
        shared.tracker.insert(job).await;
        shared.queue.push(priority, id).await;
        recovered += 1;
    }
    Ok(recovered)
}

// =============================================================================
// SUBMISSION API
// =============================================================================

/// Handle for submitting work to a running engine and controlling it.
///
/// This is the engine's entire external surface: submit, status, cancel,
/// metrics, the event stream, and shutdown.
pub struct EngineHandle {
    shared: Arc<EngineShared>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Submit a job. Returns its id immediately; execution is asynchronous.
    ///
    /// Fails with [`Error::UnknownJobType`] when no handler is registered
    /// for the request's type, and fails closed (job neither tracked nor
    /// enqueued) when the configured durable store rejects the record.
    pub async fn submit(&self, request: JobRequest) -> Result<Uuid> {
        self.submit_inner(request, None).await
    }

    /// Submit a job with a callback invoked once at its terminal state.
    pub async fn submit_with_callback(
        &self,
        request: JobRequest,
        callback: Arc<dyn JobCallback>,
    ) -> Result<Uuid> {
        self.submit_inner(request, Some(callback)).await
    }

    async fn submit_inner(
        &self,
        request: JobRequest,
        callback: Option<Arc<dyn JobCallback>>,
    ) -> Result<Uuid> {
        if !self.shared.registry.contains(&request.job_type) {
            return Err(Error::UnknownJobType(request.job_type));
        }

        let job = Job {
            id: new_v7(),
            job_type: request.job_type,
            payload: request.payload,
            priority: request.priority,
            state: JobState::Pending,
            attempt_count: 0,
            max_attempts: request
                .max_attempts
                .unwrap_or(self.shared.config.default_max_attempts),
            timeout_ms: request
                .timeout
                .map(|t| t.as_millis() as u64)
                .unwrap_or(self.shared.config.default_timeout_ms),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        };

        // Fail closed: the record must be durable before it can dispatch.
        if let Some(store) = &self.shared.store {
            store.persist(&job).await?;
        }

        let id = job.id;
        let priority = job.priority;
        if let Some(callback) = callback {
            self.shared.callbacks.lock().await.insert(id, callback);
        }
        self.shared.tracker.insert(job).await;
        self.shared.queue.push(priority, id).await;

        debug!(
            subsystem = "engine",
            op = "submit",
            job_id = %id,
            priority = %priority,
            "Job submitted"
        );
        Ok(id)
    }

    /// Snapshot the current record for a job.
    pub async fn status(&self, job_id: Uuid) -> Result<Job> {
        self.shared
            .tracker
            .get(job_id)
            .await
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Cancel a job.
    ///
    /// Returns `Ok(true)` when the job was PENDING or RETRYING and is now
    /// CANCELLED (it will never be dispatched). Returns `Ok(false)`, a
    /// no-op rather than an error, when the job is already running or
    /// terminal.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        match self.shared.tracker.cancel(job_id).await {
            None => Err(Error::JobNotFound(job_id)),
            Some(Err(state)) => {
                debug!(
                    subsystem = "engine",
                    op = "cancel",
                    job_id = %job_id,
                    state = %state,
                    "Cancel is a no-op in this state"
                );
                Ok(false)
            }
            Some(Ok(job)) => {
                // For a pending job this pulls it out of its lane; for a
                // retrying job the timer re-checks state and drops it.
                self.shared.queue.remove(job.priority, job_id).await;
                self.shared.mirror(&job).await;
                self.shared.emit(WorkerEvent::JobCancelled { job_id });
                self.shared.fire_callback(&job).await;
                info!(
                    subsystem = "engine",
                    op = "cancel",
                    job_id = %job_id,
                    "Job cancelled"
                );
                Ok(true)
            }
        }
    }

    /// Derive the current metrics snapshot.
    pub async fn metrics(&self) -> MetricsSnapshot {
        let depths = self.shared.queue.depths().await;
        self.shared.tracker.metrics(depths).await
    }

    /// List dead-lettered jobs for inspection, newest first. Served from
    /// the durable archive when a store is configured, otherwise from the
    /// in-memory tracker.
    pub async fn dead_letters(&self, limit: i64) -> Result<Vec<Job>> {
        match &self.shared.store {
            Some(store) => store.list_dead_letters(limit).await,
            None => Ok(self
                .shared
                .tracker
                .list_dead_lettered(limit.max(0) as usize)
                .await),
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Signal the workers to stop and wait for them to finish the jobs they
    /// hold. Pending retry timers are abandoned; their RETRYING records are
    /// recovered on the next start when a store is configured.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.shared.queue.notify_all();
        join_all(self.workers).await;
        info!(subsystem = "engine", op = "shutdown", "Job engine stopped");
        Ok(())
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

/// One worker's dispatch loop: drain the lanes; when empty, park on the
/// queue's notify handle with a safety-net poll.
async fn worker_loop(
    worker_id: usize,
    shared: Arc<EngineShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    shared.emit(WorkerEvent::WorkerStarted { worker_id });
    debug!(subsystem = "engine", worker_id, "Worker started");

    let poll_interval = Duration::from_millis(shared.config.poll_interval_ms.max(1));
    loop {
        if *shutdown.borrow() {
            break;
        }
        match shared.queue.pop().await {
            Some(job_id) => execute_job(&shared, worker_id, job_id).await,
            None => {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = shared.queue.notified() => {}
                    _ = sleep(poll_interval) => {}
                }
            }
        }
    }

    shared.emit(WorkerEvent::WorkerStopped { worker_id });
    debug!(subsystem = "engine", worker_id, "Worker stopped");
}

/// Execute a single dequeued job id.
async fn execute_job(shared: &Arc<EngineShared>, worker_id: usize, job_id: Uuid) {
    // The queue hands each id to exactly one worker; the claim below is the
    // atomic PENDING→RUNNING transition. Losing it means a cancel won.
    let Some(job) = shared.tracker.begin_attempt(job_id).await else {
        debug!(
            subsystem = "engine",
            worker_id,
            job_id = %job_id,
            "Dequeued job no longer pending; dropping"
        );
        return;
    };

    let start = Instant::now();
    shared.mirror(&job).await;
    shared.emit(WorkerEvent::JobStarted {
        job_id,
        job_type: job.job_type.clone(),
        attempt: job.attempt_count,
    });
    info!(
        subsystem = "engine",
        worker_id,
        job_id = %job_id,
        job_type = %job.job_type,
        attempt = job.attempt_count,
        "Processing job"
    );

    let outcome = match shared.registry.get(&job.job_type) {
        Some(handler) => {
            let timeout = job.timeout();
            let ctx = JobContext::new(job.clone());
            match tokio::time::timeout(timeout, handler.execute(ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        subsystem = "engine",
                        job_id = %job_id,
                        job_type = %job.job_type,
                        timeout_ms = job.timeout_ms,
                        "Job exceeded its timeout"
                    );
                    JobResult::Failed(format!("timeout: exceeded {}ms", job.timeout_ms))
                }
            }
        }
        None => {
            // Submission rejects unknown types; only a recovered job whose
            // handler disappeared between runs can land here.
            warn!(
                subsystem = "engine",
                job_id = %job_id,
                job_type = %job.job_type,
                "No handler registered for job type"
            );
            JobResult::Failed(format!("no handler for job type: {}", job.job_type))
        }
    };

    match outcome {
        JobResult::Success(result) => {
            if let Some(done) = shared.tracker.complete(job_id, result).await {
                shared.mirror(&done).await;
                info!(
                    subsystem = "engine",
                    worker_id,
                    job_id = %job_id,
                    job_type = %done.job_type,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                shared.emit(WorkerEvent::JobCompleted {
                    job_id,
                    job_type: done.job_type.clone(),
                });
                shared.fire_callback(&done).await;
            }
        }
        JobResult::Failed(error) | JobResult::Retry(error) => {
            handle_failure(shared, job_id, error, start).await;
        }
    }
}

/// Route a failed attempt: back off and requeue, or dead-letter.
async fn handle_failure(shared: &Arc<EngineShared>, job_id: Uuid, error: String, start: Instant) {
    let Some(failed) = shared.tracker.fail(job_id, &error).await else {
        return;
    };
    shared.mirror(&failed).await;
    warn!(
        subsystem = "engine",
        job_id = %job_id,
        job_type = %failed.job_type,
        attempt = failed.attempt_count,
        error = %error,
        duration_ms = start.elapsed().as_millis() as u64,
        "Job failed"
    );
    shared.emit(WorkerEvent::JobFailed {
        job_id,
        job_type: failed.job_type.clone(),
        error,
    });

    if failed.attempt_count < failed.max_attempts {
        let delay = shared.policy.delay_for(failed.attempt_count);
        let Some(retrying) = shared.tracker.schedule_retry(job_id).await else {
            return;
        };
        shared.mirror(&retrying).await;
        shared.emit(WorkerEvent::JobRetried {
            job_id,
            attempt: retrying.attempt_count,
            delay_ms: delay.as_millis() as u64,
        });
        debug!(
            subsystem = "engine",
            component = "retry",
            job_id = %job_id,
            attempt = retrying.attempt_count,
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );

        let shared = shared.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            if *shared.shutdown_rx.borrow() {
                // Left in RETRYING; recovery re-enqueues it on next start.
                return;
            }
            // A cancel during the delay leaves the job out of RETRYING and
            // this requeue quietly drops.
            if let Some(pending) = shared.tracker.requeue(job_id).await {
                shared.mirror(&pending).await;
                shared.queue.push(pending.priority, job_id).await;
            }
        });
    } else if let Some(dead) = shared.tracker.dead_letter(job_id).await {
        // Dead-lettering never raises: archive errors are logged and the
        // in-memory record stays authoritative.
        if let Some(store) = &shared.store {
            if let Err(e) = store.archive_dead_letter(&dead).await {
                error!(
                    subsystem = "engine",
                    component = "dead_letter",
                    job_id = %job_id,
                    error = %e,
                    "Failed to archive dead-lettered job"
                );
            }
        }
        error!(
            subsystem = "engine",
            job_id = %job_id,
            job_type = %dead.job_type,
            attempt = dead.attempt_count,
            "Job dead-lettered after exhausting attempts"
        );
        shared.emit(WorkerEvent::JobDeadLettered {
            job_id,
            job_type: dead.job_type.clone(),
        });
        shared.fire_callback(&dead).await;
    }
}
