//! Authoritative job tracker and metrics collector.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use uuid::Uuid;

use conveyor_core::{Job, JobState, LaneDepths, MetricsSnapshot, StateCounts};

/// Authoritative current record for every known job id, behind a single
/// mutex so reads and transitions on a record are serialized.
///
/// Every transition method is compare-and-set on the current state and
/// returns the updated snapshot (`None` when the job is unknown or not in
/// the expected source state), so exactly one caller ever wins a contended
/// transition. This is what makes worker-claim vs. cancel races safe.
///
/// The sliding window of completion times is updated inside the same lock
/// as the completion transition; together with snapshot-time derivation of
/// the counts, metrics cannot drift from job state.
pub struct JobTracker {
    inner: Mutex<TrackerInner>,
}

struct TrackerInner {
    jobs: HashMap<Uuid, Job>,
    /// Processing time (ms) of the last `window_size` completions.
    window: VecDeque<f64>,
    window_size: usize,
}

impl JobTracker {
    /// Create a tracker with the given metrics window size.
    pub fn new(window_size: usize) -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                jobs: HashMap::new(),
                window: VecDeque::new(),
                window_size: window_size.max(1),
            }),
        }
    }

    /// Insert a newly submitted (or recovered) record.
    pub async fn insert(&self, job: Job) {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id, job);
    }

    /// Snapshot a record by id.
    pub async fn get(&self, job_id: Uuid) -> Option<Job> {
        let inner = self.inner.lock().await;
        inner.jobs.get(&job_id).cloned()
    }

    /// Number of known jobs.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    /// Whether no jobs are known.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.jobs.is_empty()
    }

    /// Claim a pending job for execution: `Pending → Running`, stamp
    /// `started_at` on the first attempt, increment the attempt count.
    ///
    /// Returns `None` when the job is gone or no longer pending (a
    /// concurrent cancel won); the caller must then drop the id.
    pub async fn begin_attempt(&self, job_id: Uuid) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id)?;
        if job.state != JobState::Pending {
            return None;
        }
        job.state = JobState::Running;
        job.attempt_count += 1;
        if job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        Some(job.clone())
    }

    /// `Running → Completed`: stamp `completed_at`, store the result, and
    /// record the processing time in the metrics window.
    pub async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id)?;
        if job.state != JobState::Running {
            return None;
        }
        job.state = JobState::Completed;
        job.completed_at = Some(Utc::now());
        job.result = result;
        let snapshot = job.clone();

        if let Some(ms) = snapshot.processing_time_ms() {
            if inner.window.len() == inner.window_size {
                inner.window.pop_front();
            }
            inner.window.push_back(ms as f64);
        }
        Some(snapshot)
    }

    /// `Running → Failed`: record the failure description.
    pub async fn fail(&self, job_id: Uuid, error: &str) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id)?;
        if job.state != JobState::Running {
            return None;
        }
        job.state = JobState::Failed;
        job.error = Some(error.to_string());
        Some(job.clone())
    }

    /// `Failed → Retrying`: the retry controller has scheduled a requeue.
    pub async fn schedule_retry(&self, job_id: Uuid) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id)?;
        if job.state != JobState::Failed {
            return None;
        }
        job.state = JobState::Retrying;
        Some(job.clone())
    }

    /// `Retrying → Pending`: the backoff delay elapsed, the job is about to
    /// re-enter its lane.
    ///
    /// Returns `None` if the job was cancelled while waiting; the retry
    /// timer then drops the requeue.
    pub async fn requeue(&self, job_id: Uuid) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id)?;
        if job.state != JobState::Retrying {
            return None;
        }
        job.state = JobState::Pending;
        Some(job.clone())
    }

    /// `Failed → DeadLettered`: retries exhausted; stamp `completed_at`.
    pub async fn dead_letter(&self, job_id: Uuid) -> Option<Job> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id)?;
        if job.state != JobState::Failed {
            return None;
        }
        job.state = JobState::DeadLettered;
        job.completed_at = Some(Utc::now());
        Some(job.clone())
    }

    /// `Pending | Retrying → Cancelled`.
    ///
    /// Returns `None` for unknown ids, `Some(Ok(job))` when the cancel won,
    /// and `Some(Err(state))` when the job was already running or terminal
    /// (cancellation is advisory there; the caller reports `false`).
    pub async fn cancel(&self, job_id: Uuid) -> Option<std::result::Result<Job, JobState>> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(&job_id)?;
        match job.state {
            JobState::Pending | JobState::Retrying => {
                job.state = JobState::Cancelled;
                job.completed_at = Some(Utc::now());
                Some(Ok(job.clone()))
            }
            other => Some(Err(other)),
        }
    }

    /// Dead-lettered records known to this process, newest first.
    ///
    /// Inspection fallback for engines running without a durable store.
    pub async fn list_dead_lettered(&self, limit: usize) -> Vec<Job> {
        let inner = self.inner.lock().await;
        let mut dead: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.state == JobState::DeadLettered)
            .cloned()
            .collect();
        dead.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        dead.truncate(limit);
        dead
    }

    /// Derive the metrics snapshot from current tracker state plus the
    /// queue's lane depths.
    pub async fn metrics(&self, lane_depths: LaneDepths) -> MetricsSnapshot {
        let inner = self.inner.lock().await;

        let mut states = StateCounts::default();
        for job in inner.jobs.values() {
            states.record(job.state);
        }

        let finished = states.completed + states.dead_lettered;
        let success_rate = if finished == 0 {
            1.0
        } else {
            states.completed as f64 / finished as f64
        };

        let (avg, p95) = window_stats(&inner.window);

        MetricsSnapshot {
            total_submitted: inner.jobs.len() as u64,
            total_completed: states.completed,
            total_dead_lettered: states.dead_lettered,
            states,
            success_rate,
            avg_processing_ms: avg,
            p95_processing_ms: p95,
            lane_depths,
        }
    }
}

/// Average and p95 over the sliding window; zeros when empty.
fn window_stats(window: &VecDeque<f64>) -> (f64, f64) {
    if window.is_empty() {
        return (0.0, 0.0);
    }
    let avg = window.iter().sum::<f64>() / window.len() as f64;

    let mut sorted: Vec<f64> = window.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
    let p95 = sorted[rank.clamp(1, sorted.len()) - 1];

    (avg, p95)
}
