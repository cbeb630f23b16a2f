//! Job record, state machine, and metrics types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use uuid::Uuid;

use crate::defaults;

// =============================================================================
// PRIORITY
// =============================================================================

/// Priority class of a job, one lane per class.
///
/// Dequeue order is strict: a worker always drains `Critical` before looking
/// at `High`, and so on down to `Low`. A continuous stream of critical jobs
/// can starve lower lanes; that is accepted, since critical is reserved for
/// rare, fast safety-class work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// All priorities in dequeue-scan order (most urgent first).
    pub const ALL: [JobPriority; defaults::LANE_COUNT] = [
        JobPriority::Critical,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
    ];

    /// Lane index for this priority (0 = critical ... 3 = low).
    pub fn lane(self) -> usize {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }

    /// Stable string form, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobPriority::Critical => "critical",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
        }
    }

    /// Parse from the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(JobPriority::Critical),
            "high" => Some(JobPriority::High),
            "normal" => Some(JobPriority::Normal),
            "low" => Some(JobPriority::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Lifecycle state of a job.
///
/// Transitions:
/// `Pending → Running → {Completed | Failed}`;
/// `Failed → Retrying → Pending` until attempts are exhausted, then
/// `Failed → DeadLettered`; `Pending | Retrying → Cancelled` (external
/// trigger only). `Completed`, `DeadLettered`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Retrying,
    DeadLettered,
    Cancelled,
}

impl JobState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::DeadLettered | JobState::Cancelled
        )
    }

    /// Stable string form, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Retrying => "retrying",
            JobState::DeadLettered => "dead_lettered",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Parse from the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "running" => Some(JobState::Running),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "retrying" => Some(JobState::Retrying),
            "dead_lettered" => Some(JobState::DeadLettered),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// JOB RECORD
// =============================================================================

/// A unit of work moving through the engine.
///
/// `id`, `job_type`, and `priority` are immutable after submission. The
/// three timestamps are each stamped once, at their corresponding
/// transition; `completed_at` is set if and only if the state is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: JsonValue,
    pub priority: JobPriority,
    pub state: JobState,
    pub attempt_count: i32,
    pub max_attempts: i32,
    /// Hard wall-clock budget per attempt, in milliseconds.
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Success payload, present only on `Completed`.
    pub result: Option<JsonValue>,
    /// Last failure description, present on `Failed`/`Retrying`/`DeadLettered`.
    pub error: Option<String>,
}

impl Job {
    /// Per-attempt timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Wall-clock processing time (`completed_at - started_at`) in
    /// milliseconds, if both ends have been stamped.
    pub fn processing_time_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Parameters for submitting a job.
///
/// `max_attempts` and `timeout` fall back to the engine defaults when not
/// set. The priority defaults to `Normal`.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_type: String,
    pub payload: JsonValue,
    pub priority: JobPriority,
    pub max_attempts: Option<i32>,
    pub timeout: Option<Duration>,
}

impl JobRequest {
    /// Create a request for the given job type and payload.
    pub fn new(job_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: JobPriority::default(),
            max_attempts: None,
            timeout: None,
        }
    }

    /// Set the priority lane.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the retry ceiling for this job.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Override the per-attempt timeout for this job.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// =============================================================================
// METRICS
// =============================================================================

/// Current depth of each priority lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneDepths {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl LaneDepths {
    /// Build from lane-indexed counts (0 = critical ... 3 = low).
    pub fn from_lanes(lanes: [usize; defaults::LANE_COUNT]) -> Self {
        Self {
            critical: lanes[0],
            high: lanes[1],
            normal: lanes[2],
            low: lanes[3],
        }
    }

    /// Total jobs across all lanes.
    pub fn total(&self) -> usize {
        self.critical + self.high + self.normal + self.low
    }
}

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub retrying: u64,
    pub dead_lettered: u64,
    pub cancelled: u64,
}

impl StateCounts {
    /// Increment the counter for `state`.
    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Pending => self.pending += 1,
            JobState::Running => self.running += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
            JobState::Retrying => self.retrying += 1,
            JobState::DeadLettered => self.dead_lettered += 1,
            JobState::Cancelled => self.cancelled += 1,
        }
    }
}

/// Read-only aggregate derived from tracker state.
///
/// Never authoritative: every field is reconstructible from the job records
/// and the queue, so metrics cannot drift from job state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// All jobs ever known to this process (any state).
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_dead_lettered: u64,
    pub states: StateCounts,
    /// `completed / (completed + dead_lettered)`; 1.0 when nothing has
    /// finished either way yet.
    pub success_rate: f64,
    /// Rolling average processing time over the metrics window, in ms.
    pub avg_processing_ms: f64,
    /// p95 processing time over the metrics window, in ms.
    pub p95_processing_ms: f64,
    pub lane_depths: LaneDepths,
}
