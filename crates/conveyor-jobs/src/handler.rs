//! Job handler contract and execution context.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use conveyor_core::Job;

/// Context provided to job handlers.
pub struct JobContext {
    /// Snapshot of the job being processed.
    pub job: Job,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    /// Get the job id.
    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// Get the job payload.
    pub fn payload(&self) -> &JsonValue {
        &self.job.payload
    }

    /// Current execution attempt (1-based; 1 on the first run).
    pub fn attempt(&self) -> i32 {
        self.job.attempt_count
    }
}

/// Result of job execution.
///
/// `Failed` and `Retry` are handled identically by the retry controller;
/// `Retry` exists so handlers can signal "transient, try again" explicitly.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed with an error message.
    Failed(String),
    /// Job hit a transient condition and should be retried.
    Retry(String),
}

/// Trait for job handlers.
///
/// Handlers are registered with the engine builder before dispatch starts
/// and must respect the job's timeout cooperatively; the worker pool also
/// enforces a hard timeout independently.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type string this handler processes.
    fn job_type(&self) -> &str;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: String,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
        }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> &str {
        &self.job_type
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Success(None)
    }
}
