//! Structured logging schema and field name constants for conveyor.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools (Loki, Elasticsearch) can query by standardized
//! field names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (queue scans, depths) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "engine", "queue", "tracker", "store", "db"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "worker", "retry", "pool", "dead_letter"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "submit", "dispatch", "requeue", "archive"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type string.
pub const JOB_TYPE: &str = "job_type";

/// Priority lane of the job.
pub const PRIORITY: &str = "priority";

/// Lifecycle state after a transition.
pub const STATE: &str = "state";

/// Execution attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

/// Index of the worker task handling the job.
pub const WORKER_ID: &str = "worker_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Retry delay in milliseconds.
pub const DELAY_MS: &str = "delay_ms";

/// Total jobs currently queued across all lanes.
pub const QUEUE_DEPTH: &str = "queue_depth";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
