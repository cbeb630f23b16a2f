//! Centralized default constants for the conveyor job engine.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates should reference these constants instead of defining
//! their own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// QUEUE
// =============================================================================

/// Number of priority lanes (critical, high, normal, low).
pub const LANE_COUNT: usize = 4;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Default maximum execution attempts before a job is dead-lettered.
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Default hard per-attempt timeout in milliseconds (5 minutes).
pub const JOB_TIMEOUT_MS: u64 = 300_000;

/// Default number of concurrent workers in the pool.
pub const JOB_WORKERS: usize = 4;

/// Default safety-net poll interval in milliseconds.
///
/// Workers are woken by the queue's notify handle on every insertion; this
/// interval only covers edge cases (recovery re-inserts, a notify lost to a
/// race between check and wait).
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

// =============================================================================
// RETRY / BACKOFF
// =============================================================================

/// Default base delay for exponential retry backoff, in milliseconds.
pub const BACKOFF_BASE_DELAY_MS: u64 = 1_000;

/// Default cap on the retry backoff delay, in milliseconds (60 seconds).
pub const BACKOFF_MAX_DELAY_MS: u64 = 60_000;

// =============================================================================
// METRICS
// =============================================================================

/// Default sliding-window size for processing-time statistics
/// (last N completions).
pub const METRICS_WINDOW: usize = 1_000;

// =============================================================================
// EVENTS
// =============================================================================

/// Default worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// DEAD LETTERS
// =============================================================================

/// Default page size when listing dead-lettered jobs for inspection.
pub const DEAD_LETTER_LIST_LIMIT: i64 = 50;
