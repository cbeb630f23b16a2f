//! # conveyor-jobs
//!
//! Priority-based asynchronous job processing engine.
//!
//! This crate provides:
//! - Four-lane priority queueing (critical → high → normal → low, FIFO
//!   within each lane, strict precedence across lanes)
//! - A fixed pool of concurrent workers with hard per-attempt timeouts
//! - Retry with exponential backoff and a durable dead-letter archive
//! - Lifecycle tracking with derived metrics and a worker event stream
//!
//! ## Example
//!
//! ```ignore
//! use conveyor_jobs::{EngineBuilder, EngineConfig, NoOpHandler};
//! use conveyor_core::{JobPriority, JobRequest};
//! use serde_json::json;
//!
//! let engine = EngineBuilder::new()
//!     .with_config(EngineConfig::from_env())
//!     .with_handler(NoOpHandler::new("echo"))
//!     .build();
//!
//! // Start workers and get the submission handle
//! let handle = engine.start().await?;
//!
//! let job_id = handle
//!     .submit(JobRequest::new("echo", json!({"n": 1})).with_priority(JobPriority::High))
//!     .await?;
//!
//! let job = handle.status(job_id).await?;
//! println!("{}: {}", job.id, job.state);
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod tracker;
pub mod worker;

// Re-export core types
pub use conveyor_core::*;

// Re-export engine types
pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler};
pub use queue::PriorityQueueSet;
pub use registry::HandlerRegistry;
pub use retry::RetryPolicy;
pub use tracker::JobTracker;
pub use worker::{EngineBuilder, EngineConfig, EngineHandle, JobEngine, WorkerEvent};

/// Default maximum attempts for failed jobs.
pub const DEFAULT_MAX_ATTEMPTS: i32 = conveyor_core::defaults::JOB_MAX_ATTEMPTS;

/// Default polling interval for idle workers (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = conveyor_core::defaults::JOB_POLL_INTERVAL_MS;
