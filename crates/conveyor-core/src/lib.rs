//! # conveyor-core
//!
//! Core types, traits, and abstractions for the conveyor job engine.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other conveyor crates depend on: the job record and its state
//! machine, the error taxonomy, shared default constants, the structured
//! logging field schema, and the seams the engine consumes as black boxes
//! (durable store, terminal callbacks).

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::{
    Job, JobPriority, JobRequest, JobState, LaneDepths, MetricsSnapshot, StateCounts,
};
pub use traits::{DurableStore, JobCallback, MemoryStore, NoOpCallback};
pub use uuid_utils::{is_v7, new_v7};
